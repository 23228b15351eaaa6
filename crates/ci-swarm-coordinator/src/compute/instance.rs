//! Instance lifecycle operations

use super::ComputeService;
use super::types::{LaunchInstanceConfig, SwarmLaunchConfig};
use super::user_data::{SwarmBootstrap, generate_swarm_user_data, validate_agent_name};
use crate::collaborators::CredentialResolver;
use crate::control_plane::{CommandArgs, Result, SwarmError};
use chrono::Utc;
use ci_swarm_common::tags::{
    MAX_TAGS_PER_RESOURCE, TAG_RUN_ID, merge_name_tag, with_bookkeeping_tags,
};
use ci_swarm_common::{CommandRunner, TagSet, is_burstable};
use serde::Serialize;
use tracing::{debug, info, instrument};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Tag<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TagSpecification<'a> {
    resource_type: &'a str,
    tags: Vec<Tag<'a>>,
}

fn tag_list(tags: &TagSet) -> Vec<Tag<'_>> {
    tags.iter()
        .map(|(key, value)| Tag { key, value })
        .collect()
}

/// `--tag-specifications` value for a new instance
pub(crate) fn tag_specification_json(tags: &TagSet) -> Result<String> {
    let spec = [TagSpecification {
        resource_type: "instance",
        tags: tag_list(tags),
    }];
    serde_json::to_string(&spec)
        .map_err(|e| SwarmError::invalid(format!("tags cannot be encoded: {e}")))
}

/// Reject empty keys and tag sets above the per-resource cap.
fn validate_tags(tags: &TagSet) -> Result<()> {
    if tags.len() > MAX_TAGS_PER_RESOURCE {
        return Err(SwarmError::invalid(format!(
            "{} tags exceed the limit of {} per resource",
            tags.len(),
            MAX_TAGS_PER_RESOURCE
        )));
    }
    if tags.keys().any(|k| k.trim().is_empty()) {
        return Err(SwarmError::invalid("tag keys cannot be empty"));
    }
    Ok(())
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SwarmError::invalid(format!("{field} is required")));
    }
    Ok(())
}

fn validate_launch(config: &LaunchInstanceConfig) -> Result<()> {
    require(&config.ami_id, "image id")?;
    require(&config.key_pair, "key pair")?;
    require(&config.instance_type, "instance type")?;
    require(&config.name, "name")?;
    if config.security_group_ids.is_empty() {
        return Err(SwarmError::invalid("at least one security group is required"));
    }
    for sg in &config.security_group_ids {
        require(sg, "security group id")?;
    }
    Ok(())
}

fn validate_instance_ids(ids: &[String]) -> Result<()> {
    for id in ids {
        require(id, "instance id")?;
    }
    Ok(())
}

impl<R: CommandRunner, K: CredentialResolver> ComputeService<R, K> {
    /// Launch one instance and return its ID.
    ///
    /// A `Name=<name>` tag is added unless the caller already set `Name`.
    /// Burstable families get `--credit-specification` from the service's
    /// credit mode.
    #[instrument(skip_all, fields(name = %config.name, instance_type = %config.instance_type))]
    pub async fn launch_instance(&self, config: LaunchInstanceConfig) -> Result<String> {
        const OPERATION: &str = "ec2 run-instances";

        validate_launch(&config)?;
        let LaunchInstanceConfig {
            ami_id,
            key_pair,
            instance_type,
            name,
            tags,
            security_group_ids,
            user_data,
        } = config;

        let tags = merge_name_tag(tags, &name);
        validate_tags(&tags)?;

        let mut args = CommandArgs::new()
            .flag("--image-id", ami_id.as_str())
            .flag("--instance-type", instance_type.as_str())
            .flag("--key-name", key_pair.as_str())
            .flag("--count", "1")
            .flag_list("--security-group-ids", security_group_ids.iter().map(String::as_str))
            .flag("--tag-specifications", tag_specification_json(&tags)?);

        if let Some(user_data) = user_data {
            debug!(user_data_len = user_data.len(), "Attaching user data");
            args = args.flag("--user-data", user_data);
        }

        if is_burstable(&instance_type) {
            let credit_mode = self.settings.credit_mode;
            debug!(%credit_mode, "Burstable instance type, setting credit specification");
            args = args.flag("--credit-specification", credit_mode.credit_specification());
        }

        info!(ami = %ami_id, tags = tags.len(), "Launching instance");

        let result = self.client.execute("run-instances", args).await?;
        let instance_id = result
            .require_str(OPERATION, "/Instances/0/InstanceId")?
            .to_string();

        info!(instance_id = %instance_id, "Instance launched");
        Ok(instance_id)
    }

    /// Launch an instance that registers itself as a CI swarm agent.
    ///
    /// The name is validated before anything else, so a bad name never
    /// reaches the credential resolver or the control plane.
    #[instrument(skip_all, fields(name = %config.name))]
    pub async fn launch_swarm_instance(&self, config: SwarmLaunchConfig) -> Result<String> {
        validate_agent_name(&config.name)?;
        require(&config.agent_credentials_ref, "agent credentials reference")?;
        if self.settings.swarm.controller_url.trim().is_empty() {
            return Err(SwarmError::invalid("swarm controller URL is not configured"));
        }

        let SwarmLaunchConfig {
            ami_id,
            key_pair,
            instance_type,
            name,
            mut tags,
            security_group_ids,
            agent_credentials_ref,
            agent_binary_path,
            run_id,
        } = config;

        if let Some(run_id) = run_id {
            tags.entry(TAG_RUN_ID.to_string()).or_insert(run_id);
        }
        let tags = with_bookkeeping_tags(tags, Utc::now());

        let launch = LaunchInstanceConfig::new(ami_id, key_pair, instance_type, name)
            .with_tags(tags)
            .with_security_groups(security_group_ids);
        validate_launch(&launch)?;
        validate_tags(&merge_name_tag(launch.tags.clone(), &launch.name))?;

        let user_data = {
            let credential = self
                .credentials
                .resolve_scoped_credential(&agent_credentials_ref)
                .await?;
            let binary_path = agent_binary_path
                .as_deref()
                .unwrap_or(&self.settings.swarm.agent_binary_path);
            generate_swarm_user_data(
                &SwarmBootstrap {
                    agent_name: &launch.name,
                    agent_binary_path: binary_path,
                    settings: &self.settings.swarm,
                },
                &credential,
            )?
        };

        info!(credentials_ref = %agent_credentials_ref, "Launching swarm agent");
        self.launch_instance(launch.with_user_data(user_data)).await
    }

    async fn instance_batch(&self, command: &str, instance_ids: &[String]) -> Result<()> {
        if instance_ids.is_empty() {
            debug!(command, "No instances, skipping");
            return Ok(());
        }
        validate_instance_ids(instance_ids)?;

        info!(command, count = instance_ids.len(), instance_ids = ?instance_ids, "Issuing batch");
        self.client
            .execute(
                command,
                CommandArgs::new().flag_list("--instance-ids", instance_ids.iter().map(String::as_str)),
            )
            .await?;
        Ok(())
    }

    /// Stop instances in one batched call
    pub async fn stop_instances(&self, instance_ids: &[String]) -> Result<()> {
        self.instance_batch("stop-instances", instance_ids).await
    }

    /// Terminate instances in one batched call.
    ///
    /// Idempotent: terminating an already-terminated instance succeeds
    /// remotely, and an ID the control plane no longer knows is treated as
    /// already gone. A not-found error rejects the whole batch, so the IDs
    /// it names are dropped and the rest are terminated in a second call.
    pub async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        let err = match self.instance_batch("terminate-instances", instance_ids).await {
            Err(e) if e.is_not_found() => e,
            other => return other,
        };
        if instance_ids.len() == 1 {
            debug!(instance_ids = ?instance_ids, "Instance already gone");
            return Ok(());
        }

        let missing = missing_instance_ids(&err);
        let remaining: Vec<String> = instance_ids
            .iter()
            .filter(|id| !missing.contains(&id.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() || remaining.len() == instance_ids.len() {
            return Err(err);
        }
        debug!(missing = ?missing, "Instances already gone");
        if remaining.is_empty() {
            return Ok(());
        }
        self.instance_batch("terminate-instances", &remaining).await
    }

    /// Reboot instances in one batched call
    pub async fn reboot_instances(&self, instance_ids: &[String]) -> Result<()> {
        self.instance_batch("reboot-instances", instance_ids).await
    }

    /// Replace or add tags on a resource (at most 50)
    pub async fn tag_resource(&self, resource_id: &str, tags: &TagSet) -> Result<()> {
        require(resource_id, "resource id")?;
        if tags.is_empty() {
            return Err(SwarmError::invalid("no tags given"));
        }
        validate_tags(tags)?;

        let tags_json = serde_json::to_string(&tag_list(tags))
            .map_err(|e| SwarmError::invalid(format!("tags cannot be encoded: {e}")))?;

        info!(resource_id, count = tags.len(), "Tagging resource");
        self.client
            .execute(
                "create-tags",
                CommandArgs::new()
                    .flag_list("--resources", [resource_id])
                    .flag("--tags", tags_json),
            )
            .await?;
        Ok(())
    }
}

/// Instance IDs named in a not-found message such as
/// `The instance IDs 'i-1, i-2' do not exist`
fn missing_instance_ids(err: &SwarmError) -> Vec<&str> {
    let SwarmError::Unavailable { message, .. } = err else {
        return Vec::new();
    };
    message
        .split(|c: char| c == '\'' || c == ',' || c.is_whitespace())
        .filter(|token| token.starts_with("i-"))
        .collect()
}
