//! Console screenshot and serial console output

use super::ComputeService;
use crate::collaborators::CredentialResolver;
use crate::control_plane::{CommandArgs, Result, SwarmError};
use base64::Engine;
use ci_swarm_common::CommandRunner;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    // The CLI wraps long payloads
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD.decode(compact)
}

impl<R: CommandRunner, K: CredentialResolver> ComputeService<R, K> {
    /// Save a console screenshot and return where it was written.
    ///
    /// Without `file_name` the image goes to `<instance_id>.jpg` in the
    /// working directory.
    pub async fn get_screenshot(
        &self,
        instance_id: &str,
        file_name: Option<&Path>,
    ) -> Result<PathBuf> {
        const OPERATION: &str = "ec2 get-console-screenshot";

        if instance_id.trim().is_empty() {
            return Err(SwarmError::invalid("instance id is required"));
        }

        let result = self
            .client
            .execute(
                "get-console-screenshot",
                CommandArgs::new().flag("--instance-id", instance_id),
            )
            .await?;
        let encoded = result.require_str(OPERATION, "/ImageData")?;

        let path = file_name
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(format!("{instance_id}.jpg")));

        let image = decode_base64(encoded).map_err(|e| SwarmError::Io {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        tokio::fs::write(&path, &image)
            .await
            .map_err(|source| SwarmError::Io {
                path: path.clone(),
                source,
            })?;

        info!(instance_id, path = %path.display(), bytes = image.len(), "Saved console screenshot");
        Ok(path)
    }

    /// Fetch the serial console output of an instance.
    ///
    /// `None` while the instance has not produced any output yet. The
    /// payload is base64 on the wire; text that does not decode is returned
    /// as-is.
    pub async fn get_console_output(&self, instance_id: &str) -> Result<Option<String>> {
        if instance_id.trim().is_empty() {
            return Err(SwarmError::invalid("instance id is required"));
        }

        let result = self
            .client
            .execute(
                "get-console-output",
                CommandArgs::new().flag("--instance-id", instance_id),
            )
            .await?;

        let Some(output) = result.str_field("/Output").filter(|s| !s.is_empty()) else {
            debug!(instance_id, "No console output yet");
            return Ok(None);
        };

        let text = decode_base64(output)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| output.to_string());
        Ok(Some(text))
    }
}
