//! Region and credential scope for control-plane calls

use super::error::{Result, SwarmError};
use ci_swarm_common::Region;

/// Immutable region + credential scope for one remote service.
///
/// Validated eagerly: a context that exists is always usable.
///
/// # Example
/// ```ignore
/// let ec2 = ServiceContext::new("us-east-2", "ci", "ec2")?;
/// let lambda = ec2.for_service("lambda")?;
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceContext {
    region: Region,
    credentials_ref: String,
    service_name: String,
}

impl ServiceContext {
    /// Build a context, rejecting unsupported regions and empty handles.
    pub fn new(region: &str, credentials_ref: &str, service_name: &str) -> Result<Self> {
        let region = Region::parse(region).ok_or_else(|| {
            SwarmError::invalid(format!(
                "unsupported region '{}' (supported: {})",
                region,
                Region::supported().join(", ")
            ))
        })?;
        Self::with_region(region, credentials_ref, service_name)
    }

    /// Build a context from an already-parsed region.
    pub fn with_region(region: Region, credentials_ref: &str, service_name: &str) -> Result<Self> {
        let credentials_ref = credentials_ref.trim();
        if credentials_ref.is_empty() {
            return Err(SwarmError::invalid("credentials reference cannot be empty"));
        }
        if credentials_ref.chars().any(char::is_whitespace) {
            return Err(SwarmError::invalid(format!(
                "credentials reference '{credentials_ref}' contains whitespace"
            )));
        }
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(SwarmError::invalid("service name cannot be empty"));
        }

        Ok(Self {
            region,
            credentials_ref: credentials_ref.to_string(),
            service_name: service_name.to_string(),
        })
    }

    /// Same region and credentials, different service.
    pub fn for_service(&self, service_name: &str) -> Result<Self> {
        Self::with_region(self.region, &self.credentials_ref, service_name)
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn credentials_ref(&self) -> &str {
        &self.credentials_ref
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("region", &self.region)
            .field("service", &self.service_name)
            .finish_non_exhaustive()
    }
}
