//! Burstable instance families and CPU credit billing
//!
//! Burstable (`t*`) instances accept a credit specification. Everything else
//! rejects it, so the flag is only ever attached to these families.

use serde::{Deserialize, Serialize};

/// Instance type prefixes that bill CPU credits
const BURSTABLE_PREFIXES: &[&str] = &["t2.", "t3.", "t3a.", "t4g."];

/// CPU credit mode for burstable instances
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CreditMode {
    /// Capped burst billing
    #[default]
    Standard,
    /// Sustained burst above baseline, billed per vCPU-hour
    Unlimited,
}

impl CreditMode {
    /// Value for `--credit-specification`
    pub fn credit_specification(self) -> String {
        format!("CpuCredits={self}")
    }
}

/// Check whether an instance type belongs to a burstable family
pub fn is_burstable(instance_type: &str) -> bool {
    BURSTABLE_PREFIXES
        .iter()
        .any(|prefix| instance_type.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burstable_families() {
        assert!(is_burstable("t3.medium"));
        assert!(is_burstable("t3a.large"));
        assert!(is_burstable("t4g.small"));
        assert!(is_burstable("t2.micro"));
        assert!(!is_burstable("c7i.xlarge"));
        assert!(!is_burstable("m5.large"));
        assert!(!is_burstable("trn1.2xlarge"));
        assert!(!is_burstable(""));
    }

    #[test]
    fn test_credit_mode_default_is_standard() {
        assert_eq!(CreditMode::default(), CreditMode::Standard);
        assert_eq!(
            CreditMode::default().credit_specification(),
            "CpuCredits=standard"
        );
    }

    #[test]
    fn test_credit_mode_parse() {
        assert_eq!("unlimited".parse::<CreditMode>().ok(), Some(CreditMode::Unlimited));
        assert_eq!("Standard".parse::<CreditMode>().ok(), Some(CreditMode::Standard));
        assert!("turbo".parse::<CreditMode>().is_err());
    }
}
