//! Supported region allow-list
//!
//! Every control-plane call is scoped to one of these regions. Anything else
//! is rejected when a service context is constructed, never on first use.

use serde::{Deserialize, Serialize};

/// Regions the coordinator is allowed to operate in
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
    strum::IntoStaticStr,
)]
pub enum Region {
    #[strum(serialize = "us-east-1")]
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[strum(serialize = "us-east-2")]
    #[serde(rename = "us-east-2")]
    UsEast2,
    #[strum(serialize = "us-west-1")]
    #[serde(rename = "us-west-1")]
    UsWest1,
    #[strum(serialize = "us-west-2")]
    #[serde(rename = "us-west-2")]
    UsWest2,
    #[strum(serialize = "eu-west-1")]
    #[serde(rename = "eu-west-1")]
    EuWest1,
    #[strum(serialize = "eu-west-2")]
    #[serde(rename = "eu-west-2")]
    EuWest2,
    #[strum(serialize = "eu-central-1")]
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[strum(serialize = "ap-southeast-1")]
    #[serde(rename = "ap-southeast-1")]
    ApSoutheast1,
    #[strum(serialize = "ap-southeast-2")]
    #[serde(rename = "ap-southeast-2")]
    ApSoutheast2,
    #[strum(serialize = "ap-northeast-1")]
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
}

impl Region {
    /// Parse from string, returning None for regions outside the allow-list
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }

    /// All supported region names, for error messages and `--help`
    pub fn supported() -> Vec<&'static str> {
        use strum::IntoEnumIterator;
        Self::iter().map(<&'static str>::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_regions() {
        for name in Region::supported() {
            let region = Region::parse(name).unwrap();
            assert_eq!(region.to_string(), name);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(Region::parse("mars-north-1").is_none());
        assert!(Region::parse("").is_none());
        assert!(Region::parse("US-EAST-1").is_none());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(Region::parse(" eu-west-1 "), Some(Region::EuWest1));
    }

    #[test]
    fn test_serde_uses_region_names() {
        let json = serde_json::to_string(&Region::ApNortheast1).unwrap();
        assert_eq!(json, "\"ap-northeast-1\"");
        let back: Region = serde_json::from_str("\"us-west-2\"").unwrap();
        assert_eq!(back, Region::UsWest2);
    }
}
