//! Resource tag constants for ci-swarm
//!
//! Every instance the coordinator launches carries a `Name` tag plus a
//! couple of bookkeeping tags used to find strays after a crash.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `Name` | Instance name, defaulted to the launch name |
//! | `ci-swarm:tool` | Static identifier ("ci-swarm") |
//! | `ci-swarm:run-id` | Run identifier supplied by the caller (optional) |
//! | `ci-swarm:created-at` | RFC 3339 creation timestamp |

use std::collections::BTreeMap;

/// Tag key shown as the instance name in consoles
pub const TAG_NAME: &str = "Name";

/// Tag key for tool identification - all ci-swarm instances have this
pub const TAG_TOOL: &str = "ci-swarm:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "ci-swarm";

/// Tag key for the run identifier
pub const TAG_RUN_ID: &str = "ci-swarm:run-id";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "ci-swarm:created-at";

/// Hard limit on user tags per resource
pub const MAX_TAGS_PER_RESOURCE: usize = 50;

/// Tag mapping with unique keys and stable iteration order
pub type TagSet = BTreeMap<String, String>;

/// Add `Name=name` unless the caller already set a `Name` tag.
pub fn merge_name_tag(mut tags: TagSet, name: &str) -> TagSet {
    tags.entry(TAG_NAME.to_string())
        .or_insert_with(|| name.to_string());
    tags
}

/// Add the bookkeeping tags, never overriding caller-provided values.
pub fn with_bookkeeping_tags(mut tags: TagSet, created_at: chrono::DateTime<chrono::Utc>) -> TagSet {
    tags.entry(TAG_TOOL.to_string())
        .or_insert_with(|| TAG_TOOL_VALUE.to_string());
    tags.entry(TAG_CREATED_AT.to_string())
        .or_insert_with(|| format_created_at(created_at));
    tags
}

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Helper to parse creation timestamp from tags
pub fn parse_created_at(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Parse `key=value` pairs (as given on the command line) into a tag set.
pub fn parse_tag_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<TagSet, String> {
    let mut tags = TagSet::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("tag '{pair}' is not in key=value form"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("tag '{pair}' has an empty key"));
        }
        tags.insert(key.to_string(), value.trim().to_string());
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_name_tag_defaults_to_name() {
        let merged = merge_name_tag(TagSet::new(), "agent-1");
        assert_eq!(merged, tags(&[("Name", "agent-1")]));
    }

    #[test]
    fn test_merge_name_tag_keeps_explicit_name() {
        let merged = merge_name_tag(tags(&[("Name", "custom"), ("env", "ci")]), "agent-1");
        assert_eq!(merged, tags(&[("Name", "custom"), ("env", "ci")]));
    }

    #[test]
    fn test_bookkeeping_tags_do_not_override() {
        let now = Utc::now();
        let merged = with_bookkeeping_tags(tags(&[(TAG_TOOL, "other")]), now);
        assert_eq!(merged.get(TAG_TOOL).map(String::as_str), Some("other"));
        assert!(merged.contains_key(TAG_CREATED_AT));
    }

    #[test]
    fn test_format_parse_roundtrip() {
        let now = Utc::now();
        let parsed = parse_created_at(&format_created_at(now)).unwrap();
        let diff = (now - parsed).num_seconds().abs();
        assert!(diff <= 1, "Roundtrip diff {} > 1 second", diff);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert!(parse_created_at("not a timestamp").is_none());
        assert!(parse_created_at("").is_none());
    }

    #[test]
    fn test_parse_tag_pairs() {
        let parsed = parse_tag_pairs(&["env=ci", "team = build", "empty="]).unwrap();
        assert_eq!(
            parsed,
            tags(&[("env", "ci"), ("team", "build"), ("empty", "")])
        );
        assert!(parse_tag_pairs(&["novalue"]).is_err());
        assert!(parse_tag_pairs(&["=x"]).is_err());
    }
}
