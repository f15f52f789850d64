//! Build record normalization.
//!
//! Build records arrive as loosely structured JSON from the orchestration
//! API. Everything the lineage graph needs is checked up front here; a record
//! missing any required field yields `None` and is skipped by the caller.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use crate::constants::{annotations, NANOS_PER_SECOND};

/// An image reference, conventionally `name:version`
pub type Tag = String;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBuild {
    #[serde(default)]
    pub metadata: RawMetadata,
    #[serde(default)]
    pub status: RawStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadata {
    pub name: Option<String>,
    pub creation_timestamp: Option<String>,
    pub annotations: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatus {
    pub phase: Option<String>,
    pub start_timestamp: Option<String>,
    pub completion_timestamp: Option<String>,
    pub duration: Option<Value>,
}

/// Decoded `repositories` annotation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Repositories {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub unique: Vec<String>,
}

/// Decoded `plugins-metadata` annotation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginsMetadata {
    #[serde(default)]
    pub durations: BTreeMap<String, f64>,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

impl RawBuild {
    /// Deserialize a record leniently; anything that is not an object-shaped
    /// build is `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        RawBuild::deserialize(value).ok()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    pub fn repositories(&self) -> Option<Repositories> {
        let raw = self.annotation(annotations::REPOSITORIES)?;
        serde_json::from_str(raw).ok()
    }

    pub fn plugins_metadata(&self) -> Option<PluginsMetadata> {
        let raw = self.annotation(annotations::PLUGINS_METADATA)?;
        serde_json::from_str(raw).ok()
    }

    /// Uploaded archive size carried in the `tar_metadata` annotation
    pub fn size_hint(&self) -> Option<u64> {
        let raw = self.annotation(annotations::TAR_METADATA)?;
        let md: Value = serde_json::from_str(raw).ok()?;
        number_as_f64(md.get("size")?).map(|s| s as u64)
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_deref().and_then(parse_timestamp)
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.status.start_timestamp.as_deref().and_then(parse_timestamp)
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.status
            .completion_timestamp
            .as_deref()
            .and_then(parse_timestamp)
    }

    /// Build duration in seconds; the API reports nanoseconds
    pub fn duration_secs(&self) -> Option<f64> {
        self.status
            .duration
            .as_ref()
            .and_then(number_as_f64)
            .map(|ns| ns / NANOS_PER_SECOND)
    }
}

/// Normalized per-build data consumed by the lineage graph
#[derive(Debug, Clone, PartialEq)]
pub struct BuildFact {
    pub name: Option<String>,
    pub phase: Option<String>,
    pub base_image: Tag,
    /// Produced tags in record order, duplicates removed. Never empty.
    pub produced_tags: Vec<Tag>,
    pub when: DateTime<Utc>,
    pub duration_secs: f64,
    pub image_id: String,
    /// First `unique` repository reference, registry stripped
    pub lookup_image: String,
    pub size_hint: Option<u64>,
    pub plugin_durations: BTreeMap<String, f64>,
}

/// Why a record was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotABuild,
    MissingBaseImage,
    MissingRepositories,
    NoPrimaryTags,
    NoUniqueTags,
    MissingImageId,
    MissingTimestamp,
    MissingDuration,
}

impl BuildFact {
    /// Normalize one raw record. Incomplete records are dropped silently.
    pub fn from_record(value: &Value) -> Option<Self> {
        match Self::try_from_record(value) {
            Ok(fact) => Some(fact),
            Err(reason) => {
                tracing::debug!(?reason, "Skipping build record");
                None
            }
        }
    }

    pub fn try_from_record(value: &Value) -> std::result::Result<Self, SkipReason> {
        let raw = RawBuild::from_value(value).ok_or(SkipReason::NotABuild)?;

        let base_image = raw
            .annotation(annotations::BASE_IMAGE_NAME)
            .ok_or(SkipReason::MissingBaseImage)?;
        let repositories = raw.repositories().ok_or(SkipReason::MissingRepositories)?;

        let mut produced_tags: Vec<Tag> = Vec::with_capacity(repositories.primary.len());
        for repo in &repositories.primary {
            let tag = strip_registry(repo).to_string();
            if !produced_tags.contains(&tag) {
                produced_tags.push(tag);
            }
        }
        if produced_tags.is_empty() {
            return Err(SkipReason::NoPrimaryTags);
        }

        let lookup_image = repositories
            .unique
            .first()
            .map(|u| strip_registry(u).to_string())
            .ok_or(SkipReason::NoUniqueTags)?;
        let image_id = raw
            .annotation(annotations::IMAGE_ID)
            .ok_or(SkipReason::MissingImageId)?
            .to_string();
        let when = raw
            .started()
            .or_else(|| raw.completed())
            .ok_or(SkipReason::MissingTimestamp)?;
        let duration_secs = raw.duration_secs().ok_or(SkipReason::MissingDuration)?;

        Ok(Self {
            name: raw.metadata.name.clone(),
            phase: raw.status.phase.clone(),
            base_image: strip_registry(base_image).to_string(),
            produced_tags,
            when,
            duration_secs,
            image_id,
            lookup_image,
            size_hint: raw.size_hint(),
            plugin_durations: raw
                .plugins_metadata()
                .map(|md| md.durations)
                .unwrap_or_default(),
        })
    }

    /// Name the registry should report for this build's image: the first
    /// produced tag with a pinned version, else the first tag.
    pub fn expected_display_name(&self) -> &str {
        self.produced_tags
            .iter()
            .find(|t| !is_latest(t))
            .unwrap_or(&self.produced_tags[0])
    }
}

/// Read a JSON array of build records from a file, or from stdin when no
/// path is given
pub fn load_records(path: Option<&Path>) -> crate::Result<Vec<Value>> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&content)?)
}

/// Drop a leading registry host (anything with a `.` or `:`, or `localhost`)
pub fn strip_registry(image: &str) -> &str {
    match image.split_once('/') {
        Some((host, rest))
            if host.contains('.') || host.contains(':') || host == "localhost" =>
        {
            rest
        }
        _ => image,
    }
}

/// Split a tag on its first `:` into name and version
pub fn split_tag(tag: &str) -> (&str, Option<&str>) {
    match tag.split_once(':') {
        Some((name, version)) => (name, Some(version)),
        None => (tag, None),
    }
}

pub fn is_latest(tag: &str) -> bool {
    split_tag(tag).1 == Some(crate::constants::LATEST_VERSION)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn number_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "metadata": {
                "name": "foo-1",
                "creationTimestamp": "2016-03-01T10:00:00Z",
                "annotations": {
                    "base-image-name": "registry.example.com/rhel7:7.2-40",
                    "repositories": concat!(
                        "{\"primary\": [\"registry.example.com/foo:1.0-3\", ",
                        "\"registry.example.com/foo:latest\"], ",
                        "\"unique\": [\"registry.example.com/foo:20160301\"]}"
                    ),
                    "image-id": "abc123",
                    "tar_metadata": "{\"size\": 2097152}",
                    "plugins-metadata": "{\"durations\": {\"pulp_push\": 12.5}, \"errors\": {}}"
                }
            },
            "status": {
                "phase": "Complete",
                "startTimestamp": "2016-03-01T10:01:00Z",
                "completionTimestamp": "2016-03-01T10:11:00Z",
                "duration": 600000000000u64
            }
        })
    }

    #[test]
    fn test_normalize_full_record() {
        let fact = BuildFact::from_record(&record()).expect("record should normalize");
        assert_eq!(fact.base_image, "rhel7:7.2-40");
        assert_eq!(fact.produced_tags, vec!["foo:1.0-3", "foo:latest"]);
        assert_eq!(fact.lookup_image, "foo:20160301");
        assert_eq!(fact.image_id, "abc123");
        assert_eq!(fact.duration_secs, 600.0);
        assert_eq!(fact.size_hint, Some(2097152));
        assert_eq!(fact.plugin_durations.get("pulp_push"), Some(&12.5));
        assert_eq!(fact.when, parse_timestamp("2016-03-01T10:01:00Z").unwrap());
        assert_eq!(fact.expected_display_name(), "foo:1.0-3");
    }

    #[test]
    fn test_missing_field_skips() {
        let mut value = record();
        value["metadata"]["annotations"]
            .as_object_mut()
            .unwrap()
            .remove("image-id");
        assert_eq!(
            BuildFact::try_from_record(&value),
            Err(SkipReason::MissingImageId)
        );

        let mut value = record();
        value["status"].as_object_mut().unwrap().remove("duration");
        assert!(BuildFact::from_record(&value).is_none());

        assert_eq!(
            BuildFact::try_from_record(&json!("not a build")),
            Err(SkipReason::NotABuild)
        );
    }

    #[test]
    fn test_falls_back_to_completion_timestamp() {
        let mut value = record();
        value["status"].as_object_mut().unwrap().remove("startTimestamp");
        let fact = BuildFact::from_record(&value).unwrap();
        assert_eq!(fact.when, parse_timestamp("2016-03-01T10:11:00Z").unwrap());
    }

    #[test]
    fn test_strip_registry() {
        assert_eq!(strip_registry("registry.example.com/foo:1"), "foo:1");
        assert_eq!(strip_registry("localhost:5000/ns/foo:1"), "ns/foo:1");
        assert_eq!(strip_registry("localhost/foo"), "foo");
        assert_eq!(strip_registry("rhel7/foo:1"), "rhel7/foo:1");
        assert_eq!(strip_registry("foo"), "foo");
    }

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag("foo:1.0"), ("foo", Some("1.0")));
        assert_eq!(split_tag("foo:1:2"), ("foo", Some("1:2")));
        assert_eq!(split_tag("foo"), ("foo", None));
        assert!(is_latest("foo:latest"));
        assert!(!is_latest("latest"));
    }
}
