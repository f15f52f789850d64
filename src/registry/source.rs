use crate::constants::{REGISTRY_API_PATH, REGISTRY_REPO_PREFIX};
use crate::error::{LineageError, Result};
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// What the registry knows about one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub id: String,
    pub size: u64,
    pub parent: Option<String>,
    /// `Name:Version-Release` built from the image labels, when all are set
    pub display_name: Option<String>,
}

/// Read-only view of an image layer registry.
///
/// `image` is an image name without its tag, e.g. `rhel7/foo`.
pub trait LayerSource {
    fn layer(&self, image: &str, layer_id: &str) -> Result<LayerInfo>;
    fn list_layers(&self, image: &str) -> Result<Vec<String>>;
}

/// Registry repository id for an image name
pub fn repository_id(image: &str) -> String {
    format!("{}{}", REGISTRY_REPO_PREFIX, image.replace('/', "-"))
}

pub struct HttpLayerSource {
    client: Client,
    base_url: String, // e.g. https://pulp.example.com
}

impl HttpLayerSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn repo_url(&self, image: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            REGISTRY_API_PATH,
            repository_id(image)
        )
    }

    fn get_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|source| LineageError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(LineageError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        resp.text().map_err(|source| LineageError::Transport {
            url: url.to_string(),
            source,
        })
    }
}

impl LayerSource for HttpLayerSource {
    fn layer(&self, image: &str, layer_id: &str) -> Result<LayerInfo> {
        let url = format!("{}/{}/json", self.repo_url(image), layer_id);
        let body = self.get_text(&url)?;
        parse_layer(layer_id, &body)
    }

    fn list_layers(&self, image: &str) -> Result<Vec<String>> {
        let url = self.repo_url(image);
        let body = self.get_text(&url)?;
        Ok(parse_listing(&body))
    }
}

#[derive(Deserialize)]
struct LayerJson {
    #[serde(rename = "Size")]
    size: Option<u64>,
    parent: Option<String>,
    config: Option<LayerConfig>,
}

#[derive(Deserialize)]
struct LayerConfig {
    #[serde(rename = "Labels")]
    labels: Option<HashMap<String, String>>,
}

/// Parse the `{layer}/json` document
pub fn parse_layer(layer_id: &str, body: &str) -> Result<LayerInfo> {
    let doc: LayerJson = serde_json::from_str(body)?;
    let size = doc.size.ok_or_else(|| LineageError::MalformedLayer {
        layer_id: layer_id.to_string(),
        reason: "missing Size".to_string(),
    })?;

    let display_name = doc
        .config
        .and_then(|c| c.labels)
        .and_then(|labels| {
            let name = labels.get("Name")?;
            let version = labels.get("Version")?;
            let release = labels.get("Release")?;
            Some(format!("{}:{}-{}", name, version, release))
        });

    Ok(LayerInfo {
        id: layer_id.to_string(),
        size,
        parent: doc.parent.filter(|p| !p.is_empty()),
        display_name,
    })
}

/// Candidate layer ids from a repository directory listing. The first
/// anchor is the parent-directory link and is skipped.
pub fn parse_listing(body: &str) -> Vec<String> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let re = HREF.get_or_init(|| Regex::new(r#"href="([^"]+)/""#).expect("valid href pattern"));

    re.captures_iter(body)
        .skip(1)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().rsplit('/').next().unwrap_or(m.as_str()).to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_layer_with_labels() {
        let body = r#"{
            "id": "aaa",
            "parent": "bbb",
            "Size": 4096,
            "config": {"Labels": {"Name": "rhel7/foo", "Version": "1.0", "Release": "3"}}
        }"#;
        let info = parse_layer("aaa", body).unwrap();
        assert_eq!(info.size, 4096);
        assert_eq!(info.parent.as_deref(), Some("bbb"));
        assert_eq!(info.display_name.as_deref(), Some("rhel7/foo:1.0-3"));
    }

    #[test]
    fn test_parse_layer_without_parent_or_labels() {
        let body = r#"{"Size": 10, "parent": "", "config": {"Labels": null}}"#;
        let info = parse_layer("ccc", body).unwrap();
        assert_eq!(info.parent, None);
        assert_eq!(info.display_name, None);
    }

    #[test]
    fn test_parse_layer_missing_size() {
        let err = parse_layer("ddd", r#"{"parent": "x"}"#).unwrap_err();
        assert!(matches!(err, LineageError::MalformedLayer { .. }));
    }

    #[test]
    fn test_parse_listing_skips_header() {
        let html = r#"<html><body>
            <a href="../">Parent Directory</a>
            <a href="0123abcd/">0123abcd/</a>
            <a href="/pulp/docker/v1/redhat-foo/4567ef01/">4567ef01/</a>
            <a href="notes.txt">notes.txt</a>
        </body></html>"#;
        assert_eq!(parse_listing(html), vec!["0123abcd", "4567ef01"]);
    }

    #[test]
    fn test_repository_id() {
        assert_eq!(repository_id("rhel7/foo"), "redhat-rhel7-foo");
        assert_eq!(repository_id("foo"), "redhat-foo");
    }
}
