//! Deployable artifact description.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What gets rolled out to a region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact name
    pub name: String,
    /// Version recorded on the region after a successful rollout
    pub version: String,
    /// Container image
    pub image: String,
    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Path the region checks after rollout
    #[serde(default)]
    pub health_path: Option<String>,
}

impl ArtifactSpec {
    /// Create a spec; image defaults to `name:version`.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            image: format!("{name}:{version}"),
            env: HashMap::new(),
            health_path: None,
        }
    }

    /// Override the container image.
    pub fn with_image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    /// Add environment variable.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the post-rollout health path.
    pub fn with_health_path(mut self, path: &str) -> Self {
        self.health_path = Some(path.to_string());
        self
    }

    /// Reject specs that cannot be rolled out anywhere.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("artifact name is empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "artifact {} has no version",
                self.name
            )));
        }
        if let Some(path) = &self.health_path {
            if !path.starts_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "health path must be absolute: {path}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_image() {
        let spec = ArtifactSpec::new("api", "1.4.0");
        assert_eq!(spec.image, "api:1.4.0");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let spec = ArtifactSpec::new("api", "2.0.0")
            .with_image("registry.local/api:2.0.0")
            .with_env("LOG_LEVEL", "debug")
            .with_health_path("/healthz");
        assert_eq!(spec.env.get("LOG_LEVEL"), Some(&"debug".to_string()));
        assert_eq!(spec.health_path.as_deref(), Some("/healthz"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(ArtifactSpec::new("", "1.0").validate().is_err());
        assert!(ArtifactSpec::new("api", " ").validate().is_err());
        assert!(ArtifactSpec::new("api", "1.0")
            .with_health_path("healthz")
            .validate()
            .is_err());
    }

    #[test]
    fn test_deserialize_minimal() {
        let spec: ArtifactSpec =
            serde_json::from_str(r#"{"name":"api","version":"1.0","image":"api:1.0"}"#).unwrap();
        assert!(spec.env.is_empty());
        assert!(spec.health_path.is_none());
    }
}
