//! Serialization settings injected into the template compiler.
//!
//! Nothing here is read from process-wide state: callers build (or
//! deserialize) a [`SerializationSettings`] and hand it to
//! [`crate::TemplateCompiler::new`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// A container image the remote engine can run tasks in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Short name tasks refer to.
    pub name: String,
    /// Fully qualified repository, e.g. `ghcr.io/acme/flows`.
    pub fqn: String,
    pub tag: String,
}

impl Image {
    /// `fqn:tag`
    pub fn full(&self) -> String {
        format!("{}:{}", self.fqn, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub default_image: Image,
    #[serde(default)]
    pub images: Vec<Image>,
}

impl ImageConfig {
    /// Look up a named image; the default image answers to its own name too.
    pub fn find(&self, name: &str) -> Option<&Image> {
        self.images
            .iter()
            .find(|i| i.name == name)
            .or_else(|| Some(&self.default_image).filter(|i| i.name == name))
    }
}

/// Where and under which version compiled entities are registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationSettings {
    pub project: String,
    pub domain: String,
    pub version: String,
    /// Environment variables set on every task container.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    pub image_config: ImageConfig,
}

impl Default for SerializationSettings {
    fn default() -> Self {
        let image = Image {
            name: "default".into(),
            fqn: "localhost/workflows".into(),
            tag: "latest".into(),
        };
        Self {
            project: "project".into(),
            domain: "development".into(),
            version: "local".into(),
            env: None,
            image_config: ImageConfig {
                default_image: image.clone(),
                images: vec![image],
            },
        }
    }
}

impl SerializationSettings {
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let settings: SerializationSettings =
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidSettings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [
            ("project", &self.project),
            ("domain", &self.domain),
            ("version", &self.version),
        ] {
            if value.trim().is_empty() {
                return Err(EngineError::InvalidSettings(format!("'{field}' must not be empty")));
            }
        }
        if self.image_config.default_image.fqn.is_empty() {
            return Err(EngineError::InvalidSettings("default image has no fqn".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_validates_json() {
        let settings = SerializationSettings::from_json(
            r#"{
                "project": "project",
                "domain": "domain",
                "version": "version",
                "image_config": {
                    "default_image": { "name": "default", "fqn": "test", "tag": "tag" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.image_config.default_image.full(), "test:tag");
        assert!(settings.env.is_none());
        assert!(settings.image_config.find("default").is_some());
        assert!(settings.image_config.find("gpu").is_none());
    }

    #[test]
    fn empty_fields_are_rejected() {
        let mut settings = SerializationSettings::default();
        settings.version = " ".into();
        assert!(matches!(settings.validate(), Err(EngineError::InvalidSettings(_))));

        assert!(matches!(
            SerializationSettings::from_json("{ not json"),
            Err(EngineError::InvalidSettings(_))
        ));
    }
}
