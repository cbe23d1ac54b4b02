use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::DomainPath;

/// Operation classes permissions are granted for. Reads check `Get`,
/// saves and tree mutations check `Save`, deletions check `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Get,
    Save,
    Delete,
}

/// Extra operation sets a domain exposes beyond the standard ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainFeature {
    /// Hierarchical domain: tree queries plus insert/move mutations.
    Tree,
    /// Domain with pluggable providers exposing configuration options.
    Provider,
    /// `find` accepts `domain` and `type` arguments to narrow the code.
    TypedFind,
}

/// One domain the schema exposes operations for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub path: DomainPath,
    #[serde(default)]
    pub features: Vec<DomainFeature>,
}

impl DomainSpec {
    pub fn new(path: DomainPath) -> Self {
        Self {
            path,
            features: Vec::new(),
        }
    }

    pub fn with_features(path: DomainPath, features: impl IntoIterator<Item = DomainFeature>) -> Self {
        Self {
            path,
            features: features.into_iter().collect(),
        }
    }

    pub fn has_feature(&self, feature: DomainFeature) -> bool {
        self.features.contains(&feature)
    }
}

/// User groups allowed to run each operation class of one domain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceGroups {
    #[serde(default)]
    pub get: Vec<String>,
    #[serde(default)]
    pub save: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
}

impl ResourceGroups {
    /// Same groups for every operation class.
    pub fn all(groups: &[&str]) -> Self {
        let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
        Self {
            get: groups.clone(),
            save: groups.clone(),
            delete: groups,
        }
    }

    pub fn for_action(&self, action: Action) -> &[String] {
        match action {
            Action::Get => &self.get,
            Action::Save => &self.save,
            Action::Delete => &self.delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Include internal error detail in rendered error bodies.
    #[serde(default)]
    pub debug: bool,
    /// Target domains every lists-capable domain may link to.
    #[serde(default)]
    pub lists_domains: Vec<String>,
    /// Domains the schema exposes, with their extra operation sets.
    #[serde(default)]
    pub domains: Vec<DomainSpec>,
    /// Permission table: domain path to allowed groups per operation class.
    /// A path or action missing here denies the operation for everyone.
    #[serde(default)]
    pub resource: BTreeMap<String, ResourceGroups>,
}

impl ApiConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&ApiConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("config").required(false));

        // Add environment variables with prefix "ENTIGRAPH_"
        config = config.add_source(
            config::Environment::with_prefix("ENTIGRAPH")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let api_config: ApiConfig = config.try_deserialize()?;

        Ok(api_config)
    }

    pub fn required_groups(&self, path: &DomainPath, action: Action) -> &[String] {
        self.resource
            .get(path.as_str())
            .map(|groups| groups.for_action(action))
            .unwrap_or(&[])
    }
}
