use serde::{Deserialize, Serialize};

/// Root application configuration. Loaded from environment variables
/// with the prefix `CRM__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub segmentation: SegmentationConfig,
}

/// How a group without children evaluates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyGroupPolicy {
    /// An empty group constrains nothing: `true` for both AND and OR.
    #[default]
    Inclusive,
    /// Strict vacuous truth: AND-empty is `true`, OR-empty is `false`.
    Vacuous,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default)]
    pub empty_group_policy: EmptyGroupPolicy,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default = "default_table")]
    pub default_table: String,
}

fn default_max_depth() -> usize {
    32
}
fn default_max_children() -> usize {
    200
}
fn default_table() -> String {
    "customers".to_string()
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            empty_group_policy: EmptyGroupPolicy::default(),
            max_depth: default_max_depth(),
            max_children: default_max_children(),
            default_table: default_table(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CRM")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
