//! Turns build results into named files. Adapters know nothing about
//! analysis or about how the rule document stores its data.

pub mod script;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::events::EventBus;
use crate::manifest::ManifestFileItem;
use crate::templates::TemplateRenderer;

pub use script::ScriptAdapter;

#[async_trait]
pub trait ImportAdapter: Send + Sync {
    async fn render_removal(&self) -> Result<Vec<ManifestFileItem>>;

    /// One parser per block type that has a template; input order is kept.
    async fn render_block_names(&self, block_types: &[String]) -> Result<Vec<ManifestFileItem>>;

    async fn render_cell_parser(&self, block_type: &str, script: &str) -> Result<Vec<ManifestFileItem>>;

    async fn render_transformer(&self, name: &str, script: &str) -> Result<Vec<ManifestFileItem>>;

    /// `rules` is the canonical serialized rule document.
    async fn render_rules(&self, rules: &Value) -> Result<Vec<ManifestFileItem>>;

    async fn render_importer(
        &self,
        block_types: &[String],
        transformers: &[String],
    ) -> Result<Vec<ManifestFileItem>>;
}

/// Output flavours. Chosen once when a builder is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterMode {
    #[default]
    Script,
}

impl AdapterMode {
    pub fn adapter(self, templates: Arc<dyn TemplateRenderer>, events: EventBus) -> Arc<dyn ImportAdapter> {
        match self {
            AdapterMode::Script => Arc::new(ScriptAdapter::new(templates, events)),
        }
    }
}

impl FromStr for AdapterMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "script" => Ok(AdapterMode::Script),
            other => Err(format!("unknown adapter mode '{}'", other)),
        }
    }
}

impl fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterMode::Script => f.write_str("script"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_known_tags_only() {
        assert_eq!("script".parse::<AdapterMode>(), Ok(AdapterMode::Script));
        assert!("unknown".parse::<AdapterMode>().is_err());
        assert_eq!(AdapterMode::default().to_string(), "script");
    }
}
