use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Elements stripped from every page and seeded into the cleanup list.
pub const IGNORE_ELEMENTS: &[&str] = &[
    "style",
    "source",
    "script",
    "noscript",
    "iframe",
    "link",
    "meta",
    "svg",
];

pub const METADATA_BLOCK: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    #[default]
    Append,
    Prepend,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRule {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_mode: Option<InsertMode>,
}

impl BlockRule {
    /// The built-in page metadata block.
    pub fn metadata() -> Self {
        Self {
            kind: METADATA_BLOCK.to_string(),
            selectors: Vec::new(),
            insert_mode: Some(InsertMode::Append),
        }
    }
}

/// Selectors found by analysis, before the caller names the block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialBlockRule {
    #[serde(default)]
    pub selectors: Vec<String>,
}

impl PartialBlockRule {
    pub fn named(self, kind: &str) -> BlockRule {
        BlockRule {
            kind: kind.to_string(),
            selectors: self.selectors,
            insert_mode: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRule {
    pub name: String,
}

/// In-progress import rules for one page.
///
/// Cleanup selectors are kept verbatim, so the same selector can appear
/// twice if analysis finds it twice. Blocks append without a key check;
/// transformers are registered at most once per name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<String>,
    #[serde(default)]
    cleanup: Vec<String>,
    #[serde(default)]
    blocks: Vec<BlockRule>,
    #[serde(default)]
    transformers: Vec<TransformRule>,
}

impl RuleDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn cleanup(&self) -> &[String] {
        &self.cleanup
    }

    pub fn blocks(&self) -> &[BlockRule] {
        &self.blocks
    }

    pub fn transformers(&self) -> &[TransformRule] {
        &self.transformers
    }

    pub fn set_root(&mut self, selector: impl Into<String>) {
        self.root = Some(selector.into());
    }

    pub fn add_cleanup<I, S>(&mut self, selectors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cleanup.extend(selectors.into_iter().map(Into::into));
    }

    pub fn add_block(&mut self, rule: BlockRule) {
        self.blocks.push(rule);
    }

    /// First block registered under `kind`.
    pub fn find_block(&self, kind: &str) -> Option<&BlockRule> {
        self.blocks.iter().find(|b| b.kind == kind)
    }

    /// Returns false when a transformer with that name already exists.
    pub fn add_transformer(&mut self, rule: TransformRule) -> bool {
        if self.find_transformer(&rule.name).is_some() {
            return false;
        }
        self.transformers.push(rule);
        true
    }

    pub fn find_transformer(&self, name: &str) -> Option<&TransformRule> {
        self.transformers.iter().find(|t| t.name == name)
    }

    /// Block types in registration order, first occurrence only.
    pub fn block_types(&self) -> Vec<String> {
        unique_types(self.blocks.iter())
    }

    /// Canonical serialized form, as embedded into the rules artifact.
    pub fn build(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn unique_types<'a>(rules: impl Iterator<Item = &'a BlockRule>) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for rule in rules {
        if !types.contains(&rule.kind) {
            types.push(rule.kind.clone());
        }
    }
    types
}
