use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value};

use super::ImportAdapter;
use crate::error::Result;
use crate::events::EventBus;
use crate::manifest::ManifestFileItem;
use crate::rules::METADATA_BLOCK;
use crate::script::stringify_object;
use crate::templates::{self, TemplateRef, TemplateRenderer};

/// Emits plain JavaScript import scripts.
pub struct ScriptAdapter {
    templates: Arc<dyn TemplateRenderer>,
    events: EventBus,
    block_templates: HashMap<String, TemplateRef>,
    default_block: Option<TemplateRef>,
}

impl ScriptAdapter {
    pub fn new(templates: Arc<dyn TemplateRenderer>, events: EventBus) -> Self {
        let mut block_templates = HashMap::new();
        block_templates.insert(METADATA_BLOCK.to_string(), templates::METADATA);
        Self {
            templates,
            events,
            block_templates,
            default_block: Some(templates::BLOCK),
        }
    }

    /// Only block types with a registered template get a parser.
    #[cfg(test)]
    pub fn without_default_block(mut self) -> Self {
        self.default_block = None;
        self
    }

    fn block_template(&self, block_type: &str) -> Option<TemplateRef> {
        self.block_templates.get(block_type).copied().or(self.default_block)
    }
}

pub fn parser_path(block_type: &str) -> String {
    format!("/parsers/{}.js", block_type)
}

pub fn transformer_path(name: &str) -> String {
    format!("/transformers/{}.js", name)
}

/// camelCase identifier for generated `import` bindings.
fn js_ident(name: &str) -> String {
    let mut ident = String::new();
    for (i, part) in name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            if i == 0 {
                ident.extend(first.to_lowercase());
            } else {
                ident.extend(first.to_uppercase());
            }
            ident.push_str(chars.as_str());
        }
    }
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// One identifier per name. Names that camelCase to the same identifier
/// get a numeric suffix so the generated imports never collide.
fn unique_idents(names: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    names
        .iter()
        .map(|name| {
            let base = js_ident(name);
            let mut ident = base.clone();
            let mut n = 1;
            while !used.insert(ident.clone()) {
                ident = format!("{}{}", base, n);
                n += 1;
            }
            ident
        })
        .collect()
}

fn default_block_data(name: &str) -> Value {
    json!({
        "configs": stringify_object(&json!({})),
        "cells": stringify_object(&json!([[""]])),
        "name": name,
    })
}

#[async_trait]
impl ImportAdapter for ScriptAdapter {
    async fn render_removal(&self) -> Result<Vec<ManifestFileItem>> {
        self.events.progress("Generating content removal script");
        let script = self.templates.merge(&templates::REMOVAL, &json!({})).await?;
        Ok(vec![ManifestFileItem::new("/removal.js", script)])
    }

    async fn render_block_names(&self, block_types: &[String]) -> Result<Vec<ManifestFileItem>> {
        self.events.progress("Generating block scripts");
        let renders = block_types.iter().filter_map(|block| {
            let template = self.block_template(block)?;
            Some(async move {
                let script = self.templates.merge(&template, &default_block_data(block)).await?;
                Ok::<_, crate::error::BuildError>(ManifestFileItem::parser(parser_path(block), script))
            })
        });
        let files = try_join_all(renders).await?;
        self.events.progress(format!("{} block scripts created", files.len()));
        Ok(files)
    }

    async fn render_cell_parser(&self, block_type: &str, script: &str) -> Result<Vec<ManifestFileItem>> {
        self.events.progress(format!("Generating parser script for {} block", block_type));
        Ok(vec![ManifestFileItem::parser(parser_path(block_type), script)])
    }

    async fn render_transformer(&self, name: &str, script: &str) -> Result<Vec<ManifestFileItem>> {
        self.events.progress("Generating transformer script");
        Ok(vec![ManifestFileItem::transformer(transformer_path(name), script)])
    }

    async fn render_rules(&self, rules: &Value) -> Result<Vec<ManifestFileItem>> {
        self.events.progress("Generating import rules script");
        let data = json!({ "rules": stringify_object(rules) });
        let script = self.templates.merge(&templates::RULES, &data).await?;
        Ok(vec![ManifestFileItem::new("/import-rules.js", script)])
    }

    async fn render_importer(
        &self,
        block_types: &[String],
        transformers: &[String],
    ) -> Result<Vec<ManifestFileItem>> {
        self.events.progress("Customizing import script");
        let parsers: Vec<Value> = block_types
            .iter()
            .zip(unique_idents(block_types))
            .map(|(block, ident)| {
                json!({
                    "block": block,
                    "ident": ident,
                    "path": format!(".{}", parser_path(block)),
                })
            })
            .collect();
        let transformers: Vec<Value> = transformers
            .iter()
            .zip(unique_idents(transformers))
            .map(|(name, ident)| {
                json!({
                    "name": name,
                    "ident": ident,
                    "path": format!(".{}", transformer_path(name)),
                })
            })
            .collect();
        let data = json!({ "parsers": parsers, "transformers": transformers });
        let script = self.templates.merge(&templates::IMPORT, &data).await?;
        Ok(vec![ManifestFileItem::new("/import.js", script)])
    }
}
