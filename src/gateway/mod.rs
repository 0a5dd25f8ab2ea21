//! Analysis gateway: the only place prompts and page content leave the
//! process. Callers get typed results; decoding rules live here.

pub mod assistant;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::rules::PartialBlockRule;

pub use assistant::AssistantClient;

/// Fallback when the backend has no usable answer for the root element.
pub const DEFAULT_ROOT: &str = "main";

const NORMAL_STOP: &str = "stop";

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json(.*?)```").unwrap());
static JAVASCRIPT_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```javascript(.*?)```").unwrap());

#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    /// Selector of the main content element.
    async fn find_root(&self, body: &str) -> Result<String>;

    async fn find_cleanup_selectors(&self, body: &str, instruction: &str) -> Result<Vec<String>>;

    async fn find_block_selectors(
        &self,
        body: &str,
        screenshot: Option<&str>,
        instruction: &str,
    ) -> Result<Vec<PartialBlockRule>>;

    /// Callers use only the first script.
    async fn find_cell_parser_script(
        &self,
        body: &str,
        screenshot: Option<&str>,
        selectors: &[String],
        instruction: &str,
    ) -> Result<Vec<String>>;

    /// Callers use only the first script.
    async fn generate_transformer_script(&self, body: &str, instruction: &str) -> Result<Vec<String>>;
}

// ── Wire types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssistantCommand {
    FindMainContent,
    FindRemovalSelectors,
    FindBlockSelectors,
    FindBlockCells,
    GeneratePageTransformation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadOptions {
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantPayload {
    pub command: AssistantCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<PayloadOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<String>,
    pub message: Message,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Value,
}

// ── Decoding ──

/// Fold the text of every normally-stopped completion into `init`.
/// Truncated or otherwise abnormal completions are skipped silently.
pub fn reduce_choices<T>(
    response: &CompletionResponse,
    init: T,
    mut fold: impl FnMut(&str, T) -> Result<T>,
) -> Result<T> {
    response
        .choices
        .iter()
        .filter(|c| c.finish_reason.as_deref() == Some(NORMAL_STOP))
        .filter_map(|c| c.message.content.as_str())
        .try_fold(init, |acc, content| fold(content, acc))
}

pub fn json_fences(content: &str) -> impl Iterator<Item = &str> {
    JSON_FENCE_RE
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

pub fn javascript_fences(content: &str) -> impl Iterator<Item = &str> {
    JAVASCRIPT_FENCE_RE
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// First value of the returned JSON object; [`DEFAULT_ROOT`] otherwise.
pub fn decode_root(response: &CompletionResponse) -> Result<String> {
    reduce_choices(response, DEFAULT_ROOT.to_string(), |content, root| {
        let parsed: Value = serde_json::from_str(content)?;
        let first = parsed
            .as_object()
            .and_then(|obj| obj.values().next())
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty());
        Ok(first.map(str::to_string).unwrap_or(root))
    })
}

/// Every string leaf of the returned JSON, in document order.
pub fn decode_selectors(response: &CompletionResponse) -> Result<Vec<String>> {
    reduce_choices(response, Vec::new(), |content, mut selectors| {
        let parsed: Value = serde_json::from_str(content)?;
        collect_strings(&parsed, &mut selectors);
        Ok(selectors)
    })
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// All ```json fences, each a selector array, merged into one rule.
pub fn decode_block_rules(response: &CompletionResponse) -> Result<Vec<PartialBlockRule>> {
    let rule = reduce_choices(response, PartialBlockRule::default(), |content, mut rule| {
        for fence in json_fences(content) {
            let selectors: Vec<String> = serde_json::from_str(fence.trim())?;
            rule.selectors.extend(selectors);
        }
        Ok(rule)
    })?;
    Ok(vec![rule])
}

/// Bodies of all ```javascript fences.
pub fn decode_scripts(response: &CompletionResponse) -> Result<Vec<String>> {
    reduce_choices(response, Vec::new(), |content, mut scripts| {
        scripts.extend(javascript_fences(content).map(str::to_string));
        Ok(scripts)
    })
}
