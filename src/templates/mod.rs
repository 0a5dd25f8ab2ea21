pub mod engine;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::BuilderConfig;
use crate::error::{BuildError, Result};

const TOOLS_PATH: &str = "/tools/importer";
const GIST_IMPORT_RULES: &str = "a66e25a5292afcc0f34be48a84c8c548";

/// Where a named template lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Served next to the importer tools (`{base_url}/tools/importer{name}`).
    Local,
    /// A file in the shared import-rules gist.
    Gist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateRef {
    pub name: &'static str,
    pub variant: Variant,
}

impl TemplateRef {
    pub const fn local(name: &'static str) -> Self {
        Self { name, variant: Variant::Local }
    }

    pub const fn gist(name: &'static str) -> Self {
        Self { name, variant: Variant::Gist }
    }
}

pub const REMOVAL: TemplateRef = TemplateRef::local("/templates/removal-template.hbs");
pub const BLOCK: TemplateRef = TemplateRef::local("/templates/block-template.hbs");
pub const METADATA: TemplateRef = TemplateRef::local("/templates/metadata-template.hbs");
pub const RULES: TemplateRef = TemplateRef::gist("import-rules-template.hbs");
pub const IMPORT: TemplateRef = TemplateRef::gist("import-script-template.hbs");

pub const PROMPT_MAIN_CONTENT: TemplateRef = TemplateRef::local("/templates/prompt-mainContent.hbs");
pub const PROMPT_ELEMENTS: TemplateRef = TemplateRef::local("/templates/prompt-elements.hbs");
pub const PROMPT_BLOCK: TemplateRef = TemplateRef::local("/templates/prompt-block.hbs");
pub const PROMPT_CELLS: TemplateRef = TemplateRef::local("/templates/prompt-cells.hbs");
pub const PROMPT_TRANSFORM: TemplateRef = TemplateRef::local("/templates/prompt-transform.hbs");

const EMBEDDED: &[(&str, &str)] = &[
    ("removal-template.hbs", include_str!("../../assets/templates/removal-template.hbs")),
    ("block-template.hbs", include_str!("../../assets/templates/block-template.hbs")),
    ("metadata-template.hbs", include_str!("../../assets/templates/metadata-template.hbs")),
    ("import-rules-template.hbs", include_str!("../../assets/templates/import-rules-template.hbs")),
    ("import-script-template.hbs", include_str!("../../assets/templates/import-script-template.hbs")),
    ("prompt-mainContent.hbs", include_str!("../../assets/templates/prompt-mainContent.hbs")),
    ("prompt-elements.hbs", include_str!("../../assets/templates/prompt-elements.hbs")),
    ("prompt-block.hbs", include_str!("../../assets/templates/prompt-block.hbs")),
    ("prompt-cells.hbs", include_str!("../../assets/templates/prompt-cells.hbs")),
    ("prompt-transform.hbs", include_str!("../../assets/templates/prompt-transform.hbs")),
];

fn embedded(name: &str) -> Option<&'static str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    EMBEDDED.iter().find(|(n, _)| *n == file).map(|(_, body)| *body)
}

/// Merges a named template with a data record.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn merge(&self, template: &TemplateRef, data: &Value) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Templates compiled into the binary.
    Embedded,
    /// Local templates from `base_url`, gist templates from GitHub.
    Remote,
}

#[derive(Debug, Deserialize)]
struct Gist {
    #[serde(default)]
    files: HashMap<String, GistFile>,
}

#[derive(Debug, Clone, Deserialize)]
struct GistFile {
    #[serde(default)]
    content: String,
    #[serde(default)]
    truncated: bool,
}

pub struct TemplateStore {
    source: TemplateSource,
    config: Arc<BuilderConfig>,
    github_url: String,
    client: reqwest::Client,
    gist_files: Mutex<HashMap<String, GistFile>>,
}

impl TemplateStore {
    pub fn new(source: TemplateSource, config: Arc<BuilderConfig>) -> Self {
        let github_url = config.endpoints().github_url;
        Self {
            source,
            config,
            github_url,
            client: reqwest::Client::new(),
            gist_files: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn embedded(config: Arc<BuilderConfig>) -> Self {
        Self::new(TemplateSource::Embedded, config)
    }

    /// Point gist lookups at another GitHub API host.
    #[cfg(test)]
    pub fn with_github_url(mut self, url: impl Into<String>) -> Self {
        self.github_url = url.into();
        self
    }

    async fn load(&self, template: &TemplateRef) -> Result<String> {
        match self.source {
            TemplateSource::Embedded => embedded(template.name)
                .map(str::to_string)
                .ok_or_else(|| BuildError::Template(format!("no template named {}", template.name))),
            TemplateSource::Remote => match template.variant {
                Variant::Local => self.fetch_text(template.name).await,
                Variant::Gist => Ok(self.fetch_gist(template.name).await?.unwrap_or_default()),
            },
        }
    }

    /// Non-success responses yield an empty template.
    async fn fetch_text(&self, name: &str) -> Result<String> {
        let url = format!("{}{}{}", self.config.base_url, TOOLS_PATH, name);
        debug!(%url, "fetching template");
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            debug!(%url, status = response.status().as_u16(), "template not available");
            return Ok(String::new());
        }
        Ok(response.text().await?)
    }

    /// `None` when GitHub reports the file as truncated.
    async fn fetch_gist(&self, name: &str) -> Result<Option<String>> {
        let mut files = self.gist_files.lock().await;
        if !files.contains_key(name) {
            let url = format!("{}/gists/{}", self.github_url, GIST_IMPORT_RULES);
            info!(%url, "fetching template gist");
            let response = self
                .client
                .get(&url)
                .header(reqwest::header::USER_AGENT, "page_importer")
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(BuildError::Status { url, status: response.status().as_u16() });
            }
            let gist: Gist = response.json().await?;
            *files = gist.files;
        }
        let file = files
            .get(name)
            .ok_or_else(|| BuildError::Template(format!("gist has no file named {}", name)))?;
        Ok((!file.truncated).then(|| file.content.clone()))
    }
}

#[async_trait]
impl TemplateRenderer for TemplateStore {
    async fn merge(&self, template: &TemplateRef, data: &Value) -> Result<String> {
        let text = self.load(template).await?;
        engine::merge(&text, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPatch;
    use httpmock::prelude::*;
    use serde_json::json;

    fn remote(base_url: &str) -> TemplateStore {
        let config = BuilderConfig::default().merge(ConfigPatch {
            base_url: Some(base_url.to_string()),
            ..Default::default()
        });
        TemplateStore::new(TemplateSource::Remote, Arc::new(config)).with_github_url(base_url)
    }

    #[test]
    fn every_template_constant_is_embedded() {
        for t in [
            REMOVAL, BLOCK, METADATA, RULES, IMPORT, PROMPT_MAIN_CONTENT, PROMPT_ELEMENTS,
            PROMPT_BLOCK, PROMPT_CELLS, PROMPT_TRANSFORM,
        ] {
            assert!(embedded(t.name).is_some(), "{} missing", t.name);
        }
    }

    #[tokio::test]
    async fn embedded_merge_is_deterministic() {
        let store = TemplateStore::embedded(Arc::new(BuilderConfig::default()));
        let data = json!({ "rules": "{\n  root: 'main'\n}" });
        let first = store.merge(&RULES, &data).await.unwrap();
        let second = store.merge(&RULES, &data).await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains("root: 'main'"));
    }

    #[tokio::test]
    async fn unknown_embedded_template_fails() {
        let store = TemplateStore::embedded(Arc::new(BuilderConfig::default()));
        let err = store.merge(&TemplateRef::local("/templates/nope.hbs"), &json!({})).await;
        assert!(matches!(err, Err(BuildError::Template(_))));
    }

    #[tokio::test]
    async fn remote_local_template_is_fetched_from_tools_path() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/tools/importer/templates/block-template.hbs");
                then.status(200).body("block {{name}}");
            })
            .await;

        let store = remote(&server.base_url());
        let out = store.merge(&BLOCK, &json!({ "name": "hero" })).await.unwrap();
        assert_eq!(out, "block hero");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn remote_missing_template_renders_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/tools/importer/templates/removal-template.hbs");
                then.status(404);
            })
            .await;

        let store = remote(&server.base_url());
        assert_eq!(store.merge(&REMOVAL, &json!({})).await.unwrap(), "");
    }

    #[tokio::test]
    async fn gist_is_fetched_once_and_truncated_files_are_empty() {
        let server = MockServer::start_async().await;
        let gist = server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/gists/{}", GIST_IMPORT_RULES));
                then.status(200).json_body(json!({
                    "files": {
                        "import-rules-template.hbs": {
                            "filename": "import-rules-template.hbs",
                            "truncated": false,
                            "content": "rules = {{{rules}}};"
                        },
                        "import-script-template.hbs": {
                            "filename": "import-script-template.hbs",
                            "truncated": true,
                            "content": "partial"
                        }
                    }
                }));
            })
            .await;

        let store = remote(&server.base_url());
        let rules = store.merge(&RULES, &json!({ "rules": "{}" })).await.unwrap();
        assert_eq!(rules, "rules = {};");
        let import = store.merge(&IMPORT, &json!({})).await.unwrap();
        assert_eq!(import, "");
        gist.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn gist_fetch_failure_propagates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(format!("/gists/{}", GIST_IMPORT_RULES));
                then.status(500);
            })
            .await;

        let store = remote(&server.base_url());
        let err = store.merge(&RULES, &json!({})).await;
        assert!(matches!(err, Err(BuildError::Status { status: 500, .. })));
    }
}
