use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use super::{
    decode_block_rules, decode_root, decode_scripts, decode_selectors, AnalysisGateway,
    AssistantCommand, AssistantPayload, CompletionResponse, PayloadOptions,
};
use crate::config::BuilderConfig;
use crate::error::{BuildError, Result};
use crate::rules::PartialBlockRule;
use crate::templates::{self, TemplateRef, TemplateRenderer};

const PROMPT_PATH: &str = "/tools/import/assistant/prompt";

/// Gateway backed by the import assistant prompt endpoint.
pub struct AssistantClient {
    client: Client,
    config: Arc<BuilderConfig>,
    endpoint: String,
    templates: Arc<dyn TemplateRenderer>,
}

impl AssistantClient {
    pub fn new(config: Arc<BuilderConfig>, templates: Arc<dyn TemplateRenderer>) -> Self {
        let endpoint = format!("{}{}", config.endpoints().assistant_url, PROMPT_PATH);
        Self {
            client: Client::new(),
            config,
            endpoint,
            templates,
        }
    }

    /// Send prompts to a different assistant host.
    #[cfg(test)]
    pub fn with_assistant_url(mut self, url: &str) -> Self {
        self.endpoint = format!("{}{}", url.trim_end_matches('/'), PROMPT_PATH);
        self
    }

    pub async fn fetch_prompt(&self, payload: &AssistantPayload) -> Result<CompletionResponse> {
        let start = Instant::now();
        debug!(command = ?payload.command, "sending assistant prompt");
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.config.api_key)
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BuildError::Status {
                url: self.endpoint.clone(),
                status: response.status().as_u16(),
            });
        }
        let completion: CompletionResponse = response.json().await?;
        info!(
            command = ?payload.command,
            choices = completion.choices.len(),
            "assistant answered in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        Ok(completion)
    }

    async fn ask(
        &self,
        command: AssistantCommand,
        template: &TemplateRef,
        data: serde_json::Value,
        screenshot: Option<&str>,
    ) -> Result<CompletionResponse> {
        let prompt = self.templates.merge(template, &data).await?;
        let payload = AssistantPayload {
            command,
            prompt: Some(prompt),
            options: screenshot.filter(|s| !s.is_empty()).map(|s| PayloadOptions {
                image_url: image_url(s),
            }),
        };
        self.fetch_prompt(&payload).await
    }
}

/// Quotes are escaped so the document can sit inside a quoted prompt.
fn escape_document(body: &str) -> String {
    body.replace('"', "\\\"")
}

fn image_url(screenshot: &str) -> String {
    if screenshot.starts_with("data:") {
        screenshot.to_string()
    } else {
        format!("data:image/png;base64,{}", screenshot)
    }
}

#[async_trait]
impl AnalysisGateway for AssistantClient {
    async fn find_root(&self, body: &str) -> Result<String> {
        let data = json!({ "content": escape_document(body) });
        let response = self
            .ask(AssistantCommand::FindMainContent, &templates::PROMPT_MAIN_CONTENT, data, None)
            .await?;
        decode_root(&response)
    }

    async fn find_cleanup_selectors(&self, body: &str, instruction: &str) -> Result<Vec<String>> {
        if instruction.trim().is_empty() {
            return Ok(Vec::new());
        }
        let data = json!({ "names": instruction, "content": escape_document(body) });
        let response = self
            .ask(AssistantCommand::FindRemovalSelectors, &templates::PROMPT_ELEMENTS, data, None)
            .await?;
        decode_selectors(&response)
    }

    async fn find_block_selectors(
        &self,
        body: &str,
        screenshot: Option<&str>,
        instruction: &str,
    ) -> Result<Vec<PartialBlockRule>> {
        if instruction.trim().is_empty() {
            return Ok(Vec::new());
        }
        let data = json!({ "pattern": instruction, "content": escape_document(body) });
        let response = self
            .ask(AssistantCommand::FindBlockSelectors, &templates::PROMPT_BLOCK, data, screenshot)
            .await?;
        decode_block_rules(&response)
    }

    async fn find_cell_parser_script(
        &self,
        body: &str,
        screenshot: Option<&str>,
        selectors: &[String],
        instruction: &str,
    ) -> Result<Vec<String>> {
        // Only the first selector is sent for now.
        let Some(selector) = selectors.first() else {
            return Ok(Vec::new());
        };
        if instruction.trim().is_empty() {
            return Ok(Vec::new());
        }
        let data = json!({
            "selector": selector,
            "pattern": instruction,
            "content": escape_document(body),
        });
        let response = self
            .ask(AssistantCommand::FindBlockCells, &templates::PROMPT_CELLS, data, screenshot)
            .await?;
        decode_scripts(&response)
    }

    async fn generate_transformer_script(&self, body: &str, instruction: &str) -> Result<Vec<String>> {
        if instruction.trim().is_empty() {
            return Ok(Vec::new());
        }
        let data = json!({ "pattern": instruction, "content": escape_document(body) });
        let response = self
            .ask(
                AssistantCommand::GeneratePageTransformation,
                &templates::PROMPT_TRANSFORM,
                data,
                None,
            )
            .await?;
        decode_scripts(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPatch;
    use crate::templates::TemplateStore;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> AssistantClient {
        let config = Arc::new(BuilderConfig::default().merge(ConfigPatch {
            api_key: Some("test-api-key".into()),
            ..Default::default()
        }));
        let templates = Arc::new(TemplateStore::embedded(config.clone()));
        AssistantClient::new(config, templates).with_assistant_url(&server.base_url())
    }

    fn stop(content: &str) -> serde_json::Value {
        json!({ "choices": [
            { "finish_reason": "stop", "message": { "role": "assistant", "content": content } }
        ]})
    }

    #[test]
    fn prod_endpoint_by_default() {
        let config = Arc::new(BuilderConfig::default());
        let templates = Arc::new(TemplateStore::embedded(config.clone()));
        let client = AssistantClient::new(config, templates);
        assert_eq!(
            client.endpoint,
            "https://spacecat.experiencecloud.live/api/v1/tools/import/assistant/prompt"
        );
    }

    #[tokio::test]
    async fn fetch_prompt_posts_payload_with_api_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PROMPT_PATH)
                    .header("x-api-key", "test-api-key")
                    .json_body(json!({ "command": "findMainContent" }));
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let payload = AssistantPayload {
            command: AssistantCommand::FindMainContent,
            prompt: None,
            options: None,
        };
        let result = client(&server).fetch_prompt(&payload).await.unwrap();
        assert!(result.choices.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path(PROMPT_PATH);
                then.status(502);
            })
            .await;

        let err = client(&server).find_root("<body></body>").await;
        assert!(matches!(err, Err(BuildError::Status { status: 502, .. })));
    }

    #[tokio::test]
    async fn find_root_sends_escaped_document() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PROMPT_PATH)
                    .body_includes("findMainContent")
                    .body_includes(r#"class=\\\"x\\\""#);
                then.status(200).json_body(stop(r#"{"selector": "main"}"#));
            })
            .await;

        let root = client(&server)
            .find_root(r#"<body><main class="x">Hello</main></body>"#)
            .await
            .unwrap();
        assert_eq!(root, "main");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn block_request_carries_screenshot() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PROMPT_PATH)
                    .body_includes("findBlockSelectors")
                    .body_includes("data:image/png;base64,iVBORw0KGgo");
                then.status(200).json_body(stop("```json\n[\".hero\"]\n```"));
            })
            .await;

        let rules = client(&server)
            .find_block_selectors("<body></body>", Some("iVBORw0KGgo"), "find the hero banner")
            .await
            .unwrap();
        assert_eq!(rules[0].selectors, [".hero"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_instruction_skips_the_backend() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path(PROMPT_PATH);
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let c = client(&server);
        assert!(c.find_cleanup_selectors("<body/>", "").await.unwrap().is_empty());
        assert!(c.find_block_selectors("<body/>", None, " ").await.unwrap().is_empty());
        assert!(c.find_cell_parser_script("<body/>", None, &[], "cells").await.unwrap().is_empty());
        assert!(c.generate_transformer_script("<body/>", "").await.unwrap().is_empty());
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn cell_parser_uses_first_selector() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(PROMPT_PATH)
                    .body_includes("findBlockCells")
                    .body_includes(".card");
                then.status(200)
                    .json_body(stop("```javascript\nexport default () => {};\n```"));
            })
            .await;

        let scripts = client(&server)
            .find_cell_parser_script(
                "<body></body>",
                None,
                &[".card".to_string(), ".tile".to_string()],
                "title then image",
            )
            .await
            .unwrap();
        assert_eq!(scripts, ["\nexport default () => {};\n"]);
        mock.assert_async().await;
    }
}
