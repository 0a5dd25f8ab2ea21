use std::sync::Arc;

use tracing::info;

use crate::adapter::AdapterMode;
use crate::builder::ImportBuilder;
use crate::config::BuilderConfig;
use crate::error::{BuildError, Result};
use crate::events::{EventBus, EventKind, Subscription};
use crate::gateway::{AnalysisGateway, AssistantClient};
use crate::page::normalize_page;
use crate::rules::RuleDocument;
use crate::templates::{TemplateRenderer, TemplateSource, TemplateStore};

/// Raw page markup plus an optional base64 PNG screenshot.
#[derive(Debug, Clone, Default)]
pub struct PageInput {
    pub html: String,
    pub screenshot: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub mode: AdapterMode,
    pub page: Option<PageInput>,
    /// Rules persisted by an earlier session.
    pub rules: Option<RuleDocument>,
}

/// Builds one [`ImportBuilder`] per page. Every builder it creates shares
/// the same event bus, template store and gateway.
pub struct ImportBuilderFactory {
    events: EventBus,
    templates: Arc<dyn TemplateRenderer>,
    gateway: Arc<dyn AnalysisGateway>,
}

impl ImportBuilderFactory {
    pub fn new(config: BuilderConfig, source: TemplateSource) -> Self {
        let config = Arc::new(config);
        let templates: Arc<dyn TemplateRenderer> = Arc::new(TemplateStore::new(source, config.clone()));
        let gateway = Arc::new(AssistantClient::new(config.clone(), templates.clone()));
        Self {
            events: EventBus::new(),
            templates,
            gateway,
        }
    }

    #[cfg(test)]
    pub fn with_gateway(mut self, gateway: Arc<dyn AnalysisGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    /// Subscribe to lifecycle events from every builder this factory creates.
    pub fn on(&self, kinds: &[EventKind]) -> Subscription {
        self.events.on(kinds)
    }

    pub fn create(&self, options: CreateOptions) -> Result<ImportBuilder> {
        let input = options
            .page
            .filter(|p| !p.html.trim().is_empty())
            .ok_or_else(|| BuildError::Page("No page content provided.".into()))?;
        let page = normalize_page(&input.html, input.screenshot)?;
        info!(
            mode = %options.mode,
            title = page.title.as_deref().unwrap_or("-"),
            bytes = page.document.len(),
            "creating import builder"
        );

        let adapter = options.mode.adapter(self.templates.clone(), self.events.clone());
        Ok(ImportBuilder::new(
            page,
            options.rules.unwrap_or_else(RuleDocument::new),
            adapter,
            self.gateway.clone(),
            self.events.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ImportEvent;
    use crate::rules::PartialBlockRule;
    use async_trait::async_trait;

    struct FixedRoot;

    #[async_trait]
    impl AnalysisGateway for FixedRoot {
        async fn find_root(&self, _body: &str) -> Result<String> {
            Ok("#content".into())
        }

        async fn find_cleanup_selectors(&self, _body: &str, _instruction: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn find_block_selectors(
            &self,
            _body: &str,
            _screenshot: Option<&str>,
            _instruction: &str,
        ) -> Result<Vec<PartialBlockRule>> {
            Ok(Vec::new())
        }

        async fn find_cell_parser_script(
            &self,
            _body: &str,
            _screenshot: Option<&str>,
            _selectors: &[String],
            _instruction: &str,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn generate_transformer_script(&self, _body: &str, _instruction: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn factory() -> ImportBuilderFactory {
        ImportBuilderFactory::new(BuilderConfig::default(), TemplateSource::Embedded)
            .with_gateway(Arc::new(FixedRoot))
    }

    fn page() -> Option<PageInput> {
        Some(PageInput {
            html: r#"<html lang="en"><body>Test Document</body></html>"#.into(),
            screenshot: Some(String::new()),
        })
    }

    #[test]
    fn creates_builder_in_script_mode() {
        let builder = factory()
            .create(CreateOptions { page: page(), ..Default::default() })
            .unwrap();
        assert_eq!(builder.page().body, "<body>Test Document</body>");
        assert!(builder.page().screenshot.is_none());
        assert_eq!(builder.rules(), &RuleDocument::new());
    }

    #[test]
    fn missing_page_is_rejected() {
        let err = factory().create(CreateOptions::default()).err().unwrap();
        assert_eq!(err.to_string(), "No page content provided.");

        let blank = CreateOptions {
            page: Some(PageInput { html: "  ".into(), screenshot: None }),
            ..Default::default()
        };
        assert!(matches!(factory().create(blank), Err(BuildError::Page(_))));
    }

    #[test]
    fn seeds_builder_with_persisted_rules() {
        let mut rules = RuleDocument::new();
        rules.set_root("article");
        let builder = factory()
            .create(CreateOptions { page: page(), rules: Some(rules.clone()), ..Default::default() })
            .unwrap();
        assert_eq!(builder.rules(), &rules);
    }

    #[tokio::test]
    async fn subscribers_see_events_from_created_builders() {
        let factory = factory();
        let mut sub = factory.on(&[EventKind::Progress]);
        let mut builder = factory
            .create(CreateOptions { page: page(), ..Default::default() })
            .unwrap();
        builder.build_project().await.unwrap();

        let first = sub.recv().await.unwrap();
        assert!(matches!(
            first,
            ImportEvent::Progress(ref m) if m.starts_with("Using '#content' as the main content element")
        ));
        assert_eq!(builder.rules().root(), Some("#content"));
    }
}
