//! Incremental build orchestrator for one page.
//!
//! Every operation follows the same shape: ask the gateway, update the rule
//! document, hand the results to the adapter, return the manifest delta.
//! A failed step leaves earlier rule mutations in place.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::ImportAdapter;
use crate::error::{BuildError, Result};
use crate::events::{duration_secs, EventBus};
use crate::gateway::AnalysisGateway;
use crate::manifest::ManifestFileItem;
use crate::page::PageContent;
use crate::rules::{unique_types, BlockRule, RuleDocument, TransformRule, IGNORE_ELEMENTS};

const SESSION_QUEUE: usize = 16;

pub struct ImportBuilder {
    rules: RuleDocument,
    page: PageContent,
    adapter: Arc<dyn ImportAdapter>,
    gateway: Arc<dyn AnalysisGateway>,
    events: EventBus,
}

impl ImportBuilder {
    pub fn new(
        page: PageContent,
        rules: RuleDocument,
        adapter: Arc<dyn ImportAdapter>,
        gateway: Arc<dyn AnalysisGateway>,
        events: EventBus,
    ) -> Self {
        Self {
            rules,
            page,
            adapter,
            gateway,
            events,
        }
    }

    #[cfg(test)]
    pub fn rules(&self) -> &RuleDocument {
        &self.rules
    }

    #[cfg(test)]
    pub fn page(&self) -> &PageContent {
        &self.page
    }

    pub fn into_rules(self) -> RuleDocument {
        self.rules
    }

    pub async fn execute(&mut self, command: BuildCommand) -> Result<Vec<ManifestFileItem>> {
        debug!(?command, "executing build command");
        match command {
            BuildCommand::BuildProject => self.build_project().await,
            BuildCommand::AddCleanup { prompt } => self.add_cleanup(&prompt).await,
            BuildCommand::AddBlock { name, prompt } => self.add_block(&name, &prompt).await,
            BuildCommand::AddCellParser { name, prompt } => self.add_cell_parser(&name, &prompt).await,
            BuildCommand::AddPageTransformer { name, prompt } => {
                self.add_page_transformer(&name, &prompt).await
            }
        }
    }

    // ── Operations ──

    /// Full initial build: root, built-in cleanup and metadata block, then
    /// every project file.
    pub async fn build_project(&mut self) -> Result<Vec<ManifestFileItem>> {
        self.add_root_rule().await?;
        self.rules.add_cleanup(IGNORE_ELEMENTS.iter().copied());
        let metadata = BlockRule::metadata();
        self.rules.add_block(metadata.clone());

        self.events.start("Creating project files");
        let rules = self.rules.build();
        let seeded = unique_types(std::iter::once(&metadata));
        let (removal, blocks, rules_file) = tokio::try_join!(
            self.adapter.render_removal(),
            self.adapter.render_block_names(&seeded),
            self.adapter.render_rules(&rules),
        )?;
        let importer = self.render_importer().await?;
        self.events.complete();

        let files = concat([removal, blocks, rules_file, importer]);
        info!(files = files.len(), root = ?self.rules.root(), "project built");
        Ok(files)
    }

    pub async fn add_cleanup(&mut self, prompt: &str) -> Result<Vec<ManifestFileItem>> {
        if prompt.trim().is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        self.events
            .start("Assistant is analyzing the document to find elements to remove");
        let selectors = self
            .gateway
            .find_cleanup_selectors(&self.page.body, prompt)
            .await?;
        let count = selectors.len();
        self.rules.add_cleanup(selectors);
        self.events.progress(format!(
            "Added {} selectors to the cleanup rules in ({}s)",
            count,
            duration_secs(start)
        ));
        self.events.complete();

        self.events.start("Creating import files");
        let files = self.adapter.render_rules(&self.rules.build()).await?;
        self.events.complete();
        Ok(files)
    }

    pub async fn add_block(&mut self, name: &str, prompt: &str) -> Result<Vec<ManifestFileItem>> {
        if name.trim().is_empty() || prompt.trim().is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        self.events
            .start("Assistant is analyzing the document to find the requested block");
        let partials = self
            .gateway
            .find_block_selectors(&self.page.body, self.page.screenshot.as_deref(), prompt)
            .await?;
        let added: Vec<BlockRule> = partials.into_iter().map(|p| p.named(name)).collect();
        for rule in &added {
            self.rules.add_block(rule.clone());
        }
        self.events.progress(format!(
            "Added {} blocks to the block rules in ({}s)",
            added.len(),
            duration_secs(start)
        ));
        self.events.complete();

        self.events.start("Creating import files");
        let rules = self.rules.build();
        let new_types = unique_types(added.iter());
        let (blocks, rules_file) = tokio::try_join!(
            self.adapter.render_block_names(&new_types),
            self.adapter.render_rules(&rules),
        )?;
        let importer = self.render_importer().await?;
        self.events.complete();
        Ok(concat([blocks, rules_file, importer]))
    }

    /// Only blocks already in the rule document can get a cell parser.
    pub async fn add_cell_parser(&mut self, name: &str, prompt: &str) -> Result<Vec<ManifestFileItem>> {
        let Some(block) = self.rules.find_block(name) else {
            return Ok(Vec::new());
        };
        if prompt.trim().is_empty() {
            return Ok(Vec::new());
        }
        let block_type = block.kind.clone();
        let selectors = block.selectors.clone();

        let start = Instant::now();
        self.events.start(format!(
            "Assistant is analyzing the document to find the cells for the {} block",
            name
        ));
        let scripts = self
            .gateway
            .find_cell_parser_script(
                &self.page.body,
                self.page.screenshot.as_deref(),
                &selectors,
                prompt,
            )
            .await?;
        self.events.progress(format!(
            "Added parser script for {} block in ({}s)",
            name,
            duration_secs(start)
        ));
        self.events.complete();

        self.events.start("Creating import files");
        let files = match scripts.first() {
            Some(script) => self.adapter.render_cell_parser(&block_type, script).await?,
            None => {
                warn!(block = %block_type, "assistant returned no cell parser script");
                Vec::new()
            }
        };
        self.events.complete();
        Ok(files)
    }

    pub async fn add_page_transformer(
        &mut self,
        name: &str,
        prompt: &str,
    ) -> Result<Vec<ManifestFileItem>> {
        if name.trim().is_empty() || prompt.trim().is_empty() {
            return Ok(Vec::new());
        }
        if !self.rules.add_transformer(TransformRule { name: name.to_string() }) {
            debug!(transformer = name, "transformer already registered");
        }

        let start = Instant::now();
        self.events.start(format!(
            "Assistant is analyzing the document to generate a {} transformation function",
            name
        ));
        let scripts = self
            .gateway
            .generate_transformer_script(&self.page.body, prompt)
            .await?;
        self.events
            .progress(format!("Added transformer script in ({}s)", duration_secs(start)));
        self.events.complete();

        self.events.start("Creating import files");
        let transformer = match scripts.first() {
            Some(script) => self.adapter.render_transformer(name, script).await?,
            None => {
                warn!(transformer = name, "assistant returned no transformer script");
                Vec::new()
            }
        };
        let rules_file = self.adapter.render_rules(&self.rules.build()).await?;
        let importer = self.render_importer().await?;
        self.events.complete();
        Ok(concat([transformer, rules_file, importer]))
    }

    // ── Helpers ──

    async fn add_root_rule(&mut self) -> Result<()> {
        let start = Instant::now();
        self.events
            .start("Assistant is analyzing the document to find the main content element");
        let selector = self.gateway.find_root(&self.page.body).await?;
        self.events.progress(format!(
            "Using '{}' as the main content element ({}s)",
            selector,
            duration_secs(start)
        ));
        self.rules.set_root(selector);
        self.events.complete();
        Ok(())
    }

    async fn render_importer(&self) -> Result<Vec<ManifestFileItem>> {
        let transformers: Vec<String> = self
            .rules
            .transformers()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        self.adapter
            .render_importer(&self.rules.block_types(), &transformers)
            .await
    }
}

fn concat<const N: usize>(groups: [Vec<ManifestFileItem>; N]) -> Vec<ManifestFileItem> {
    groups.into_iter().flatten().collect()
}

// ── Session executor ──

/// One queued builder operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCommand {
    BuildProject,
    AddCleanup { prompt: String },
    AddBlock { name: String, prompt: String },
    AddCellParser { name: String, prompt: String },
    AddPageTransformer { name: String, prompt: String },
}

struct Job {
    command: BuildCommand,
    reply: oneshot::Sender<Result<Vec<ManifestFileItem>>>,
}

/// Handle to a builder owned by a background task. Commands from any number
/// of handles run one at a time, in the order they were queued.
#[derive(Clone)]
pub struct BuilderSession {
    tx: mpsc::Sender<Job>,
}

impl BuilderSession {
    /// The task exits once every handle has been dropped and returns the builder.
    pub fn spawn(mut builder: ImportBuilder) -> (Self, JoinHandle<ImportBuilder>) {
        let (tx, mut rx) = mpsc::channel::<Job>(SESSION_QUEUE);
        let handle = tokio::spawn(async move {
            while let Some(Job { command, reply }) = rx.recv().await {
                let result = builder.execute(command).await;
                if let Err(e) = &result {
                    warn!("Build step failed: {}", e);
                }
                let _ = reply.send(result);
            }
            debug!("builder session closed");
            builder
        });
        (Self { tx }, handle)
    }

    pub async fn run(&self, command: BuildCommand) -> Result<Vec<ManifestFileItem>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { command, reply })
            .await
            .map_err(|_| BuildError::Session)?;
        rx.await.map_err(|_| BuildError::Session)?
    }

    /// Drop this handle and wait for the task to hand back the final rules.
    /// Waits for any other live handles to be dropped too.
    pub async fn finish(self, handle: JoinHandle<ImportBuilder>) -> Result<RuleDocument> {
        drop(self);
        let builder = handle.await.map_err(|_| BuildError::Session)?;
        Ok(builder.into_rules())
    }
}
