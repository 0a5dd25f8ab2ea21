mod adapter;
mod builder;
mod config;
mod db;
mod error;
mod events;
mod factory;
mod fetcher;
mod gateway;
mod manifest;
mod page;
mod rules;
mod script;
mod templates;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use adapter::AdapterMode;
use builder::{BuildCommand, BuilderSession};
use config::{BuilderConfig, ConfigPatch, Environment};
use events::{ImportEvent, Subscription};
use factory::{CreateOptions, ImportBuilderFactory, PageInput};
use manifest::Manifest;
use rules::RuleDocument;
use templates::TemplateSource;

const RULES_FILE: &str = "rules.json";

#[derive(Parser)]
#[command(name = "page_importer", about = "Build import projects from web pages with the import assistant")]
struct Cli {
    /// Import assistant API key
    #[arg(long, env = "IMPORT_API_KEY", global = true)]
    api_key: Option<String>,
    /// Host serving the importer templates
    #[arg(long, env = "IMPORT_BASE_URL", global = true)]
    base_url: Option<String>,
    /// Backend endpoint set (dev or prod)
    #[arg(long = "env", env = "IMPORT_ENV", global = true)]
    environment: Option<Environment>,
    /// spider.cloud API key, used when a page is not cached yet
    #[arg(long, env = "SPIDER_API_KEY", global = true, hide_env_values = true)]
    spider_key: Option<String>,
    /// Document cache
    #[arg(long, global = true, default_value = db::DEFAULT_DB_PATH)]
    db: PathBuf,
    /// Project output directory
    #[arg(long, global = true, default_value = "import-project")]
    out: PathBuf,
    #[arg(long, global = true, value_enum, default_value_t = TemplateMode::Embedded)]
    templates: TemplateMode,
    /// Output flavour
    #[arg(long, global = true, default_value = "script")]
    mode: AdapterMode,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TemplateMode {
    Embedded,
    Remote,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a page via spider.cloud and cache it
    Fetch { url: String },
    /// Full initial build: root element, cleanup, metadata block, project files
    Build {
        url: String,
        /// Use this HTML file instead of the cache or a fetch
        #[arg(long)]
        html: Option<PathBuf>,
        /// Base64 PNG screenshot of the page
        #[arg(long)]
        screenshot: Option<PathBuf>,
    },
    /// Find elements to remove
    Cleanup { url: String, prompt: String },
    /// Find a block and add it to the block rules
    Block { url: String, name: String, prompt: String },
    /// Generate a cell parser for an existing block
    Cells { url: String, name: String, prompt: String },
    /// Generate a whole-page transformer
    Transformer { url: String, name: String, prompt: String },
    /// List cached documents
    Documents {
        /// Also write documentSet.json to the output directory
        #[arg(long)]
        export: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Fetch { url } => {
            let conn = open_cache(&cli.db)?;
            let page = fetch_normalized(&cli, url).await?;
            let screenshot = db::find_document(&conn, url)?.and_then(|entry| entry.screenshot);
            db::upsert_document(&conn, url, &page.document, screenshot.as_deref())?;
            println!(
                "Cached {} ({} bytes{})",
                url,
                page.document.len(),
                page.title.as_deref().map(|t| format!(", \"{}\"", t)).unwrap_or_default()
            );
            Ok(())
        }
        Commands::Build { url, html, screenshot } => {
            let conn = open_cache(&cli.db)?;
            let screenshot = match screenshot {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?
                        .trim()
                        .to_string(),
                ),
                None => None,
            };
            let input = build_input(&cli, &conn, url, html.as_deref(), screenshot).await?;
            run_step(&cli, input, BuildCommand::BuildProject).await
        }
        Commands::Cleanup { url, prompt } => {
            let input = cached_page(&cli, url)?;
            run_step(&cli, input, BuildCommand::AddCleanup { prompt: prompt.clone() }).await
        }
        Commands::Block { url, name, prompt } => {
            let input = cached_page(&cli, url)?;
            let command = BuildCommand::AddBlock { name: name.clone(), prompt: prompt.clone() };
            run_step(&cli, input, command).await
        }
        Commands::Cells { url, name, prompt } => {
            let input = cached_page(&cli, url)?;
            let command = BuildCommand::AddCellParser { name: name.clone(), prompt: prompt.clone() };
            run_step(&cli, input, command).await
        }
        Commands::Transformer { url, name, prompt } => {
            let input = cached_page(&cli, url)?;
            let command = BuildCommand::AddPageTransformer { name: name.clone(), prompt: prompt.clone() };
            run_step(&cli, input, command).await
        }
        Commands::Documents { export } => {
            let conn = open_cache(&cli.db)?;
            let documents = db::list_documents(&conn)?;
            if documents.is_empty() {
                println!("No cached documents. Run 'fetch' or 'build' first.");
                return Ok(());
            }
            println!("{:<60} | {:>9} | {:<10} | {:<19}", "URL", "Bytes", "Screenshot", "Fetched");
            println!("{}", "-".repeat(108));
            for d in &documents {
                println!(
                    "{:<60} | {:>9} | {:<10} | {:<19}",
                    truncate(&d.url, 57),
                    d.content.len(),
                    if d.screenshot.is_some() { "yes" } else { "-" },
                    d.fetched_at
                );
            }
            if *export {
                let file = db::export_documents(&conn)?;
                manifest::write_files(&cli.out, std::slice::from_ref(&file))?;
                println!("\nWrote {}", cli.out.join(file.name.trim_start_matches('/')).display());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn builder_config(cli: &Cli) -> BuilderConfig {
    BuilderConfig::default().merge(ConfigPatch {
        api_key: cli.api_key.clone(),
        base_url: cli.base_url.clone(),
        environment: cli.environment,
    })
}

fn open_cache(path: &Path) -> anyhow::Result<rusqlite::Connection> {
    let conn = db::connect(path).with_context(|| format!("opening {}", path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

async fn fetch_normalized(cli: &Cli, url: &str) -> anyhow::Result<page::PageContent> {
    let Some(key) = cli.spider_key.as_deref() else {
        bail!("{} is not cached and SPIDER_API_KEY is not set", url);
    };
    let fetched = fetcher::fetch_page(key, url).await?;
    if let Some(status) = fetched.status.filter(|s| !(200..300).contains(s)) {
        bail!("{} answered with HTTP {}", url, status);
    }
    Ok(page::normalize_page(&fetched.html, None)?)
}

/// Page for a full build: an HTML file, else the cache, else a fetch.
/// Whatever is used, including the screenshot, is written back to the cache
/// so later steps see the same input.
async fn build_input(
    cli: &Cli,
    conn: &rusqlite::Connection,
    url: &str,
    html: Option<&Path>,
    screenshot: Option<String>,
) -> anyhow::Result<PageInput> {
    let input = match html {
        Some(path) => {
            let html = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let page = page::normalize_page(&html, screenshot)?;
            PageInput { html: page.document, screenshot: page.screenshot }
        }
        None => match db::find_document(conn, url)? {
            Some(entry) => PageInput {
                html: entry.content,
                screenshot: screenshot.or(entry.screenshot),
            },
            None => {
                let page = fetch_normalized(cli, url).await?;
                PageInput { html: page.document, screenshot }
            }
        },
    };
    db::upsert_document(conn, url, &input.html, input.screenshot.as_deref())?;
    Ok(input)
}

fn cached_page(cli: &Cli, url: &str) -> anyhow::Result<PageInput> {
    let conn = open_cache(&cli.db)?;
    let entry = db::find_document(&conn, url)?
        .with_context(|| format!("no cached document for {}; run 'build' first", url))?;
    Ok(PageInput { html: entry.content, screenshot: entry.screenshot })
}

fn load_rules(out: &Path) -> anyhow::Result<Option<RuleDocument>> {
    let path = out.join(RULES_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let rules = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(rules))
}

fn save_rules(out: &Path, rules: &RuleDocument) -> anyhow::Result<()> {
    std::fs::create_dir_all(out)?;
    let path = out.join(RULES_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(rules)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Apply one build step to the page, persist the rules, write the files and
/// fold them into the project manifest. Rules are saved even when the step
/// fails, matching what the builder kept.
async fn run_step(cli: &Cli, input: PageInput, command: BuildCommand) -> anyhow::Result<()> {
    let source = match cli.templates {
        TemplateMode::Embedded => TemplateSource::Embedded,
        TemplateMode::Remote => TemplateSource::Remote,
    };
    let factory = ImportBuilderFactory::new(builder_config(cli), source);
    let progress = render_events(factory.on(&[
        events::EventKind::Start,
        events::EventKind::Progress,
        events::EventKind::Complete,
    ]))?;

    let builder = factory.create(CreateOptions {
        mode: cli.mode,
        page: Some(input),
        rules: load_rules(&cli.out)?,
    })?;
    drop(factory);

    let (session, handle) = BuilderSession::spawn(builder);
    let files = session.run(command).await;
    let rules = session.finish(handle).await?;
    progress.await?;
    save_rules(&cli.out, &rules)?;

    println!(
        "Rules: root {}, {} cleanup selectors, {} blocks, {} transformers",
        rules.root().unwrap_or("-"),
        rules.cleanup().len(),
        rules.blocks().len(),
        rules.transformers().len()
    );

    let files = files?;
    if files.is_empty() {
        println!("Nothing to update.");
        return Ok(());
    }
    let written = manifest::write_files(&cli.out, &files)?;
    for path in &written {
        println!("  {}", path.display());
    }
    let mut project = Manifest::load(&cli.out)?;
    project.apply(files);
    project.save(&cli.out)?;
    println!("{} files in the project manifest", project.len());
    Ok(())
}

/// Show lifecycle events on a spinner until every emitter is gone.
fn render_events(mut events: Subscription) -> anyhow::Result<JoinHandle<()>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    Ok(tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ImportEvent::Start(message) => pb.set_message(message),
                ImportEvent::Progress(message) => pb.println(format!("  {}", message)),
                ImportEvent::Complete => pb.set_message(""),
            }
        }
        pb.finish_and_clear();
    }))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
