//! Loregraph CLI - consistency-checked lore for shared worlds

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use loregraph_core::config::Config;
use loregraph_core::domain::knowledge::{
    Canonicalizer, ConsistencyValidator, ContradictionDetector, Extraction, Extractor,
    IngestionReport, IngestionService, IterationContext, LlmExtractor, ValidationResult,
};
use loregraph_core::domain::workflow::{
    GraphRetriever, LlmGenerator, WorkflowController, WorkflowOutcome,
};
use loregraph_core::llm::{ChatCompletion, LlmClient, PromptLog};
use loregraph_core::storage::InMemoryGraphStore;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "loregraph")]
#[command(author, version, about = "Consistency-checked lore for shared worlds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Graph snapshot file (defaults to ingestion.store_path, then the config directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize an extraction file without touching the graph
    Canonicalize {
        /// Extraction JSON with `entities` and `relationships`
        file: PathBuf,
    },

    /// Validate candidate lore against the graph
    Validate {
        /// Candidate JSON with `entities` and `relationships`
        file: PathBuf,
    },

    /// Ingest lore into the graph
    Ingest {
        /// Narrative text, or extraction JSON with --extracted
        file: PathBuf,
        /// Treat the file as extraction JSON and skip the LLM
        #[arg(long)]
        extracted: bool,
    },

    /// Ask for new lore through the consistency workflow
    Ask {
        /// Question or request
        query: String,
        /// Commit the result to the graph if it passes validation
        #[arg(long)]
        commit: bool,
        /// Session ID (a new UUID when omitted)
        #[arg(long)]
        session_id: Option<String>,
        /// Override workflow.max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Show an entity by canonical ID
    Show { id: String },

    /// Show graph statistics
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loregraph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.quiet),
        command => {
            let config = Config::load()?;
            let store_path = match &cli.store {
                Some(path) => path.clone(),
                None => config.store_path()?,
            };
            let ctx = CommandContext {
                config,
                store_path,
                format: cli.format,
                quiet: cli.quiet,
            };
            let result = run(command, &ctx).await;
            if let Err(e) = &result
                && let Some(error) = e.downcast_ref::<loregraph_core::Error>()
                && let Some(hint) = error.suggestion()
            {
                eprintln!("hint [{}]: {}", error.code(), hint);
            }
            result
        }
    }
}

struct CommandContext {
    config: Config,
    store_path: PathBuf,
    format: OutputFormat,
    quiet: bool,
}

impl CommandContext {
    async fn load_store(&self) -> anyhow::Result<Arc<InMemoryGraphStore>> {
        let store = InMemoryGraphStore::load(&self.store_path).await?;
        Ok(Arc::new(store))
    }

    async fn save_store(&self, store: &InMemoryGraphStore) -> anyhow::Result<()> {
        store.save(&self.store_path).await?;
        debug!(path = %self.store_path.display(), "Graph saved");
        Ok(())
    }

    fn canonicalizer(&self) -> Canonicalizer {
        Canonicalizer::new().with_min_confidence(self.config.ingestion.min_entity_confidence)
    }

    fn validator(&self, store: &Arc<InMemoryGraphStore>) -> ConsistencyValidator {
        ConsistencyValidator::new(ContradictionDetector::new(store.clone()))
            .with_min_score(self.config.workflow.min_consistency_score)
    }

    fn llm(&self) -> anyhow::Result<Arc<dyn ChatCompletion>> {
        let api_key = self.config.llm.resolved_api_key()?.ok_or_else(|| {
            anyhow!("No LLM API key found. Set LOREGRAPH_API_KEY or OPENAI_API_KEY.")
        })?;
        let client = LlmClient::new(self.config.llm.clone(), api_key)?;
        Ok(Arc::new(client))
    }

    fn prompt_log(&self) -> Arc<PromptLog> {
        let log = Config::config_dir()
            .map(|dir| dir.join("prompts.jsonl"))
            .map_err(|e| e.to_string())
            .and_then(|path| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                PromptLog::with_file(&path).map_err(|e| e.to_string())
            });
        match log {
            Ok(log) => Arc::new(log),
            Err(e) => {
                warn!(error = %e, "Prompt log file unavailable, keeping prompts in memory");
                Arc::new(PromptLog::new())
            }
        }
    }

    fn print_json(&self, value: &impl serde::Serialize) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

async fn run(command: Commands, ctx: &CommandContext) -> anyhow::Result<()> {
    match command {
        Commands::Canonicalize { file } => cmd_canonicalize(&file, ctx),
        Commands::Validate { file } => cmd_validate(&file, ctx).await,
        Commands::Ingest { file, extracted } => cmd_ingest(&file, extracted, ctx).await,
        Commands::Ask {
            query,
            commit,
            session_id,
            max_iterations,
        } => cmd_ask(&query, commit, session_id, max_iterations, ctx).await,
        Commands::Show { id } => cmd_show(&id, ctx).await,
        Commands::Stats => cmd_stats(ctx).await,
        Commands::Config { action } => cmd_config(action, ctx.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn read_extraction(path: &Path) -> anyhow::Result<Extraction> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse extraction JSON in {}", path.display()))
}

fn cmd_canonicalize(file: &Path, ctx: &CommandContext) -> anyhow::Result<()> {
    let extraction = read_extraction(file)?;
    let result = ctx.canonicalizer().canonicalize_extraction(extraction);

    if ctx.format == OutputFormat::Json {
        return ctx.print_json(&result);
    }

    if !ctx.quiet {
        println!(
            "Canonicalized {} entities ({} merged), {} relationships",
            result.entities.len(),
            result.merged_count(),
            result.relationships.len()
        );
        println!();
    }
    for entity in &result.entities {
        println!("{}  {}", entity.id, entity.name);
        if entity.merged_from.len() > 1 && !ctx.quiet {
            println!("    merged from: {}", entity.merged_from.join(", "));
        }
    }
    for relationship in &result.relationships {
        println!(
            "{} -[{}]-> {}",
            relationship.from_id, relationship.relationship_type, relationship.to_id
        );
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

async fn cmd_validate(file: &Path, ctx: &CommandContext) -> anyhow::Result<()> {
    let extraction = read_extraction(file)?;
    let store = ctx.load_store().await?;

    let candidates = ctx.canonicalizer().decompose_extraction(extraction);
    let result = ctx
        .validator(&store)
        .validate_candidates(&candidates, IterationContext::single_pass())
        .await;

    if ctx.format == OutputFormat::Json {
        return ctx.print_json(&result);
    }
    print_validation(&result, ctx.quiet);
    Ok(())
}

fn print_validation(result: &ValidationResult, quiet: bool) {
    let verdict = if result.is_valid { "VALID" } else { "INVALID" };
    println!("{} (score {:.2})", verdict, result.consistency_score);
    if quiet {
        return;
    }

    for violation in &result.schema_violations {
        println!("  [schema] {}", violation);
    }
    for contradiction in &result.contradictions {
        println!(
            "  [contradiction] {} contradicts {}",
            contradiction.new_claim, contradiction.existing_fact
        );
    }
    for id in &result.unverified {
        println!("  [unverified] {}", id);
    }
    for fix in &result.suggested_fixes {
        println!("  fix: {}", fix);
    }
}

async fn cmd_ingest(file: &Path, extracted: bool, ctx: &CommandContext) -> anyhow::Result<()> {
    let store = ctx.load_store().await?;

    let report = if extracted {
        let extraction = read_extraction(file)?;
        // The extractor is never called for pre-extracted input
        let mut service = IngestionService::new(Arc::new(NoExtractor), store.clone())
            .with_canonicalizer(ctx.canonicalizer());
        service.ingest_extraction(extraction).await
    } else {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let extractor = LlmExtractor::new(ctx.llm()?).with_prompt_log(ctx.prompt_log());
        let mut service = IngestionService::new(Arc::new(extractor), store.clone())
            .with_canonicalizer(ctx.canonicalizer());
        service.ingest(&text).await
    };

    ctx.save_store(&store).await?;

    if ctx.format == OutputFormat::Json {
        return ctx.print_json(&report);
    }
    print_report("Ingested", &report, ctx.quiet);
    Ok(())
}

/// Extractor for paths that only write already-structured lore
struct NoExtractor;

#[async_trait::async_trait]
impl Extractor for NoExtractor {
    async fn extract(&self, _: &str) -> loregraph_core::Result<Extraction> {
        Ok(Extraction::default())
    }
}

fn print_report(verb: &str, report: &IngestionReport, quiet: bool) {
    println!(
        "{} {} entities ({} merged), {} relationships",
        verb, report.entities_written, report.entities_merged, report.relationships_written
    );
    if quiet {
        return;
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    for error in &report.errors {
        println!("  error: {}", error);
    }
}

async fn cmd_ask(
    query: &str,
    commit: bool,
    session_id: Option<String>,
    max_iterations: Option<u32>,
    ctx: &CommandContext,
) -> anyhow::Result<()> {
    let store = ctx.load_store().await?;
    let llm = ctx.llm()?;

    let mut controller = WorkflowController::new(
        Arc::new(GraphRetriever::new(store.clone())),
        Arc::new(LlmGenerator::new(llm).with_prompt_log(ctx.prompt_log())),
        ctx.validator(&store),
    )
    .with_config(&ctx.config.workflow);
    if let Some(max) = max_iterations {
        controller = controller.with_max_iterations(max);
    }

    let outcome = controller.run_workflow(query, session_id).await;

    let committed = if commit && outcome.success {
        let mut service = IngestionService::new(Arc::new(NoExtractor), store.clone())
            .with_canonicalizer(ctx.canonicalizer());
        let report = service.commit(&outcome).await?;
        ctx.save_store(&store).await?;
        Some(report)
    } else {
        None
    };

    if ctx.format == OutputFormat::Json {
        return ctx.print_json(&serde_json::json!({
            "outcome": outcome,
            "committed": committed,
        }));
    }

    print_outcome(&outcome, ctx.quiet);
    if let Some(report) = committed {
        print_report("Committed", &report, ctx.quiet);
    } else if commit && !ctx.quiet {
        println!("Nothing committed: session ended in {}", outcome.phase);
    }
    Ok(())
}

fn print_outcome(outcome: &WorkflowOutcome, quiet: bool) {
    if let Some(response) = &outcome.response {
        println!("{}", response);
    }
    if quiet {
        return;
    }

    println!();
    println!(
        "Session {}: {} after {} iteration(s)",
        outcome.session_id, outcome.phase, outcome.iterations
    );
    if outcome.requires_human_review {
        println!("This lore needs human review before it can be committed.");
    }
    if let Some(result) = &outcome.validation_result {
        print_validation(result, quiet);
    }
    for error in &outcome.errors {
        println!("  error: {}", error);
    }
}

async fn cmd_show(id: &str, ctx: &CommandContext) -> anyhow::Result<()> {
    let store = ctx.load_store().await?;
    let entity = store
        .entity(id)
        .await
        .ok_or_else(|| loregraph_core::Error::EntityNotFound(id.to_string()))?;
    let relationships = store.relationships_touching(id).await;

    if ctx.format == OutputFormat::Json {
        return ctx.print_json(&serde_json::json!({
            "entity": entity,
            "relationships": relationships,
        }));
    }

    println!("{} ({})", entity.name, entity.id);
    for (key, value) in &entity.properties {
        match value.as_str() {
            Some(s) => println!("  {}: {}", key, s),
            None => println!("  {}: {}", key, value),
        }
    }
    if !entity.aliases.is_empty() {
        println!("  aliases: {}", entity.aliases.join(", "));
    }
    for relationship in &relationships {
        println!(
            "  {} -[{}]-> {}",
            relationship.from_id, relationship.relationship_type, relationship.to_id
        );
    }
    Ok(())
}

async fn cmd_stats(ctx: &CommandContext) -> anyhow::Result<()> {
    let store = ctx.load_store().await?;
    let stats = store.stats().await;

    if ctx.format == OutputFormat::Json {
        return ctx.print_json(&stats);
    }

    println!("Entities:      {}", stats.entity_count);
    println!("Relationships: {}", stats.relationship_count);
    if ctx.quiet {
        return Ok(());
    }
    for (entity_type, count) in &stats.entities_by_type {
        println!("  {:<12} {}", entity_type, count);
    }
    for (relationship_type, count) in &stats.relationships_by_type {
        println!("  {:<12} {}", relationship_type, count);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
