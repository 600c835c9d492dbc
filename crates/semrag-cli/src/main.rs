//! SemRAG CLI - Command-line interface
//!
//! Usage:
//!   semrag init
//!   semrag ingest [--source <url|path>] [--limit <n>]
//!   semrag ask <question>
//!   semrag chat        (/stats prints the semantic cache counters)
//!   semrag stats

use anyhow::Context;
use clap::{Parser, Subcommand};
use semrag_core::{AppConfig, CacheStatus, LoggingConfig, Query, RagAnswer, VectorBackend};
use semrag_ingest::Ingestor;
use semrag_rag::{CacheStatsReport, ChatSession, RagComponents, RagPipeline};
use semrag_vector::SimilarityStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semrag")]
#[command(about = "Question answering over a document collection with a semantic answer cache")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the content and cache indexes
    Init,
    /// Ingest a JSON array of records into the content index
    Ingest {
        /// URL or file path (defaults to SOURCE_DATA_URL)
        #[arg(long)]
        source: Option<String>,
        /// Ingest only the first N records
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ask a single question
    Ask {
        question: String,
        /// Print the full answer as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive conversation
    Chat,
    /// Point counts per index
    Stats,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path.clone())?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins; otherwise the configured level applies to every semrag crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,semrag={}", logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn ingest(
    config: &AppConfig,
    components: &RagComponents,
    source: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let source = source
        .or_else(|| config.ingest.source.clone())
        .context("No source given; pass --source or set SOURCE_DATA_URL")?;

    let report = Ingestor::new(
        Arc::clone(&components.embedder),
        Arc::clone(&components.content_store),
        config.ingest.clone(),
    )
    .with_limit(limit)
    .with_connect_timeout(config.llm.timeout_secs)
    .ingest_source(&source)
    .await?;

    println!(
        "Ingested {} records into '{}' in {}ms",
        report.ingested, config.vector.content_collection, report.elapsed_ms
    );
    Ok(())
}

/// Make sure both indexes exist before querying
///
/// The in-memory backend starts empty in every process, so it is filled from
/// the configured source first.
async fn prepare_for_queries(
    config: &AppConfig,
    components: &RagComponents,
) -> anyhow::Result<()> {
    components.ensure_indexes().await?;
    if config.vector.backend != VectorBackend::Memory {
        return Ok(());
    }
    match &config.ingest.source {
        Some(_) => ingest(config, components, None, None).await,
        None => {
            tracing::warn!("Memory backend without SOURCE_DATA_URL: the content index is empty");
            Ok(())
        }
    }
}

fn print_answer(answer: &RagAnswer) {
    println!("{}", answer.answer);
    println!();
    match answer.cache {
        CacheStatus::Hit { similarity } => {
            println!("(cached answer, similarity {similarity:.4})")
        }
        CacheStatus::Miss => println!("(generated in {}ms)", answer.processing_time_ms),
        CacheStatus::Disabled => println!(
            "(generated in {}ms, cache disabled)",
            answer.processing_time_ms
        ),
    }
    if !answer.sources.is_empty() {
        println!("Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!("  [{}] {} ({:.3})", i + 1, source.record.label(), source.score);
        }
    }
}

fn format_cache_stats(report: &CacheStatsReport) -> String {
    format!(
        "{}: {} hits, {} misses, {} writes ({:.1}% hit rate)",
        report.name,
        report.hits,
        report.misses,
        report.writes,
        report.hit_rate * 100.0
    )
}

fn print_cache_stats(pipeline: &RagPipeline) {
    match pipeline.cache_stats() {
        Some(report) => println!("{}", format_cache_stats(&report)),
        None => println!("Semantic cache disabled."),
    }
}

async fn chat(pipeline: RagPipeline) -> anyhow::Result<()> {
    let pipeline = Arc::new(pipeline);
    let mut session = ChatSession::new(Arc::clone(&pipeline));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!(
        "Ask about the collection. /clear resets the conversation, /stats shows cache \
         counters, /exit quits."
    );
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                session.clear();
                println!("Conversation cleared.");
            }
            "/stats" => print_cache_stats(&pipeline),
            question => match session.ask(question).await {
                Ok(answer) => print_answer(&answer),
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }
    print_cache_stats(&pipeline);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    let components = RagComponents::from_config(&config).await?;

    match cli.command {
        Commands::Init => {
            components.ensure_indexes().await?;
            println!(
                "Indexes ready: '{}' and '{}'",
                config.vector.content_collection, config.vector.cache_collection
            );
        }
        Commands::Ingest { source, limit } => {
            components.ensure_indexes().await?;
            ingest(&config, &components, source, limit).await?;
        }
        Commands::Ask { question, json } => {
            prepare_for_queries(&config, &components).await?;
            let pipeline = RagPipeline::from_components(&components, &config);
            let answer = pipeline.ask(&Query::new(question)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Chat => {
            prepare_for_queries(&config, &components).await?;
            chat(RagPipeline::from_components(&components, &config)).await?;
        }
        Commands::Stats => {
            for store in [&components.content_store, &components.cache_store] {
                println!("{}: {} points", store.name(), store.count().await?);
            }
        }
    }

    Ok(())
}
