//! CLI entry point for docsift.
//!
//! Chunks documents, builds and persists per-document indexes, and answers
//! questions against them from the terminal.

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use docsift::display::{THEME, create_spinner};
use docsift::vector::EmbeddingBackend;
use docsift::{
    Chunk, DocumentId, DocumentIndexStore, IndexKind, RetrievalEngine, RetrievalError, Settings,
    chunk_text, create_generator, logging,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Document retrieval for question answering
#[derive(Parser)]
#[command(
    name = "docsift",
    version = env!("CARGO_PKG_VERSION"),
    about = "Chunk, embed and query documents",
    long_about = "Split documents into overlapping chunks, index their embeddings and \
                  retrieve ranked context for questions.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Embedding backend, overriding `embedding.backend`
    #[arg(long, global = true, value_name = "fastembed|hashed")]
    embedder: Option<EmbeddingBackend>,

    /// Emit JSON instead of styled text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .docsift/settings.toml with default configuration
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Display the active settings
    Config,

    /// Split a text file into chunks and print them
    Chunk {
        file: PathBuf,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Chunk, embed and persist the index for a text file
    Index {
        file: PathBuf,

        /// Identity to store the document under (defaults to a content hash)
        #[arg(long)]
        doc_id: Option<DocumentId>,

        /// Index variant, overriding `index.kind`
        #[arg(long, value_name = "flat|clustered")]
        kind: Option<IndexKind>,

        /// Rebuild even if an index already exists
        #[arg(short, long)]
        force: bool,

        /// Rayon worker threads, overriding `indexing.parallel_threads`
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Assemble context for a question from an indexed document
    Query {
        doc_id: DocumentId,

        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(long)]
        max_length: Option<usize>,

        #[arg(long)]
        min_score: Option<f32>,
    },

    /// List ranked matching chunks for a question
    Search {
        doc_id: DocumentId,

        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(long)]
        min_score: Option<f32>,
    },
}

#[derive(Debug, Serialize)]
struct IndexReport {
    doc_id: String,
    chunks: usize,
    kind: &'static str,
    dimension: usize,
    model: String,
    generation: String,
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct QueryReport<'a> {
    doc_id: &'a str,
    question: &'a str,
    context: &'a str,
    average_score: f32,
    sources: &'a [u32],
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli).await {
        report_error(&e, json);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = cli.command {
        let path = Settings::init_config_file(force)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("could not create configuration file")?;
        println!(
            "{}",
            THEME.success_with_icon(&format!("Created configuration file at {}", path.display()))
        );
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::load().context("loading configuration")?,
    };
    if let Some(backend) = cli.embedder {
        settings.embedding.backend = backend;
    }

    logging::init_with_config(&settings.logging);

    match cli.command {
        // Handled before settings are loaded
        Commands::Init { .. } => {}

        Commands::Config => {
            settings.validate()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                println!("{}", THEME.apply(&THEME.header, "Current configuration"));
                println!("{}", "=".repeat(50));
                println!("{}", toml::to_string_pretty(&settings)?);
            }
        }

        Commands::Chunk {
            file,
            chunk_size,
            overlap,
        } => {
            if let Some(size) = chunk_size {
                settings.chunking.chunk_size = size;
            }
            if let Some(overlap) = overlap {
                settings.chunking.overlap = overlap;
            }
            settings.validate()?;

            let text = read_document(&file)?;
            let chunks = Chunk::from_texts(chunk_text(
                &text,
                settings.chunking.chunk_size,
                settings.chunking.overlap,
            ));
            print_chunks(&chunks, cli.json)?;
        }

        Commands::Index {
            file,
            doc_id,
            kind,
            force,
            threads,
        } => {
            if let Some(kind) = kind {
                settings.index.kind = kind;
            }
            if let Some(threads) = threads {
                settings.indexing.parallel_threads = threads;
            }
            settings.validate()?;
            configure_thread_pool(settings.indexing.parallel_threads);

            let text = read_document(&file)?;
            let doc_id = doc_id.unwrap_or_else(|| DocumentId::from_content(&text));
            index_document(&settings, doc_id, text, force, cli.json).await?;
        }

        Commands::Query {
            doc_id,
            question,
            top_k,
            max_length,
            min_score,
        } => {
            if let Some(top_k) = top_k {
                settings.retrieval.top_k = top_k;
            }
            if let Some(max_length) = max_length {
                settings.retrieval.max_length = max_length;
            }
            if let Some(min_score) = min_score {
                settings.retrieval.min_score = min_score;
            }
            settings.validate()?;

            let question = question.join(" ");
            let engine = build_engine(&settings)?;
            let context = engine
                .get_relevant_context_async(doc_id.clone(), question.clone())
                .await?;

            if cli.json {
                let report = QueryReport {
                    doc_id: doc_id.as_str(),
                    question: &question,
                    context: &context.context,
                    average_score: context.average_score,
                    sources: &context.sources,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if context.is_empty() {
                println!(
                    "{}",
                    THEME.warning_with_icon("No relevant context found for this question")
                );
            } else {
                println!("{}", context.context);
                println!();
                println!(
                    "{} {} from {} chunk(s)",
                    THEME.apply(&THEME.dim, "average score"),
                    THEME.apply(&THEME.number, format!("{:.3}", context.average_score)),
                    context.sources.len()
                );
            }
        }

        Commands::Search {
            doc_id,
            question,
            top_k,
            min_score,
        } => {
            if let Some(top_k) = top_k {
                settings.retrieval.top_k = top_k;
            }
            if let Some(min_score) = min_score {
                settings.retrieval.min_score = min_score;
            }
            settings.validate()?;

            let engine = build_engine(&settings)?;
            let results = engine.search_async(doc_id, question.join(" ")).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("{}", THEME.warning_with_icon("No chunks above the score threshold"));
            } else {
                for (rank, result) in results.iter().enumerate() {
                    println!(
                        "{}. {}  {}",
                        rank + 1,
                        THEME.apply(&THEME.number, format!("{:.3}", result.score)),
                        result.text
                    );
                }
            }
        }
    }

    Ok(())
}

async fn index_document(
    settings: &Settings,
    doc_id: DocumentId,
    text: String,
    force: bool,
    json: bool,
) -> Result<()> {
    let spinner = create_spinner(
        &format!("Indexing {doc_id}"),
        settings.indexing.show_progress && !json,
    );
    let start = Instant::now();

    let embedder = create_generator(&settings.embedding)?;
    let store = Arc::new(DocumentIndexStore::from_settings(settings));
    let chunking = settings.chunking;

    let task_store = Arc::clone(&store);
    let task_id = doc_id.clone();
    let document = tokio::task::spawn_blocking(move || {
        let chunks = chunk_text(&text, chunking.chunk_size, chunking.overlap);
        if force {
            task_store.rebuild(&task_id, &chunks, embedder.as_ref())
        } else {
            task_store.get_or_build(&task_id, &chunks, embedder.as_ref())
        }
    })
    .await
    .map_err(|e| RetrievalError::TaskFailed(e.to_string()))?;

    spinner.finish_and_clear();
    let document = document?;

    let report = IndexReport {
        doc_id: doc_id.to_string(),
        chunks: document.len(),
        kind: document.index().kind().as_str(),
        dimension: document.index().dimension().get(),
        model: document.model().to_string(),
        generation: format!("{:016x}", document.generation()),
        path: store.paths(&doc_id).index,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}",
            THEME.success_with_icon(&format!(
                "Indexed {} as {} ({} chunks, {} index) in {:.2?}",
                report.doc_id,
                THEME.apply(&THEME.path, report.path.display()),
                report.chunks,
                report.kind,
                start.elapsed()
            ))
        );
    }
    Ok(())
}

fn build_engine(settings: &Settings) -> Result<RetrievalEngine> {
    let embedder = create_generator(&settings.embedding)?;
    let store = Arc::new(DocumentIndexStore::from_settings(settings));
    Ok(RetrievalEngine::new(
        store,
        embedder,
        settings.retrieval.clone(),
    ))
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_chunks(chunks: &[Chunk], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(chunks)?);
        return Ok(());
    }

    for chunk in chunks {
        println!(
            "{} {}",
            THEME.apply(&THEME.header, format!("[{}]", chunk.ordinal)),
            THEME.apply(&THEME.dim, format!("{} chars", chunk.char_count()))
        );
        println!("{}\n", chunk.text);
    }
    Ok(())
}

fn configure_thread_pool(threads: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        tracing::warn!(target: "cli", "could not size the rayon pool to {threads}: {e}");
    }
}

fn report_error(error: &anyhow::Error, json: bool) {
    let retrieval = error.downcast_ref::<RetrievalError>();

    if json {
        let body = serde_json::json!({
            "error": format!("{error:#}"),
            "code": retrieval.map(RetrievalError::status_code),
            "suggestions": retrieval.map(RetrievalError::recovery_suggestions).unwrap_or_default(),
        });
        eprintln!("{body}");
        return;
    }

    eprintln!("{}", THEME.error_with_icon(&format!("{error:#}")));
    if let Some(retrieval) = retrieval {
        for suggestion in retrieval.recovery_suggestions() {
            eprintln!("  {}", THEME.apply(&THEME.dim, suggestion));
        }
    }
}
