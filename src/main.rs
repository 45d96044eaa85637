//! # docrag CLI
//!
//! ## Usage
//!
//! ```bash
//! docrag --config ./config/docrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docrag ingest` | Rebuild the document index and manifest |
//! | `docrag query "<text>"` | Print the top-k context blocks for a query |
//! | `docrag ask "<question>"` | Send retrieved context and a question to the chat API |
//! | `docrag corpus upsert` | Load the research corpus into a collection |
//! | `docrag corpus query "<text>"` | Query a corpus collection (JSON output) |
//! | `docrag check-diagrams` | Validate Mermaid diagrams (exit 1 on failure) |
//! | `docrag report` | Draft a report from a template |
//!
//! API keys are read from `OPENAI_API_KEY`, `OPENROUTER_API_KEY`, and
//! `KB_CHAT_API_KEY`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use docrag::collection::{build_collection, query as query_collection, upsert_documents};
use docrag::config::{self, Config, Secrets};
use docrag::corpus::load_corpus;
use docrag::diagrams::check_diagrams;
use docrag::embedding::create_embedder;
use docrag::error::RagError;
use docrag::ingest::{index_chunks, prepare_documents, IngestOptions};
use docrag::logging;
use docrag::progress::ProgressMode;
use docrag::report::{self, CompletionSettings};
use docrag::retrieve::{self, ChatSettings};
use docrag::sqlite_store::{index_path, SqliteStore};
use docrag_core::retrieval::format_context;
use docrag_core::store::VectorStore;

/// Research documentation toolkit: RAG ingestion and retrieval, corpus
/// loading, Mermaid checks, and report drafting.
#[derive(Parser)]
#[command(name = "docrag", version)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/docrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the vector index and manifest from the source directories.
    Ingest {
        /// Source directory to scan (repeatable). Overrides `paths.source_dirs`.
        #[arg(long = "source")]
        sources: Vec<PathBuf>,

        /// Maximum characters per chunk.
        #[arg(long, env = "RAG_CHUNK_SIZE")]
        chunk_size: Option<usize>,

        /// Characters shared between consecutive chunks.
        #[arg(long, env = "RAG_CHUNK_OVERLAP")]
        chunk_overlap: Option<usize>,

        /// Embedding model identifier.
        #[arg(long, env = "RAG_EMBEDDING_MODEL")]
        model: Option<String>,

        /// Directory for the persisted index.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Manifest JSON path.
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the formatted context retrieved for a query.
    Query {
        query: String,

        /// Number of documents to retrieve.
        #[arg(short, long)]
        k: Option<usize>,

        #[arg(long, env = "RAG_EMBEDDING_MODEL")]
        model: Option<String>,
    },

    /// Ask the knowledge-base chat endpoint, grounded in retrieved context.
    Ask {
        question: String,

        #[arg(short, long)]
        k: Option<usize>,

        /// Chat endpoint URL.
        #[arg(long, env = "KB_CHAT_URL")]
        chat_url: Option<String>,

        /// JSON file with prior `{role, content}` messages.
        #[arg(long)]
        history: Option<PathBuf>,

        #[arg(long, env = "RAG_EMBEDDING_MODEL")]
        model: Option<String>,
    },

    /// Research corpus collections.
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },

    /// Render every Mermaid definition and report syntax errors.
    CheckDiagrams,

    /// Draft a report from a Markdown template.
    Report {
        #[arg(long)]
        template: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// JSON object with placeholder values.
        #[arg(long)]
        context: Option<PathBuf>,

        /// Completion model.
        #[arg(long)]
        model: Option<String>,

        /// Write the merged template without calling the API.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
struct CollectionArgs {
    /// Directory holding the collection index.
    #[arg(long)]
    persist_dir: Option<PathBuf>,

    #[arg(long)]
    collection: Option<String>,

    /// Embedding model to bind to the collection.
    #[arg(long)]
    embed_model: Option<String>,
}

#[derive(Subcommand)]
enum CorpusAction {
    /// Load processed chunks and upsert them into a collection.
    Upsert {
        #[arg(long)]
        processed_dir: Option<PathBuf>,

        /// Index manifest listing the chunk files.
        #[arg(long)]
        index: Option<PathBuf>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[command(flatten)]
        target: CollectionArgs,
    },

    /// Print the best matches for a text as JSON.
    Query {
        text: String,

        #[arg(long, default_value_t = 4)]
        n_results: usize,

        #[command(flatten)]
        target: CollectionArgs,
    },
}

impl CollectionArgs {
    fn apply(self, cfg: &mut Config) {
        if let Some(dir) = self.persist_dir {
            cfg.corpus.persist_dir = dir;
        }
        if let Some(name) = self.collection {
            cfg.corpus.collection = name;
        }
        if let Some(model) = self.embed_model {
            cfg.corpus.embed_model = Some(model);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    let secrets = Secrets::from_lookup(|key| std::env::var(key).ok());

    match cli.command {
        Commands::Ingest {
            sources,
            chunk_size,
            chunk_overlap,
            model,
            output,
            manifest,
            progress,
        } => {
            if !sources.is_empty() {
                cfg.paths.source_dirs = sources;
            }
            if let Some(size) = chunk_size {
                cfg.chunking.chunk_size = size;
            }
            if let Some(overlap) = chunk_overlap {
                cfg.chunking.chunk_overlap = overlap;
            }
            if let Some(model) = model {
                cfg.embedding.model = model;
            }
            if let Some(dir) = output {
                cfg.paths.vectorstore_dir = dir;
            }
            if let Some(path) = manifest {
                cfg.paths.manifest = path;
            }
            cfg.validate()?;

            let embedder = create_embedder(
                &cfg.embedding.model,
                &cfg.embedding,
                secrets.openai_api_key.as_deref(),
            )?;
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let options = IngestOptions::from_config(&cfg);
            let prepared = prepare_documents(&options, reporter.as_ref())?;
            println!("{}", prepared);
            let summary = index_chunks(&options, &prepared, embedder, reporter.as_ref()).await?;
            println!("{}", summary);
        }
        Commands::Query { query, k, model } => {
            if let Some(model) = model {
                cfg.embedding.model = model;
            }
            let k = k.unwrap_or(cfg.retrieval.k);
            let docs = retrieve::retrieve_context(&query, None, k, &cfg, &secrets).await?;
            println!("{}", format_context(&docs));
        }
        Commands::Ask {
            question,
            k,
            chat_url,
            history,
            model,
        } => {
            if let Some(model) = model {
                cfg.embedding.model = model;
            }
            if let Some(url) = chat_url {
                cfg.chat.url = url;
            }
            let history = match history {
                Some(path) => retrieve::read_history(&path)?,
                None => Vec::new(),
            };
            let k = k.unwrap_or(cfg.retrieval.k);
            let docs = retrieve::retrieve_context(&question, None, k, &cfg, &secrets).await?;
            let settings = ChatSettings::new(&cfg.chat, secrets.chat_api_key.clone());
            let response = retrieve::call_chat_api(&settings, &question, &docs, &history).await?;
            println!("{}", response.text().await?);
        }
        Commands::Corpus { action } => match action {
            CorpusAction::Upsert {
                processed_dir,
                index,
                batch_size,
                target,
            } => {
                if let Some(dir) = processed_dir {
                    cfg.corpus.processed_dir = dir;
                }
                if index.is_some() {
                    cfg.corpus.index = index;
                }
                if let Some(size) = batch_size {
                    cfg.corpus.batch_size = size;
                }
                target.apply(&mut cfg);
                cfg.validate()?;
                run_corpus_upsert(&cfg, &secrets).await?;
            }
            CorpusAction::Query {
                text,
                n_results,
                target,
            } => {
                target.apply(&mut cfg);
                run_corpus_query(&cfg, &secrets, &text, n_results).await?;
            }
        },
        Commands::CheckDiagrams => {
            let report = check_diagrams(&cfg.diagrams)?;
            println!("{}", report);
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Commands::Report {
            template,
            output,
            context,
            model,
            dry_run,
        } => {
            if let Some(model) = model {
                cfg.report.model = model;
            }
            let context = report::read_context(context.as_deref())?;
            let settings = CompletionSettings::new(&cfg.report, secrets.openrouter_api_key.clone());
            let outcome = report::generate(&template, &output, &context, &settings, dry_run).await?;
            println!("{}", outcome);
        }
    }

    Ok(())
}

async fn run_corpus_upsert(cfg: &Config, secrets: &Secrets) -> anyhow::Result<()> {
    let corpus = &cfg.corpus;
    let documents = load_corpus(&corpus.processed_dir, corpus.index.as_deref())?;

    let store = Arc::new(SqliteStore::open(&corpus.persist_dir, true).await?);
    let handle = build_collection(
        store.clone(),
        &corpus.collection,
        corpus.embed_model.as_deref(),
        secrets.openai_api_key.as_deref(),
        &cfg.embedding,
    )
    .await?;
    let created = handle.was_created();
    let collection = handle.into_inner();

    let written = upsert_documents(&collection, &documents, corpus.batch_size).await?;
    store.close().await;

    println!(
        "Upserted {} documents into collection {}{}",
        written,
        collection.name(),
        if created { " (created)" } else { "" }
    );
    Ok(())
}

async fn run_corpus_query(
    cfg: &Config,
    secrets: &Secrets,
    text: &str,
    n_results: usize,
) -> anyhow::Result<()> {
    let corpus = &cfg.corpus;
    if !index_path(&corpus.persist_dir).is_file() {
        return Err(RagError::IndexNotFound(corpus.persist_dir.clone()).into());
    }
    let store = Arc::new(SqliteStore::open(&corpus.persist_dir, false).await?);

    let info = store
        .get_collection(&corpus.collection)
        .await?
        .ok_or_else(|| RagError::IndexNotFound(corpus.persist_dir.clone()))?;
    let model = corpus.embed_model.clone().or(info.embedding_model);
    let collection = build_collection(
        store.clone(),
        &corpus.collection,
        model.as_deref(),
        secrets.openai_api_key.as_deref(),
        &cfg.embedding,
    )
    .await?
    .into_inner();

    let matches = query_collection(&collection, text, n_results).await?;
    store.close().await;
    println!("{}", serde_json::to_string_pretty(&matches)?);
    Ok(())
}
