// alexandria/crates/alexandria/src/main.rs

use alexandria::engine::{LoaCaptureOptions, MemoryEngine};
use alexandria::memory_db::record_store::{NewBreadcrumb, NewDecision, NewLearning};
use alexandria::memory_db::{DocumentKind, EntityKind, TelosKind};
use alexandria::search::SearchHit;
use alexandria::{Config, MemoryError};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "alexandria",
    about = "Persistent cross-session memory for AI coding assistants",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize (or upgrade) the memory store
    Init,
    /// Record a structured memory entry
    Add {
        #[command(subcommand)]
        record: AddCommand,
    },
    /// Keyword search across memory
    Search {
        query: String,
        #[command(flatten)]
        scope: SearchScope,
    },
    /// Vector-similarity search
    Semantic {
        query: String,
        #[arg(long)]
        table: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Keyword + vector search, rank-fused
    Hybrid {
        query: String,
        #[command(flatten)]
        scope: SearchScope,
    },
    /// List the most recent entries of a kind
    Recent {
        #[arg(default_value = "breadcrumbs")]
        kind: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print one record in full
    Show { kind: String, id: i64 },
    /// Row counts and store size
    Stats,
    /// Import transcript sessions into the store
    Import {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        verbose: bool,
        /// Accepted for hook compatibility; import never prompts.
        #[arg(long, hide = true)]
        yes: bool,
    },
    /// Curated extracts over message spans
    Loa {
        #[command(subcommand)]
        action: LoaCommand,
    },
    /// Re-ingest the active session, then capture it
    Dump {
        title: String,
        #[command(flatten)]
        capture: CaptureArgs,
        #[arg(long)]
        skip_extract: bool,
    },
    /// Embedding maintenance
    Embed {
        #[command(subcommand)]
        action: EmbedCommand,
    },
    /// Run the extraction pipeline on one transcript
    Extract {
        file: PathBuf,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Scan the transcript tree and extract in batch
    Batch {
        #[arg(long, default_value_t = 10, conflicts_with = "unlimited")]
        limit: usize,
        #[arg(long)]
        unlimited: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Import TELOS purpose-framework entries
    Telos {
        #[command(subcommand)]
        action: TelosCommand,
    },
    /// Import reference documents
    Docs {
        #[command(subcommand)]
        action: DocsCommand,
    },
    /// Bare query: hybrid search
    #[command(external_subcommand)]
    Query(Vec<String>),
}

#[derive(Subcommand)]
enum AddCommand {
    Breadcrumb {
        text: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        importance: Option<i64>,
    },
    Decision {
        text: String,
        #[arg(long)]
        reasoning: Option<String>,
        #[arg(long)]
        alternatives: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    Learning {
        problem: String,
        #[arg(long)]
        solution: Option<String>,
        #[arg(long)]
        prevention: Option<String>,
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Args)]
struct SearchScope {
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    table: Option<String>,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Args, Clone)]
struct CaptureArgs {
    #[arg(long)]
    project: Option<String>,
    /// Parent entry id this capture continues
    #[arg(long)]
    continues: Option<i64>,
    #[arg(long)]
    tags: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Subcommand)]
enum LoaCommand {
    /// Capture the messages since the last entry
    Write {
        title: String,
        #[command(flatten)]
        capture: CaptureArgs,
    },
    Show { id: i64 },
    /// Print the messages an entry was derived from
    Quote { id: i64 },
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum EmbedCommand {
    /// Embed rows that don't have a vector yet
    Backfill {
        #[arg(long)]
        table: Option<String>,
        #[arg(long, default_value_t = 500)]
        limit: usize,
        #[arg(long)]
        force: bool,
    },
    Stats,
}

#[derive(Subcommand)]
enum TelosCommand {
    Import {
        file: PathBuf,
        #[arg(long = "type", default_value = "other")]
        kind: String,
    },
}

#[derive(Subcommand)]
enum DocsCommand {
    Import {
        file: PathBuf,
        #[arg(long = "type", default_value = "reference")]
        kind: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match run(cli.command, config).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(command: Command, config: Config) -> Result<(), MemoryError> {
    if let Command::Init = command {
        let (_engine, created) = MemoryEngine::init(config)?;
        println!(
            "{}",
            if created {
                "Memory store initialized."
            } else {
                "Memory store already initialized; schema up to date."
            }
        );
        return Ok(());
    }

    let engine = MemoryEngine::open(config)?;

    match command {
        Command::Init => unreachable!("handled above"),
        Command::Add { record } => match record {
            AddCommand::Breadcrumb {
                text,
                category,
                project,
                session,
                importance,
            } => {
                let id = engine.add_breadcrumb(&NewBreadcrumb {
                    content: text,
                    category,
                    project,
                    session_ref: session,
                    importance,
                    expires_at: None,
                })?;
                println!("breadcrumb #{id} recorded");
            }
            AddCommand::Decision {
                text,
                reasoning,
                alternatives,
                category,
                project,
                session,
            } => {
                let id = engine.add_decision(&NewDecision {
                    decision: text,
                    reasoning,
                    alternatives,
                    category,
                    project,
                    session_ref: session,
                })?;
                println!("decision #{id} recorded");
            }
            AddCommand::Learning {
                problem,
                solution,
                prevention,
                tags,
                category,
                project,
                session,
            } => {
                let id = engine.add_learning(&NewLearning {
                    problem,
                    solution,
                    prevention,
                    tags,
                    category,
                    project,
                    session_ref: session,
                })?;
                println!("learning #{id} recorded");
            }
        },
        Command::Search { query, scope } => {
            let kind = parse_kind_opt(scope.table.as_deref())?;
            let hits = engine.search(&query, kind, scope.project.as_deref(), scope.limit)?;
            print_hits(&hits);
        }
        Command::Semantic { query, table, limit } => {
            let kind = parse_kind_opt(table.as_deref())?;
            let hits = engine.semantic(&query, kind, limit).await?;
            print_hits(&hits);
        }
        Command::Hybrid { query, scope } => {
            run_hybrid(&engine, &query, scope).await?;
        }
        Command::Query(words) => {
            let query = words.join(" ");
            run_hybrid(
                &engine,
                &query,
                SearchScope {
                    project: None,
                    table: None,
                    limit: 10,
                },
            )
            .await?;
        }
        Command::Recent {
            kind,
            project,
            limit,
        } => {
            let kind: EntityKind = kind.parse()?;
            for item in engine.recent(kind, project.as_deref(), limit)? {
                println!(
                    "[{}] #{:<5} {}  {}",
                    item.kind, item.id, item.created_at, item.preview
                );
            }
        }
        Command::Show { kind, id } => {
            let kind: EntityKind = kind.parse()?;
            println!("{}", engine.show(kind, id)?);
        }
        Command::Stats => {
            let stats = engine.stats()?;
            println!("sessions:     {}", stats.sessions);
            println!("messages:     {}", stats.messages);
            println!("loa entries:  {}", stats.loa_entries);
            println!("decisions:    {}", stats.decisions);
            println!("learnings:    {}", stats.learnings);
            println!("breadcrumbs:  {}", stats.breadcrumbs);
            println!("telos:        {}", stats.telos_entries);
            println!("documents:    {}", stats.documents);
            println!("embeddings:   {}", stats.embeddings);
            println!("db size:      {} bytes", stats.db_size_bytes);
        }
        Command::Import {
            dry_run, verbose, ..
        } => {
            let report = engine.import_sessions(dry_run, verbose)?;
            println!(
                "{} file(s): {} session(s), {} message(s) {}, {} already present",
                report.files,
                report.sessions,
                report.messages,
                if dry_run { "would import" } else { "imported" },
                report.skipped_existing
            );
        }
        Command::Loa { action } => match action {
            LoaCommand::Write { title, capture } => {
                let entry = engine
                    .loa_write(&title, &capture_options(capture, false))
                    .await?;
                println!(
                    "loa #{} captured ({} messages)",
                    entry.id,
                    entry.message_count.unwrap_or(0)
                );
            }
            LoaCommand::Show { id } => {
                let entry = engine.loa_show(id)?;
                println!("{}", engine.show(EntityKind::Loa, entry.id)?);
            }
            LoaCommand::Quote { id } => {
                for message in engine.loa_quote(id)? {
                    println!(
                        "[{}] {}  {}",
                        message.role.as_str(),
                        message.ts.to_rfc3339(),
                        message.content
                    );
                }
            }
            LoaCommand::List { limit } => {
                for entry in engine.loa_list(limit)? {
                    println!(
                        "#{:<5} {}  {} ({} messages)",
                        entry.id,
                        entry.created_at.format("%Y-%m-%d"),
                        entry.title,
                        entry.message_count.unwrap_or(0)
                    );
                }
            }
        },
        Command::Dump {
            title,
            capture,
            skip_extract,
        } => {
            let entry = engine
                .dump(&title, &capture_options(capture, skip_extract))
                .await?;
            println!(
                "session dumped into loa #{} ({} messages)",
                entry.id,
                entry.message_count.unwrap_or(0)
            );
        }
        Command::Embed { action } => match action {
            EmbedCommand::Backfill {
                table,
                limit,
                force,
            } => {
                let kind = parse_kind_opt(table.as_deref())?;
                let report = engine.embed_backfill(kind, limit, force).await?;
                println!("{} embedded, {} failed", report.embedded, report.failed);
            }
            EmbedCommand::Stats => {
                let stats = engine.embed_stats()?;
                let health = engine.embedding_health().await;
                println!(
                    "{} embeddings ({} dims, {} bytes of vectors)",
                    stats.total, stats.dimensions, stats.vector_bytes
                );
                let mut kinds: Vec<_> = stats.by_kind.iter().collect();
                kinds.sort();
                for (kind, count) in kinds {
                    println!("  {kind}: {count}");
                }
                println!(
                    "service: {} ({} at {})",
                    if health.available { "available" } else { "unavailable" },
                    health.model,
                    health.url
                );
            }
        },
        Command::Extract { file, cwd, force } => {
            let outcome = engine.extract_file(&file, cwd.as_deref(), force).await?;
            println!("{outcome:?}");
        }
        Command::Batch {
            limit,
            unlimited,
            dry_run,
        } => {
            let limit = if unlimited { None } else { Some(limit) };
            let report = engine.batch_extract(limit, dry_run).await?;
            println!(
                "{} scanned, {} extracted, {} skipped, {} failed",
                report.scanned, report.extracted, report.skipped, report.failed
            );
        }
        Command::Telos { action } => match action {
            TelosCommand::Import { file, kind } => {
                let kind: TelosKind = kind.parse()?;
                let imported = engine.telos_import(&file, kind)?;
                println!("{imported} telos entr{} imported", if imported == 1 { "y" } else { "ies" });
            }
        },
        Command::Docs { action } => match action {
            DocsCommand::Import { file, kind } => {
                let kind: DocumentKind = kind.parse()?;
                let id = engine.docs_import(&file, kind)?;
                println!("document #{id} imported");
            }
        },
    }

    Ok(())
}

async fn run_hybrid(
    engine: &MemoryEngine,
    query: &str,
    scope: SearchScope,
) -> Result<(), MemoryError> {
    let kind = parse_kind_opt(scope.table.as_deref())?;
    let outcome = engine
        .hybrid(query, kind, scope.project.as_deref(), scope.limit)
        .await?;
    if !outcome.embeddings_available {
        eprintln!("(embedding service unavailable; keyword results only)");
    }
    for hit in &outcome.results {
        println!(
            "[{}/{}] #{:<5} {}",
            hit.kind,
            hit.source.as_str(),
            hit.id,
            hit.content
        );
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    for hit in hits {
        let project = hit.project.as_deref().unwrap_or("-");
        println!("[{}] #{:<5} ({})  {}", hit.kind, hit.id, project, hit.content);
    }
}

fn parse_kind_opt(table: Option<&str>) -> Result<Option<EntityKind>, MemoryError> {
    table.map(str::parse).transpose()
}

fn capture_options(args: CaptureArgs, skip_extract: bool) -> LoaCaptureOptions {
    LoaCaptureOptions {
        project: args.project,
        continues: args.continues,
        tags: args.tags,
        limit: args.limit,
        skip_extract,
    }
}
