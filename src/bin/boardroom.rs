//! boardroom CLI.
//!
//! Thin front-end over the engine: run migrations, list personas and
//! boards, and convene a board on a topic.
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` / `GEMINI_API_KEY` - provider keys
//! - `RUST_LOG` - log filter (default: "info")

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use boardroom::config::Config;
use boardroom::llms::providers::build_backend;
use boardroom::llms::RetryBackend;
use boardroom::orchestrator::{BoardOrchestrator, Project};
use boardroom::session::{AnalysisMode, AnalysisRequest};
use boardroom::storage::{BoardStore, Database, PersonaStore};
use boardroom::Error;

#[derive(Parser)]
#[command(name = "boardroom", version, about = "AI advisory board engine")]
struct Cli {
    /// Database file path.
    #[arg(long, default_value = "boardroom.db")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations.
    Migrate,
    /// List stored personas.
    Personas,
    /// List stored boards.
    Boards,
    /// Convene a board on a project topic.
    Analyze {
        #[arg(long)]
        project: String,
        #[arg(long)]
        board: String,
        /// discussion | simulation | analysis | comparison | evaluation | prediction
        #[arg(long, default_value = "discussion")]
        mode: String,
        /// Topic to analyze; defaults to the project name.
        #[arg(long)]
        topic: Option<String>,
        /// Provider to use (openai | anthropic | gemini).
        #[arg(long, default_value = "openai")]
        provider: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let mut config = Config::default();
    config.database.path = cli.db.clone();
    config.llm.openai.api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    config.llm.anthropic.api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    config.llm.gemini.api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    config.validate()?;

    let db = Database::open(&config.database)?;
    db.migrate()?;

    match cli.command {
        Command::Migrate => {
            println!("migrations applied");
            Ok(())
        }
        Command::Personas => {
            let personas = PersonaStore::new(db).list()?;
            if personas.is_empty() {
                println!("no personas");
            }
            for p in personas {
                println!("{}  {}  {}", p.id, p.name, p.description);
            }
            Ok(())
        }
        Command::Boards => {
            let boards = BoardStore::new(db).list()?;
            if boards.is_empty() {
                println!("no boards");
            }
            for (id, name, members) in boards {
                println!("{id}  {name}  ({members} members)");
            }
            Ok(())
        }
        Command::Analyze {
            project,
            board,
            mode,
            topic,
            provider,
        } => {
            let mode: AnalysisMode = mode.parse()?;
            let backend = build_backend(&provider, &config.llm)?;
            let backend = Arc::new(RetryBackend::new(backend, config.retry.clone()));

            let board = BoardStore::new(db.clone()).load(&board)?;
            let orchestrator = BoardOrchestrator::new(
                config.analysis.clone(),
                config.memory.clone(),
                backend,
                db,
            );

            let mut request = AnalysisRequest::new(project.clone(), board.id.clone(), mode);
            if let Some(topic) = topic {
                request.config.insert("topic".into(), serde_json::json!(topic));
            }
            let project = Project::new(project.clone(), project);

            let session = orchestrator
                .run(CancellationToken::new(), request, &board, &project)
                .await?;
            orchestrator.shutdown();

            println!("session {}  status: {}", session.session_id, session.status.as_str());
            if let Some(error) = &session.error {
                println!("error: {error}");
            }
            println!();
            for response in &session.responses {
                println!("[turn {}] {}", response.turn_order, response.persona_id);
                println!("{}", response.content);
                println!();
            }
            if !session.summary.is_empty() {
                println!("summary: {}", session.summary);
            }
            for insight in &session.insights {
                println!("insight ({:.2}): {}", insight.score, insight.text);
            }
            println!(
                "responses: {}  mean confidence: {:.2}  tokens: {}",
                session.metrics.response_count,
                session.metrics.mean_confidence,
                session.metrics.total_tokens,
            );
            Ok(())
        }
    }
}
