// src/main.rs
use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use clap::{Parser, Subcommand};
use coderun::api::handlers::WsBroker;
use coderun::api::{configure_routes, AppState};
use coderun::channel::{ExecutionResult, PythonChannelFactory};
use coderun::config::{AppConfig, RuntimeConfig, TaskFile};
use coderun::errors::RunnerError;
use coderun::evaluator::{self, CaseOutcome};
use coderun::harvester::LinePrompter;
use coderun::session::{Session, SessionConfig};
use coderun::{banner, database};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about = "coderun - run and check Python exercises")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Interpreter to use instead of PYTHON_BIN
    #[clap(long, global = true)]
    python: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP/WebSocket server (default command)
    Serve,
    /// Run a program once, asking for input() values on the terminal
    Run {
        file: PathBuf,
    },
    /// Evaluate a program against the test cases of a task file
    Check {
        file: PathBuf,

        #[clap(long, short)]
        task: PathBuf,
    },
}

#[actix_web::main]
async fn main() -> std::io::Result<ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env file loaded: {}", e);
    }
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let mut app_config = AppConfig::from_env().map_err(std::io::Error::other)?;
    if let Some(python) = cli.python {
        app_config.runtime.python_bin = python;
    }

    let outcome = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(app_config).await.map(|_| ExitCode::SUCCESS),
        Commands::Run { file } => run_file(app_config.runtime, &file).await,
        Commands::Check { file, task } => check_file(app_config.runtime, &file, &task).await,
    };

    outcome.map_err(std::io::Error::other)
}

async fn serve(config: AppConfig) -> Result<(), RunnerError> {
    banner::print_banner();

    let pool = database::init_db(&config.database_url).await?;
    if let Some(dir) = config.tasks_dir.as_deref() {
        let tasks = TaskFile::load_dir(dir)?;
        let seeded = database::seed_tasks(&pool, &tasks).await?;
        log::info!("📚 Loaded {} task(s) from {}", seeded, dir.display());
    }

    let host = config.host.clone();
    let port = config.port;
    log::info!(
        "Interpreter: {} ({:?} channel, {}ms limit)",
        config.runtime.python_bin,
        config.runtime.channel_kind,
        config.runtime.execution_timeout.as_millis()
    );

    let idle_ttl = config.session_idle_ttl;
    let state = AppState::new(config, pool);
    let sessions = Arc::clone(&state.sessions);
    let broker = WsBroker::new();

    let stop_sweeper = CancellationToken::new();
    let sweeper = Arc::clone(&sessions).spawn_sweeper(sweep_interval(idle_ttl), stop_sweeper.clone());

    log::info!("🚀 Starting server on http://{}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(broker.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    stop_sweeper.cancel();
    if let Err(e) = sweeper.await {
        log::warn!("idle session sweeper ended abnormally: {}", e);
    }
    sessions.shutdown_all().await;
    Ok(())
}

/// Idle sessions are looked for a few times per TTL, at most once a minute.
fn sweep_interval(idle_ttl: Duration) -> Duration {
    (idle_ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

async fn run_file(runtime: RuntimeConfig, file: &Path) -> Result<ExitCode, RunnerError> {
    let source = std::fs::read_to_string(file)?;
    let factory = Arc::new(PythonChannelFactory::new(runtime.clone()));
    let mut session = Session::new(factory, SessionConfig::from(&runtime));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut prompter = LinePrompter::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    let result = session.run(&source, &mut prompter, &cancel).await;
    session.shutdown().await;

    match result? {
        ExecutionResult::Completed { output } => {
            print!("{}", output);
            Ok(ExitCode::SUCCESS)
        }
        ExecutionResult::Failed { error } => {
            eprintln!("{}", error);
            Ok(ExitCode::FAILURE)
        }
        ExecutionResult::TimedOut { message } => {
            eprintln!("{}", message);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn check_file(runtime: RuntimeConfig, file: &Path, task: &Path) -> Result<ExitCode, RunnerError> {
    let source = std::fs::read_to_string(file)?;
    let task = TaskFile::load(task)?;
    let factory = Arc::new(PythonChannelFactory::new(runtime.clone()));
    let mut session = Session::new(factory, SessionConfig::from(&runtime));

    println!("Checking {} against '{}'", file.display(), task.title);
    let verdict = evaluator::evaluate(&mut session, &source, &task.tests, None).await;
    session.shutdown().await;
    let verdict = verdict?;

    for report in &verdict.reports {
        let label = if report.hidden { " (hidden)" } else { "" };
        let status = match &report.outcome {
            CaseOutcome::Passed => "ok",
            CaseOutcome::Mismatch { .. } => "wrong answer",
            CaseOutcome::Errored { .. } => "error",
            CaseOutcome::TimedOut { .. } => "timed out",
        };
        println!("  test {}{}: {}", report.index + 1, label, status);
    }
    if let Some(failure) = &verdict.first_failure {
        println!("\nTest {} failed:\n{}", failure.index + 1, failure.diagnostic);
    }
    println!("\n{}/{} passed", verdict.passed_count, verdict.total);

    Ok(if verdict.all_passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
