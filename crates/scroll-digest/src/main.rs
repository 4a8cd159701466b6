//! scroll-digest CLI - turns the X home timeline into a reading digest.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scroll_digest::analysis::{AnalysisResult, ScoredItem};
use scroll_digest::auth::SessionStore;
use scroll_digest::browser::{
    BrowserError, BrowserLauncher, BrowserSession, ChromiumLauncher, LaunchOptions,
};
use scroll_digest::config::{cache_dir, default_config_path, default_session_path};
use scroll_digest::dispatch::{Action, ActionOutcome, Dispatcher};
use scroll_digest::feed::ExtractedItem;
use scroll_digest::pipeline::{Pipeline, PipelineError, RunOutcome, RunSummary};
use scroll_digest::storage::{load_latest_json, FileCheckpointStore, Step, StorageError};

/// Page that reports common automation fingerprints.
const BOT_TEST_URL: &str = "https://bot.sannysoft.com";

/// scroll-digest - Score your X feed and keep only what matters.
#[derive(Parser)]
#[command(name = "scroll-digest")]
#[command(about = "X feed digest pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "SCROLL_DIGEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in through a visible browser and save the session
    Login,

    /// Delete the saved session
    Logout,

    /// Show session and digest status
    Status,

    /// Stage 1: collect posts from the home timeline
    Scrape,

    /// Stage 2: score the latest scraped posts
    Analyze,

    /// Stage 3: keep posts above the relevance threshold
    Filter,

    /// Stage 4: fetch replies for posts that need context
    Context,

    /// Stage 5: write the digest from the latest filtered posts
    Digest,

    /// Open the most recent digest
    Open,

    /// Run every stage in order
    Run,

    /// Generate digests on a schedule until interrupted
    Daemon {
        /// Hours between runs
        #[arg(long, default_value = "1")]
        interval_hours: u64,

        /// Skip the run at startup
        #[arg(long)]
        no_initial_run: bool,
    },

    /// Open a browser fingerprint audit page with the stealth settings
    BotTest,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("scroll_digest=debug,llm=debug,info")
        } else {
            EnvFilter::new("scroll_digest=info,llm=info,warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    let pipeline = Arc::new(build_pipeline(&config_path)?);
    let cancel = CancellationToken::new();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        cancel_on_ctrl_c(cancel.clone());
    }

    match cli.command {
        Commands::Login => run_login(&pipeline, &cancel).await,
        Commands::Logout => run_logout(&pipeline),
        Commands::Status => run_status(&pipeline, &config_path),
        Commands::Scrape => run_scrape(&pipeline, &cancel).await,
        Commands::Analyze => run_analyze(&pipeline, &cancel).await,
        Commands::Filter => run_filter(&pipeline),
        Commands::Context => run_context(&pipeline, &cancel).await,
        Commands::Digest => run_digest(&pipeline),
        Commands::Open => run_open(&pipeline),
        Commands::Run => run_all(&pipeline, &cancel).await,
        Commands::Daemon {
            interval_hours,
            no_initial_run,
        } => {
            tracing::info!(interval_hours, "Starting daemon");
            run_daemon(pipeline, config_path, interval_hours, !no_initial_run).await
        }
        Commands::BotTest => run_bot_test().await,
    }
}

fn build_pipeline(config_path: &Path) -> Result<Pipeline> {
    let store = Arc::new(SessionStore::new(default_session_path()?));
    let checkpoints = Arc::new(FileCheckpointStore::new(cache_dir()?));
    let launcher: Arc<dyn BrowserLauncher> = Arc::new(ChromiumLauncher);

    Pipeline::from_config_file(config_path, store, checkpoints, launcher)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping");
            cancel.cancel();
        }
    });
}

/// Read a checkpoint the previous stage wrote.
fn load_stage<T: serde::de::DeserializeOwned>(pipeline: &Pipeline, step: Step) -> Result<T> {
    match load_latest_json(pipeline.checkpoints(), step) {
        Ok(data) => Ok(data),
        Err(StorageError::NotFound(step)) => {
            anyhow::bail!("No {step} checkpoint found - run the previous stage first")
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_login(pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
    println!("🔐 scroll-digest - X Login\n");
    println!("   A browser window will open. Log in as usual;");
    println!("   the window closes once your home timeline loads.\n");

    let bundle = pipeline.login(cancel).await?;

    println!("{} Session saved", "✅".green());
    if let Some(expires) = bundle.expires_at {
        println!("   Expires: {}", expires.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

fn run_logout(pipeline: &Pipeline) -> Result<()> {
    pipeline.logout()?;
    println!("👋 Logged out");
    Ok(())
}

fn run_status(pipeline: &Pipeline, config_path: &Path) -> Result<()> {
    println!("📋 scroll-digest status\n");
    println!("   Config: {}", config_path.display());

    match pipeline.session() {
        Ok(bundle) if bundle.is_valid() => {
            let expires = bundle
                .expires_at
                .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default();
            println!("   Session: {} (expires {expires})", "valid".green());
        }
        Ok(_) => println!("   Session: {}", "expired - run `scroll-digest login`".yellow()),
        Err(e) => {
            tracing::debug!(error = %e, "No usable session");
            println!("   Session: {}", "not logged in".red());
        }
    }

    match pipeline.latest_digest() {
        Ok(path) => println!("   Latest digest: {}", path.display()),
        Err(_) => println!("   Latest digest: none yet"),
    }
    Ok(())
}

async fn run_scrape(pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
    println!("📜 Scrolling the home timeline...");
    let items = pipeline.scrape(cancel).await?;
    println!("   Collected: {} posts", items.len());
    Ok(())
}

async fn run_analyze(pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
    let items: Vec<ExtractedItem> = load_stage(pipeline, Step::Posts)?;
    println!("🧠 Scoring {} posts...", items.len());

    let analyses = pipeline.analyze(&items, cancel).await?;
    let threshold = pipeline.snapshot().config.analysis.relevance_threshold;
    let above = analyses.iter().filter(|a| a.is_relevant(threshold)).count();
    println!("   Analyzed: {}", analyses.len());
    println!("   Above {threshold:.2}: {above}");
    Ok(())
}

fn run_filter(pipeline: &Pipeline) -> Result<()> {
    let items: Vec<ExtractedItem> = load_stage(pipeline, Step::Posts)?;
    let analyses: Vec<AnalysisResult> = load_stage(pipeline, Step::Analyses)?;

    let relevant = pipeline.filter(&items, &analyses);
    println!("🔎 {} of {} posts are relevant", relevant.len(), items.len());
    for scored in &relevant {
        println!(
            "   {:.2} {} {}",
            scored.analysis.relevance_score,
            scored.item.author.at_handle().cyan(),
            scored.analysis.summary
        );
    }
    Ok(())
}

async fn run_context(pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
    let relevant: Vec<ScoredItem> = load_stage(pipeline, Step::Filtered)?;
    println!("🧵 Fetching context for {} posts...", relevant.len());

    let enriched = pipeline.fetch_context(&relevant, cancel).await?;
    let with_context = enriched.iter().filter(|s| !s.context.is_empty()).count();
    println!("   With replies: {with_context}");
    Ok(())
}

fn run_digest(pipeline: &Pipeline) -> Result<()> {
    let relevant = match pipeline.digest_input() {
        Ok(relevant) => relevant,
        Err(PipelineError::Storage(StorageError::NotFound(step))) => {
            anyhow::bail!("No {step} checkpoint found - run the previous stage first")
        }
        Err(e) => return Err(e.into()),
    };
    let total = load_stage::<Vec<ExtractedItem>>(pipeline, Step::Posts)
        .map_or(relevant.len(), |items| items.len());

    match pipeline.build_digest(&relevant, total)? {
        Some(path) => println!("{} Digest written: {}", "✅".green(), path.display()),
        None => println!("📭 Nothing relevant, no digest written"),
    }
    Ok(())
}

fn run_open(pipeline: &Pipeline) -> Result<()> {
    let path = pipeline.latest_digest()?;
    println!("📖 Opening {}", path.display());
    open::that(&path).with_context(|| format!("Failed to open {}", path.display()))
}

async fn run_all(pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
    let summary = pipeline.generate_digest(cancel).await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Digest Run Summary");
    println!("   Scraped: {}", summary.scraped);
    println!("   Analyzed: {}", summary.analyzed);
    println!("   Relevant: {}", summary.relevant);
    println!("   With context: {}", summary.with_context);

    match (summary.outcome, &summary.digest) {
        (RunOutcome::DigestWritten, Some(path)) => {
            println!("\n{} Digest written: {}", "✅".green(), path.display());
        }
        (RunOutcome::NoItems, _) => println!("\n📭 No posts scraped"),
        _ => println!("\n📭 No relevant posts"),
    }
}

async fn run_daemon(
    pipeline: Arc<Pipeline>,
    config_path: PathBuf,
    interval_hours: u64,
    initial_run: bool,
) -> Result<()> {
    if !pipeline.is_authenticated() {
        println!("{} Not logged in - type `login` before the first run", "⚠️".yellow());
    }

    let cancel = CancellationToken::new();
    let (dispatcher, mut outcomes) = Dispatcher::new(pipeline, config_path, cancel.clone());
    let (actions, receiver) = mpsc::channel(16);
    let dispatch = tokio::spawn(dispatcher.run(receiver));

    println!("⏰ Generating a digest every {interval_hours}h");
    println!("   Commands: run, view, reload, login, logout, quit\n");

    let period = Duration::from_secs(interval_hours.max(1) * 3600);
    let mut ticker = if initial_run {
        tokio::time::interval(period)
    } else {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    };
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let action = tokio::select! {
            _ = ticker.tick() => Some(Action::GenerateDigest),
            _ = tokio::signal::ctrl_c() => Some(Action::Shutdown),
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => parse_action(&line),
                Ok(None) | Err(_) => {
                    stdin_open = false;
                    None
                }
            },
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => {
                    let done = outcome.action() == Action::Shutdown;
                    print_outcome(&outcome);
                    if done {
                        break;
                    }
                    None
                }
                None => break,
            },
        };

        if let Some(action) = action {
            if actions.send(action).await.is_err() {
                break;
            }
        }
    }

    cancel.cancel();
    dispatch.await.context("Dispatcher task failed")?;
    Ok(())
}

fn parse_action(line: &str) -> Option<Action> {
    match line.trim() {
        "run" | "digest" => Some(Action::GenerateDigest),
        "view" | "open" => Some(Action::ViewLastDigest),
        "reload" => Some(Action::ReloadConfig),
        "login" => Some(Action::Login),
        "logout" => Some(Action::Logout),
        "quit" | "exit" => Some(Action::Shutdown),
        "" => None,
        other => {
            println!("   Unknown command: {other}");
            None
        }
    }
}

fn print_outcome(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Completed { action, detail } => {
            println!("{} {action:?}: {detail}", "✅".green());
        }
        ActionOutcome::Failed { action, error } => {
            eprintln!("{} {action:?}: {}", "❌".red(), error.red());
        }
        ActionOutcome::Rejected { action, reason } => {
            println!("{} {action:?}: {}", "⏳".yellow(), reason.yellow());
        }
    }
}

async fn run_bot_test() -> Result<()> {
    println!("🕵️  Opening {BOT_TEST_URL} with stealth settings");

    let mut session = ChromiumLauncher
        .launch(&LaunchOptions::stealth(false))
        .await
        .context("Failed to launch browser")?;

    let result = async {
        session.navigate(BOT_TEST_URL).await?;
        println!("   Inspect the results, then press Enter to close the browser.");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line)
            }) => {}
        }
        Ok::<_, BrowserError>(())
    }
    .await;

    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close browser");
    }
    result.context("Bot test failed")
}
