//! CLI binary for running and validating lottery entry batches.

mod config;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use stagedoor_chromium::ChromiumBrowser;
use stagedoor_engine::{
    BatchOrchestrator, Browser, CircuitBreaker, ChallengeDetector, Classification,
    DiagnosticsSink, DirectorySink, Engine, EventEmitter, TracingSink,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Overrides};

#[derive(Parser)]
#[command(
    name = "stagedoor",
    version,
    about = "Automated lottery entries with challenge-aware circuit breaking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Enter every configured show's lottery
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Fill forms but never submit them
        #[arg(long)]
        dry_run: bool,

        /// Process shows in configured order
        #[arg(long)]
        no_shuffle: bool,

        /// Show URL to enter (repeatable); replaces the configured list
        #[arg(long = "show")]
        shows: Vec<String>,

        /// Write screenshots and page metadata here on challenges and failures
        #[arg(long)]
        diagnostics_dir: Option<PathBuf>,

        /// Show the browser window
        #[arg(long)]
        headful: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check configuration and profile without opening a browser
    Validate {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Open one page and report whether it looks like a challenge
    Probe {
        /// Page URL
        url: String,

        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show the browser window
        #[arg(long)]
        headful: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let ok = match cli.command {
        Commands::Run {
            config,
            dry_run,
            no_shuffle,
            shows,
            diagnostics_dir,
            headful,
            json,
        } => {
            let overrides = Overrides {
                dry_run,
                no_shuffle,
                shows,
                diagnostics_dir,
                headful,
            };
            cmd_run(config.as_deref(), overrides, json).await?
        }
        Commands::Validate { config } => cmd_validate(config.as_deref(), cli.verbose)?,
        Commands::Probe {
            url,
            config,
            headful,
        } => cmd_probe(&url, config.as_deref(), headful).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn load(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<AppConfig> {
    let mut app = config::load_config(path).context("failed to load configuration")?;
    overrides.apply(&mut app);
    Ok(app)
}

/// Runs the batch. Returns `false` when the breaker tripped or a show failed.
async fn cmd_run(path: Option<&Path>, overrides: Overrides, json: bool) -> anyhow::Result<bool> {
    let app = load(path, overrides)?;
    if app.shows.iter().all(|u| u.trim().is_empty()) {
        anyhow::bail!("no shows configured; set `shows` in the config file or pass --show");
    }
    let profile = config::resolve_profile(&app, |k| std::env::var(k).ok())
        .context("invalid applicant profile")?;

    let sink: Arc<dyn DiagnosticsSink> = match &app.diagnostics_dir {
        Some(dir) => Arc::new(DirectorySink::new(dir)),
        None => Arc::new(TracingSink),
    };
    let events = EventEmitter::default();
    let mut rx = events.subscribe();
    let engine = Engine::builder(app.engine.clone(), profile)
        .sink(sink)
        .events(events)
        .build()?;

    let browser: Arc<dyn Browser> = Arc::new(ChromiumBrowser::new(app.browser.clone()));
    let orchestrator = BatchOrchestrator::new(Arc::new(engine), browser);
    let tasks = orchestrator.plan(&app.shows);

    if !json {
        println!("Entering {} show(s)", tasks.len());
        if app.engine.dry_run {
            println!("(dry run mode -- forms are filled but not submitted)");
        }
        if let Some(dir) = &app.diagnostics_dir {
            println!("Diagnostics: {}", dir.display());
        }
    }

    // The printer ends once the orchestrator (and with it the emitter) is dropped.
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !json {
                        if let Some(line) = report::progress_line(&event) {
                            println!("{line}");
                        }
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let breaker = CircuitBreaker::new();
    let run_report = orchestrator.run(&tasks, &breaker).await;
    drop(orchestrator);
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&run_report)?);
    } else {
        println!();
        print!("{}", report::render_table(&run_report));
    }

    Ok(run_report.is_clean())
}

fn cmd_validate(path: Option<&Path>, verbose: bool) -> anyhow::Result<bool> {
    let app = load(path, Overrides::default())?;

    let mut problems = Vec::new();
    if let Err(e) = app.engine.validate() {
        problems.push(e.to_string());
    }
    if let Err(e) = ChallengeDetector::new(&app.engine.detector) {
        problems.push(e.to_string());
    }
    let profile = match config::resolve_profile(&app, |k| std::env::var(k).ok()) {
        Ok(profile) => Some(profile),
        Err(e) => {
            problems.push(e.to_string());
            None
        }
    };
    if app.shows.is_empty() {
        problems.push("no shows configured".into());
    }
    let blank = app.shows.iter().filter(|u| u.trim().is_empty()).count();
    if blank > 0 {
        problems.push(format!("{blank} blank show URL(s) in `shows`"));
    }

    println!("Shows ({}):", app.shows.len());
    for url in app.shows.iter().filter(|u| !u.trim().is_empty()) {
        let task = stagedoor_types::ShowTask::from_url(url.trim());
        println!("  {:<24} {}", task.show_name, task.url);
    }
    println!(
        "Order: {}",
        if app.engine.shuffle { "shuffled" } else { "as listed" }
    );
    println!("Dry run: {}", app.engine.dry_run);
    if let Some(profile) = &profile {
        println!(
            "Applicant: {} {} <{}>, {} ticket(s), {}",
            profile.first_name,
            profile.last_name,
            profile.masked_email(),
            profile.number_of_tickets,
            profile.country_of_residence
        );
    }
    if verbose {
        println!("\n[engine]\n{}", toml::to_string_pretty(&app.engine)?);
    }

    if problems.is_empty() {
        println!("Configuration is valid");
        return Ok(true);
    }
    for problem in &problems {
        println!("[ERROR] {problem}");
    }
    Ok(false)
}

/// Loads one page in a fresh context and classifies it.
async fn cmd_probe(url: &str, path: Option<&Path>, headful: bool) -> anyhow::Result<bool> {
    let app = load(
        path,
        Overrides {
            headful,
            ..Overrides::default()
        },
    )?;
    let detector = ChallengeDetector::new(&app.engine.detector)?;
    let timeouts = &app.engine.timeouts;

    let browser = ChromiumBrowser::new(app.browser.clone());
    let ctx = browser.new_context().await?;
    let navigated = ctx.navigate(url, timeouts.navigation).await;
    let (snapshot, classification) = detector.inspect(ctx.as_ref(), timeouts.probe).await;
    if let Err(e) = ctx.close().await {
        tracing::warn!(error = %e, "Failed to close browser context");
    }
    navigated.with_context(|| format!("could not load {url}"))?;

    println!("URL:    {}", snapshot.url);
    println!("Title:  {}", snapshot.title);
    match snapshot.body_text_length {
        Some(len) => println!("Body:   {len} characters"),
        None => println!("Body:   unreadable"),
    }
    if !snapshot.visible_phrases.is_empty() {
        println!("Phrases: {}", snapshot.visible_phrases.join(", "));
    }
    match classification {
        Classification::Clear => {
            println!("Result: clear");
            Ok(true)
        }
        Classification::Challenged { signal } => {
            println!("Result: challenged ({signal})");
            Ok(false)
        }
    }
}
