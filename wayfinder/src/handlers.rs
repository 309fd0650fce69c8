use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;
use wayfinder_core::result::StepStatus;
use wayfinder_core::{
    ExplorationEvent, ExplorationResult, ExploreMode, Executor, ExplorerConfig, RunStatus,
    create_event_channel,
};
use wayfinder_driver::{Decider, HttpBrowserFactory, HttpDecider};

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/wayfinder/config.json";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const LLM_API_KEY_ENV: &str = "WAYFINDER_LLM_API_KEY";

/// CLI flags that take precedence over the config file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExploreOverrides {
    pub parallel: Option<usize>,
    pub max_steps: Option<usize>,
    pub max_states: Option<usize>,
    pub max_depth: Option<usize>,
    pub strict: bool,
    pub mode: Option<ExploreMode>,
}

impl ExploreOverrides {
    pub fn from_matches(args: &ArgMatches) -> Result<Self> {
        let mode = args
            .get_one::<String>("mode")
            .map(|m| parse_mode(m))
            .transpose()?;
        Ok(Self {
            parallel: args.get_one::<usize>("parallel").copied(),
            max_steps: args.get_one::<usize>("max-steps").copied(),
            max_states: args.get_one::<usize>("max-states").copied(),
            max_depth: args.get_one::<usize>("max-depth").copied(),
            strict: args.get_flag("strict"),
            mode,
        })
    }
}

pub fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wayfinder={}", level)));
    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn print_banner() {
    println!(
        "{} {}",
        "wayfinder".bright_cyan().bold(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
    println!("{}", "autonomous web UI exploration".bright_black());
    println!();
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).as_ref())
}

pub fn parse_mode(mode: &str) -> Result<ExploreMode> {
    match mode.trim().to_lowercase().as_str() {
        "pages" => Ok(ExploreMode::Pages),
        "branches" => Ok(ExploreMode::Branches),
        other => bail!("Unknown mode '{}' (expected pages or branches)", other),
    }
}

/// Explicit path must exist; otherwise the default path is used when
/// present, and built-in defaults when not.
pub fn load_config(path: Option<&Path>) -> Result<ExplorerConfig> {
    if let Some(path) = path {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
        return ExplorerConfig::from_file(Path::new(&expanded))
            .with_context(|| format!("Failed to load config {}", expanded));
    }

    let default_path = default_config_path();
    if default_path.exists() {
        info!(path = %default_path.display(), "Using config file");
        return ExplorerConfig::from_file(&default_path)
            .with_context(|| format!("Failed to load config {}", default_path.display()));
    }
    Ok(ExplorerConfig::default())
}

pub fn apply_overrides(config: &mut ExplorerConfig, overrides: &ExploreOverrides) -> Result<()> {
    if let Some(parallel) = overrides.parallel {
        config.executor.parallel_browsers = parallel;
    }
    if let Some(steps) = overrides.max_steps {
        config.budget.max_total_steps = steps;
    }
    if let Some(states) = overrides.max_states {
        config.budget.max_unique_states = states;
    }
    if let Some(depth) = overrides.max_depth {
        config.budget.max_depth = depth;
    }
    if overrides.strict {
        config.executor.strict_mode = true;
    }
    if let Some(mode) = overrides.mode {
        config.executor.mode = mode;
    }
    config.validate()?;
    Ok(())
}

/// Collects start URLs from `--url` flags and an optional hosts file.
pub fn load_urls_from_source(urls: &[Url], hosts_file: Option<&PathBuf>) -> Result<Vec<String>> {
    let mut start_urls: Vec<String> = urls.iter().map(|u| u.as_str().to_string()).collect();
    if let Some(path) = hosts_file {
        start_urls.extend(load_urls_from_file(path)?);
    }
    if start_urls.is_empty() {
        bail!("Either --url or --hosts-file must be provided");
    }
    Ok(start_urls)
}

pub fn load_urls_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read hosts file {}", path.display()))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        bail!("No valid URLs found in {}", path.display());
    }
    Ok(urls)
}

/// Parses one line as an http(s) URL, assuming http:// when the scheme is missing.
pub fn parse_url_line(line: &str) -> Option<String> {
    let candidate = if line.contains("://") {
        line.to_string()
    } else {
        format!("http://{}", line)
    };
    match Url::parse(&candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
            Some(url.to_string())
        }
        _ => {
            warn!("Skipping invalid URL '{}'", line);
            None
        }
    }
}

pub fn build_decider(
    endpoint: Option<&str>,
    model: Option<&str>,
    api_key: Option<String>,
) -> Option<Arc<dyn Decider>> {
    let endpoint = endpoint?.trim();
    if endpoint.is_empty() {
        return None;
    }
    let mut decider = HttpDecider::new(endpoint, model.unwrap_or(DEFAULT_LLM_MODEL));
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        decider = decider.with_api_key(key);
    }
    Some(Arc::new(decider))
}

/// One-line progress text for an event, or None for events not worth showing.
pub fn describe_event(event: &ExplorationEvent) -> Option<String> {
    match event {
        ExplorationEvent::PhaseStarted { phase } => Some(format!("Phase: {}", phase)),
        ExplorationEvent::UnitStarted { unit, url } => Some(format!("[unit {}] {}", unit, url)),
        ExplorationEvent::StepStarted { step, unit, action } => {
            Some(format!("[unit {}] step {}: {}", unit, step, action))
        }
        ExplorationEvent::StateDiscovered { url, depth, .. } => {
            Some(format!("New state at {} (depth {})", url, depth))
        }
        ExplorationEvent::UnitCompleted {
            unit,
            steps,
            error: Some(error),
        } => Some(format!("[unit {}] stopped after {} steps: {}", unit, steps, error)),
        _ => None,
    }
}

async fn drive_progress(mut rx: UnboundedReceiver<ExplorationEvent>, bar: ProgressBar) {
    let mut steps = 0usize;
    let mut states = 0usize;
    while let Some(event) = rx.recv().await {
        match &event {
            ExplorationEvent::StepCompleted { .. } => steps += 1,
            ExplorationEvent::StateDiscovered { .. } => states += 1,
            _ => {}
        }
        if let Some(message) = describe_event(&event) {
            bar.set_message(format!("{} steps, {} states | {}", steps, states, message));
        }
        if matches!(event, ExplorationEvent::ExplorationComplete { .. }) {
            break;
        }
    }
    bar.finish_and_clear();
}

fn print_divider(out: &mut String) {
    out.push_str(&format!("{}\n", "═".repeat(60).bright_blue().bold()));
}

pub fn render_summary(result: &ExplorationResult) -> String {
    let mut out = String::new();
    print_divider(&mut out);
    out.push_str(&format!("{}\n", "  EXPLORATION SUMMARY".bright_white().bold()));
    print_divider(&mut out);

    let status = match result.status {
        RunStatus::Completed => format!("{} Completed", "✓".green().bold()),
        RunStatus::Blocked => format!("{} Blocked", "✗".red().bold()),
    };
    out.push_str(&format!(
        "{} ({}, last phase: {})\n",
        status, result.termination_reason, result.last_phase
    ));
    for url in &result.start_urls {
        out.push_str(&format!("{} {}\n", "→".blue(), url));
    }
    out.push('\n');

    out.push_str(&format!(
        "  Steps: {} ({} succeeded)\n",
        result.total_steps,
        result.successful_steps()
    ));
    out.push_str(&format!("  Unique states: {}\n", result.unique_states));
    out.push_str(&format!("  Unique URLs: {}\n", result.unique_urls));
    out.push_str(&format!(
        "  Coverage score: {:.1}\n",
        result.coverage.score
    ));
    out.push_str(&format!(
        "  Decisions: {} total, {} heuristic, {} escalated, {} failed\n",
        result.decisions.total_decisions,
        result.decisions.heuristic_decisions,
        result.decisions.ai_escalations,
        result.decisions.failures
    ));
    out.push_str(&format!(
        "  Budget remaining: {:.0}%\n",
        result.budget.remaining_percent
    ));
    out.push_str(&format!("  Duration: {} ms\n", result.duration_ms()));

    if let Some(error) = &result.blocking_error {
        out.push('\n');
        out.push_str(&format!("{} {}\n", "Blocking error:".red().bold(), error));
    }

    let failed: Vec<_> = result
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .collect();
    if !result.errors.is_empty() {
        out.push('\n');
        out.push_str(&format!(
            "{} ({} entries, {} failed steps)\n",
            "Errors".yellow().bold(),
            result.errors.len(),
            failed.len()
        ));
        for entry in &result.errors {
            out.push_str(&format!(
                "  [step {}] {} {}\n",
                entry.step_index,
                entry.url.bright_black(),
                entry.message
            ));
        }
    }

    if !result.graph.nodes.is_empty() {
        out.push('\n');
        out.push_str(&format!("{}\n", "States".bright_blue().bold()));
        for node in &result.graph.nodes {
            let title = if node.title.is_empty() {
                "(untitled)"
            } else {
                node.title.as_str()
            };
            out.push_str(&format!(
                "  {} {} {}\n",
                &node.id[..node.id.len().min(12)],
                title,
                node.url.bright_black()
            ));
        }
    }
    out
}

pub fn render_json(result: &ExplorationResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

pub fn write_report(report: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, report)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

/// Writes the default config as pretty JSON, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = ExplorerConfig::default().to_json()?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn handle_init_config(args: &ArgMatches) -> Result<()> {
    let raw_path = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let force = args.get_flag("force");
    let path = PathBuf::from(shellexpand::tilde(raw_path).as_ref());

    if path.exists() && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!(
            "Config file already exists: {}",
            path.display().to_string().bright_white()
        );
        let response = print_prompt("Overwrite it? [y/N]:")?;
        if response != "y" && response != "yes" {
            println!("{} Keeping existing config.", "✗".red().bold());
            return Ok(());
        }
    }

    write_default_config(&path)?;
    println!(
        "{} Config written: {}",
        "✓".green().bold(),
        path.display().to_string().bright_white()
    );
    Ok(())
}

pub async fn handle_explore(args: &ArgMatches, quiet: bool) -> Result<()> {
    let urls: Vec<Url> = args
        .get_many::<Url>("url")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let start_urls = load_urls_from_source(&urls, args.get_one::<PathBuf>("hosts-file"))?;

    let mut config = load_config(args.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    apply_overrides(&mut config, &ExploreOverrides::from_matches(args)?)?;

    let decider = build_decider(
        args.get_one::<String>("llm-endpoint").map(String::as_str),
        args.get_one::<String>("llm-model").map(String::as_str),
        std::env::var(LLM_API_KEY_ENV).ok(),
    );
    let timeout_secs = (config.executor.navigation_timeout_ms / 1000).max(1);
    let factory = Arc::new(HttpBrowserFactory::new(timeout_secs));

    if !quiet {
        println!(
            "Exploring {} start page(s) with {} browser(s), mode {:?}",
            start_urls.len(),
            config.executor.parallel_browsers,
            config.executor.mode
        );
        println!(
            "Budget: {} steps, {} states, depth {}",
            config.budget.max_total_steps, config.budget.max_unique_states, config.budget.max_depth
        );
        if decider.is_none() {
            println!("{} No LLM endpoint; uncertain decisions use score order", "ℹ".blue());
        }
        println!();
    }

    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    };

    let (events, rx) = create_event_channel();
    let progress = tokio::spawn(drive_progress(rx, bar));

    let format = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    let output = args.get_one::<PathBuf>("output");

    let mut executor = Executor::new(config, factory).with_events(events);
    if let Some(decider) = decider {
        executor = executor.with_decider(decider);
    }
    let outcome = executor.run(&start_urls).await;
    // Closes the event channel so the progress task ends
    drop(executor);
    let _ = progress.await;

    let result = outcome?;
    let report = match format {
        "json" => render_json(&result)?,
        _ => render_summary(&result),
    };
    write_report(&report, output.map(PathBuf::as_path))?;

    if result.is_blocked() {
        bail!(
            "Exploration blocked: {}",
            result.blocking_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
