use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ingest_sentinel::analysis::ErrorAnalyzer;
use ingest_sentinel::error::{ErrorClassifier, ErrorLog, ErrorSummary, PdfHandler, StrategySelector};
use ingest_sentinel::logging::init_logging;
use ingest_sentinel::prevention::PreventionSystem;
use ingest_sentinel::{ErrorContext, Failure, SentinelConfig, Severity};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ingest-sentinel")]
#[command(about = "Error classification, recovery and prevention for ingestion workers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "INGEST_SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Worker instance name (overrides the configuration)
    #[arg(short, long, global = true)]
    instance: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a failure and show the recovery strategy it would get
    Classify {
        /// Kind of the raised error (e.g. TimeoutError, PermissionError)
        #[arg(short, long)]
        kind: String,

        /// Error message
        #[arg(short, long)]
        message: String,

        /// Operation that failed
        #[arg(short, long, default_value = "unknown")]
        operation: String,

        /// Print the classified error as JSON
        #[arg(long)]
        json: bool,
    },

    /// Summarize the persisted error log
    Stats {
        /// Summary window in hours
        #[arg(long, default_value = "24")]
        hours: i64,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run pattern, trend and impact analysis over the persisted error log
    Analyze {
        /// Report output path (defaults to <instance dir>/analysis_report.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or clean the quarantine tree
    Quarantine {
        #[command(subcommand)]
        action: QuarantineCommand,
    },

    /// Run the prevention loops until interrupted
    Monitor,
}

#[derive(Subcommand)]
enum QuarantineCommand {
    /// List quarantined files
    List,

    /// Remove quarantined files older than the given age
    Cleanup {
        /// Maximum age (e.g. "30days", "12h")
        #[arg(long, default_value = "30days", value_parser = humantime::parse_duration)]
        older_than: Duration,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SentinelConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(instance) = &cli.instance {
        config.instance = instance.clone();
    }

    let _guard = init_logging(&config.logging, cli.debug)?;

    match cli.command {
        Commands::Classify {
            kind,
            message,
            operation,
            json,
        } => classify(&config, &kind, &message, &operation, json),
        Commands::Stats { hours, json } => show_stats(&config, hours, json),
        Commands::Analyze { output } => analyze(&config, output),
        Commands::Quarantine { action } => quarantine(&config, action),
        Commands::Monitor => monitor(&config).await,
    }
}

fn error_log(config: &SentinelConfig) -> ErrorLog {
    ErrorLog::new(
        &config.instance_dir(),
        config.recovery.log_capacity,
        config.recovery.history_retention_days,
    )
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Critical => severity.as_str().red().bold(),
        Severity::High => severity.as_str().red(),
        Severity::Medium => severity.as_str().yellow(),
        Severity::Low => severity.as_str().green(),
    }
}

fn classify(config: &SentinelConfig, kind: &str, message: &str, operation: &str, json: bool) -> Result<()> {
    let classifier = ErrorClassifier::new(config.recovery.max_recovery_attempts);
    let selector = StrategySelector::from_config(&config.recovery);

    let error = classifier.classify(
        &Failure::new(kind, message),
        ErrorContext::new(config.instance.clone(), operation),
        None,
        None,
    );
    let strategy = selector.select(&error);

    if json {
        println!("{}", serde_json::to_string_pretty(&error)?);
        return Ok(());
    }

    println!("{:<14} {}", "Type:", error.error_type.to_string().bold());
    println!("{:<14} {}", "Category:", error.category);
    println!("{:<14} {}", "Severity:", severity_label(error.severity));
    println!("{:<14} {}", "Recoverable:", error.is_recoverable);
    println!("{:<14} {}", "Strategy:", strategy.as_str().cyan());
    Ok(())
}

fn show_stats(config: &SentinelConfig, hours: i64, json: bool) -> Result<()> {
    let log = error_log(config);
    let errors = log
        .load()
        .with_context(|| format!("Failed to read error log {}", log.path().display()))?;
    let summary = ErrorSummary::from_errors(
        &errors,
        chrono::Duration::hours(hours),
        chrono::Utc::now(),
        config.analysis.top_messages,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Instance {} - {} errors in the last {}h ({:.2}/h)",
        config.instance.bold(),
        summary.total_errors,
        hours,
        summary.rate_per_hour
    );
    println!(
        "  resolved: {}  unresolved: {}",
        summary.resolved.to_string().green(),
        summary.unresolved.to_string().red()
    );

    for (title, counts) in [
        ("By category", &summary.by_category),
        ("By severity", &summary.by_severity),
        ("By type", &summary.by_type),
    ] {
        if counts.is_empty() {
            continue;
        }
        println!("\n{}:", title);
        for (key, count) in counts {
            println!("  {:<28} {}", key, count);
        }
    }

    if !summary.top_messages.is_empty() {
        println!("\nMost frequent messages:");
        for (message, count) in &summary.top_messages {
            println!("  {:>5}  {}", count, message);
        }
    }
    Ok(())
}

fn analyze(config: &SentinelConfig, output: Option<PathBuf>) -> Result<()> {
    let errors = error_log(config).load()?;
    let output = output.unwrap_or_else(|| config.instance_dir().join("analysis_report.json"));

    let mut analyzer = ErrorAnalyzer::new(config.analysis.clone());
    analyzer.perform_comprehensive_analysis(&errors, chrono::Utc::now());
    let report = analyzer
        .generate_report(&output)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;

    println!(
        "Analyzed {} errors: {} patterns, {} trends, {} impact assessments",
        report.total_errors,
        report.patterns.len(),
        report.trends.len(),
        report.impacts.len()
    );

    for trend in analyzer.concerning_trends() {
        println!(
            "  {} {} {:+.0}% (confidence {:.2})",
            "rising".red(),
            trend.error_type,
            trend.change_rate_pct,
            trend.confidence
        );
    }

    if !report.suggestions.is_empty() {
        println!("\nTop suggestions:");
        for suggestion in report.suggestions.iter().take(5) {
            println!("  [{:.2}] {}", suggestion.priority, suggestion.title);
        }
    }

    println!("\nReport saved to: {}", output.display());
    Ok(())
}

fn quarantine(config: &SentinelConfig, action: QuarantineCommand) -> Result<()> {
    let handler = PdfHandler::new(config.instance.clone(), config.quarantine_root(), config.pdf.clone());

    match action {
        QuarantineCommand::List => {
            let records = handler.list_quarantine()?;
            if records.is_empty() {
                println!("Quarantine is empty.");
                return Ok(());
            }
            println!(
                "{:<12} {:<25} {:>10}  {}",
                "Reason", "Quarantined", "Size", "Original path"
            );
            println!("{}", "-".repeat(90));
            for record in &records {
                println!(
                    "{:<12} {:<25} {:>10}  {}",
                    record.reason.as_str(),
                    record.quarantined_at.format("%Y-%m-%d %H:%M:%S"),
                    record.size_bytes,
                    record.original_path.display()
                );
            }
            println!("\n{} quarantined file(s)", records.len());
        }
        QuarantineCommand::Cleanup { older_than } => {
            let removed = handler.cleanup_quarantine(older_than)?;
            println!(
                "Removed {} quarantined file(s) older than {}",
                removed,
                humantime::format_duration(older_than)
            );
        }
    }
    Ok(())
}

async fn monitor(config: &SentinelConfig) -> Result<()> {
    let history = Arc::new(error_log(config));
    let system = Arc::new(PreventionSystem::for_host(config, history));

    let handle = system.start();
    println!(
        "Monitoring instance {} (Ctrl-C to stop)",
        config.instance.bold()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.shutdown().await;

    let stats = system.prevention_statistics();
    println!(
        "\n{} rule cycles, {} warnings issued, {} action failures",
        stats.rule_cycles, stats.warnings_issued, stats.actions_failed
    );
    for rule in &stats.rules {
        let state = if rule.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!(
            "  {:<26} {:<9} triggered {:>4}  success {:.0}%",
            rule.id,
            state,
            rule.trigger_count,
            rule.success_rate * 100.0
        );
    }
    Ok(())
}
