//! sitestats - multi-site statistics for spinal cord imaging metrics
//!
//! Reads the metric tables of a results directory together with the
//! participants table, and writes per-site, per-vendor and regression
//! statistics as a Markdown or JSON report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing files, malformed data, bad config, etc.)
//!   2 - Diagnostics present and --strict set

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use sitestats::cli::{Args, OutputFormat};
use sitestats::config::{Config, DEFAULT_CONFIG_FILE};
use sitestats::exclusion::ExclusionPolicy;
use sitestats::loader;
use sitestats::models::{Report, ReportMetadata};
use sitestats::pipeline::{MetricInput, Pipeline};
use sitestats::report;
use sitestats::scanner::MetricScanner;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("sitestats v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(args) {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .sitestats.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml()?;
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize vendors, metrics, the regression pair, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete statistics workflow. Returns exit code (0 or 2).
fn run_analysis(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid settings")?;

    let results_dir = args.results_dir();
    println!("📂 Results: {}", results_dir.display());

    // Step 1: Participants and exclusions
    let participants_path = config.input.participants_path(&results_dir);
    let metadata = loader::load_participants(&participants_path).with_context(|| {
        format!(
            "Failed to load participants table {}",
            participants_path.display()
        )
    })?;
    info!("Loaded {} participants", metadata.len());
    let participant_count = metadata.len();

    let prefix = config.analysis.subject_prefix.as_str();
    let policy = match config.input.exclude_path(&results_dir) {
        Some(path) => {
            info!("Loading exclusions from: {}", path.display());
            ExclusionPolicy::load(&path, prefix)?
        }
        None => ExclusionPolicy::empty(prefix),
    };
    debug!("Exclusions configured for {} metric(s)", policy.metric_count());

    // Step 2: Discover and read metric tables
    let resolved = MetricScanner::new(&results_dir).resolve(&config)?;
    if resolved.is_empty() {
        warn!("No metric files found in {}", results_dir.display());
    }

    let mut inputs = Vec::with_capacity(resolved.len());
    for (file, metric) in &resolved {
        let records =
            loader::load_metric_records(&file.path, metric.field, &config.input.filename_column)
                .with_context(|| format!("Failed to read {}", file.path.display()))?;
        inputs.push(MetricInput::new(metric.name.as_str(), records));
    }

    // Step 3: Statistics
    println!("\n📊 Computing statistics for {} metric(s)...", inputs.len());
    let pb = progress_bar(inputs.len() as u64, args.quiet);
    let pipeline = Pipeline::from_config(&config, metadata, policy);
    let run = pipeline.run_with(&inputs, |metric| {
        pb.set_message(metric.to_string());
        pb.inc(1);
    })?;
    pb.finish_and_clear();

    // Step 4: Build the report
    println!("\n📝 Generating report...");
    let duration = start_time.elapsed().as_secs_f64();

    let report = Report {
        metadata: ReportMetadata {
            results_dir: results_dir.display().to_string(),
            analysis_date: Utc::now(),
            participants: participant_count,
            metrics_processed: run.metrics.len(),
            alpha: config.analysis.alpha,
            duration_seconds: duration,
        },
        run,
    };

    match args.format {
        OutputFormat::Json => report::write_json_report(&report, &args.output),
        OutputFormat::Markdown => report::write_report(&report, &args.output),
    }
    .with_context(|| format!("Failed to write report to {}", args.output.display()))?;

    // Print summary
    let diagnostics = report.run.diagnostics();
    println!("\n📈 Summary:");
    for metric in &report.run.metrics {
        let p = metric
            .statistics
            .anova
            .as_ref()
            .map(|a| format!("{:.4}", a.p_value))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "   {:<8} {} sites, vendor ANOVA p = {}",
            metric.metric,
            metric.sites.len(),
            p
        );
    }
    if let Some(ref regression) = report.run.regression {
        for (vendor, fit) in &regression.fits {
            println!(
                "   {} ~ {} [{}]: slope {:.3}, intercept {:.3}, R² {:.3}",
                regression.y_metric,
                regression.x_metric,
                vendor,
                fit.slope,
                fit.intercept,
                fit.r_squared
            );
        }
    }
    println!("   Diagnostics: {}", diagnostics.len());
    println!("   Duration: {:.1}s", duration);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        args.output.display()
    );

    if args.strict && !diagnostics.is_empty() {
        eprintln!(
            "\n⛔ {} statistic(s) could not be computed. Failing (exit code 2).",
            diagnostics.len()
        );
        return Ok(2);
    }

    Ok(0)
}

fn progress_bar(len: u64, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
