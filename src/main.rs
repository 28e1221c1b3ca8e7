use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ecr_audit::aws::context::AwsSession;
use ecr_audit::aws::ecr::EcrRegistry;
use ecr_audit::aws::s3::S3Uploader;
use ecr_audit::config::{delimiter_byte, Config, RunConfig};
use ecr_audit::error::RunError;
use ecr_audit::pipeline;
use ecr_audit::remediate::ExclusionRule;
use ecr_audit::report::sink::{IMAGE_KEY_STEM, REPOSITORY_KEY_STEM};
use ecr_audit::report::{FileSink, OutputFormat, Report, ReportSink, RunMode, S3Sink, StdoutSink};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Inventory ECR repositories and enforce tag immutability
#[derive(Parser, Debug)]
#[command(name = "ecr-audit", version = ecr_audit::VERSION, about, long_about = None)]
struct Args {
    /// AWS region to use
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Named credential profile
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Report file, `-` for stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, global = true)]
    format: Option<OutputFormat>,

    /// CSV delimiter
    #[arg(long, global = true)]
    delimiter: Option<char>,

    /// Upload the report to this bucket instead of writing a local file
    #[arg(long, global = true)]
    s3_bucket: Option<String>,

    /// Object key for the upload (defaults to ecr_repositories_<date>.<ext>, ecr_images_<date>.<ext> with --images)
    #[arg(long, global = true, requires = "s3_bucket")]
    s3_key: Option<String>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count the images of every matching repository
    Inventory {
        /// Regular expression matched anywhere in the repository name
        pattern: String,

        /// Repositories counted in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Include repository tags in the report
        #[arg(long)]
        with_tags: bool,

        /// Describe every image and report one line per image (tag, digest, size)
        #[arg(long)]
        images: bool,
    },
    /// Set tag immutability on every matching repository
    Remediate {
        /// Regular expression matched anywhere in the repository name
        pattern: String,

        /// Report what would change without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Name marker never remediated (repeatable, replaces the default `snapshot`)
        #[arg(long = "exclude", value_name = "MARKER")]
        exclude: Vec<String>,

        /// Include repository tags in the report
        #[arg(long)]
        with_tags: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: cannot open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.to_string().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("ecr-audit {} started with log level: {:?}", ecr_audit::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("ecr-audit").join("ecr-audit.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".ecr-audit").join("ecr-audit.log");
    }
    PathBuf::from("ecr-audit.log")
}

/// Print an error with its cause chain and a hint when one is known
fn print_error(err: &anyhow::Error) {
    eprintln!("Error: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }

    let hint = err
        .downcast_ref::<RunError>()
        .and_then(|e| match e {
            RunError::PartialPage { source, .. } => source.source.suggestion(),
            RunError::InvalidPattern { .. } => {
                Some("Patterns are regular expressions; escape special characters.")
            }
            RunError::Session(_) => None,
        });
    if let Some(hint) = hint {
        eprintln!("Hint: {hint}");
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    if let Err(err) = run(args).await {
        tracing::error!("Run failed: {:#}", err);
        print_error(&err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load();
    let run_config = build_run_config(&args, &config)?;
    run_config.validate()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, finishing the current call and stopping...");
                tracing::warn!("Ctrl-C received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let session = AwsSession::load(&run_config.region, &run_config.profile).await?;
    let registry = EcrRegistry::from_session(&session);

    if run_config.mode == RunMode::Remediate && run_config.dry_run {
        eprintln!("Dry-run: no repository will be modified.");
    }

    let report = pipeline::run(&registry, &run_config, &cancel).await?;

    if report.is_empty() {
        eprintln!("No repositories matching pattern '{}' found.", run_config.pattern);
    }

    let sink = build_sink(&args, &config, &session, &report)?;
    let location = sink.write(&report).await.context("Failed to write report")?;

    print_summary(&report, &location);
    Ok(())
}

fn build_run_config(args: &Args, config: &Config) -> Result<RunConfig> {
    let region = args
        .region
        .clone()
        .or_else(|| config.effective_region())
        .context("No region given; use --region, the config file or AWS_REGION")?;
    let profile = args
        .profile
        .clone()
        .unwrap_or_else(|| config.effective_profile());

    let run_config = match &args.command {
        Command::Inventory {
            pattern,
            concurrency,
            with_tags,
            images,
        } => {
            let mut run = RunConfig::new(&region, pattern, &profile, false)
                .with_mode(RunMode::Inventory)
                .with_defaults_from(config);
            if let Some(concurrency) = concurrency {
                run.concurrency = *concurrency;
            }
            run.include_tags = *with_tags;
            run.include_images = *images;
            run
        }
        Command::Remediate {
            pattern,
            dry_run,
            exclude,
            with_tags,
        } => {
            let mut run = RunConfig::new(&region, pattern, &profile, *dry_run)
                .with_mode(RunMode::Remediate)
                .with_defaults_from(config);
            if !exclude.is_empty() {
                run.exclusions = ExclusionRule::new(exclude.iter().cloned());
            }
            run.include_tags = *with_tags;
            run
        }
    };

    Ok(run_config)
}

fn build_sink(
    args: &Args,
    config: &Config,
    session: &AwsSession,
    report: &Report,
) -> Result<Box<dyn ReportSink>> {
    let format = args.format.or(config.format).unwrap_or_default();
    let delimiter = match args.delimiter {
        Some(d) => delimiter_byte(d)?,
        None => config.effective_delimiter()?,
    };

    if let Some(bucket) = &args.s3_bucket {
        let stem = if report.images.is_some() {
            IMAGE_KEY_STEM
        } else {
            REPOSITORY_KEY_STEM
        };
        let key = args.s3_key.clone().unwrap_or_else(|| {
            S3Sink::default_key(stem, format, chrono::Utc::now().date_naive())
        });
        return Ok(Box::new(S3Sink {
            uploader: S3Uploader::from_session(session),
            bucket: bucket.clone(),
            key,
            format,
            delimiter,
        }));
    }

    let path = args.output.clone().unwrap_or_else(|| config.effective_output());
    if path.as_os_str() == std::ffi::OsStr::new("-") {
        return Ok(Box::new(StdoutSink { format, delimiter }));
    }

    Ok(Box::new(FileSink {
        path,
        format,
        delimiter,
    }))
}

fn print_summary(report: &Report, location: &str) {
    let summary = report.summary();

    eprintln!();
    eprintln!("Run {} ({}): {} repositories", report.run_id, report.mode, summary.records);
    match report.mode {
        RunMode::Inventory => {
            eprintln!("  images:            {}", summary.total_images);
            if report.images.is_some() {
                eprintln!("  total bytes:       {}", summary.total_bytes);
            }
            if summary.count_unavailable > 0 {
                eprintln!("  count unavailable: {}", summary.count_unavailable);
            }
        }
        RunMode::Remediate => {
            eprintln!("  applied: {}", summary.applied);
            eprintln!("  dry-run: {}", summary.dry_run);
            eprintln!("  skipped: {}", summary.skipped);
            eprintln!("  failed:  {}", summary.failed);
        }
    }

    for record in report.failures() {
        if let Some(outcome) = record.outcome() {
            eprintln!("  ! {}: {}", record.resource().name, outcome);
        }
    }

    eprintln!("Report: {location}");
}
