use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use spotcheck::audit::{emit_run_finished, emit_run_started, TracingObserver};
use spotcheck::checks::{FilePattern, HitRecord, HitSink, IocCheck, IocCheckConfig};
use spotcheck::core::{ArcSensor, CheckError, SensorFilter};
use spotcheck::directory::InMemoryDirectory;
use spotcheck::scheduler::{new_run_id, CheckObserver, SpotCheck, SpotCheckConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Looks for indicators of compromise across a fleet of sensors.
///
/// Output lines: `>` check started, `.` done, `?` offline, `X` error,
/// `!` hit.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fleet inventory (JSON) listing the sensors to check
    #[arg(long, value_name = "PATH")]
    fleet: PathBuf,

    /// Number of sensors checked concurrently
    #[arg(short = 'n', long, default_value_t = 1)]
    concurrency: usize,

    /// Seconds before an offline sensor is tried again
    #[arg(long, default_value_t = 60, value_name = "SECS")]
    retry_interval: u64,

    /// Skip Windows sensors
    #[arg(long)]
    no_windows: bool,

    /// Skip Linux sensors
    #[arg(long)]
    no_linux: bool,

    /// Skip macOS sensors
    #[arg(long)]
    no_macos: bool,

    /// Only check sensors carrying all these tags (comma separated)
    #[arg(long, value_name = "TAGS")]
    tags: Option<String>,

    /// File path to look for
    #[arg(short = 'f', long = "file", action = ArgAction::Append, value_name = "PATH")]
    files: Vec<String>,

    /// Files matching a pattern
    #[arg(long, num_args = 3, action = ArgAction::Append, value_names = ["DIR", "PATTERN", "DEPTH"])]
    file_pattern: Vec<String>,

    /// Files matching a pattern with a given SHA-256
    #[arg(long, num_args = 4, action = ArgAction::Append, value_names = ["DIR", "PATTERN", "DEPTH", "SHA256"])]
    file_hash: Vec<String>,

    /// Registry key to look for
    #[arg(long, action = ArgAction::Append, value_name = "KEY")]
    registry_key: Vec<String>,

    /// Registry value to look for
    #[arg(long, num_args = 2, action = ArgAction::Append, value_names = ["KEY", "VALUE"])]
    registry_value: Vec<String>,

    /// YARA signature file scanned against the whole system
    #[arg(short = 'y', long = "yara", action = ArgAction::Append, value_name = "SIG")]
    yara: Vec<PathBuf>,

    /// YARA signature file scanned against files matching a pattern
    #[arg(long, num_args = 4, action = ArgAction::Append, value_names = ["SIG", "DIR", "PATTERN", "DEPTH"])]
    yara_file: Vec<String>,

    /// YARA signature file scanned against processes matching a pattern
    #[arg(long, num_args = 2, action = ArgAction::Append, value_names = ["SIG", "PATTERN"])]
    yara_process: Vec<String>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Print hits as JSON lines on stdout, progress on stderr
    #[arg(long)]
    json: bool,
}

impl Args {
    fn filter(&self) -> SensorFilter {
        let filter = SensorFilter::new()
            .with_windows(!self.no_windows)
            .with_linux(!self.no_linux)
            .with_macos(!self.no_macos);

        match &self.tags {
            Some(tags) => filter.with_required_tags(parse_tags(tags)),
            None => filter,
        }
    }

    fn ioc_config(&self) -> anyhow::Result<IocCheckConfig> {
        let mut config = IocCheckConfig::new();

        for file in &self.files {
            config = config.with_file(file.as_str());
        }
        for chunk in self.file_pattern.chunks_exact(3) {
            config = config.with_file_pattern(chunk[0].as_str(), chunk[1].as_str(), parse_depth(&chunk[2])?);
        }
        for chunk in self.file_hash.chunks_exact(4) {
            config = config.with_file_hash(
                chunk[0].as_str(),
                chunk[1].as_str(),
                parse_depth(&chunk[2])?,
                chunk[3].as_str(),
            );
        }
        for key in &self.registry_key {
            config = config.with_registry_key(key.as_str());
        }
        for chunk in self.registry_value.chunks_exact(2) {
            config = config.with_registry_value(chunk[0].as_str(), chunk[1].as_str());
        }
        for signature in &self.yara {
            config = config.with_yara_system(signature.clone());
        }
        for chunk in self.yara_file.chunks_exact(4) {
            let files = FilePattern::new(chunk[1].as_str(), chunk[2].as_str(), parse_depth(&chunk[3])?);
            config = config.with_yara_files(chunk[0].as_str(), files);
        }
        for chunk in self.yara_process.chunks_exact(2) {
            config = config.with_yara_processes(chunk[0].as_str(), chunk[1].as_str());
        }

        Ok(config)
    }
}

fn parse_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn parse_depth(depth: &str) -> anyhow::Result<u32> {
    depth
        .parse()
        .with_context(|| format!("invalid depth '{depth}'"))
}

/// Prints progress lines for every sensor transition.
struct ConsoleReporter {
    to_stderr: bool,
}

impl ConsoleReporter {
    fn line(&self, marker: char, sensor: &ArcSensor, detail: Option<&str>) {
        let host = sensor.hostname().unwrap_or("-");
        let line = match detail {
            Some(detail) => format!("{marker} ({} / {host}): {detail}", sensor.id()),
            None => format!("{marker} ({} / {host})", sensor.id()),
        };
        if self.to_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
}

impl CheckObserver for ConsoleReporter {
    fn on_start_check(&self, sensor: &ArcSensor) {
        self.line('>', sensor, None);
    }

    fn on_check_done(&self, sensor: &ArcSensor) {
        self.line('.', sensor, None);
    }

    fn on_offline(&self, sensor: &ArcSensor) {
        self.line('?', sensor, None);
    }

    fn on_error(&self, sensor: &ArcSensor, error: &CheckError) {
        self.line('X', sensor, Some(&error.to_string()));
    }
}

/// Prints every hit on stdout.
struct ConsoleHits {
    json: bool,
}

impl HitSink for ConsoleHits {
    fn report(&self, record: &HitRecord) {
        if self.json {
            match serde_json::to_string(record) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "Failed to serialize hit"),
            }
        } else {
            let host = record.hostname.as_deref().unwrap_or("-");
            println!("! ({} / {host}): {}", record.sensor_id, record.hit_json());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let ioc_config = args.ioc_config()?;
    if ioc_config.is_empty() {
        bail!("nothing to look for: specify at least one file, registry or YARA indicator");
    }
    let check = IocCheck::new(ioc_config, Arc::new(ConsoleHits { json: args.json }))
        .context("Failed to prepare the IOC check")?;

    let directory = InMemoryDirectory::from_json_file(&args.fleet)
        .with_context(|| format!("Failed to load fleet inventory {}", args.fleet.display()))?;

    let run_id = new_run_id();
    let config = SpotCheckConfig::new()
        .with_concurrency(args.concurrency)
        .with_retry_interval(Duration::from_secs(args.retry_interval))
        .with_filter(args.filter());

    let spot_check = SpotCheck::builder()
        .with_directory(directory)
        .with_check(check)
        .with_observer((
            ConsoleReporter { to_stderr: args.json },
            TracingObserver::new(run_id.as_str()),
        ))
        .with_config(config)
        .with_run_id(run_id.as_str())
        .build()?;

    let enqueued = spot_check
        .start()
        .await
        .context("Failed to enumerate sensors")?;
    emit_run_started(&run_id, enqueued, spot_check.config());

    let timeout = args.timeout.map(Duration::from_secs);
    let finished = tokio::select! {
        finished = spot_check.wait(timeout) => finished,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(run_id = %run_id, "Interrupted, stopping");
            false
        }
    };

    if !finished {
        spot_check.stop().await;
    }

    let stats = spot_check.stats();
    emit_run_finished(&run_id, &stats);
    eprintln!(
        "{run_id}: {} sensors, {} done, {} errors, {} filtered{}",
        stats.enqueued,
        stats.checks_done,
        stats.check_errors,
        stats.filtered,
        if finished { "" } else { " (stopped)" }
    );

    Ok(())
}
