use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use workbench::api::types::{
  BatchOcrRequest, BenchmarkRunRequest, CorrectionRequest, EnqueueRequest, NormalizeRequest,
};
use workbench::api::FileUpload;
use workbench::config::Config;
use workbench::logging;
use workbench::notify::{Notification, NotificationLevel, NotificationSink, TracingSink};
use workbench::prefs::{PreferenceStore, TableDensity};
use workbench::query::{CacheEntry, Poller};
use workbench::resources::QualityReportKind;
use workbench::Workbench;

const GC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "workbench")]
#[command(about = "Review workbench for the OCR and product-data pipeline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/workbench/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Ground truth and normalizer service health
  Health,
  /// List uploaded documents
  Documents {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    page_size: u32,
  },
  /// Upload a document
  Upload { path: PathBuf },
  /// Submit an image for scanning and follow the job
  Scan {
    path: PathBuf,
    /// Return once the job is queued
    #[arg(long)]
    no_wait: bool,
  },
  /// Follow an existing scan job
  ScanStatus { job_id: String },
  /// Data quality reports
  Quality {
    /// coverage, drift, freshness or ingestion-summary
    #[arg(default_value = "coverage")]
    report: String,
    /// Keep refreshing
    #[arg(long)]
    watch: bool,
  },
  /// Recent validation errors
  ValidationErrors {
    #[arg(long, default_value_t = 50)]
    limit: u32,
  },
  /// List OCR corrections
  Corrections {
    #[arg(long)]
    status: Option<String>,
  },
  /// Submit an OCR correction
  Correct { wrong_text: String, correct_text: String },
  /// Normalize a piece of text
  Normalize {
    text: String,
    #[arg(long)]
    version: Option<String>,
  },
  /// Normalizer versions
  Versions,
  /// Normalize the OCR output of several documents
  BatchOcr {
    #[arg(required = true)]
    document_ids: Vec<String>,
  },
  /// Ground truth tools
  #[command(subcommand)]
  GroundTruth(GroundTruthCommand),
  /// Task queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Acquisition metrics and dead letter queue depth
  Metrics {
    #[arg(long)]
    watch: bool,
  },
  /// Extraction benchmark
  #[command(subcommand)]
  Benchmark(BenchmarkCommand),
  /// Show or change stored preferences
  Prefs {
    #[arg(long)]
    density: Option<TableDensity>,
    #[arg(long)]
    sidebar_collapsed: Option<bool>,
  },
}

#[derive(Subcommand, Debug)]
enum GroundTruthCommand {
  /// Generate suggestions from a JSON request file
  Suggest { request: PathBuf },
  /// Validate a JSON ground truth file
  Validate { request: PathBuf },
  /// Convert a JSON ground truth file
  Convert { request: PathBuf },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  Stats {
    #[arg(long)]
    watch: bool,
  },
  Enqueue {
    task: String,
    /// JSON payload
    #[arg(long)]
    payload: Option<String>,
  },
  Cancel { job_id: String },
  Retry { job_id: String },
}

#[derive(Subcommand, Debug)]
enum BenchmarkCommand {
  Run {
    #[arg(long)]
    dataset: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
  },
  Results,
  History {
    #[arg(long, default_value_t = 10)]
    limit: u32,
  },
  Metrics,
  Dataset,
}

/// Prints notifications the way a toast would show them.
struct ConsoleSink;

impl NotificationSink for ConsoleSink {
  fn notify(&self, notification: &Notification) {
    match notification.level {
      NotificationLevel::Error => eprintln!("✗ {}", notification.message),
      NotificationLevel::Success => eprintln!("✓ {}", notification.message),
      _ => eprintln!("• {}", notification.message),
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;

  let workbench = Workbench::new(&config)?;
  workbench.notifier().subscribe(Arc::new(TracingSink));
  workbench.notifier().subscribe(Arc::new(ConsoleSink));
  let _gc = workbench.cache().spawn_gc(GC_INTERVAL);

  run(&config, &workbench, args.command).await
}

async fn run(config: &Config, workbench: &Workbench, command: Command) -> Result<()> {
  match command {
    Command::Health => {
      let mut ground_truth = workbench.observe_ground_truth_health();
      let mut normalizer = workbench.observe_normalizer_health();
      ground_truth.fetch();
      normalizer.fetch();
      let (gt, norm) = tokio::join!(ground_truth.settled(), normalizer.settled());
      print_health("ground-truth", gt);
      print_health("normalizer", norm);
    }
    Command::Documents { page, page_size } => {
      print_entry(workbench.documents(page, page_size).await)?;
    }
    Command::Upload { path } => {
      let upload = read_upload(&path)?;
      print_json(&workbench.upload_document(upload).await?)?;
    }
    Command::Scan { path, no_wait } => {
      let submitted = workbench.submit_scan(read_upload(&path)?).await?;
      print_json(&submitted)?;
      if !no_wait {
        follow(workbench.poll_scan_job(&submitted.job_id)).await?;
      }
    }
    Command::ScanStatus { job_id } => {
      follow(workbench.poll_scan_job(&job_id)).await?;
    }
    Command::Quality { report, watch } => {
      let report: QualityReportKind = report.parse().map_err(|e: String| eyre!(e))?;
      if watch {
        follow(workbench.watch_quality_report(report)).await?;
      } else {
        print_entry(workbench.quality_report(report).await)?;
      }
    }
    Command::ValidationErrors { limit } => {
      print_entry(workbench.validation_errors(limit).await)?;
    }
    Command::Corrections { status } => {
      print_entry(workbench.corrections(status.as_deref()).await)?;
    }
    Command::Correct {
      wrong_text,
      correct_text,
    } => {
      let request = CorrectionRequest {
        wrong_text,
        correct_text,
      };
      print_json(&workbench.submit_correction(&request).await?)?;
    }
    Command::Normalize { text, version } => {
      let request = NormalizeRequest { text, version };
      print_json(&workbench.normalize(&request).await?)?;
    }
    Command::Versions => {
      print_entry(workbench.normalizer_versions().await)?;
    }
    Command::BatchOcr { document_ids } => {
      let request = BatchOcrRequest { document_ids };
      print_json(&workbench.normalize_batch_ocr(&request).await?)?;
    }
    Command::GroundTruth(cmd) => match cmd {
      GroundTruthCommand::Suggest { request } => {
        print_json(&workbench.suggest_ground_truth(&read_json(&request)?).await?)?;
      }
      GroundTruthCommand::Validate { request } => {
        print_json(&workbench.validate_ground_truth(&read_json(&request)?).await?)?;
      }
      GroundTruthCommand::Convert { request } => {
        print_json(&workbench.convert_ground_truth(&read_json(&request)?).await?)?;
      }
    },
    Command::Queue(cmd) => match cmd {
      QueueCommand::Stats { watch: true } => follow(workbench.watch_task_queue()).await?,
      QueueCommand::Stats { watch: false } => print_entry(workbench.task_queue_stats().await)?,
      QueueCommand::Enqueue { task, payload } => {
        let payload = match payload {
          Some(raw) => serde_json::from_str(&raw)?,
          None => Value::Null,
        };
        let request = EnqueueRequest { task, payload };
        print_json(&workbench.enqueue_task(&request).await?)?;
      }
      QueueCommand::Cancel { job_id } => print_json(&workbench.cancel_task(&job_id).await?)?,
      QueueCommand::Retry { job_id } => print_json(&workbench.retry_task(&job_id).await?)?,
    },
    Command::Metrics { watch } => {
      if watch {
        follow(workbench.watch_acquisition_metrics()).await?;
      } else {
        print_entry(workbench.acquisition_metrics().await)?;
      }
    }
    Command::Benchmark(cmd) => match cmd {
      BenchmarkCommand::Run { dataset, limit } => {
        let request = BenchmarkRunRequest { dataset, limit };
        print_json(&workbench.run_benchmark(&request).await?)?;
      }
      BenchmarkCommand::Results => print_entry(workbench.benchmark_results().await)?,
      BenchmarkCommand::History { limit } => print_entry(workbench.benchmark_history(limit).await)?,
      BenchmarkCommand::Metrics => print_entry(workbench.benchmark_metrics().await)?,
      BenchmarkCommand::Dataset => print_entry(workbench.benchmark_dataset().await)?,
    },
    Command::Prefs {
      density,
      sidebar_collapsed,
    } => prefs(config, density, sidebar_collapsed)?,
  }

  Ok(())
}

fn prefs(
  config: &Config,
  density: Option<TableDensity>,
  sidebar_collapsed: Option<bool>,
) -> Result<()> {
  let store = PreferenceStore::open(config.prefs_path.as_deref())?;
  let prefs = if density.is_some() || sidebar_collapsed.is_some() {
    store.update(|p| {
      if let Some(density) = density {
        p.table_density = density;
      }
      if let Some(collapsed) = sidebar_collapsed {
        p.sidebar_collapsed = collapsed;
      }
    })?
  } else {
    store.load()?
  };
  print_json(&prefs)
}

/// Print every settled poll until the poller stops or Ctrl-C.
async fn follow<T: Serialize + Send + Sync + 'static>(mut poller: Poller<T>) -> Result<()> {
  loop {
    tokio::select! {
      snapshot = poller.changed() => match snapshot {
        Some(snapshot) => {
          if let Some(err) = snapshot.entry.error() {
            eprintln!("[{}] {}", poller.key(), err);
          }
          if let Some(data) = snapshot.entry.data() {
            print_json(data)?;
          }
        }
        None => break,
      },
      _ = tokio::signal::ctrl_c() => break,
    }
  }
  Ok(())
}

fn print_health(name: &str, entry: &CacheEntry<workbench::api::types::HealthStatus>) {
  match (entry.data(), entry.error()) {
    (Some(health), _) => println!(
      "{:<14} {:<10} {}",
      name,
      health.status,
      health.version.as_deref().unwrap_or("-")
    ),
    (None, Some(err)) => println!("{:<14} {:<10} {}", name, "error", err),
    (None, None) => println!("{:<14} unknown", name),
  }
}

fn print_entry<T: Serialize>(entry: CacheEntry<T>) -> Result<()> {
  let data = entry.into_result()?;
  print_json(data.as_ref())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_upload(path: &Path) -> Result<FileUpload> {
  let bytes = std::fs::read(path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  let filename = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("Not a file: {}", path.display()))?;
  Ok(FileUpload::new("file", filename, bytes))
}

fn read_json(path: &Path) -> Result<Value> {
  let contents =
    std::fs::read_to_string(path).map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  Ok(serde_json::from_str(&contents)?)
}
