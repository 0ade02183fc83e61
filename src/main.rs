use clap::{Parser, Subcommand};
use img_variants::config::{self, Settings};
use img_variants::engine::RustEngine;
use img_variants::fingerprint::SourceId;
use img_variants::ledger::{JsonLedger, Ledger, RequeueFilter};
use img_variants::options::{RawOptions, Resolver};
use img_variants::output::{self, StatusFormat};
use img_variants::queue::QueueProcessor;
use img_variants::status::{self, Gates};
use img_variants::storage::FileStorage;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "img-variants")]
#[command(about = "Deterministic responsive image variants with a queued build ledger")]
#[command(long_about = "\
Deterministic responsive image variants with a queued build ledger

Every variant is named by a fingerprint of its source and transformation
options. Requests enqueue missing variants in a ledger; `build` renders the
queue out of band and writes artifacts into content-addressed storage.

Project layout:

  project/
  ├── config.toml              # Optional, see 'img-variants gen-config'
  ├── .img-variants/
  │   └── ledger.json          # Build state for every known variant
  └── media/                   # Source images for the 'default' storage
      └── variants/            # Generated artifacts (ab/abcdef….webp)

Set RUST_LOG=debug for ledger transitions.")]
#[command(version)]
struct Cli {
    /// Project root holding config.toml
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report ledger health
    Status {
        /// Show the error count distribution
        #[arg(short, long)]
        verbose: bool,
        /// Output format (default: pretty on a terminal, plain otherwise)
        #[arg(long, value_enum)]
        format: Option<StatusFormat>,
        /// Seconds before a Building entry counts as stale
        #[arg(long)]
        stale_after: Option<u64>,
        /// Exit non-zero when any build is stale
        #[arg(long)]
        fail_on_stale: bool,
        /// Exit non-zero when total errors exceed this number
        #[arg(long)]
        fail_on_errors: Option<usize>,
    },
    /// Build every queued variant
    Build {
        /// Seconds before a Building entry is presumed dead and requeued
        #[arg(long)]
        stale_after: Option<u64>,
        /// Skip entries that failed more than this many times
        #[arg(long)]
        max_errors: Option<u32>,
        /// Print one line per variant
        #[arg(short, long)]
        verbose: bool,
    },
    /// Move failed variants back to the queue
    Requeue {
        /// Only variants with at most this many failures
        #[arg(long)]
        max_errors: Option<u32>,
        /// Also requeue stale Building entries
        #[arg(long)]
        include_stale: bool,
        /// Seconds before a Building entry counts as stale
        #[arg(long)]
        stale_after: Option<u64>,
    },
    /// Show the variants an option set expands to
    Resolve {
        /// Source name within its storage
        #[arg(long)]
        source: String,
        /// Named source storage
        #[arg(long, default_value = SourceId::DEFAULT_STORAGE)]
        storage: String,
        /// Options as JSON, e.g. '{"width": 640, "sizes": {"640": 320}}'
        options: String,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let settings = config::load_config(&cli.root)?;
    let ledger = JsonLedger::new(settings.ledger_path(&cli.root));

    match cli.command {
        Command::Status {
            verbose,
            format,
            stale_after,
            fail_on_stale,
            fail_on_errors,
        } => {
            let stale_after = stale_after.unwrap_or(settings.queue.stale_after);
            let entries = ledger.snapshot()?;
            let report = status::summarize(&entries, chrono::Utc::now(), stale_after);
            let format = format.unwrap_or_else(default_status_format);
            output::print_status(&report, format, verbose);

            let gates = Gates {
                fail_on_stale,
                fail_on_errors,
            };
            let reasons = gates.tripped(&report);
            if !reasons.is_empty() {
                for reason in reasons {
                    eprintln!("error: {reason}");
                }
                std::process::exit(1);
            }
        }
        Command::Build {
            stale_after,
            max_errors,
            verbose,
        } => {
            init_thread_pool(&settings.processing);
            let stale_after =
                config::stale_threshold(stale_after.unwrap_or(settings.queue.stale_after));
            let max_errors = max_errors.or(settings.queue.max_errors);
            let storage = storage(&settings, &cli.root);
            let engine = RustEngine::new(settings.source_roots(&cli.root))
                .with_max_output_pixels(settings.processing.max_output_pixels);

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    if verbose {
                        for line in output::format_build_event(&event) {
                            println!("{}", line);
                        }
                    }
                }
            });
            let report = QueueProcessor::new(&ledger, &engine, &storage)
                .with_events(tx)
                .run(stale_after, max_errors)?;
            printer.join().ok();
            output::print_build_report(&report);
        }
        Command::Requeue {
            max_errors,
            include_stale,
            stale_after,
        } => {
            let filter = RequeueFilter {
                max_errors,
                include_stale,
                stale_after: config::stale_threshold(
                    stale_after.unwrap_or(settings.queue.stale_after),
                ),
            };
            let count = ledger.requeue(&filter)?;
            output::print_requeue(count);
        }
        Command::Resolve {
            source,
            storage,
            options,
        } => {
            let raw: RawOptions = serde_json::from_str(&options)?;
            let resolved = Resolver::new(&settings).resolve(&raw)?;
            output::print_resolve(&SourceId::in_storage(storage, source), &resolved);
        }
        Command::GenConfig => unreachable!("handled before loading config"),
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn storage(settings: &Settings, root: &std::path::Path) -> FileStorage {
    FileStorage::new(settings.storage_root(root), settings.storage.base_url.clone())
}

fn default_status_format() -> StatusFormat {
    if std::io::stdout().is_terminal() {
        StatusFormat::Pretty
    } else {
        StatusFormat::Plain
    }
}
