use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use flowrec_capture::capture::ingest;
use flowrec_capture::{ConfigLoader, ConfigValidator, FlowFilter, FlushMode, HttpRecorderAddon};
use flowrec_core::{codec, sink};
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flowrec")]
#[command(about = "Record completed HTTP flows to an append-only file")]
struct Cli {
    /// Config file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record NDJSON flow messages read from stdin
    Record(RecordArgs),
    /// Check the integrity of a record file
    Verify(VerifyArgs),
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Destination file, overriding the config
    #[arg(long, short = 'd')]
    dest: Option<PathBuf>,

    /// Flush mode: close | record | every:<n>
    #[arg(long, value_parser = FlushMode::from_str)]
    flush: Option<FlushMode>,

    /// Record every completed flow, ignoring host filters
    #[arg(long)]
    no_filter: bool,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Record file to scan
    path: PathBuf,

    /// Truncate an incomplete trailing frame
    #[arg(long)]
    repair: bool,
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::DEBUG.into())
    } else {
        EnvFilter::from_default_env()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Record(args) => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            let result = runtime.block_on(record(cli.config, cli.verbose, args));
            // A pending stdin read cannot be cancelled; do not wait for it
            runtime.shutdown_background();
            result
        }
        Command::Verify(args) => {
            init_logging(cli.verbose);
            verify(args)
        }
    }
}

async fn record(
    config_path: Option<PathBuf>,
    verbose: bool,
    args: RecordArgs,
) -> anyhow::Result<()> {
    let mut config =
        ConfigLoader::load_or_default(config_path).context("Failed to load configuration")?;
    init_logging(verbose || config.common.verbose);

    let mut section = config.recorder_section();
    if let Some(dest) = args.dest {
        section.dest = dest;
    }
    if let Some(flush) = args.flush {
        section.flush = flush.to_string();
    }
    config.recorder = Some(section.clone());
    ConfigValidator::validate(&config).context("Invalid configuration")?;

    let filter = if args.no_filter {
        FlowFilter::allow_all()
    } else {
        FlowFilter::from_config(&config.filter)?
    };

    let addon = Arc::new(HttpRecorderAddon::new(filter));
    addon
        .configure(&section)
        .with_context(|| format!("Failed to open {}", section.dest.display()))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing recording");
                cancel.cancel();
            }
        }
    });

    let reader = BufReader::new(tokio::io::stdin());
    let ingested = ingest::run(reader, Arc::clone(&addon), cancel).await;

    // The recording is closed even when ingestion stopped on an error
    let addon_stats = addon.stats();
    let summary = addon.done();
    info!(
        "Processed {} flows: {} recorded, {} filtered, {} failed",
        addon_stats.seen, addon_stats.recorded, addon_stats.filtered, addon_stats.failed
    );

    let stats = ingested.context("Failed to read flow messages")?;
    if stats.malformed > 0 {
        warn!("Skipped {} malformed flow messages", stats.malformed);
    }
    if let Some(summary) = summary? {
        if let (Some(first), Some(last)) = (summary.first_capture, summary.last_capture) {
            info!("Captured between {} and {}", first, last);
        }
    }
    Ok(())
}

fn verify(args: VerifyArgs) -> anyhow::Result<()> {
    let file = File::open(&args.path)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;
    let report = codec::scan_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    println!("{}", args.path.display());
    println!("  records:   {}", report.records);
    println!("  valid:     {} of {} bytes", report.valid_len, report.total_len);

    if let Some(err) = report.corruption {
        bail!("{} is corrupt: {}", args.path.display(), err);
    }

    match report.torn_tail {
        Some(offset) if args.repair => {
            sink::truncate_file(&args.path, offset as u64)
                .with_context(|| format!("Failed to truncate {}", args.path.display()))?;
            println!("  repaired:  dropped {} trailing bytes", report.total_len - offset);
        }
        Some(offset) => {
            println!(
                "  torn tail: {} bytes at offset {} (use --repair to drop)",
                report.total_len - offset,
                offset
            );
        }
        None => println!("  clean"),
    }
    Ok(())
}
