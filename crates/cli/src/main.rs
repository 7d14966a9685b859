//! Command-line interface for unpacking wxapkg packages.
//!
//! Unpacks packages next to themselves, inspects package tables and
//! reconstructs already extracted manifests.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use wxapkg::{ProgressCallback, UnpackOptions, UnpackReport, Unpacker, DELETE_THRESHOLD};

#[derive(Parser)]
#[command(name = "wxunpack")]
#[command(version, about = "Unpack wxapkg packages and rebuild the project tree", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack one or more packages
    Unpack {
        /// Package files to unpack
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        /// Only extract files, skip project reconstruction
        #[arg(short = 'o', long = "only-unpack")]
        only_unpack: bool,

        /// Keep intermediate files after reconstruction
        #[arg(short = 'd', long = "keep")]
        keep: bool,

        /// Unpack every package concurrently
        #[arg(short = 'f', long = "fast")]
        fast: bool,

        /// Output directory of the main package, for subpackages
        #[arg(short = 's', long = "main-dir")]
        main_dir: Option<PathBuf>,

        /// Maximum number of filesystem tasks in flight
        #[arg(long, default_value_t = wxapkg::types::DEFAULT_IO_LIMIT)]
        io_limit: usize,
    },

    /// Show package header and file table
    Probe {
        /// Package file to probe
        archive: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild app.json and page configs from extracted app-config.json files
    Config {
        /// app-config.json files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Keep app-config.json after reconstruction
        #[arg(short = 'd', long = "keep")]
        keep: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let started = Instant::now();

    let result = match cli.command {
        Commands::Unpack {
            archives,
            only_unpack,
            keep,
            fast,
            main_dir,
            io_limit,
        } => {
            let options = UnpackOptions {
                keep_intermediate: keep,
                report_only: only_unpack,
                main_dir,
                io_limit,
                parallel: fast,
            };
            handle_unpack(archives, options).await
        }
        Commands::Probe { archive, json } => handle_probe(archive, json).await,
        Commands::Config { files, keep } => handle_config(files, keep).await,
    };

    info!(elapsed = ?started.elapsed(), "done");

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn handle_unpack(
    archives: Vec<PathBuf>,
    options: UnpackOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("=> "),
    );

    let progress_bar = bar.clone();
    let progress_cb: Arc<ProgressCallback> = Arc::new(move |name: &str, done: u64, total: u64| {
        progress_bar.set_length(total);
        progress_bar.set_position(done);
        progress_bar.set_message(name.to_string());
    });

    let unpacker = Unpacker::new(options);
    let results = unpacker.process_all(&archives, Some(progress_cb)).await;
    bar.finish_and_clear();

    let mut failed = 0;
    for (archive, result) in results {
        match result {
            Ok(report) => print_report(&archive, &report),
            Err(e) => {
                failed += 1;
                error!(archive = %archive.display(), "unpack failed");
                eprintln!("Error: {}: {}", archive.display(), e);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} packages failed", failed, archives.len()).into());
    }
    Ok(())
}

fn print_report(archive: &std::path::Path, report: &UnpackReport) {
    println!(
        "{} -> {} ({} files, {} bytes, {:.2}s)",
        archive.display(),
        report.output_dir.display(),
        report.stats.files_extracted,
        report.stats.bytes_written,
        report.stats.duration.as_secs_f64()
    );
    for (name, reason) in &report.stats.failed {
        println!("  failed: {} ({})", name, reason);
    }
    for path in &report.deleted {
        println!("  removed: {}", path.display());
    }
}

async fn handle_probe(archive: PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let info = wxapkg::probe(&archive).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Package: {}", archive.display());
    println!("Size: {} bytes", info.container_len);
    println!(
        "Table: {} bytes, data: {} bytes",
        info.header.table_length, info.header.data_length
    );
    println!("Entries: {}", info.entries.len());
    for entry in &info.entries {
        println!("  {:>10} {:>10}  {}", entry.offset, entry.size, entry.name);
    }
    Ok(())
}

async fn handle_config(files: Vec<PathBuf>, keep: bool) -> Result<(), Box<dyn std::error::Error>> {
    let unpacker = Unpacker::new(UnpackOptions {
        keep_intermediate: keep,
        ..Default::default()
    });

    let mut failed = 0;
    for file in &files {
        match unpacker.process_config(file).await {
            Ok(report) => {
                let weight = report.weights.get(file).unwrap_or(0);
                println!(
                    "{} -> {} (weight {}/{})",
                    file.display(),
                    report.output_dir.join(wxapkg::config::APP_MANIFEST).display(),
                    weight,
                    DELETE_THRESHOLD
                );
            }
            Err(e) => {
                failed += 1;
                eprintln!("Error: {}: {}", file.display(), e);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} manifests failed", failed, files.len()).into());
    }
    Ok(())
}
