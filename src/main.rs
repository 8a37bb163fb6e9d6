use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use naps_pmf_prep::clean::{ImputationOptions, MdlRule, StdDevConvention};
use naps_pmf_prep::config::{Config, SheetKey};
use naps_pmf_prep::importers::{DataUrlEntry, DataUrlManifest, NapsDownloader};
use naps_pmf_prep::persist::write_table_csv;
use naps_pmf_prep::pipeline::{
    clean_sheet, export_sheet, load_station_data, prepare_sheet, PipelineOptions,
};

#[derive(Parser)]
#[command(name = "naps-pmf-prep")]
#[command(about = "Prepare NAPS integrated PM2.5 speciation data as PMF input files", long_about = None)]
struct Cli {
    /// Print reports as JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download files listed in the data URL manifest
    Download {
        #[arg(long, value_enum, default_value = "all")]
        target: DownloadTarget,

        /// Number of parallel downloads (defaults to DOWNLOAD_CONCURRENCY)
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// Load the downloaded stations workbook
    Stations {
        /// Write the stations table as CSV to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Clean one sheet and save the wide table
    Clean(SheetArgs),
    /// Split a cleaned table into per-analyte PMF input files
    Split {
        #[command(flatten)]
        site: SiteArgs,

        /// Sheet key: nt, ws, ion, bbm or pm25
        #[arg(long)]
        key: SheetKey,
    },
    /// Clean and split every requested sheet
    Run {
        #[command(flatten)]
        site: SiteArgs,

        /// Sheet keys; defaults to every sheet the catalog lists for the year
        #[arg(long, value_delimiter = ',')]
        keys: Vec<SheetKey>,

        #[command(flatten)]
        imputation: ImputationArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DownloadTarget {
    Integrated,
    Meta,
    Continuous,
    All,
}

#[derive(Args, Clone, Copy)]
struct SiteArgs {
    /// Sampling year, e.g. 2023
    #[arg(long)]
    year: i32,

    /// NAPS site ID (100119 is Burnaby South)
    #[arg(long, default_value = "100119")]
    site_id: u32,
}

#[derive(Args)]
struct SheetArgs {
    #[command(flatten)]
    site: SiteArgs,

    /// Sheet key: nt, ws, ion, bbm or pm25
    #[arg(long)]
    key: SheetKey,

    #[command(flatten)]
    imputation: ImputationArgs,
}

#[derive(Args)]
struct ImputationArgs {
    /// Only impute MDLs for these analyte codes
    #[arg(long, value_delimiter = ',')]
    analytes: Vec<String>,

    /// Use the sample (n - 1) standard deviation for blank-based MDLs
    #[arg(long)]
    sample_std: bool,
}

impl ImputationArgs {
    fn options(&self) -> PipelineOptions {
        let rule = MdlRule {
            std_dev: if self.sample_std {
                StdDevConvention::Sample
            } else {
                StdDevConvention::Population
            },
            ..MdlRule::default()
        };
        PipelineOptions {
            imputation: ImputationOptions {
                analytes: (!self.analytes.is_empty()).then(|| self.analytes.clone()),
                rule,
            },
            ..PipelineOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (ignore errors if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,naps_pmf_prep=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Download { target, parallel } => {
            download(&config, target, parallel.unwrap_or(config.download_concurrency)).await?;
        }
        Command::Stations { output } => {
            stations(config, output).await?;
        }
        Command::Clean(args) => {
            clean(config, args, cli.json).await?;
        }
        Command::Split { site, key } => {
            split(config, site, key, cli.json).await?;
        }
        Command::Run {
            site,
            keys,
            imputation,
        } => {
            run(config, site, keys, imputation.options(), cli.json).await?;
        }
    }

    Ok(())
}

async fn download(
    config: &Config,
    target: DownloadTarget,
    parallel: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = DataUrlManifest::from_path(&config.data_urls_file)?;
    let downloader = NapsDownloader::new(Duration::from_secs(config.download_timeout_secs))?;

    let batches: Vec<(&str, Vec<&DataUrlEntry>, PathBuf)> = match target {
        DownloadTarget::Integrated => vec![integrated_batch(config, &manifest)],
        DownloadTarget::Meta => vec![meta_batch(config, &manifest)],
        DownloadTarget::Continuous => vec![continuous_batch(config, &manifest)],
        DownloadTarget::All => vec![
            meta_batch(config, &manifest),
            integrated_batch(config, &manifest),
            continuous_batch(config, &manifest),
        ],
    };

    let start_time = Instant::now();
    let mut failed = 0usize;
    for (label, entries, dir) in batches {
        if entries.is_empty() {
            warn!("No {label} entries in {}", config.data_urls_file.display());
            continue;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("Downloading {} {label} files...", entries.len()));

        let summary = downloader.download_all(&entries, &dir, parallel).await;
        failed += summary.failed.len();
        pb.finish_with_message(format!(
            "✓ {label}: {} downloaded, {} failed",
            summary.downloaded.len(),
            summary.failed.len()
        ));
    }

    info!("Downloads finished in {:.2?}", start_time.elapsed());
    if failed > 0 {
        return Err(format!("{failed} downloads failed").into());
    }
    Ok(())
}

fn integrated_batch<'a>(
    config: &Config,
    manifest: &'a DataUrlManifest,
) -> (&'static str, Vec<&'a DataUrlEntry>, PathBuf) {
    (
        "integrated PM2.5",
        manifest.integrated_pm25(),
        config.raw_integrated_data_dir.clone(),
    )
}

fn meta_batch<'a>(
    config: &Config,
    manifest: &'a DataUrlManifest,
) -> (&'static str, Vec<&'a DataUrlEntry>, PathBuf) {
    ("metadata", manifest.metadata(), config.raw_meta_dir.clone())
}

fn continuous_batch<'a>(
    config: &Config,
    manifest: &'a DataUrlManifest,
) -> (&'static str, Vec<&'a DataUrlEntry>, PathBuf) {
    (
        "continuous",
        manifest.continuous(),
        config.raw_data_dir.join("continuous_pm25"),
    )
}

async fn stations(config: Config, output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let table = tokio::task::spawn_blocking(move || load_station_data(&config)).await??;

    println!(
        "✓ Loaded {} stations with {} columns",
        table.row_count(),
        table.columns().len()
    );
    if let Some(path) = output {
        write_table_csv(&table, &path)?;
        println!("  Saved to {}", path.display());
    }
    Ok(())
}

async fn clean(config: Config, args: SheetArgs, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let SiteArgs { year, site_id } = args.site;
    let key = args.key;
    let options = args.imputation.options();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("Cleaning {key} sheet for S{site_id} {year}..."));

    let (cleaned, path) = tokio::task::spawn_blocking(move || {
        clean_sheet(&config, year, site_id, key, &options)
    })
    .await??;

    pb.finish_with_message(format!(
        "✓ Cleaned {} rows into {}",
        cleaned.table.row_count(),
        path.display()
    ));

    if json {
        println!("{}", serde_json::to_string_pretty(&cleaned.imputation)?);
    } else {
        for analyte in &cleaned.imputation.analytes {
            println!(
                "  {:<16} {:>4} cells  {:?}",
                analyte.analyte, analyte.missing_cells, analyte.source
            );
        }
    }
    Ok(())
}

async fn split(
    config: Config,
    site: SiteArgs,
    key: SheetKey,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let SiteArgs { year, site_id } = site;
    let output_dir = config.pmf_output_dir(year, site_id);

    let report =
        tokio::task::spawn_blocking(move || export_sheet(&config, year, site_id, key, None))
            .await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "✓ Exported {} analytes to {}",
            report.exported_count(),
            output_dir.display()
        );
        if !report.skipped_empty.is_empty() {
            println!("  Skipped (no data): {}", report.skipped_empty.join(", "));
        }
        if !report.skipped_without_mdl.is_empty() {
            println!("  Skipped (no MDL column): {}", report.skipped_without_mdl.join(", "));
        }
    }
    Ok(())
}

async fn run(
    config: Config,
    site: SiteArgs,
    keys: Vec<SheetKey>,
    options: PipelineOptions,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let SiteArgs { year, site_id } = site;
    let keys = if keys.is_empty() {
        let mut keys = config.catalog.sheets_for_year(year).to_vec();
        keys.push(SheetKey::Pm25);
        keys
    } else {
        keys
    };

    let start_time = Instant::now();
    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    let mut reports = Vec::with_capacity(keys.len());
    for key in keys {
        pb.set_message(format!("{key}"));
        let config = config.clone();
        let options = options.clone();
        let report = tokio::task::spawn_blocking(move || {
            prepare_sheet(&config, year, site_id, key, &options)
        })
        .await??;
        pb.inc(1);
        reports.push(report);
    }
    pb.finish_with_message("done");

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "✓ {:<5} {:>4} rows, {} analytes exported, {} MDLs unresolved",
                report.sheet,
                report.rows,
                report.export.exported_count(),
                report.imputation.unresolved().count()
            );
        }
    }
    info!(
        "Processed {} sheets for S{site_id} {year} in {:.2?}",
        reports.len(),
        start_time.elapsed()
    );
    Ok(())
}
