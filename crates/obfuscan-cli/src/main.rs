//! APK obfuscation detector CLI - classifies packages and explains the verdict.
//!
//! Usage:
//!   obfuscan app.apk -m model.json -v vocabulary.json -b background.csv
//!   obfuscan ./apks -m model.onnx -v vocabulary.json -b background.csv --format json
//!   cat app.apk | obfuscan - -m model.json -v vocabulary.json -b background.csv

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use obfuscan_core::pipeline::{analyze_all, analyze_upload, collect_packages, AnalysisProgress};
use obfuscan_core::report::{print_results, OutputFormat, PackageResult, DEFAULT_TOP_FEATURES};
use obfuscan_core::{AnalysisContext, AnalysisOptions, ArtifactPaths, ExplainerSettings};

#[derive(Parser)]
#[command(name = "obfuscan")]
#[command(about = "APK obfuscation detector with SHAP explanations")]
struct Cli {
    /// APK files or directories to analyze; `-` reads one APK from stdin
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Path to the classifier (.json dense network or .onnx)
    #[arg(short, long)]
    model: PathBuf,

    /// Path to the permission vocabulary JSON
    #[arg(short, long)]
    vocabulary: PathBuf,

    /// Path to the background reference CSV
    #[arg(short, long)]
    background: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Number of feature attributions shown in text output
    #[arg(long, default_value_t = DEFAULT_TOP_FEATURES)]
    top: usize,

    /// Skip the SHAP explanation step
    #[arg(long)]
    no_explain: bool,

    /// Coalition samples per explanation (default: 2 * features + 2048)
    #[arg(long)]
    samples: Option<usize>,

    /// Seed for coalition sampling and background subsampling
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Subsample the background table to at most this many rows (default: all rows)
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    max_background: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let paths = ArtifactPaths {
        model: cli.model,
        vocabulary: cli.vocabulary,
        background: cli.background,
    };
    let settings = ExplainerSettings {
        samples: cli.samples,
        seed: cli.seed,
        max_background: cli.max_background,
    };
    let options = AnalysisOptions {
        explain: !cli.no_explain,
        ..AnalysisOptions::default()
    };

    eprintln!("[*] Loading model from {}...", paths.model.display());
    eprintln!("[*] Loading vocabulary from {}...", paths.vocabulary.display());
    eprintln!("[*] Loading background data from {}...", paths.background.display());
    let ctx = AnalysisContext::load(&paths, settings).context("failed to load analysis artifacts")?;

    let from_stdin = cli.paths.iter().any(|p| p.as_os_str() == "-");
    let results = if from_stdin {
        if cli.paths.len() > 1 {
            bail!("`-` cannot be combined with other paths");
        }
        eprintln!("[*] Reading APK from stdin...");
        let progress = AnalysisProgress::new();
        let report = analyze_upload(&ctx, io::stdin().lock(), "<stdin>", &options, &progress);
        vec![match report {
            Ok(report) => PackageResult {
                path: PathBuf::from("-"),
                report: Some(report),
                error: None,
            },
            Err(e) => PackageResult {
                path: PathBuf::from("-"),
                report: None,
                error: Some(e.to_string()),
            },
        }]
    } else {
        let files = collect_packages(&cli.paths);
        if files.is_empty() {
            eprintln!("[*] No APK files to analyze.");
            return Ok(());
        }
        eprintln!("[*] Analyzing {} package(s)...", files.len());
        analyze_all(&ctx, &files, &options)
    };

    let failed = results.iter().filter(|r| r.report.is_none()).count();
    info!(packages = results.len(), failed, "analysis finished");
    print_results(&results, cli.format, cli.top);

    if failed == results.len() {
        bail!("no package could be analyzed");
    }
    Ok(())
}
