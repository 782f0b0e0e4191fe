//! segfuse CLI - label fusion for segmentation volumes

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use segfuse_algorithms::fusion::{
    majority_vote, staple_with_progress, MajorityVoteParams, ObserverSet, OutputKind, PriorSource,
    StapleParams, StapleReport,
};
use segfuse_core::io::{read_volume, write_volume, SampleFormat, VolumeWriteOptions};
use segfuse_core::{Volume, VoxelElement};
use segfuse_parallel::ProcessingMode;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "segfuse")]
#[command(author, version, about = "Label fusion for segmentation volumes", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a volume file
    Info {
        /// Input volume file
        input: PathBuf,
    },
    /// Combine segmentations with multi-label STAPLE
    Combine {
        #[command(flatten)]
        inputs: InputArgs,
        /// Output label volume
        #[arg(short, long)]
        output: PathBuf,
        /// Global class priors, comma separated (default: label frequencies)
        #[arg(long, value_delimiter = ',')]
        priors: Option<Vec<f64>>,
        /// Per-observer diagonal trust for initialization, comma separated
        #[arg(long, value_delimiter = ',')]
        trust: Option<Vec<f64>>,
        /// Stop when no confusion entry changes by this much (default: 1e-5;
        /// 0 disables it and requires --max-iterations)
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Maximum number of EM iterations
        #[arg(short = 'n', long)]
        max_iterations: Option<usize>,
        /// Initialize confusion matrices from a majority vote
        #[arg(long)]
        majority_init: bool,
        /// Write per-class probability volumes as <PREFIX><class>.tif
        #[arg(long)]
        probabilities_prefix: Option<String>,
        /// Write the run report (confusion matrices, iterations) as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Worker threads (default: all cores, 1 = sequential)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Combine segmentations with a plain majority vote
    Vote {
        #[command(flatten)]
        inputs: InputArgs,
        /// Output label volume
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Observer segmentation (repeat for each observer)
    #[arg(short, long = "input", required = true)]
    input: Vec<PathBuf>,
    /// Restrict estimation to nonzero pixels of this volume
    #[arg(short, long)]
    mask: Option<PathBuf>,
    /// Number of classes (default: max label + 1)
    #[arg(short = 'k', long)]
    classes: Option<usize>,
    /// Tie-break rank per class, comma separated; lower wins
    #[arg(long, value_delimiter = ',')]
    preference: Option<Vec<usize>>,
    /// Label for pixels without a unique winner (default: max label + 1)
    #[arg(short, long)]
    undecided: Option<u64>,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_labels(path: &Path) -> Result<Volume<f64>> {
    let pb = spinner("Reading volume...");
    let volume: Volume<f64> = read_volume(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} {:?}", path.display(), volume.shape());
    Ok(volume)
}

fn load_observers(args: &InputArgs) -> Result<ObserverSet<f64>> {
    if args.input.len() < 2 {
        bail!("At least two --input volumes are required");
    }
    let observers = args
        .input
        .iter()
        .map(|path| Ok((path.display().to_string(), read_labels(path)?)))
        .collect::<Result<Vec<_>>>()?;
    let mut set = ObserverSet::from_named(observers).context("Inputs do not share one grid")?;
    if let Some(mask) = &args.mask {
        let mask = read_labels(mask)?;
        set = set.with_mask(&mask).context("Mask does not match the inputs")?;
    }
    Ok(set)
}

fn write_result<T: VoxelElement>(volume: &Volume<T>, path: &Path, format: SampleFormat) -> Result<()> {
    let pb = spinner("Writing output...");
    write_volume(volume, path, Some(VolumeWriteOptions { sample_format: format }))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    pb.finish_and_clear();
    Ok(())
}

fn write_report(report: &StapleReport, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report).context("Failed to write report")?;
    Ok(())
}

fn print_report(report: &StapleReport) {
    println!(
        "STAPLE: {} iterations, stop reason {:?}, last update {}",
        report.elapsed_iterations,
        report.stop_reason,
        report
            .max_update
            .map_or_else(|| "-".to_string(), |u| format!("{:.3e}", u))
    );
    println!(
        "  Classes: {}, masked pixels: {}, undecided: {}",
        report.number_of_classes, report.masked_pixels, report.undecided_pixels
    );
    for (name, matrix) in report.observers.iter().zip(&report.confusion_matrices) {
        let diagonal: Vec<String> = matrix.diag().iter().map(|v| format!("{:.4}", v)).collect();
        println!("  {}: diagonal [{}]", name, diagonal.join(", "));
    }
}

fn processing_mode(threads: Option<usize>) -> ProcessingMode {
    match threads {
        None | Some(0) => ProcessingMode::Parallel,
        Some(1) => ProcessingMode::Sequential,
        Some(n) => ProcessingMode::ParallelWith(n),
    }
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let volume = read_labels(&input)?;
            let stats = volume.statistics();
            let geometry = volume.geometry();

            println!("File: {}", input.display());
            println!("Shape: {:?} ({} voxels)", volume.shape(), volume.len());
            println!("Spacing: {:?}", geometry.spacing);
            println!("Origin: {:?}", geometry.origin);
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            let labels: Option<BTreeSet<usize>> = volume.values().iter().map(|v| v.to_label()).collect();
            match labels {
                Some(labels) if labels.len() <= 32 => println!("  Labels: {:?}", labels),
                Some(labels) => println!("  Labels: {} distinct", labels.len()),
                None => println!("  Labels: not a label volume"),
            }
        }

        // ── Combine ──────────────────────────────────────────────────
        Commands::Combine {
            inputs,
            output,
            priors,
            trust,
            threshold,
            max_iterations,
            majority_init,
            probabilities_prefix,
            report,
            threads,
        } => {
            let set = load_observers(&inputs)?;
            let defaults = StapleParams::default();
            let params = StapleParams {
                number_of_classes: inputs.classes,
                priors: priors.map_or(PriorSource::Frequency, PriorSource::Global),
                prior_preference: inputs.preference,
                observer_trust: trust,
                termination_threshold: threshold.or(defaults.termination_threshold),
                max_iterations,
                majority_vote_init: majority_init,
                output: if probabilities_prefix.is_some() {
                    OutputKind::Both
                } else {
                    OutputKind::Labels
                },
                undecided_label: inputs.undecided,
                processing: processing_mode(threads),
                ..defaults
            };

            let pb = spinner("Running STAPLE...");
            let start = Instant::now();
            let result = staple_with_progress::<f64, u32, _>(&set, &params, |p| {
                pb.set_message(format!(
                    "Running STAPLE... iteration {} (max update {:.3e})",
                    p.iteration, p.max_update
                ));
            })
            .context("Failed to combine segmentations")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();

            print_report(&result.report);
            if let Some(labels) = &result.labels {
                write_result(labels, &output, SampleFormat::Auto)?;
            }
            if let (Some(prefix), Some(probabilities)) = (&probabilities_prefix, &result.probabilities) {
                for (class, volume) in probabilities.iter().enumerate() {
                    let path = PathBuf::from(format!("{}{}.tif", prefix, class));
                    write_result(volume, &path, SampleFormat::Float32)?;
                }
                println!("Probabilities saved to: {}<class>.tif", prefix);
            }
            if let Some(path) = &report {
                write_report(&result.report, path)?;
                println!("Report saved to: {}", path.display());
            }
            done("STAPLE", &output, elapsed);
        }

        // ── Vote ─────────────────────────────────────────────────────
        Commands::Vote { inputs, output } => {
            let set = load_observers(&inputs)?;
            let params = MajorityVoteParams {
                number_of_classes: inputs.classes,
                prior_preference: inputs.preference,
                undecided_label: inputs.undecided,
            };
            let start = Instant::now();
            let result: Volume<u32> =
                majority_vote(&set, &params).context("Failed to compute majority vote")?;
            let elapsed = start.elapsed();
            write_result(&result, &output, SampleFormat::Auto)?;
            done("Majority vote", &output, elapsed);
        }
    }

    Ok(())
}
