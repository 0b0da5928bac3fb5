use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use nmlz::engine::{CancelToken, Engine};
use nmlz::format;
use nmlz::job::JobOptions;
use nmlz::models::BatchResult;
use nmlz::presets;
use nmlz::scheduler::{self, JobSpec};

#[derive(Parser)]
#[command(
    name = "nmlz",
    about = "Batch loudness normalizer for audio and video files"
)]
struct Cli {
    /// Input media files, processed in the order given
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Target integrated loudness in dB
    #[arg(short = 't', long, default_value_t = -16.0, allow_negative_numbers = true)]
    target: f64,

    /// Peak ceiling in dBFS; gain is capped so no peak projects above it
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    ceiling: f64,

    /// Directory for normalized output files
    #[arg(short = 'd', long, default_value = ".")]
    output_dir: PathBuf,

    /// Output format preset (m4a, aac, mp3, opus, ogg, wav, flac); a
    /// trailing number selects the bitrate, e.g. mp3256
    #[arg(short = 'f', long, default_value = "wav")]
    format: String,

    /// Override the output file extension
    #[arg(short = 'e', long)]
    extension: Option<String>,

    /// Number of parallel jobs (default: number of CPU cores)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Media engine binary to drive
    #[arg(long, default_value = "ffmpeg")]
    engine: PathBuf,

    /// Per-invocation engine timeout in seconds
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Output the batch report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

/// Canonicalize every input up front and drop duplicates while keeping
/// first-occurrence order. An unreadable input is a configuration error;
/// nothing runs until the whole list checks out.
fn prepare_inputs(raw: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut inputs: Vec<PathBuf> = Vec::with_capacity(raw.len());
    for path in raw {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("failed to open input file: {}", path.display()))?;
        if !canonical.is_file() {
            anyhow::bail!("input is not a regular file: {}", path.display());
        }
        if !inputs.contains(&canonical) {
            inputs.push(canonical);
        }
    }
    Ok(inputs)
}

fn run(cli: Cli) -> Result<BatchResult> {
    if cli.timeout == 0 {
        anyhow::bail!("--timeout must be at least 1 second");
    }

    let mut format_config = presets::lookup(&cli.format)?;
    if let Some(extension) = cli.extension {
        format_config.extension = extension;
    }

    std::fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "unable to create output directory: {}",
            cli.output_dir.display()
        )
    })?;
    let output_dir = cli.output_dir.canonicalize().with_context(|| {
        format!(
            "unable to resolve output directory: {}",
            cli.output_dir.display()
        )
    })?;

    let inputs = prepare_inputs(&cli.inputs)?;

    let engine = Engine::new(cli.engine, Duration::from_secs(cli.timeout));
    engine
        .preflight()
        .context("media engine is not usable (is it installed and on the search path?)")?;

    let specs: Vec<JobSpec> = inputs
        .iter()
        .map(|input| JobSpec {
            input: input.clone(),
            output: presets::derive_output_path(input, &output_dir, &format_config.extension),
        })
        .collect();

    // Two inputs with the same stem would race on one output file.
    let mut seen = HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.output.clone()) {
            anyhow::bail!(
                "output collision: more than one input would write {}",
                spec.output.display()
            );
        }
    }

    let opts = JobOptions {
        target_db: cli.target,
        ceiling_db: cli.ceiling,
        format: format_config,
    };
    let workers = cli.jobs.unwrap_or_else(scheduler::default_jobs);
    let result = scheduler::run_batch(&engine, specs, &opts, workers, &CancelToken::new());

    if cli.json {
        println!("{}", format::format_json(&result));
    } else {
        println!("{}", format::format_table(&result));
    }
    eprintln!("{}", format::format_summary(&result));

    Ok(result)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(result) if result.all_succeeded() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::from(2)
        }
    }
}
