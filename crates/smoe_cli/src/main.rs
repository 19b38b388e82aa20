//! smoe CLI: run noise-averaged SMOE saliency maps on a built-in probe network.

mod probe;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::prelude::*;
use burn_ndarray::NdArray;
use smoe_core::{to_host_vec, Seed};
use smoe_maps::{
    ActivationCapture, LayerWeights, ResizeMode, ScaleMethod, SmoeScale, SmoothGradConfig,
};

use crate::probe::{blob_image, ProbeNet, STAGES};

/// Backend used by the probe.
type CliBackend = NdArray;

#[derive(Parser)]
#[command(name = "smoe")]
#[command(author, version)]
#[command(about = "Gradient-free saliency maps with SMOE scale and SmoothGrad averaging")]
#[command(long_about = "smoe: saliency maps from layer activations, averaged over noisy inputs.

EXAMPLES:
  # Run the probe network on a synthetic image
  smoe explain

  # Linear averaging over 30 passes with a fixed seed
  smoe explain --iters 30 --linear --seed 7

  # Weight deeper layers more and save the combined map
  smoe explain --weights 1,2,4 --output map.json

  # Write the default configuration to a file
  smoe config --output smoothgrad.json

SCALE METHODS:
  smoe      - SMOE scale over post-ReLU activations [default]
  std       - Per-pixel channel standard deviation
  trunc     - Truncated normal entropy over pre-activations")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a saliency map for a synthetic image
    Explain(ExplainArgs),
    /// Print or write the default SmoothGrad configuration
    Config {
        /// Write the configuration to this JSON file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScaleArg {
    Smoe,
    Std,
    Trunc,
}

#[derive(clap::Args)]
struct ExplainArgs {
    /// JSON configuration file; flags below override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of noisy passes
    #[arg(long, value_name = "N")]
    iters: Option<usize>,

    /// Noise standard deviation as a fraction of the input range
    #[arg(long, value_name = "FRACTION")]
    spread: Option<f32>,

    /// Random seed for the noise and the synthetic image
    #[arg(long)]
    seed: Option<u64>,

    /// Channel statistic
    #[arg(long, value_enum)]
    scale: Option<ScaleArg>,

    /// Clamp activations at zero before the SMOE statistic
    #[arg(long)]
    relu: bool,

    /// Average the maps instead of their squares
    #[arg(long)]
    linear: bool,

    /// Square each layer map before weighting
    #[arg(long)]
    maps_magnitude: bool,

    /// Use nearest-neighbour instead of bilinear resizing
    #[arg(long)]
    nearest: bool,

    /// Comma-separated per-layer weights, shallow to deep
    #[arg(long, value_delimiter = ',', value_name = "W")]
    weights: Option<Vec<f32>>,

    /// Image height
    #[arg(long, default_value = "64")]
    height: usize,

    /// Image width
    #[arg(long, default_value = "64")]
    width: usize,

    /// Blob center as fractions of height and width
    #[arg(long, value_delimiter = ',', default_values_t = [0.35, 0.6])]
    center: Vec<f32>,

    /// Print statistics for every noisy pass instead of the average
    #[arg(long)]
    trace: bool,

    /// Write the combined map to this JSON file
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Explain(args) => handle_explain(args),
        Commands::Config { output } => handle_config(output),
    }
}

fn handle_config(output: Option<PathBuf>) -> Result<()> {
    let config = SmoothGradConfig::default();
    match output {
        Some(path) => {
            config
                .save(&path)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

/// Merge the optional config file with command line overrides.
fn resolve_config(args: &ExplainArgs) -> Result<SmoothGradConfig> {
    let mut config = match &args.config {
        Some(path) => SmoothGradConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SmoothGradConfig::default(),
    };

    if let Some(iters) = args.iters {
        config.iters = iters;
    }
    if let Some(spread) = args.spread {
        config.stdev_spread = spread;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    match args.scale {
        Some(ScaleArg::Smoe) => config.scale = ScaleMethod::SmoeScale(SmoeScale::new()),
        Some(ScaleArg::Std) => config.scale = ScaleMethod::Std,
        Some(ScaleArg::Trunc) => config.scale = ScaleMethod::TruncNormalEntropy,
        None => {}
    }
    if args.relu {
        match &mut config.scale {
            ScaleMethod::SmoeScale(scale) => scale.relu = true,
            _ => bail!("--relu only applies to the SMOE scale"),
        }
    }
    if args.linear {
        config.magnitude = false;
    }
    if args.maps_magnitude {
        config.maps_magnitude = true;
    }
    if args.nearest {
        config.resize_mode = ResizeMode::Nearest;
    }

    config.validate()?;
    Ok(config)
}

/// Layers to observe for a statistic.
///
/// Truncated normal entropy needs signed values, so it reads the
/// pre-activations.
fn observed_layers(scale: &ScaleMethod) -> Vec<String> {
    match scale {
        ScaleMethod::TruncNormalEntropy => STAGES.iter().map(|s| format!("{s}.pre")).collect(),
        _ => STAGES.iter().map(|s| s.to_string()).collect(),
    }
}

fn handle_explain(args: ExplainArgs) -> Result<()> {
    if args.center.len() != 2 {
        bail!("--center takes two values, got {}", args.center.len());
    }
    // The deepest stage downsamples by 4 and needs at least two pixels.
    if args.height < 8 || args.width < 8 {
        bail!(
            "Image must be at least 8x8 for the probe network, got {}x{}",
            args.height,
            args.width
        );
    }

    let config = resolve_config(&args)?;
    let seed = Seed::or_entropy(config.seed);
    // Pin the seed so it can be reported.
    let config = SmoothGradConfig {
        seed: Some(seed.value()),
        ..config
    };

    let weights = match &args.weights {
        Some(w) => LayerWeights::PerLayer(w.clone()),
        None => LayerWeights::Uniform,
    };
    let layers = observed_layers(&config.scale);

    let device = Default::default();
    let model = ProbeNet::<CliBackend>::new(&device);
    let image = blob_image::<CliBackend>(
        args.height,
        args.width,
        (args.center[0], args.center[1]),
        seed.derive("image"),
        &device,
    )?;

    let mut capture = layers
        .iter()
        .fold(ActivationCapture::<CliBackend>::new(), |capture, layer| {
            capture.observe_output(layer.clone())
        });

    let smooth = config.init()?;

    println!("Probe network:  {} layers ({})", capture.len(), layers.join(", "));
    println!("Image:          {}x{}", args.height, args.width);
    println!("Iterations:     {}", smooth.config().iters);
    println!("Seed:           {}", seed.value());

    if args.trace {
        let trace = smooth.trace(&image, &model, &mut capture, &weights)?;
        println!("Noise std:      {:.4}", trace.noise_std);
        println!();
        println!("{:<6} {:>10} {:>10} {:>10}", "pass", "min", "mean", "max");
        println!("───────────────────────────────────────");
        for (i, map) in trace.combined.into_iter().enumerate() {
            let stats = MapStats::of(map)?;
            println!(
                "{:<6} {:>10.4} {:>10.4} {:>10.4}",
                i, stats.min, stats.mean, stats.max
            );
        }
        return Ok(());
    }

    let result = smooth.explain(&image, &model, &mut capture, &weights)?;
    println!("Noise std:      {:.4}", result.noise_std);
    println!();

    println!("{:<12} {:>10} {:>10} {:>10}", "layer", "min", "mean", "max");
    println!("───────────────────────────────────────────");
    let [batch, n_layers, height, width] = result.stacked.dims();
    for (i, layer) in layers.iter().enumerate().take(n_layers) {
        let map = result
            .stacked
            .clone()
            .slice([0..batch, i..i + 1, 0..height, 0..width])
            .squeeze::<3>(1);
        let stats = MapStats::of(map)?;
        println!(
            "{:<12} {:>10.4} {:>10.4} {:>10.4}",
            layer, stats.min, stats.mean, stats.max
        );
    }

    let values = to_host_vec(result.combined)?;
    let stats = MapStats::from_values(&values);
    println!(
        "{:<12} {:>10.4} {:>10.4} {:>10.4}",
        "combined", stats.min, stats.mean, stats.max
    );

    let peak = values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        });
    println!();
    println!(
        "Peak saliency at (row {}, col {}); blob centered at (row {:.0}, col {:.0})",
        peak.0 / width,
        peak.0 % width,
        args.center[0] * height as f32,
        args.center[1] * width as f32
    );

    if let Some(path) = &args.output {
        let report = MapReport {
            height,
            width,
            layers: layers.clone(),
            noise_std: result.noise_std,
            seed: seed.value(),
            combined: &values[..height * width],
        };
        write_report(path, &report)?;
        println!("Saved combined map to {}", path.display());
    }

    Ok(())
}

/// Min, mean and max of a map.
struct MapStats {
    min: f32,
    mean: f32,
    max: f32,
}

impl MapStats {
    fn of(map: Tensor<CliBackend, 3>) -> Result<Self> {
        Ok(Self::from_values(&to_host_vec(map)?))
    }

    fn from_values(values: &[f32]) -> Self {
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = values.iter().sum::<f32>() / values.len().max(1) as f32;
        Self { min, mean, max }
    }
}

/// JSON layout of a saved combined map, row-major.
#[derive(Serialize)]
struct MapReport<'a> {
    height: usize,
    width: usize,
    layers: Vec<String>,
    noise_std: f32,
    seed: u64,
    combined: &'a [f32],
}

fn write_report(path: &Path, report: &MapReport<'_>) -> Result<()> {
    let json = serde_json::to_string(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write map to {}", path.display()))?;
    Ok(())
}
