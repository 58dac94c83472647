//! Magkal CLI - Command line interface for magnetometer calibration.

mod console;
mod output;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use magkal_core::{CalibrationConfig, FilterHandle};
use magkal_sim::params::{calibration, sensor, session};
use magkal_sim::{
    run_session, ManualMeasurer, Measurer, RandomMeasurer, ReplayMeasurer, SensorModel,
    SessionConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

pub use console::run_console;
pub use output::write_session;

/// Public function that can be called from the main binary
pub fn run_cli_main(args: &[&str]) -> Result<()> {
    let args = Args::parse_from(args);
    main_inner(args)
}

#[derive(Parser, Debug)]
#[command(name = "magkal")]
#[command(about = "Online magnetometer scale and bias calibration")]
#[command(version)]
pub struct Args {
    /// Output directory
    #[arg(short, long, default_value = "output", global = true)]
    output_dir: PathBuf,

    /// Output file format
    #[arg(short, long, value_enum, default_value = "csv", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Calibrate a simulated sensor turned through random orientations
    Run {
        #[command(flatten)]
        filter: FilterArgs,

        /// True scale factors, one per axis (random near 1 if omitted)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        k: Vec<f64>,

        /// True biases, one per axis (random near 0 if omitted)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        l: Vec<f64>,

        /// Reading noise as a fraction of n0
        #[arg(long, default_value_t = 0.005)]
        noise: f64,

        #[arg(long, default_value_t = 2000)]
        steps: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Calibrate from recorded readings (CSV, header row, one column per axis)
    Replay {
        file: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Stop after this many readings
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Aim a simulated sensor by hand: type `theta[,phi]` in degrees,
    /// `a` for a full sweep, `q` to quit
    Console {
        #[command(flatten)]
        filter: FilterArgs,

        /// Reading noise as a fraction of n0
        #[arg(long, default_value_t = 0.01)]
        noise: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

/// Filter settings shared by every subcommand. Flags override `--config`.
#[derive(clap::Args, Debug, Clone, Default)]
struct FilterArgs {
    /// JSON file with filter settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sensor axes (1, 2 or 3)
    #[arg(short = 'n', long)]
    dimension: Option<usize>,

    /// Nominal field strength
    #[arg(long)]
    n0: Option<f64>,

    /// Initial uncertainty of k (of l, times n0)
    #[arg(long)]
    sigma_k0: Option<f64>,

    /// Process noise per step
    #[arg(long)]
    sigma_k: Option<f64>,

    /// Measurement noise as a fraction of n0
    #[arg(long)]
    sigma_m: Option<f64>,

    /// Kalman gain damping in (0, 1]
    #[arg(long)]
    damping: Option<f64>,

    /// Latitude bands of the coverage grid
    #[arg(long, default_value_t = 6)]
    grid_bands: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

fn main_inner(args: Args) -> Result<()> {
    match &args.command {
        Commands::Run {
            filter,
            k,
            l,
            noise,
            steps,
            seed,
        } => run_random(&args, filter, k, l, *noise, *steps, *seed),
        Commands::Replay {
            file,
            filter,
            steps,
        } => run_replay(&args, file, filter, *steps),
        Commands::Console {
            filter,
            noise,
            seed,
        } => {
            let stdin = io::stdin();
            run_interactive(filter, *noise, *seed, stdin.lock(), &mut io::stdout())
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn run_random(
    args: &Args,
    filter: &FilterArgs,
    k: &[f64],
    l: &[f64],
    noise: f64,
    steps: usize,
    seed: u64,
) -> Result<()> {
    let config = build_calibration_config(filter, None)?;
    let model = build_sensor_model(&config, k, l, noise, seed)?;
    println!("Simulated sensor: k = {:?}, l = {:?}", model.k, model.l);

    let mut source = RandomMeasurer::new(model.clone(), seed)?;
    let session = SessionConfig {
        calibration: config,
        steps,
        grid_bands: check_grid_bands(filter.grid_bands)?,
    };
    let result = run_session(&session, &mut source)?;

    output::print_summary(&result, Some(&model));
    write_session(&args.output_dir, args.format, &session, &result, Some(&model))?;
    Ok(())
}

fn run_replay(
    args: &Args,
    file: &Path,
    filter: &FilterArgs,
    steps: Option<usize>,
) -> Result<()> {
    let mut source = ReplayMeasurer::from_path(file)
        .with_context(|| format!("failed to load readings from {}", file.display()))?;
    let config = build_calibration_config(filter, Some(source.dimension()))?;
    let session = SessionConfig {
        calibration: config,
        steps: steps.unwrap_or(source.len()),
        grid_bands: check_grid_bands(filter.grid_bands)?,
    };
    let result = run_session(&session, &mut source)?;

    output::print_summary(&result, None);
    write_session(&args.output_dir, args.format, &session, &result, None)?;
    Ok(())
}

fn run_interactive<R: io::BufRead, W: io::Write>(
    filter: &FilterArgs,
    noise: f64,
    seed: u64,
    input: R,
    out: &mut W,
) -> Result<()> {
    let config = build_calibration_config(filter, None)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let model = SensorModel::perturbed(
        config.dimension,
        config.nominal_field_strength,
        sensor::NOISE.check(noise)? * config.nominal_field_strength,
        &mut rng,
    )?;
    let mut measurer = ManualMeasurer::new(model, seed)?;
    let handle = FilterHandle::spawn(config)?;

    let applied = run_console(input, out, &handle, &mut measurer)?;
    info!(applied, "console session ended");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve filter settings: defaults, then `--config`, then flags.
/// `source_dimension` wins over the file when no `--dimension` flag is given.
fn build_calibration_config(
    args: &FilterArgs,
    source_dimension: Option<usize>,
) -> Result<CalibrationConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => CalibrationConfig::default(),
    };

    if let Some(dimension) = args.dimension.or(source_dimension) {
        config.dimension = dimension;
    }
    if let Some(n0) = args.n0 {
        config.nominal_field_strength = calibration::NOMINAL_FIELD.check(n0)?;
    }
    if let Some(v) = args.sigma_k0 {
        config.init_uncertainty_scale = calibration::INIT_UNCERTAINTY.check(v)?;
    }
    if let Some(v) = args.sigma_k {
        config.process_noise_scale = calibration::PROCESS_NOISE.check(v)?;
    }
    if let Some(v) = args.sigma_m {
        config.measurement_noise_fraction = calibration::MEASUREMENT_NOISE.check(v)?;
    }
    if let Some(v) = args.damping {
        config.gain_damping = calibration::GAIN_DAMPING.check(v)?;
    }

    config.validate().context("invalid filter settings")?;
    Ok(config)
}

fn load_config(path: &Path) -> Result<CalibrationConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn check_grid_bands(bands: usize) -> Result<usize> {
    session::GRID_BANDS.check(bands as f64)?;
    Ok(bands)
}

/// True sensor for `run`: explicit `k`/`l` when given, else perturbed around
/// the ideal. Biases and noise are given in units of n0.
fn build_sensor_model(
    config: &CalibrationConfig,
    k: &[f64],
    l: &[f64],
    noise: f64,
    seed: u64,
) -> Result<SensorModel> {
    let n = config.dimension;
    let n0 = config.nominal_field_strength;
    let noise = sensor::NOISE.check(noise)? * n0;

    // Offset the seed so the sensor draw is independent of the orientations
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut model = SensorModel::perturbed(n, n0, noise, &mut rng)?;

    if !k.is_empty() {
        if k.len() != n {
            bail!("--k has {} values, expected {}", k.len(), n);
        }
        for v in k {
            sensor::SCALE.check(*v)?;
        }
        model.k = k.to_vec();
    }
    if !l.is_empty() {
        if l.len() != n {
            bail!("--l has {} values, expected {}", l.len(), n);
        }
        for v in l {
            sensor::BIAS.check(*v)?;
        }
        model.l = l.iter().map(|v| v * n0).collect();
    }
    model.validate()?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out_dir_args(dir: &Path) -> Vec<String> {
        vec![
            "magkal".to_string(),
            "--output-dir".to_string(),
            dir.display().to_string(),
        ]
    }

    fn run(args: &[String]) -> Result<()> {
        let args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        run_cli_main(&args)
    }

    #[test]
    fn test_run_writes_csv_trace() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = out_dir_args(dir.path());
        args.extend(["run", "--steps", "300", "-n", "2"].map(String::from));
        run(&args).unwrap();

        let text = std::fs::read_to_string(dir.path().join("session.csv")).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("step,accepted,k0,k1,l0,l1,p_k0,p_l0,p_k1,p_l1")
        );
        assert_eq!(lines.count(), 300);
    }

    #[test]
    fn test_run_json_with_explicit_sensor() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = out_dir_args(dir.path());
        args.extend(
            [
                "--format", "json", "run", "--steps", "1500", "--k", "1.2,0.9,1.1", "--l",
                "0.1,-0.2,0.05", "--noise", "0",
            ]
            .map(String::from),
        );
        run(&args).unwrap();

        let text = std::fs::read_to_string(dir.path().join("session.json")).unwrap();
        let report: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(report["sensor"]["k"][0], 1.2);
        assert_eq!(report["session"]["calibration"]["dimension"], 3);
        let k = report["result"]["k"].as_array().unwrap();
        assert!((k[1].as_f64().unwrap() - 0.9).abs() < 1e-3);
        assert_eq!(report["result"]["steps"], 1500);
    }

    #[test]
    fn test_config_file_then_flag_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.json");
        std::fs::write(&path, r#"{ "dimension": 1, "gain_damping": 0.5 }"#).unwrap();

        let args = FilterArgs {
            config: Some(path),
            n0: Some(2.0),
            ..FilterArgs::default()
        };
        let config = build_calibration_config(&args, None).unwrap();
        assert_eq!(config.dimension, 1);
        assert_eq!(config.gain_damping, 0.5);
        assert_eq!(config.nominal_field_strength, 2.0);
        assert_eq!(config.init_uncertainty_scale, 0.1);

        let config = build_calibration_config(&args, Some(3)).unwrap();
        assert_eq!(config.dimension, 3);
    }

    #[test]
    fn test_out_of_range_flags_rejected() {
        let args = FilterArgs {
            damping: Some(1.5),
            ..FilterArgs::default()
        };
        assert!(build_calibration_config(&args, None).is_err());

        let args = FilterArgs {
            dimension: Some(4),
            ..FilterArgs::default()
        };
        assert!(build_calibration_config(&args, None).is_err());

        let config = CalibrationConfig::default();
        assert!(build_sensor_model(&config, &[1.0, 1.0], &[], 0.0, 1).is_err());
        assert!(build_sensor_model(&config, &[], &[], 0.9, 1).is_err());
    }

    #[test]
    fn test_sensor_model_bias_in_units_of_n0() {
        let config = CalibrationConfig {
            dimension: 2,
            nominal_field_strength: 10.0,
            ..CalibrationConfig::default()
        };
        let model = build_sensor_model(&config, &[1.0, 2.0], &[0.1, -0.2], 0.01, 1).unwrap();
        assert_eq!(model.k, vec![1.0, 2.0]);
        assert_eq!(model.l, vec![1.0, -2.0]);
        assert!((model.noise - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_replay_subcommand() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("readings.csv");
        std::fs::write(&file, "m0\n1.5\n-0.5\n1.5\n-0.5\n").unwrap();

        let mut args = out_dir_args(dir.path());
        args.extend(["replay".to_string(), file.display().to_string()]);
        run(&args).unwrap();

        let text = std::fs::read_to_string(dir.path().join("session.csv")).unwrap();
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_console_subcommand_reads_input() {
        let args = FilterArgs {
            dimension: Some(2),
            ..FilterArgs::default()
        };
        let mut out = Vec::new();
        run_interactive(&args, 0.0, 3, "a\nq\n".as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Exiting"));
    }
}
