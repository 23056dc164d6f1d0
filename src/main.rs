//! CLI Entry Point for photon_daq
//!
//! Provides command-line access to:
//! - Single- and two-qubit polarization tomography
//! - HBT g²(0) measurement
//! - Singles baseline (dark counts) on all detectors
//! - Wiring instructions for the motor ports
//!
//! Every measurement writes a CSV file. `--offline` skips acquisition and
//! re-analyzes an existing file instead.
//!
//! # Usage
//!
//! ```bash
//! photon_daq tomography -q 2 -n 50 -o bell_state
//! photon_daq tomography -q 2 -o bell_state --offline
//! photon_daq hbt -n 200
//! photon_daq explain-setup
//! ```
//!
//! No vendor driver ships with this crate, so online runs drive the mock
//! counting unit and motor driver.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use num_complex::Complex64;
use photon_daq::acquisition::AcquisitionRun;
use photon_daq::analysis::hbt::{g2_from_run, g2_zero, HbtCalibration, HbtResult};
use photon_daq::analysis::tomography::{reconstruct_from_counts, DensityMatrix, ReconstructionReport};
use photon_daq::config::{DaqConfig, DEFAULT_CONFIG_PATH};
use photon_daq::data::{read_run, CsvWriter};
use photon_daq::experiment::{
    explain_setup, Channel, ExperimentSession, ExperimentVariant, Hardware, Projection,
};
use photon_daq::hardware::{
    CountModel, FixedCounts, MockCountSource, MockDeviceLink, MockMotorController, MotorController,
    StateCounts,
};
use photon_daq::logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "photon_daq")]
#[command(about = "Photon-counting acquisition and polarization state tomography", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Samples per setting
    #[arg(short = 'n', long = "n-samples")]
    n_samples: Option<usize>,

    /// Output file name without the .csv extension
    #[arg(short = 'o', long = "out")]
    out: Option<String>,

    /// Width of the error bars in standard errors
    #[arg(long = "n-sigma")]
    n_sigma: Option<f64>,

    /// Analyze an existing output file instead of measuring
    #[arg(long)]
    offline: bool,
}

/// State the mock source emits during online tomography.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum MockState {
    /// Horizontal (qubit 1), |HH⟩ for two qubits
    H,
    /// Diagonal, |PP⟩ for two qubits
    P,
    /// Right circular, |RR⟩ for two qubits
    R,
    /// (|HH⟩ + |VV⟩)/√2, two qubits only
    PhiPlus,
    /// Maximally mixed
    Mixed,
}

#[derive(Subcommand)]
enum Commands {
    /// Polarization state tomography
    Tomography {
        #[command(flatten)]
        run: RunArgs,

        /// Seconds to wait for the motors of each setting
        #[arg(short = 'w', long = "wait-time")]
        wait_time: Option<f64>,

        /// Number of qubits (1 or 2)
        #[arg(short = 'q', long, default_value_t = 2)]
        qubits: u8,

        /// Also write the reconstruction as JSON
        #[arg(long = "report-json")]
        report_json: Option<PathBuf>,

        /// State simulated by the mock source (defaults: H for one qubit, phi-plus for two)
        #[arg(long = "mock-state", value_enum)]
        mock_state: Option<MockState>,
    },

    /// Hanbury Brown–Twiss g²(0)
    Hbt {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Singles baseline on all four detectors
    Base {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print how the optics and detectors must be wired
    ExplainSetup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaqConfig::load_with(&cli.config, |config| {
        if let Some(level) = &cli.log_level {
            config.application.log_level = level.clone();
        }
    })
    .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Tomography {
            run,
            wait_time,
            qubits,
            report_json,
            mock_state,
        } => {
            if let Some(secs) = wait_time {
                config.motion.settle_timeout = Duration::try_from_secs_f64(secs)
                    .map_err(|e| anyhow!("invalid --wait-time {secs}: {e}"))?;
            }
            let variant = ExperimentVariant::tomography(qubits)?;
            let default_state = if qubits == 1 { MockState::H } else { MockState::PhiPlus };
            let model = Arc::new(
                StateCounts::new(mock_density(mock_state.unwrap_or(default_state), qubits)?, 2000.0)
                    .with_background(5.0),
            );
            run_tomography(config, variant, run, model, report_json.as_deref()).await
        }
        Commands::Hbt { run } => run_hbt(config, run).await,
        Commands::Base { run } => run_base(config, run).await,
        Commands::ExplainSetup => {
            print!("{}", explain_setup(&config.motion));
            Ok(())
        }
    }
}

/// Fold the per-run flags into the configuration and return the output file.
fn apply_run_args(config: &mut DaqConfig, args: &RunArgs, default_base: &str) -> Result<PathBuf> {
    if let Some(n) = args.n_samples {
        config.acquisition.samples_per_setting = n;
    }
    if let Some(n_sigma) = args.n_sigma {
        config.output.n_sigma = n_sigma;
    }
    match &args.out {
        Some(out) => config.output.file_base = out.clone(),
        None if config.output.file_base == DaqConfig::default().output.file_base => {
            config.output.file_base = default_base.to_string();
        }
        None => {}
    }
    config.validate()?;

    println!("Experiment variables:");
    println!("\t- n_samples = {}", config.acquisition.samples_per_setting);
    println!("\t- wait_time = {:?}", config.motion.settle_timeout);
    println!("\t- file_name = {}", config.output.file_base);
    println!("\t- n_sigma   = {}", config.output.n_sigma);
    println!("\t- online    = {}", !args.offline);
    Ok(CsvWriter::path_for(&config.output.file_base))
}

fn mock_hardware(config: &DaqConfig, model: Arc<dyn CountModel>) -> Hardware {
    let motors = Arc::new(MockMotorController::new());
    let source = MockCountSource::new(model)
        .with_optics(Arc::clone(&motors), config.motion.clone())
        .with_window(config.hbt.count_window)
        .with_noise(1.0);
    let driver: Arc<dyn MotorController> = motors;
    Hardware {
        link: Arc::new(MockDeviceLink::new()),
        source: Arc::new(source),
        motors: Some(driver),
    }
}

fn mock_density(state: MockState, qubits: u8) -> Result<DensityMatrix> {
    let product = |p: Projection| DensityMatrix::from_projections(&vec![p; usize::from(qubits)]);
    Ok(match state {
        MockState::H => product(Projection::H),
        MockState::P => product(Projection::P),
        MockState::R => product(Projection::R),
        MockState::Mixed => {
            let dim = 1 << qubits;
            let mut rho = DensityMatrix::identity(dim);
            rho.scale(1.0 / dim as f64);
            rho
        }
        MockState::PhiPlus if qubits == 2 => {
            let h = std::f64::consts::FRAC_1_SQRT_2;
            let zero = Complex64::new(0.0, 0.0);
            DensityMatrix::from_pure(&[Complex64::new(h, 0.0), zero, zero, Complex64::new(h, 0.0)])
        }
        MockState::PhiPlus => return Err(anyhow!("phi-plus needs two qubits")),
    })
}

/// Acquire and save a run unless offline.
async fn acquire_and_save(
    config: &DaqConfig,
    variant: &ExperimentVariant,
    model: Arc<dyn CountModel>,
    path: &Path,
    offline: bool,
) -> Result<Option<AcquisitionRun>> {
    if offline {
        info!(path = %path.display(), "Offline mode, skipping acquisition");
        return Ok(None);
    }
    info!("No vendor driver available, using mock hardware");
    let hardware = mock_hardware(config, model);
    let session = ExperimentSession::new(config.clone(), variant.clone(), hardware)?;
    let run = session.acquire(config.acquisition.samples_per_setting).await?;
    CsvWriter::new(path, config.output.n_sigma).write(&run)?;
    if !run.failed_settings().is_empty() {
        warn!(settings = ?run.failed_settings(), "Some settings ended early");
    }
    Ok(Some(run))
}

async fn run_tomography(
    mut config: DaqConfig,
    variant: ExperimentVariant,
    args: RunArgs,
    model: Arc<dyn CountModel>,
    report_json: Option<&Path>,
) -> Result<()> {
    let path = apply_run_args(&mut config, &args, "tomography_counts")?;
    println!("\t- qubits    = {}", variant.qubits());

    let run = acquire_and_save(&config, &variant, model, &path, args.offline).await?;
    let saved = read_run(&path).with_context(|| format!("reading {}", path.display()))?;
    let totals = saved.averages(variant.analysis_channel());
    let reconstruction = reconstruct_from_counts(&variant, &totals)?;

    println!("\nStokes parameters:");
    for (name, value) in reconstruction.stokes.iter() {
        println!("\t{name:<4} = {value:+.4}");
    }
    println!("\nDensity matrix:\n{}", reconstruction.rho);
    let d = reconstruction.diagnostics;
    println!("Hermiticity defect: {:.3e}", d.hermiticity_defect);
    println!("Trace:              {:.4}{:+.4}i", d.trace.re, d.trace.im);
    println!("Purity:             {:.4}", d.purity);
    if d.is_unphysical(1e-9) {
        warn!(purity = d.purity, "Reconstructed state is not physical");
    }

    if let Some(json_path) = report_json {
        let run_id = run.map_or_else(Uuid::new_v4, |r| r.run_id);
        let report = ReconstructionReport::new(run_id, &variant, reconstruction);
        std::fs::write(json_path, report.to_json()?)?;
        info!(path = %json_path.display(), "Report written");
    }
    Ok(())
}

async fn run_hbt(mut config: DaqConfig, args: RunArgs) -> Result<()> {
    let path = apply_run_args(&mut config, &args, "hbt_data")?;
    let variant = ExperimentVariant::hbt();
    // Heralded pairs on APD 1, split light on APD 2 and 3 near the accidental level.
    let model = Arc::new(
        FixedCounts::default()
            .with(Channel::Ch1, 30_000.0)
            .with(Channel::Ch2, 15_000.0)
            .with(Channel::Ch3, 15_000.0)
            .with(Channel::Coinc12, 800.0)
            .with(Channel::Coinc23, 45.0),
    );
    let calibration = HbtCalibration::from(&config.hbt);

    let result: HbtResult = match acquire_and_save(&config, &variant, model, &path, args.offline).await? {
        Some(run) => g2_from_run(&run, &calibration)?,
        None => {
            let saved = read_run(&path).with_context(|| format!("reading {}", path.display()))?;
            let mean = |channel| saved.averages(channel).get("HBT").copied().unwrap_or(0.0);
            g2_zero(mean(Channel::Ch2), mean(Channel::Ch3), mean(Channel::Coinc23), &calibration)?
        }
    };

    println!("\nRate ch2:         {:.1} /s", result.rate_2);
    println!("Rate ch3:         {:.1} /s", result.rate_3);
    println!("Coincidences 2-3: {:.2} /s", result.coincidence_rate);
    println!("Accidentals:      {:.2} /s", result.accidental_rate);
    println!("g2(0):            {:.4}", result.g2);
    Ok(())
}

async fn run_base(mut config: DaqConfig, args: RunArgs) -> Result<()> {
    let path = apply_run_args(&mut config, &args, "base_data")?;
    let variant = ExperimentVariant::base();
    let model = Arc::new(FixedCounts::uniform(300.0));

    acquire_and_save(&config, &variant, model, &path, args.offline).await?;
    let saved = read_run(&path).with_context(|| format!("reading {}", path.display()))?;
    let setting = saved
        .setting("BASE")
        .ok_or_else(|| anyhow!("{} holds no BASE setting", path.display()))?;

    println!();
    for channel in &saved.channels {
        if let Some(stats) = setting.stats.get(channel) {
            println!("{channel}: {:.1} ± {:.1}", stats.mean, stats.error);
        }
    }
    Ok(())
}
