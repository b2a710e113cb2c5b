use clap::Parser;
use movalign::frame::io::{load_gray_frame, save_gray16};
use movalign::{
    AlignConfig, AlignedFrameSink, BufferPool, ControlPoints, CpuFft, GainCorrection, HostDevice,
    ImageSequence, JsonFileStore, LocalConfig, MemoryStore, MovAlignResult, MovieAligner,
    SettingsStore,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "MovAlign CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output for performance profiling.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LocalConfigJson {
    enabled: bool,
    patch_size: [usize; 2],
    patches: Option<[usize; 2]>,
    control_points: [usize; 3],
}

impl Default for LocalConfigJson {
    fn default() -> Self {
        let cfg = LocalConfig::default();
        let c = cfg.control_points;
        Self {
            enabled: true,
            patch_size: [cfg.patch_size.0, cfg.patch_size.1],
            patches: cfg.patches.map(|(x, y)| [x, y]),
            control_points: [c.x, c.y, c.t],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AlignConfigJson {
    max_shift: usize,
    sampling_rate: f64,
    max_resolution: f64,
    first_frame: usize,
    last_frame: Option<usize>,
    first_sum: Option<usize>,
    last_sum: Option<usize>,
    patches_avg: usize,
    skip_autotuning: bool,
    solver_iterations: usize,
    output_binning: f64,
    compute_initial: bool,
    compute_aligned: bool,
    cpu_threads: usize,
    local: LocalConfigJson,
}

impl Default for AlignConfigJson {
    fn default() -> Self {
        let cfg = AlignConfig::default();
        Self {
            max_shift: cfg.max_shift,
            sampling_rate: cfg.sampling_rate,
            max_resolution: cfg.max_resolution,
            first_frame: cfg.first_frame,
            last_frame: cfg.last_frame,
            first_sum: cfg.first_sum,
            last_sum: cfg.last_sum,
            patches_avg: cfg.patches_avg,
            skip_autotuning: cfg.skip_autotuning,
            solver_iterations: cfg.solver_iterations,
            output_binning: cfg.output_binning,
            compute_initial: cfg.compute_initial,
            compute_aligned: cfg.compute_aligned,
            cpu_threads: cfg.cpu_threads,
            local: LocalConfigJson::default(),
        }
    }
}

impl From<&AlignConfigJson> for AlignConfig {
    fn from(value: &AlignConfigJson) -> Self {
        let local = &value.local;
        let [cx, cy, ct] = local.control_points;
        Self {
            max_shift: value.max_shift,
            sampling_rate: value.sampling_rate,
            max_resolution: value.max_resolution,
            first_frame: value.first_frame,
            last_frame: value.last_frame,
            first_sum: value.first_sum,
            last_sum: value.last_sum,
            patches_avg: value.patches_avg,
            skip_autotuning: value.skip_autotuning,
            solver_iterations: value.solver_iterations,
            output_binning: value.output_binning,
            compute_initial: value.compute_initial,
            compute_aligned: value.compute_aligned,
            cpu_threads: value.cpu_threads,
            local: local.enabled.then(|| LocalConfig {
                patch_size: (local.patch_size[0], local.patch_size[1]),
                patches: local.patches.map(|[x, y]| (x, y)),
                control_points: ControlPoints::new(cx, cy, ct),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    frames: Vec<String>,
    dark_path: Option<String>,
    gain_path: Option<String>,
    device_memory_mb: usize,
    settings_cache: Option<String>,
    initial_average_path: Option<String>,
    aligned_average_path: Option<String>,
    aligned_frames_dir: Option<String>,
    output_path: Option<String>,
    align: AlignConfigJson,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            dark_path: None,
            gain_path: None,
            device_memory_mb: 2048,
            settings_cache: None,
            initial_average_path: None,
            aligned_average_path: None,
            aligned_frames_dir: None,
            output_path: None,
            align: AlignConfigJson::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ShiftRecord {
    frame: usize,
    x: f64,
    y: f64,
}

#[derive(Debug, Serialize)]
struct Output {
    ref_frame: usize,
    global: Vec<ShiftRecord>,
    local_observations: usize,
    spline_fitted: bool,
    initial_frames: usize,
    aligned_frames: usize,
}

/// Writes every aligned frame as `frame_NNNN.png` into a directory.
struct DirectorySink {
    dir: PathBuf,
}

impl AlignedFrameSink<f32> for DirectorySink {
    fn write_frame(
        &mut self,
        index: usize,
        width: usize,
        height: usize,
        data: &[f32],
    ) -> MovAlignResult<()> {
        save_gray16(self.dir.join(format!("frame_{index:04}.png")), width, height, data)
    }
}

fn load_reference(path: &Option<String>) -> Result<Option<Vec<f32>>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Some(load_gray_frame::<f32, _>(path)?.2)),
        None => Ok(None),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("movalign=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.frames.is_empty() {
        return Err("frames must list at least one image in the config".into());
    }
    if config.device_memory_mb == 0 {
        return Err("device_memory_mb must be positive".into());
    }

    let source = ImageSequence::open(config.frames.iter().map(PathBuf::from).collect())?;
    let correction = GainCorrection::new(
        load_reference(&config.dark_path)?,
        load_reference(&config.gain_path)?,
    );
    let store: Box<dyn SettingsStore> = match &config.settings_cache {
        Some(path) => Box::new(JsonFileStore::open(path)?),
        None => Box::new(MemoryStore::new()),
    };
    let pool = BufferPool::new();
    let device = Arc::new(HostDevice::with_pool(
        config.device_memory_mb << 20,
        pool.clone(),
    ));
    let mut aligner = MovieAligner::<f32>::new(
        AlignConfig::from(&config.align),
        device,
        Arc::new(CpuFft::<f32>::new()),
        pool,
        store,
    )?;

    let mut sink = match &config.aligned_frames_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            Some(DirectorySink {
                dir: PathBuf::from(dir),
            })
        }
        None => None,
    };
    let outcome = aligner.run(
        &source,
        &correction,
        sink.as_mut().map(|s| s as &mut dyn AlignedFrameSink<f32>),
    )?;
    tracing::info!(
        frames = outcome.global.len(),
        observations = outcome.local.shifts.len(),
        "alignment finished"
    );

    let averages = outcome.averages.clone().into_means();
    if let (Some(path), Some(data)) = (&config.initial_average_path, &averages.initial) {
        save_gray16(path, averages.width, averages.height, data)?;
    }
    if let (Some(path), Some(data)) = (&config.aligned_average_path, &averages.aligned) {
        save_gray16(path, averages.width, averages.height, data)?;
    }

    let output = Output {
        ref_frame: outcome.global.ref_frame(),
        global: outcome
            .global
            .shifts()
            .iter()
            .enumerate()
            .map(|(frame, s)| ShiftRecord {
                frame,
                x: s.x,
                y: s.y,
            })
            .collect(),
        local_observations: outcome.local.shifts.len(),
        spline_fitted: outcome.local.bspline.is_some(),
        initial_frames: outcome.averages.initial_count,
        aligned_frames: outcome.averages.aligned_count,
    };
    let json = serde_json::to_string_pretty(&output)?;

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
