use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use crate::renderer::config::{BenchmarkConfig, RenderConfig, Timeout};

const VALIDATION_LOG_FILE: &str = "validation.txt";

#[derive(Parser, Debug)]
#[command(name = "vkframe", version, about = "Minimal Vulkan frame harness")]
pub struct Cli {
    /// Enable the Khronos validation layer
    #[arg(short = 'v', long)]
    pub validation: bool,

    /// Also write validation messages to validation.txt. Implies --validation
    #[arg(long = "validationlog")]
    pub validation_log: bool,

    /// Wait for vertical blank when presenting
    #[arg(long)]
    pub vsync: bool,

    /// Borderless fullscreen on the current monitor
    #[arg(short, long)]
    pub fullscreen: bool,

    /// Window width in pixels
    #[arg(short, long, default_value_t = 1280)]
    pub width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Milliseconds to wait for a frame slot or a swapchain image before the frame is skipped
    #[arg(long = "frametimeout", value_name = "MS")]
    pub frame_timeout: Option<u64>,

    /// Index of the GPU to use
    #[arg(short, long)]
    pub gpu: Option<usize>,

    /// Print the available GPUs and exit
    #[arg(long = "listgpus")]
    pub list_gpus: bool,

    /// Run a benchmark and write the results to a file
    #[arg(short, long)]
    pub benchmark: bool,

    /// Seconds rendered before the benchmark starts recording
    #[arg(long = "benchwarmup", default_value_t = 1.0)]
    pub bench_warmup: f64,

    /// Seconds the benchmark records
    #[arg(long = "benchruntime", default_value_t = 10.0)]
    pub bench_runtime: f64,

    /// Benchmark results file
    #[arg(long = "benchfilename", default_value = "benchmarkresults.csv")]
    pub bench_filename: PathBuf,

    /// Also write every single frame time
    #[arg(long = "benchframetimes")]
    pub bench_frame_times: bool,

    /// Stop the benchmark after this many frames instead of after the runtime
    #[arg(long = "benchmarkframes")]
    pub benchmark_frames: Option<u32>,
}

impl From<Cli> for RenderConfig {
    fn from(cli: Cli) -> Self {
        let benchmark = cli.benchmark.then(|| BenchmarkConfig {
            warmup: cli.bench_warmup,
            runtime: cli.bench_runtime,
            filename: cli.bench_filename,
            output_frame_times: cli.bench_frame_times,
            frame_limit: cli.benchmark_frames,
        });

        let timeout = cli.frame_timeout
            .map_or(Timeout::Unbounded, |ms| Timeout::Bounded(Duration::from_millis(ms)));

        Self {
            validation: cli.validation || cli.validation_log,
            validation_log: cli.validation_log.then(|| PathBuf::from(VALIDATION_LOG_FILE)),
            vsync: cli.vsync,
            fullscreen: cli.fullscreen,
            width: cli.width,
            height: cli.height,
            gpu: cli.gpu,
            list_gpus: cli.list_gpus,
            fence_timeout: timeout,
            acquire_timeout: timeout,
            benchmark,
        }
    }
}
