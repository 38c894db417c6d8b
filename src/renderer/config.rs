use std::path::PathBuf;
use std::time::Duration;

/// Contains configuration options for the renderer like the resolution, vsync, and other settings
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub validation: bool,
    /// Validation messages are also written here.
    pub validation_log: Option<PathBuf>,
    pub vsync: bool,
    pub fullscreen: bool,
    pub width: u32,
    pub height: u32,
    pub gpu: Option<usize>,
    pub list_gpus: bool,
    pub fence_timeout: Timeout,
    pub acquire_timeout: Timeout,
    pub benchmark: Option<BenchmarkConfig>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            validation: false,
            validation_log: None,
            vsync: false,
            fullscreen: false,
            width: 1280,
            height: 720,
            gpu: None,
            list_gpus: false,
            fence_timeout: Timeout::Unbounded,
            acquire_timeout: Timeout::Unbounded,
            benchmark: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BenchmarkConfig {
    /// Seconds rendered before frame times are recorded.
    pub warmup: f64,
    /// Seconds of recorded frames.
    pub runtime: f64,
    pub filename: PathBuf,
    pub output_frame_times: bool,
    /// Stops after this many recorded frames instead of after `runtime`.
    pub frame_limit: Option<u32>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup: 1.0,
            runtime: 10.0,
            filename: PathBuf::from("benchmarkresults.csv"),
            output_frame_times: false,
            frame_limit: None,
        }
    }
}

/// How long a blocking GPU wait may take.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    #[default]
    Unbounded,
    Bounded(Duration),
}

impl Timeout {
    pub fn as_nanos(&self) -> u64 {
        match self {
            Timeout::Unbounded => u64::MAX,
            Timeout::Bounded(duration) => u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
        }
    }
}
