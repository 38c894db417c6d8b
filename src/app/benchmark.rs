use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use crate::renderer::config::BenchmarkConfig;

/// Records frame times after a warmup and writes a summary when done
pub struct Benchmark {
    config: BenchmarkConfig,
    started: Instant,
    recording_since: Option<Instant>,
    frame_times_ms: Vec<f64>,
    finished: bool,
}

impl Benchmark {
    pub fn new(config: BenchmarkConfig, now: Instant) -> Self {
        log::info!(
            "Benchmark: warmup {:.1}s, runtime {:.1}s, results to {}",
            config.warmup,
            config.runtime,
            config.filename.display(),
        );
        Self {
            config,
            started: now,
            recording_since: None,
            frame_times_ms: Vec::new(),
            finished: false,
        }
    }

    /// Adds a frame that ended at `now`. Returns true once the benchmark is complete.
    pub fn record_frame(&mut self, now: Instant, frame_time_secs: f32) -> bool {
        if self.finished {
            return true;
        }

        let Some(recording_since) = self.recording_since else {
            if now.duration_since(self.started).as_secs_f64() >= self.config.warmup {
                self.recording_since = Some(now);
            }
            return false;
        };

        self.frame_times_ms.push(frame_time_secs as f64 * 1000.0);

        self.finished = match self.config.frame_limit {
            Some(limit) => self.frame_times_ms.len() >= limit as usize,
            None => now.duration_since(recording_since).as_secs_f64() >= self.config.runtime,
        };
        self.finished
    }

    pub fn frame_count(&self) -> usize {
        self.frame_times_ms.len()
    }

    pub fn write_results(&self, device_name: &str, out: &mut impl Write) -> std::io::Result<()> {
        let count = self.frame_times_ms.len();
        let total_ms: f64 = self.frame_times_ms.iter().sum();
        let min = self.frame_times_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.frame_times_ms.iter().copied().fold(0.0, f64::max);
        let avg = if count > 0 { total_ms / count as f64 } else { 0.0 };
        let fps = if total_ms > 0.0 { count as f64 * 1000.0 / total_ms } else { 0.0 };

        writeln!(out, "device,{}", device_name)?;
        writeln!(out, "frames,{}", count)?;
        writeln!(out, "runtime_ms,{:.3}", total_ms)?;
        if count > 0 {
            writeln!(out, "frametime_min_ms,{:.3}", min)?;
            writeln!(out, "frametime_max_ms,{:.3}", max)?;
            writeln!(out, "frametime_avg_ms,{:.3}", avg)?;
        }
        writeln!(out, "fps_avg,{:.3}", fps)?;

        if self.config.output_frame_times {
            writeln!(out, "frame_time_ms")?;
            for frame_time in &self.frame_times_ms {
                writeln!(out, "{:.3}", frame_time)?;
            }
        }

        Ok(())
    }

    pub fn save(&self, device_name: &str) -> Result<()> {
        let file = File::create(&self.config.filename)
            .wrap_err_with(|| format!("Could not create {}", self.config.filename.display()))?;
        let mut out = BufWriter::new(file);
        self.write_results(device_name, &mut out)?;
        out.flush()?;

        log::info!(
            "Benchmark finished after {} frames, results written to {}",
            self.frame_count(),
            self.config.filename.display(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use super::*;

    fn config(frame_limit: Option<u32>, output_frame_times: bool) -> BenchmarkConfig {
        BenchmarkConfig {
            warmup: 1.0,
            runtime: 2.0,
            frame_limit,
            output_frame_times,
            ..Default::default()
        }
    }

    fn run(bench: &mut Benchmark, start: Instant, frames: u64, step_ms: u64) -> Option<u64> {
        for frame in 1..=frames {
            if bench.record_frame(start + Duration::from_millis(frame * step_ms), step_ms as f32 / 1000.0) {
                return Some(frame);
            }
        }
        None
    }

    #[test]
    fn warmup_frames_are_not_recorded() {
        let start = Instant::now();
        let mut bench = Benchmark::new(config(None, false), start);

        assert_eq!(run(&mut bench, start, 99, 10), None);
        assert_eq!(bench.frame_count(), 0);
    }

    #[test]
    fn stops_after_runtime() {
        let start = Instant::now();
        let mut bench = Benchmark::new(config(None, false), start);

        let finished_at = run(&mut bench, start, 1000, 10).unwrap();

        // 1s warmup, then 2s of recording
        assert_eq!(finished_at, 300);
        assert_eq!(bench.frame_count(), 200);

        // Stays finished without recording more
        assert!(bench.record_frame(start + Duration::from_secs(10), 0.01));
        assert_eq!(bench.frame_count(), 200);
    }

    #[test]
    fn stops_after_frame_limit() {
        let start = Instant::now();
        let mut bench = Benchmark::new(config(Some(5), false), start);

        run(&mut bench, start, 1000, 10).unwrap();

        assert_eq!(bench.frame_count(), 5);
    }

    #[test]
    fn results_table() {
        let start = Instant::now();
        let mut bench = Benchmark::new(config(Some(3), true), start);
        run(&mut bench, start, 1000, 20).unwrap();

        let mut out = Vec::new();
        bench.write_results("Fake GPU", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "device,Fake GPU");
        assert_eq!(lines[1], "frames,3");
        assert_eq!(lines[2], "runtime_ms,60.000");
        assert_eq!(lines[5], "frametime_avg_ms,20.000");
        assert_eq!(lines[6], "fps_avg,50.000");
        assert_eq!(&lines[7..], &["frame_time_ms", "20.000", "20.000", "20.000"]);
    }
}
