use std::time::{Duration, Instant};
use crate::renderer::payload::FrameTiming;

/// Frame delta, FPS and the looping animation timer
pub struct FrameTimer {
    prev_frame_end: Instant,
    fps_window_start: Instant,
    frames_in_window: u32,
    frame_time: f32,
    timer: f32,
    timer_speed: f32,
    paused: bool,
}

impl FrameTimer {
    const FPS_WINDOW: Duration = Duration::from_secs(1);

    pub fn new(now: Instant) -> Self {
        Self {
            prev_frame_end: now,
            fps_window_start: now,
            frames_in_window: 0,
            frame_time: 1.0,
            timer: 0.0,
            timer_speed: 0.25,
            paused: false,
        }
    }

    /// Accounts for a finished frame. Returns the new FPS value whenever a
    /// full second has passed.
    pub fn end_frame(&mut self, now: Instant) -> Option<u32> {
        self.frames_in_window += 1;
        self.frame_time = now.duration_since(self.prev_frame_end).as_secs_f32();
        self.prev_frame_end = now;

        if !self.paused {
            self.timer += self.timer_speed * self.frame_time;
            self.timer = self.timer.fract();
        }

        let window = now.duration_since(self.fps_window_start);
        if window > Self::FPS_WINDOW {
            let fps = (self.frames_in_window as f64 / window.as_secs_f64()).round() as u32;
            self.frames_in_window = 0;
            self.fps_window_start = now;
            return Some(fps);
        }
        None
    }

    pub fn toggle_pause(&mut self) -> bool {
        self.paused = !self.paused;
        self.paused
    }

    /// Seconds the last frame took
    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }

    pub fn timing(&self) -> FrameTiming {
        FrameTiming {
            frame_time: self.frame_time,
            timer: self.timer,
            paused: self.paused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn frame_time_and_animation_timer() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);

        assert_eq!(timer.end_frame(start + ms(500)), None);
        assert!((timer.frame_time() - 0.5).abs() < 1e-6);
        assert!((timer.timing().timer - 0.125).abs() < 1e-6);
    }

    #[test]
    fn animation_timer_wraps() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);
        timer.timer_speed = 1.0;

        timer.end_frame(start + ms(750));
        timer.end_frame(start + ms(1250));

        assert!((timer.timing().timer - 0.25).abs() < 1e-5);
    }

    #[test]
    fn pause_freezes_animation_but_not_frame_time() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);
        assert!(timer.toggle_pause());

        timer.end_frame(start + ms(100));

        assert_eq!(timer.timing().timer, 0.0);
        assert!(timer.timing().paused);
        assert!((timer.frame_time() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn fps_reported_once_per_second() {
        let start = Instant::now();
        let mut timer = FrameTimer::new(start);

        let mut reports = Vec::new();
        for frame in 1..=120 {
            if let Some(fps) = timer.end_frame(start + ms(frame * 10)) {
                reports.push(fps);
            }
        }

        assert_eq!(reports.len(), 1);
        assert!((99..=100).contains(&reports[0]));
    }
}
