// Per-second frame rate reporting

use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReport {
    pub fps: f32,
    /// Duration of the last frame
    pub frame_ms: f32,
}

pub struct FpsCounter {
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Count a presented frame. Returns a report once per interval.
    pub fn frame(&mut self, now: Instant) -> Option<FpsReport> {
        let frame_time = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report);
        if elapsed < REPORT_INTERVAL {
            return None;
        }

        let report = FpsReport {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_ms: frame_time.as_secs_f32() * 1000.0,
        };
        self.frame_count = 0;
        self.last_report = now;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_once_per_interval() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for i in 1..60 {
            let now = start + Duration::from_millis(i * 16);
            assert!(counter.frame(now).is_none());
        }

        let report = counter.frame(start + Duration::from_millis(1000)).unwrap();
        assert!((report.fps - 60.0).abs() < 0.01);
        assert!((report.frame_ms - 56.0).abs() < 0.01);

        assert!(counter
            .frame(start + Duration::from_millis(1016))
            .is_none());
    }

    #[test]
    fn test_slow_frame_reports_immediately() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        let report = counter.frame(start + Duration::from_secs(2)).unwrap();
        assert!((report.fps - 0.5).abs() < 0.001);
        assert!((report.frame_ms - 2000.0).abs() < 0.01);
    }
}
