//! Sample-rate classifier.
//!
//! A context that finds a valid tracking type already stored keeps it, so
//! every context of one session agrees on the draw. Otherwise it draws once
//! against the sample rate.

use session_core::{SessionClassifier, TrackingDecision};

pub const TRACKED: &str = "1";
pub const NOT_TRACKED: &str = "0";

#[derive(Debug, Clone, Copy)]
pub struct SampleRateClassifier {
    /// Percentage in `[0, 100]`.
    sample_rate: f64,
}

impl SampleRateClassifier {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate: sample_rate.clamp(0.0, 100.0),
        }
    }

    fn draw(&self) -> bool {
        rand::random::<f64>() * 100.0 < self.sample_rate
    }
}

impl SessionClassifier for SampleRateClassifier {
    fn classify(&self, raw_tracking_type: Option<&str>) -> TrackingDecision {
        let tracking_type = match raw_tracking_type {
            Some(value @ (TRACKED | NOT_TRACKED)) => value,
            _ if self.draw() => TRACKED,
            _ => NOT_TRACKED,
        };
        TrackingDecision {
            tracking_type: tracking_type.to_string(),
            is_tracked: tracking_type == TRACKED,
        }
    }
}
