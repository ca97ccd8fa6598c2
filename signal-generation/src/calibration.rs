// Confidence calibration hook
// Maps raw fused scores to calibrated confidences. No model is fitted here.

/// A monotonic transform applied to raw fused scores
pub trait Calibrator: Send + Sync {
    /// Map a raw score in [0, 1] to a calibrated confidence
    fn transform(&self, raw: f64) -> f64;

    /// Whether the calibrator has been fitted; an unfitted one is bypassed
    fn is_fitted(&self) -> bool;
}

/// Identity calibration
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCalibrator;

impl Calibrator for IdentityCalibrator {
    fn transform(&self, raw: f64) -> f64 {
        common::clamp01(raw)
    }

    fn is_fitted(&self) -> bool {
        false
    }
}
