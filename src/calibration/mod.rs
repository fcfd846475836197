// Calibration feedback loop and probability recalibration
pub mod feedback;
pub mod recalibrator;

pub use feedback::{
    CalibrationFeedbackLoop, CalibratorCheckpoint, CALIBRATOR_STATE_KEY, CHECKPOINT_VERSION,
};
pub use recalibrator::{CalibratorStats, PlattRecalibrator, Recalibrator};
