//! meter-math - Numeric core for hardpoint metrology
//!
//! This crate holds the pure numeric pieces of the hardpoint test stand:
//!
//! - **Calibration** - Fixed linear map from interferometer channels to a 6-DOF pose
//! - **Fit** - Degree-1 least-squares fitting for stiffness plots
//!
//! # Example
//!
//! ```
//! use meter_math::{CalibrationMatrix, PoseComponent};
//!
//! let calibration = CalibrationMatrix::hardpoint();
//! let pose = calibration.apply(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
//! assert_eq!(pose[PoseComponent::X], -0.0931);
//! ```

pub mod calibration;
pub mod fit;

pub use calibration::{
    CalibrationMatrix, CalibrationShapeError, DimensionMismatch, PoseComponent, PoseEstimate,
    PoseTransform, HARDPOINT_CALIBRATION, PICOMETERS_PER_MICROMETER, POSE_DIMENSION,
};
pub use fit::{linear_fit, FitError, LinearFit};
