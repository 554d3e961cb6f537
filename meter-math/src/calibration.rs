//! Interferometer-to-pose calibration using nalgebra
//!
//! A hardpoint is observed by several interferometer channels, each measuring
//! an optical path length. A fixed calibration matrix maps that vector of path
//! lengths onto a 6-DOF pose (three translations, three rotations).
//!
//! # Matrix Layout
//!
//! The matrix has one row per input channel and one column per pose component.
//! Readings are treated as a row vector:
//!
//! ```text
//!                 [ j00 .. j05 ]
//! [ r0 .. rK-1 ] ×[  :      :  ] = [ X  Y  Z  RotX  RotY  RotZ ]
//!                 [ jK0 .. jK5 ]
//! ```
//!
//! so each pose component is the dot product of the readings with one matrix
//! column, and a unit reading on channel `k` yields row `k` of the matrix.

use std::fmt;
use std::ops::Index;

use nalgebra::{DMatrix, RowDVector, Vector6};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of pose components produced by every calibration matrix.
pub const POSE_DIMENSION: usize = 6;

/// Raw interferometer units (pm) per reported unit (µm, µrad).
pub const PICOMETERS_PER_MICROMETER: f64 = 1e6;

/// Sensor-to-pose calibration of the six-channel hardpoint interferometer rig.
///
/// Rows are channels in acquisition order: device 206 axes 0..2, then
/// device 207 axes 0..2.
pub const HARDPOINT_CALIBRATION: [[f64; POSE_DIMENSION]; 6] = [
    [-0.0931, 0.4916, -0.8658, -0.1226, -0.0119, 0.0064],
    [-0.1192, 0.4903, -0.8634, -0.1223, 0.0193, 0.0278],
    [0.1827, 0.6106, -0.7706, 0.0953, -0.1074, -0.0625],
    [0.1964, 0.5962, -0.7784, 0.0719, -0.1225, -0.0757],
    [-0.1134, -0.0576, -0.9919, 0.0931, 0.1340, -0.0184],
    [-0.1281, -0.0835, -0.9882, 0.0619, 0.1513, -0.0208],
];

/// Error when the readings vector does not match the matrix input dimension
#[derive(Error, Debug, Clone, PartialEq)]
#[error("dimension mismatch: calibration expects {expected} readings, got {actual}")]
pub struct DimensionMismatch {
    /// Number of input channels of the calibration matrix
    pub expected: usize,
    /// Number of readings supplied
    pub actual: usize,
}

/// Error when calibration rows cannot form a valid matrix
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationShapeError {
    /// No rows were supplied
    #[error("calibration matrix has no rows")]
    Empty,

    /// A row does not have one entry per pose component
    #[error("calibration row {row} has {len} entries, expected {POSE_DIMENSION}")]
    RowLength { row: usize, len: usize },

    /// A coefficient is NaN or infinite
    #[error("calibration entry ({row}, {col}) is not finite")]
    NonFinite { row: usize, col: usize },
}

/// One component of a [`PoseEstimate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoseComponent {
    X,
    Y,
    Z,
    RotX,
    RotY,
    RotZ,
}

impl PoseComponent {
    /// All components in vector order.
    pub const ALL: [PoseComponent; POSE_DIMENSION] = [
        PoseComponent::X,
        PoseComponent::Y,
        PoseComponent::Z,
        PoseComponent::RotX,
        PoseComponent::RotY,
        PoseComponent::RotZ,
    ];

    /// Position of this component in the pose vector.
    pub fn index(self) -> usize {
        match self {
            PoseComponent::X => 0,
            PoseComponent::Y => 1,
            PoseComponent::Z => 2,
            PoseComponent::RotX => 3,
            PoseComponent::RotY => 4,
            PoseComponent::RotZ => 5,
        }
    }

    /// Whether this component is a rotation.
    pub fn is_rotation(self) -> bool {
        self.index() >= 3
    }
}

impl fmt::Display for PoseComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoseComponent::X => "X",
            PoseComponent::Y => "Y",
            PoseComponent::Z => "Z",
            PoseComponent::RotX => "RotX",
            PoseComponent::RotY => "RotY",
            PoseComponent::RotZ => "RotZ",
        };
        f.write_str(name)
    }
}

/// Fixed linear map from K channel readings to a 6-DOF pose.
///
/// Set once at construction and never mutated. Serializes as a list of rows
/// so it can live in a JSON stand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct CalibrationMatrix {
    matrix: DMatrix<f64>,
}

impl CalibrationMatrix {
    /// Build a calibration matrix from fixed-width rows, one per channel.
    pub fn from_rows<const K: usize>(rows: &[[f64; POSE_DIMENSION]; K]) -> Self {
        let matrix = DMatrix::from_fn(K, POSE_DIMENSION, |r, c| rows[r][c]);
        Self { matrix }
    }

    /// The six-channel hardpoint rig calibration.
    pub fn hardpoint() -> Self {
        Self::from_rows(&HARDPOINT_CALIBRATION)
    }

    /// Number of input channels (matrix rows).
    pub fn input_channels(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of output components (always [`POSE_DIMENSION`]).
    pub fn output_dimension(&self) -> usize {
        self.matrix.ncols()
    }

    /// Coefficient for `channel` contributing to `component`.
    pub fn coefficient(&self, channel: usize, component: PoseComponent) -> f64 {
        self.matrix[(channel, component.index())]
    }

    /// Row of coefficients for one input channel.
    pub fn row(&self, channel: usize) -> [f64; POSE_DIMENSION] {
        let mut row = [0.0; POSE_DIMENSION];
        for (c, value) in row.iter_mut().enumerate() {
            *value = self.matrix[(channel, c)];
        }
        row
    }

    /// Apply the transform: `pose = readings · matrix`.
    ///
    /// # Errors
    /// Returns [`DimensionMismatch`] if `readings.len()` differs from
    /// [`input_channels`](Self::input_channels).
    pub fn apply(&self, readings: &[f64]) -> Result<PoseEstimate, DimensionMismatch> {
        if readings.len() != self.input_channels() {
            return Err(DimensionMismatch {
                expected: self.input_channels(),
                actual: readings.len(),
            });
        }

        let row = RowDVector::from_row_slice(readings);
        let product = row * &self.matrix;
        Ok(PoseEstimate {
            components: Vector6::from_iterator(product.iter().copied()),
        })
    }
}

impl TryFrom<Vec<Vec<f64>>> for CalibrationMatrix {
    type Error = CalibrationShapeError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        if rows.is_empty() {
            return Err(CalibrationShapeError::Empty);
        }
        for (r, row) in rows.iter().enumerate() {
            if row.len() != POSE_DIMENSION {
                return Err(CalibrationShapeError::RowLength {
                    row: r,
                    len: row.len(),
                });
            }
            if let Some(c) = row.iter().position(|v| !v.is_finite()) {
                return Err(CalibrationShapeError::NonFinite { row: r, col: c });
            }
        }

        let matrix = DMatrix::from_fn(rows.len(), POSE_DIMENSION, |r, c| rows[r][c]);
        Ok(Self { matrix })
    }
}

impl From<CalibrationMatrix> for Vec<Vec<f64>> {
    fn from(calibration: CalibrationMatrix) -> Self {
        (0..calibration.input_channels())
            .map(|r| calibration.row(r).to_vec())
            .collect()
    }
}

/// Six derived pose components: X, Y, Z translation and RotX, RotY, RotZ.
///
/// Units follow the inputs; use [`scaled`](Self::scaled) to convert raw
/// picometer-scale results to µm / µrad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    components: Vector6<f64>,
}

impl PoseEstimate {
    /// Build a pose from its six components in vector order.
    pub fn new(components: [f64; POSE_DIMENSION]) -> Self {
        Self {
            components: Vector6::from_row_slice(&components),
        }
    }

    /// The zero pose.
    pub fn zero() -> Self {
        Self {
            components: Vector6::zeros(),
        }
    }

    /// Value of one component.
    pub fn get(&self, component: PoseComponent) -> f64 {
        self.components[component.index()]
    }

    /// All components in vector order.
    pub fn components(&self) -> [f64; POSE_DIMENSION] {
        let mut out = [0.0; POSE_DIMENSION];
        out.copy_from_slice(self.components.as_slice());
        out
    }

    /// Divide every component by `divisor`.
    pub fn scaled(&self, divisor: f64) -> Self {
        Self {
            components: self.components / divisor,
        }
    }

    /// Component-wise sum with a weight on each operand.
    pub fn weighted_sum(&self, a: f64, other: &PoseEstimate, b: f64) -> Self {
        Self {
            components: self.components * a + other.components * b,
        }
    }
}

impl Index<PoseComponent> for PoseEstimate {
    type Output = f64;

    fn index(&self, component: PoseComponent) -> &f64 {
        &self.components[component.index()]
    }
}

/// Calibration matrix paired with the divisor converting raw units.
///
/// The divisor is an explicit parameter: raw interferometer integers are in
/// picometers and reported poses in µm / µrad, hence the default of
/// [`PICOMETERS_PER_MICROMETER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseTransform {
    /// Channel-to-pose calibration
    pub calibration: CalibrationMatrix,
    /// Raw units per reported unit
    pub raw_unit_divisor: f64,
}

impl PoseTransform {
    pub fn new(calibration: CalibrationMatrix, raw_unit_divisor: f64) -> Self {
        Self {
            calibration,
            raw_unit_divisor,
        }
    }

    /// Transform raw integer readings and convert to reported units.
    pub fn apply_raw(&self, raw: &[i64]) -> Result<PoseEstimate, DimensionMismatch> {
        let readings: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
        Ok(self.calibration.apply(&readings)?.scaled(self.raw_unit_divisor))
    }
}

impl Default for PoseTransform {
    fn default() -> Self {
        Self::new(CalibrationMatrix::hardpoint(), PICOMETERS_PER_MICROMETER)
    }
}
