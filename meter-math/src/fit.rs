//! Degree-1 least-squares fitting
//!
//! Fits `y = slope * x + intercept` to paired samples, as used for
//! load-versus-displacement stiffness plots.

use thiserror::Error;

/// Error when a linear fit cannot be computed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// x and y have different lengths
    #[error("length mismatch: {xs} x values, {ys} y values")]
    LengthMismatch { xs: usize, ys: usize },

    /// Fewer than two points
    #[error("insufficient points for linear fit: got {got}, need 2")]
    TooFewPoints { got: usize },

    /// All x values identical, slope undefined
    #[error("degenerate fit: all x values are equal")]
    DegenerateX,

    /// Input contains NaN or infinity
    #[error("non-finite value at index {index}")]
    NonFinite { index: usize },
}

/// Result of a degree-1 least-squares fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination (1.0 when y is constant and fit exactly)
    pub r_squared: f64,
}

impl LinearFit {
    /// Evaluate the fitted line at `x`.
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Legend label of the form `y = 1.2345x +0.5000`.
    pub fn label(&self, precision: usize) -> String {
        format!(
            "y = {:.*}x {:+.*}",
            precision, self.slope, precision, self.intercept
        )
    }
}

/// Fit a straight line through `(xs[i], ys[i])` by ordinary least squares.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Result<LinearFit, FitError> {
    if xs.len() != ys.len() {
        return Err(FitError::LengthMismatch {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    if xs.len() < 2 {
        return Err(FitError::TooFewPoints { got: xs.len() });
    }
    if let Some(index) = xs
        .iter()
        .zip(ys)
        .position(|(x, y)| !x.is_finite() || !y.is_finite())
    {
        return Err(FitError::NonFinite { index });
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    // Centered sums keep precision for large offsets (encoder counts ~1e7)
    let (sxx, sxy, syy) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0, 0.0), |(sxx, sxy, syy), (&x, &y)| {
            let dx = x - mean_x;
            let dy = y - mean_y;
            (sxx + dx * dx, sxy + dx * dy, syy + dy * dy)
        });

    // Spread relative to magnitude, so small-scale x is not mistaken for constant
    let sum_sq: f64 = xs.iter().map(|x| x * x).sum();
    if sxx == 0.0 || sxx <= f64::EPSILON * sum_sq {
        return Err(FitError::DegenerateX);
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy == 0.0 {
        1.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_exact_line() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ys: Vec<f64> = xs.iter().map(|x| 2.5 * x - 1.0).collect();

        let fit = linear_fit(&xs, &ys).unwrap();

        assert_relative_eq!(fit.slope, 2.5, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, -1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetric_scatter() {
        // Residuals +1, -1, -1, +1 about y = x cancel in the normal equations
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [1.0, 0.0, 1.0, 4.0];

        let fit = linear_fit(&xs, &ys).unwrap();

        assert_relative_eq!(fit.slope, 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 0.0, epsilon = 1e-12);
        assert_relative_eq!(fit.r_squared, 5.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_large_offset_x() {
        let xs: Vec<f64> = (0..100).map(|i| 26_000_000.0 + i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 0.005 * (x - 26_000_000.0) + 3.0).collect();

        let fit = linear_fit(&xs, &ys).unwrap();

        assert_relative_eq!(fit.slope, 0.005, epsilon = 1e-9);
        assert_relative_eq!(fit.predict(26_000_050.0), 3.25, epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_x() {
        let err = linear_fit(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err, FitError::DegenerateX);
    }

    #[test]
    fn test_small_scale_x() {
        let fit = linear_fit(&[0.0, 1e-8, 2e-8, 3e-8], &[0.0, 1.0, 2.0, 3.0]).unwrap();

        assert_relative_eq!(fit.slope, 1e8, max_relative = 1e-9);
        assert_relative_eq!(fit.intercept, 0.0, epsilon = 1e-9);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_large_x_is_degenerate() {
        let err = linear_fit(&[26_000_000.0; 4], &[1.0, 2.0, 3.0, 4.0]).unwrap_err();
        assert_eq!(err, FitError::DegenerateX);
    }

    #[test]
    fn test_too_few_points() {
        let err = linear_fit(&[1.0], &[1.0]).unwrap_err();
        assert_eq!(err, FitError::TooFewPoints { got: 1 });
    }

    #[test]
    fn test_length_mismatch() {
        let err = linear_fit(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert_eq!(err, FitError::LengthMismatch { xs: 2, ys: 1 });
    }

    #[test]
    fn test_non_finite() {
        let err = linear_fit(&[1.0, 2.0, 3.0], &[1.0, f64::NAN, 3.0]).unwrap_err();
        assert_eq!(err, FitError::NonFinite { index: 1 });
    }

    #[test]
    fn test_label_format() {
        let fit = LinearFit {
            slope: 12.345678,
            intercept: -0.5,
            r_squared: 1.0,
        };

        assert_eq!(fit.label(4), "y = 12.3457x -0.5000");
        assert_eq!(fit.label(1), "y = 12.3x -0.5");
    }
}
