//! Forward finite-difference approximations of gradients and Hessians.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::error::{ChoiceError, Result};
use crate::options::DerivativeOptions;

/// Step used for component `x`: relative above one in magnitude, absolute below,
/// and pointing toward negative values when `x` is negative.
pub fn step(x: f64, tau: f64) -> f64 {
    if x.abs() >= 1.0 {
        tau * x
    } else if x >= 0.0 {
        tau
    } else {
        -tau
    }
}

/// Forward-difference gradient of `function` at `x` with relative step `tau`.
pub fn finite_difference_gradient<F>(
    function: F,
    x: &DVector<f64>,
    tau: f64,
) -> Result<DVector<f64>>
where
    F: Fn(&DVector<f64>) -> Result<f64>,
{
    let f = function(x)?;
    if !f.is_finite() {
        return Err(ChoiceError::NumericalError {
            context: "finite-difference gradient",
        });
    }
    let mut gradient = DVector::zeros(x.len());
    let mut shifted = x.clone();
    for i in 0..x.len() {
        let s = step(x[i], tau);
        shifted[i] = x[i] + s;
        gradient[i] = (function(&shifted)? - f) / s;
        shifted[i] = x[i];
    }
    Ok(gradient)
}

/// Forward-difference Hessian built column by column from `gradient`.
pub fn finite_difference_hessian<G>(
    gradient: G,
    x: &DVector<f64>,
    tau: f64,
) -> Result<DMatrix<f64>>
where
    G: Fn(&DVector<f64>) -> Result<DVector<f64>>,
{
    let g = gradient(x)?;
    if g.len() != x.len() {
        return Err(ChoiceError::dimension_mismatch(
            "finite-difference Hessian",
            x.len(),
            g.len(),
        ));
    }
    let mut hessian = DMatrix::zeros(x.len(), x.len());
    let mut shifted = x.clone();
    for i in 0..x.len() {
        let s = step(x[i], tau);
        shifted[i] = x[i] + s;
        let column = (gradient(&shifted)? - &g) / s;
        hessian.set_column(i, &column);
        shifted[i] = x[i];
    }
    Ok(hessian)
}

/// Analytical derivatives next to their finite-difference counterparts.
#[derive(Clone, Debug)]
pub struct DerivativeCheck {
    pub value: f64,
    pub gradient: DVector<f64>,
    pub hessian: DMatrix<f64>,
    pub gradient_difference: DVector<f64>,
    pub hessian_difference: DMatrix<f64>,
}

impl DerivativeCheck {
    /// Largest absolute discrepancy between the analytical and numerical gradients.
    pub fn max_gradient_error(&self) -> f64 {
        self.gradient_difference.amax()
    }

    pub fn max_hessian_error(&self) -> f64 {
        self.hessian_difference.amax()
    }
}

/// Compares the gradient and Hessian returned by `function` with finite differences.
///
/// The numerical gradient differentiates the value, the numerical Hessian
/// differentiates the analytical gradient. Each component is logged at info level.
pub fn check_derivatives<F>(
    function: F,
    x: &DVector<f64>,
    names: &[String],
    options: &DerivativeOptions,
) -> Result<DerivativeCheck>
where
    F: Fn(&DVector<f64>) -> Result<(f64, DVector<f64>, DMatrix<f64>)>,
{
    if names.len() != x.len() {
        return Err(ChoiceError::dimension_mismatch(
            "derivative check names",
            x.len(),
            names.len(),
        ));
    }
    let (value, gradient, hessian) = function(x)?;
    let numerical_gradient =
        finite_difference_gradient(|y| function(y).map(|(f, _, _)| f), x, options.step)?;
    let numerical_hessian =
        finite_difference_hessian(|y| function(y).map(|(_, g, _)| g), x, options.step)?;
    let gradient_difference = &gradient - &numerical_gradient;
    let hessian_difference = &hessian - &numerical_hessian;

    info!("x\t\tGradient\tFinDiff\t\tDifference");
    for (k, name) in names.iter().enumerate() {
        info!(
            "{name:15}\t{:+E}\t{:+E}\t{:+E}",
            gradient[k], numerical_gradient[k], gradient_difference[k]
        );
    }
    debug!("Row\t\tCol\t\tHessian\tFinDiff\t\tDifference");
    for (row, row_name) in names.iter().enumerate() {
        for (col, col_name) in names.iter().enumerate() {
            debug!(
                "{row_name:15}\t{col_name:15}\t{:+E}\t{:+E}\t{:+E}",
                hessian[(row, col)],
                numerical_hessian[(row, col)],
                hessian_difference[(row, col)]
            );
        }
    }

    Ok(DerivativeCheck {
        value,
        gradient,
        hessian,
        gradient_difference,
        hessian_difference,
    })
}
