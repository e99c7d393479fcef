//! Configuration structures for dataset evaluation, numerical derivatives and models.

use serde::{Deserialize, Serialize};

/// Controls how rows of a database are evaluated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// Evaluate rows on the rayon thread pool.
    pub parallel: bool,
    /// Smallest number of rows for which parallel evaluation is used.
    pub min_parallel_rows: usize,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            min_parallel_rows: 1_024,
        }
    }
}

impl EvaluationOptions {
    /// Evaluation on the calling thread only.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Whether `rows` rows should be evaluated in parallel.
    pub fn use_parallel(&self, rows: usize) -> bool {
        self.parallel && rows >= self.min_parallel_rows
    }
}

/// Finite-difference settings used by [`derivatives`](crate::derivatives).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeOptions {
    /// Relative step `tau`; components of magnitude below one use it as an absolute step.
    pub step: f64,
    /// Step of both difference levels when a Hessian is built from a
    /// finite-difference gradient.
    pub hessian_step: f64,
}

impl Default for DerivativeOptions {
    fn default() -> Self {
        Self {
            step: 1e-7,
            hessian_step: 1e-4,
        }
    }
}

/// Aggregated configuration of a [`ChoiceModel`](crate::estimation::ChoiceModel).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Row evaluation settings applied to the model's database.
    pub evaluation: EvaluationOptions,
    /// Finite-difference settings for gradients and Hessians.
    pub derivatives: DerivativeOptions,
    /// Refuse to build a model whose audit produced warnings.
    pub warnings_are_errors: bool,
}

impl ModelOptions {
    /// Override the evaluation settings while preserving other defaults.
    pub fn with_evaluation(mut self, evaluation: EvaluationOptions) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Override the finite-difference step.
    pub fn with_derivative_step(mut self, step: f64) -> Self {
        self.derivatives.step = step;
        self
    }

    /// Treat audit warnings as errors when building the model.
    pub fn with_warnings_as_errors(mut self, strict: bool) -> Self {
        self.warnings_are_errors = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let options: ModelOptions =
            serde_json::from_str(r#"{"evaluation": {"parallel": false}}"#).unwrap();
        assert!(!options.evaluation.parallel);
        assert_eq!(options.evaluation.min_parallel_rows, 1_024);
        assert_eq!(options.derivatives.step, 1e-7);
        assert_eq!(options.derivatives.hessian_step, 1e-4);
        assert!(!options.warnings_are_errors);
    }

    #[test]
    fn parallel_threshold() {
        let options = EvaluationOptions::default();
        assert!(!options.use_parallel(10));
        assert!(options.use_parallel(5_000));
        assert!(!EvaluationOptions::sequential().use_parallel(5_000));
    }
}
