//! Model object binding a database to a log-likelihood expression.
//!
//! [`ChoiceModel`] is what an estimation driver talks to: it maps a vector of
//! free parameter values onto the expression tree, aggregates the
//! log likelihood over the database, and supplies finite-difference
//! derivatives and reporting snapshots. Optimization itself is left to the caller.

use std::collections::BTreeMap;

use log::info;
use nalgebra::{DMatrix, DVector};

use crate::audit::AuditReport;
use crate::database::Database;
use crate::derivatives::{finite_difference_gradient, finite_difference_hessian};
use crate::error::{ChoiceError, Result};
use crate::evaluate::ParameterValues;
use crate::expression::{Beta, Expression};
use crate::options::ModelOptions;
use crate::results::{ModelSummary, ParameterEstimate};

/// Audited pairing of a database with a log-likelihood expression.
#[derive(Clone, Debug)]
pub struct ChoiceModel {
    name: String,
    database: Database,
    log_likelihood: Expression,
    betas: BTreeMap<String, Beta>,
    free_parameters: Vec<String>,
    options: ModelOptions,
}

impl ChoiceModel {
    /// Audits `log_likelihood` against `database` and builds the model.
    ///
    /// Audit errors abort construction with [`ChoiceError::Audit`]. Warnings are
    /// logged, or rejected as well when `options.warnings_are_errors` is set.
    pub fn new(
        mut database: Database,
        log_likelihood: Expression,
        options: ModelOptions,
    ) -> Result<Self> {
        database.set_options(options.evaluation.clone());

        let mut report = database.audit();
        report.merge(log_likelihood.audit(Some(&database)));
        if options.warnings_are_errors && !report.warnings.is_empty() {
            let AuditReport { errors, warnings } = report;
            return Err(ChoiceError::Audit {
                report: errors.into_iter().chain(warnings).collect::<Vec<_>>().join("\n"),
            });
        }
        report.log_and_check()?;

        let betas = log_likelihood.betas(true, true);
        let free_parameters: Vec<String> = betas
            .values()
            .filter(|beta| beta.is_free())
            .map(|beta| beta.name.clone())
            .collect();
        info!(
            "model on database `{}`: {} observation(s), {} free parameter(s)",
            database.name(),
            database.number_of_observations(),
            free_parameters.len()
        );

        Ok(Self {
            name: database.name().to_string(),
            database,
            log_likelihood,
            betas,
            free_parameters,
            options,
        })
    }

    /// Names the model for reporting; defaults to the database name.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Model name used in summaries.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The audited database the log likelihood is summed over.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Per-observation log-likelihood expression.
    pub fn expression(&self) -> &Expression {
        &self.log_likelihood
    }

    /// Settings the model was built with.
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Free parameter names in the order used by parameter vectors.
    pub fn free_parameter_names(&self) -> &[String] {
        &self.free_parameters
    }

    /// Initial values of the free parameters, keyed by name.
    pub fn initial_values(&self) -> ParameterValues {
        ParameterValues::initial_values(&self.log_likelihood)
    }

    /// Initial values of the free parameters in vector order.
    pub fn initial_vector(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.free_parameters.len(),
            self.free_parameters
                .iter()
                .map(|name| self.betas[name].initial_value),
        )
    }

    /// Assigns the components of `x` to the free parameters.
    pub fn parameters_from_vector(&self, x: &DVector<f64>) -> Result<ParameterValues> {
        if x.len() != self.free_parameters.len() {
            return Err(ChoiceError::dimension_mismatch(
                "parameter vector",
                self.free_parameters.len(),
                x.len(),
            ));
        }
        Ok(self
            .free_parameters
            .iter()
            .zip(x.iter())
            .map(|(name, value)| (name.as_str(), *value))
            .collect())
    }

    /// Inverse of [`ChoiceModel::parameters_from_vector`]; every free parameter must have a value.
    pub fn vector_from_parameters(&self, values: &ParameterValues) -> Result<DVector<f64>> {
        let components = self
            .free_parameters
            .iter()
            .map(|name| {
                values
                    .get(name)
                    .ok_or_else(|| ChoiceError::MissingParameter { name: name.clone() })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DVector::from_vec(components))
    }

    /// Sum of the log-likelihood expression over the database.
    pub fn log_likelihood(&self, values: &ParameterValues) -> Result<f64> {
        self.database.sum_from_database(&self.log_likelihood, values)
    }

    /// Log likelihood at the parameter vector `x`.
    pub fn log_likelihood_at(&self, x: &DVector<f64>) -> Result<f64> {
        self.log_likelihood(&self.parameters_from_vector(x)?)
    }

    /// Finite-difference gradient of the log likelihood at `x`.
    pub fn gradient(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        finite_difference_gradient(
            |y| self.log_likelihood_at(y),
            x,
            self.options.derivatives.step,
        )
    }

    /// Finite-difference Hessian of the log likelihood at `x`.
    pub fn hessian(&self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
        let step = self.options.derivatives.hessian_step;
        finite_difference_hessian(
            |y| finite_difference_gradient(|z| self.log_likelihood_at(z), y, step),
            x,
            step,
        )
    }

    /// Per-observation values of each named formula.
    pub fn simulate(
        &self,
        formulas: &BTreeMap<String, Expression>,
        values: &ParameterValues,
    ) -> Result<BTreeMap<String, DVector<f64>>> {
        formulas
            .iter()
            .map(|(name, formula)| {
                self.database
                    .values_from_database(formula, values)
                    .map(|column| (name.clone(), column))
            })
            .collect()
    }

    /// Reporting snapshot at `values`, without standard errors.
    pub fn summary(&self, values: &ParameterValues) -> Result<ModelSummary> {
        self.build_summary(values, None)
    }

    /// Reporting snapshot at `values` with Rao-Cramer standard errors from the
    /// inverse of the negated finite-difference Hessian.
    pub fn summary_with_standard_errors(&self, values: &ParameterValues) -> Result<ModelSummary> {
        let x = self.vector_from_parameters(values)?;
        let covariance = (-self.hessian(&x)?)
            .try_inverse()
            .ok_or(ChoiceError::NumericalError {
                context: "inversion of the Hessian",
            })?;
        self.build_summary(values, Some(covariance.diagonal()))
    }

    fn build_summary(
        &self,
        values: &ParameterValues,
        variances: Option<DVector<f64>>,
    ) -> Result<ModelSummary> {
        let mut free_index = 0;
        let mut parameters = Vec::with_capacity(self.betas.len());
        for beta in self.betas.values() {
            let (value, std_err) = if beta.is_free() {
                let value = values
                    .get(&beta.name)
                    .ok_or_else(|| ChoiceError::MissingParameter {
                        name: beta.name.clone(),
                    })?;
                let std_err = variances
                    .as_ref()
                    .map(|variances| variances[free_index])
                    .filter(|variance| *variance > 0.0)
                    .map(f64::sqrt);
                free_index += 1;
                (value, std_err)
            } else {
                (beta.initial_value, None)
            };
            parameters.push(ParameterEstimate {
                name: beta.name.clone(),
                value,
                lower_bound: beta.lower_bound,
                upper_bound: beta.upper_bound,
                status: beta.status,
                std_err,
            });
        }

        Ok(ModelSummary {
            model_name: self.name.clone(),
            number_of_observations: self.database.number_of_observations(),
            sample_size: self.database.sample_size(),
            excluded_observations: self.database.excluded_count(),
            initial_log_likelihood: self.log_likelihood(&self.initial_values())?,
            final_log_likelihood: self.log_likelihood(values)?,
            parameters,
        })
    }
}
