//! Read-only snapshots of estimated models for reporting.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expression::ParameterStatus;

/// Value of one parameter of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimate {
    pub name: String,
    pub value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub status: ParameterStatus,
    /// Rao-Cramer standard error, when the Hessian was computed and invertible.
    pub std_err: Option<f64>,
}

impl ParameterEstimate {
    /// `value / std_err`, when a standard error is available.
    pub fn t_test(&self) -> Option<f64> {
        self.std_err.map(|std_err| self.value / std_err)
    }
}

/// Model metadata and final parameter values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model_name: String,
    pub number_of_observations: usize,
    /// Individuals for panel data, observations otherwise.
    pub sample_size: usize,
    pub excluded_observations: usize,
    /// Log likelihood at the initial parameter values.
    pub initial_log_likelihood: f64,
    pub final_log_likelihood: f64,
    pub parameters: Vec<ParameterEstimate>,
}

impl ModelSummary {
    /// Number of free parameters.
    pub fn number_of_parameters(&self) -> usize {
        self.parameters
            .iter()
            .filter(|parameter| parameter.status == ParameterStatus::Free)
            .count()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterEstimate> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    pub fn likelihood_ratio_test(&self) -> f64 {
        -2.0 * (self.initial_log_likelihood - self.final_log_likelihood)
    }

    pub fn rho_square(&self) -> f64 {
        1.0 - self.final_log_likelihood / self.initial_log_likelihood
    }

    pub fn rho_square_bar(&self) -> f64 {
        let k = self.number_of_parameters() as f64;
        1.0 - (self.final_log_likelihood - k) / self.initial_log_likelihood
    }

    pub fn akaike_information_criterion(&self) -> f64 {
        2.0 * self.number_of_parameters() as f64 - 2.0 * self.final_log_likelihood
    }

    pub fn bayesian_information_criterion(&self) -> f64 {
        let k = self.number_of_parameters() as f64;
        k * (self.sample_size as f64).ln() - 2.0 * self.final_log_likelihood
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: {}", self.model_name)?;
        writeln!(f, "Number of observations: {}", self.number_of_observations)?;
        writeln!(f, "Sample size: {}", self.sample_size)?;
        writeln!(f, "Excluded observations: {}", self.excluded_observations)?;
        writeln!(f, "Number of estimated parameters: {}", self.number_of_parameters())?;
        writeln!(f, "Init log likelihood: {:.6}", self.initial_log_likelihood)?;
        writeln!(f, "Final log likelihood: {:.6}", self.final_log_likelihood)?;
        writeln!(f, "Likelihood ratio test: {:.6}", self.likelihood_ratio_test())?;
        writeln!(f, "Rho-square: {:.4}", self.rho_square())?;
        writeln!(f, "Rho-square-bar: {:.4}", self.rho_square_bar())?;
        writeln!(
            f,
            "Akaike Information Criterion: {:.4}",
            self.akaike_information_criterion()
        )?;
        writeln!(
            f,
            "Bayesian Information Criterion: {:.4}",
            self.bayesian_information_criterion()
        )?;
        writeln!(f, "{:<20}{:>14}{:>14}{:>10}", "Name", "Value", "Std err", "t-test")?;
        for parameter in &self.parameters {
            let std_err = parameter
                .std_err
                .map_or_else(|| "-".to_string(), |s| format!("{s:.6}"));
            let t_test = parameter
                .t_test()
                .map_or_else(|| "-".to_string(), |t| format!("{t:.2}"));
            writeln!(
                f,
                "{:<20}{:>14.6}{:>14}{:>10}",
                parameter.name, parameter.value, std_err, t_test
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn summary() -> ModelSummary {
        ModelSummary {
            model_name: "logit".to_string(),
            number_of_observations: 100,
            sample_size: 100,
            excluded_observations: 12,
            initial_log_likelihood: -100.0,
            final_log_likelihood: -80.0,
            parameters: vec![
                ParameterEstimate {
                    name: "ASC_CAR".to_string(),
                    value: 0.5,
                    lower_bound: None,
                    upper_bound: None,
                    status: ParameterStatus::Free,
                    std_err: Some(0.25),
                },
                ParameterEstimate {
                    name: "ASC_SM".to_string(),
                    value: 0.0,
                    lower_bound: None,
                    upper_bound: None,
                    status: ParameterStatus::Fixed,
                    std_err: None,
                },
            ],
        }
    }

    #[test]
    fn goodness_of_fit_statistics() {
        let summary = summary();
        assert_eq!(summary.number_of_parameters(), 1);
        assert_relative_eq!(summary.likelihood_ratio_test(), 40.0);
        assert_relative_eq!(summary.rho_square(), 0.2, epsilon = 1e-12);
        assert_relative_eq!(summary.rho_square_bar(), 0.19, epsilon = 1e-12);
        assert_relative_eq!(summary.akaike_information_criterion(), 162.0);
        assert_relative_eq!(
            summary.bayesian_information_criterion(),
            100.0_f64.ln() + 160.0
        );
        assert_eq!(summary.parameter("ASC_CAR").unwrap().t_test(), Some(2.0));
    }

    #[test]
    fn json_snapshot() {
        let summary = summary();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"excluded_observations\":12"));
        let restored: ModelSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, summary);
    }

    #[test]
    fn report_lists_parameters() {
        let report = summary().to_string();
        assert!(report.contains("Excluded observations: 12"));
        assert!(report.lines().any(|line| line.starts_with("ASC_SM") && line.ends_with('-')));
    }
}
