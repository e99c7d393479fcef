//! Tree-wide validation collecting every problem in a single report.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;

use crate::database::Database;
use crate::error::{ChoiceError, Result};
use crate::evaluate::{integer_key, ParameterValues};
use crate::expression::{AlternativeId, Expression, NodeKind, UnaryOp};

/// Errors block the use of a model, warnings are advisory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl AuditReport {
    pub fn error<S: Into<String>>(&mut self, message: S) {
        self.errors.push(message.into());
    }

    pub fn warning<S: Into<String>>(&mut self, message: S) {
        self.warnings.push(message.into());
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn merge(&mut self, other: AuditReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Turns the errors into a single [`ChoiceError::Audit`]; otherwise hands back the warnings.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ChoiceError::Audit {
                report: self.errors.join("\n"),
            })
        }
    }

    /// Logs every warning and fails on errors.
    pub fn log_and_check(self) -> Result<()> {
        for warning in &self.warnings {
            warn!("{warning}");
        }
        self.into_result().map(|_| ())
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "error: {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}

impl Expression {
    /// Checks the structure of the tree and, when a database is given, the data it will see.
    ///
    /// Row-level checks use the initial values of the tree's parameters.
    pub fn audit(&self, database: Option<&Database>) -> AuditReport {
        let mut report = AuditReport::default();
        let parameters = ParameterValues::initial_values(self);

        self.walk_with_ancestors(&mut |node: &Expression, ancestors: &[NodeKind]| match node {
            Expression::Unary {
                op: UnaryOp::MonteCarlo,
                child,
            } => {
                if !child.embeds(NodeKind::Draws) {
                    report.error(format!(
                        "The argument of MonteCarlo must contain a Draws: {node}"
                    ));
                }
                if child.embeds(NodeKind::MonteCarlo) {
                    report.error(format!(
                        "It is not possible to include a MonteCarlo statement in another one: {node}"
                    ));
                }
            }
            Expression::Unary {
                op: UnaryOp::PanelLikelihoodTrajectory,
                ..
            } => {
                if let Some(database) = database {
                    if !database.is_panel() {
                        report.error(format!(
                            "Expression PanelLikelihoodTrajectory can only be used with panel data. \
                             Declare the panel structure of the database first: {node}"
                        ));
                    }
                }
            }
            Expression::Draws { .. } => {
                if !ancestors.contains(&NodeKind::MonteCarlo) {
                    report.error(format!(
                        "Draws expression must be embedded into a MonteCarlo: {node}"
                    ));
                }
            }
            Expression::Integrate { child, name } => {
                if !child.random_variables().contains(name) {
                    report.error(format!(
                        "Integrate over `{name}` but the integrand has no such random variable: {node}"
                    ));
                }
            }
            Expression::LogitLike {
                utilities,
                availabilities,
                choice,
            } => {
                if !utilities.keys().eq(availabilities.keys()) {
                    report.error(format!(
                        "Incompatible lists of alternatives: utilities {:?}, availabilities {:?}",
                        utilities.keys().collect::<Vec<_>>(),
                        availabilities.keys().collect::<Vec<_>>()
                    ));
                }
                if let Some(database) = database {
                    audit_choices(
                        utilities,
                        availabilities,
                        choice,
                        database,
                        &parameters,
                        &mut report,
                    );
                }
            }
            _ => {}
        });

        report
    }
}

fn audit_choices(
    utilities: &BTreeMap<AlternativeId, Expression>,
    availabilities: &BTreeMap<AlternativeId, Expression>,
    choice: &Expression,
    database: &Database,
    parameters: &ParameterValues,
    report: &mut AuditReport,
) {
    let choices = match database.values_from_database(choice, parameters) {
        Ok(choices) => choices,
        Err(err) => {
            report.error(format!("Cannot evaluate the choice {choice}: {err}"));
            return;
        }
    };

    let invalid: Vec<String> = choices
        .iter()
        .enumerate()
        .filter(|(_, value)| !is_alternative(utilities, **value))
        .map(|(row, value)| format!("{row}[{value}]"))
        .collect();
    if !invalid.is_empty() {
        report.error(format!(
            "The choice variable [{choice}] does not correspond to a valid alternative \
             for the following observations (rownumber[choice]): {}",
            invalid.join("-")
        ));
    }

    // Choices with no utility are already reported above.
    let available_in_map: BTreeMap<AlternativeId, Expression> = utilities
        .keys()
        .map(|id| {
            let availability = availabilities
                .get(id)
                .cloned()
                .unwrap_or(Expression::Numeric(1.0));
            (*id, availability)
        })
        .collect();
    match database.check_availability_of_chosen_alt(&available_in_map, choice, parameters) {
        Ok(flags) => {
            let unavailable: Vec<String> = flags
                .iter()
                .zip(choices.iter())
                .enumerate()
                .filter(|(_, (available, value))| {
                    !**available && is_alternative(utilities, **value)
                })
                .map(|(row, (_, value))| format!("{row}[{value}]"))
                .collect();
            if !unavailable.is_empty() {
                report.warning(format!(
                    "The chosen alternative is not available for the following observations \
                     (rownumber[choice]): {}",
                    unavailable.join("-")
                ));
            }
        }
        Err(err) => report.error(format!("Cannot evaluate availability conditions: {err}")),
    }
}

fn is_alternative(utilities: &BTreeMap<AlternativeId, Expression>, value: f64) -> bool {
    integer_key(value).is_some_and(|id| utilities.contains_key(&id))
}
