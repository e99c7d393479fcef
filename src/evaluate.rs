//! Row binding and single-pass evaluation of expression trees.

use std::collections::{BTreeMap, HashMap};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ChoiceError, Result};
use crate::expression::{AlternativeId, Expression, UnaryOp};

/// Source of variable values for the row being evaluated.
pub trait RowBinding {
    /// Value of column `name`, or `None` if the row has no such column.
    fn variable(&self, name: &str) -> Option<f64>;
}

impl RowBinding for HashMap<String, f64> {
    fn variable(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl RowBinding for BTreeMap<String, f64> {
    fn variable(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

/// Current values of the free parameters, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterValues {
    values: BTreeMap<String, f64>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial values of every free parameter of `expression`.
    pub fn initial_values(expression: &Expression) -> Self {
        expression
            .betas(true, false)
            .into_values()
            .map(|beta| (beta.name, beta.initial_value))
            .collect()
    }

    /// Builder-style insertion.
    pub fn with<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterValues {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}

impl<S: Into<String>> Extend<(S, f64)> for ParameterValues {
    fn extend<I: IntoIterator<Item = (S, f64)>>(&mut self, iter: I) {
        self.values
            .extend(iter.into_iter().map(|(name, value)| (name.into(), value)));
    }
}

/// Bindings for one evaluation: a data row and the current parameter values.
///
/// The context is created per call and never stored in the tree, so the same
/// expression can be evaluated concurrently for different rows.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    row: &'a dyn RowBinding,
    parameters: &'a ParameterValues,
}

impl<'a> EvalContext<'a> {
    pub fn new(row: &'a dyn RowBinding, parameters: &'a ParameterValues) -> Self {
        Self { row, parameters }
    }

    pub fn parameters(&self) -> &'a ParameterValues {
        self.parameters
    }

    /// Computes the value of `expression` for the bound row.
    pub fn evaluate(&self, expression: &Expression) -> Result<f64> {
        expression.value(self)
    }
}

impl Expression {
    /// Bottom-up evaluation of the tree under `context`.
    ///
    /// Missing columns and missing free parameter values are errors. Numerical
    /// conditions (division by zero, log of zero, overflow) follow IEEE
    /// semantics and show up as infinities or NaN in the result.
    pub fn value(&self, context: &EvalContext<'_>) -> Result<f64> {
        match self {
            Self::Numeric(value) => Ok(*value),
            Self::Variable(name) | Self::DefineVariable(name) => context
                .row
                .variable(name)
                .ok_or_else(|| ChoiceError::MissingVariable {
                    kind: self.kind_name(),
                    name: name.clone(),
                }),
            Self::Beta(beta) => {
                if beta.is_free() {
                    context
                        .parameters
                        .get(&beta.name)
                        .ok_or_else(|| ChoiceError::MissingParameter {
                            name: beta.name.clone(),
                        })
                } else {
                    Ok(beta.initial_value)
                }
            }
            Self::Binary { op, left, right } => {
                let left = left.value(context)?;
                let right = right.value(context)?;
                Ok(op.apply(left, right))
            }
            Self::Unary { op, child } => match op {
                UnaryOp::Neg => Ok(-child.value(context)?),
                UnaryOp::Exp => Ok(child.value(context)?.exp()),
                UnaryOp::Log => Ok(child.value(context)?.ln()),
                UnaryOp::MonteCarlo | UnaryOp::NormalCdf | UnaryOp::PanelLikelihoodTrajectory => {
                    Err(self.unsupported())
                }
            },
            Self::RandomVariable(_)
            | Self::Derive { .. }
            | Self::Integrate { .. }
            | Self::Draws { .. } => Err(self.unsupported()),
            Self::MultSum(terms) => terms
                .iter()
                .try_fold(0.0, |sum, term| -> Result<f64> {
                    Ok(sum + term.value(context)?)
                }),
            Self::Elem { cases, key } => {
                match integer_key(key.value(context)?).and_then(|key| cases.get(&key)) {
                    Some(case) => case.value(context),
                    None => Ok(0.0),
                }
            }
            Self::LogitLike {
                utilities,
                availabilities,
                choice,
            } => log_logit_value(utilities, availabilities, choice, context),
        }
    }

    fn unsupported(&self) -> ChoiceError {
        ChoiceError::Unsupported {
            kind: self.kind_name(),
        }
    }
}

/// Integer key or alternative id designated by `value`; `None` when it is not finite.
pub(crate) fn integer_key(value: f64) -> Option<AlternativeId> {
    value.is_finite().then(|| value as AlternativeId)
}

/// `-ln(sum_j exp(V_j - V_c))` over the available alternatives `j`.
///
/// Utilities of unavailable alternatives are not evaluated. An unavailable
/// chosen alternative, or one whose utility is `-inf`, has probability zero and
/// yields `-inf`; a choice outside the alternative set yields NaN.
fn log_logit_value(
    utilities: &BTreeMap<AlternativeId, Expression>,
    availabilities: &BTreeMap<AlternativeId, Expression>,
    choice: &Expression,
    context: &EvalContext<'_>,
) -> Result<f64> {
    let value = choice.value(context)?;
    let Some((chosen, chosen_utility)) =
        integer_key(value).and_then(|chosen| utilities.get_key_value(&chosen))
    else {
        warn!(
            "choice is {value}; alternatives are {:?}",
            utilities.keys().collect::<Vec<_>>()
        );
        return Ok(f64::NAN);
    };
    let chosen = *chosen;
    if !is_available(availabilities, chosen, context)? {
        return Ok(f64::NEG_INFINITY);
    }

    let v_chosen = chosen_utility.value(context)?;
    if v_chosen == f64::NEG_INFINITY {
        return Ok(f64::NEG_INFINITY);
    }
    let mut denominator = 0.0;
    for (alternative, utility) in utilities {
        if is_available(availabilities, *alternative, context)? {
            denominator += (utility.value(context)? - v_chosen).exp();
        }
    }
    Ok(-denominator.ln())
}

/// Alternatives without an availability entry are treated as available.
fn is_available(
    availabilities: &BTreeMap<AlternativeId, Expression>,
    alternative: AlternativeId,
    context: &EvalContext<'_>,
) -> Result<bool> {
    match availabilities.get(&alternative) {
        Some(availability) => Ok(availability.value(context)? != 0.0),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::expression::Beta;

    fn row(values: &[(&str, f64)]) -> HashMap<String, f64> {
        values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    fn three_alternatives(v: [f64; 3]) -> BTreeMap<AlternativeId, Expression> {
        BTreeMap::from([
            (1, Expression::from(v[0])),
            (2, Expression::from(v[1])),
            (3, Expression::from(v[2])),
        ])
    }

    fn availabilities(av: [bool; 3]) -> BTreeMap<AlternativeId, Expression> {
        BTreeMap::from([
            (1, Expression::from(av[0])),
            (2, Expression::from(av[1])),
            (3, Expression::from(av[2])),
        ])
    }

    #[test]
    fn arithmetic_and_comparisons() {
        let data = row(&[("x", 3.0), ("y", 4.0)]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let x = || Expression::variable("x");
        let y = || Expression::variable("y");

        assert_eq!(context.evaluate(&(x() * y() - 2)).unwrap(), 10.0);
        assert_eq!(context.evaluate(&(x() / y())).unwrap(), 0.75);
        assert_eq!(context.evaluate(&x().pow(2)).unwrap(), 9.0);
        assert_eq!(context.evaluate(&(-x())).unwrap(), -3.0);
        assert_eq!(context.evaluate(&x().less(y())).unwrap(), 1.0);
        assert_eq!(context.evaluate(&x().greater_or_equal(y())).unwrap(), 0.0);
        assert_eq!(context.evaluate(&x().min(y())).unwrap(), 3.0);
        assert_eq!(context.evaluate(&x().max(y())).unwrap(), 4.0);
        assert_eq!(context.evaluate(&(x() & 0)).unwrap(), 0.0);
        assert_eq!(context.evaluate(&(x().or(0))).unwrap(), 1.0);
        assert_eq!(context.evaluate(&Expression::from(0.0).log()).unwrap(), f64::NEG_INFINITY);
        assert!(context.evaluate(&(Expression::from(0.0) / 0.0)).unwrap().is_nan());
    }

    #[test]
    fn logical_operators_evaluate_both_operands() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::from(0.0).and(Expression::variable("missing"));
        assert!(matches!(
            context.evaluate(&expr),
            Err(ChoiceError::MissingVariable { .. })
        ));
    }

    #[test]
    fn free_parameters_come_from_the_assignment() {
        let data = row(&[]);
        let free: Expression = Beta::free("B", 1.0).into();
        let fixed: Expression = Beta::fixed("F", 2.0).into();
        let expr = free + fixed;

        let betas = ParameterValues::new().with("B", 5.0).with("F", 100.0);
        let context = EvalContext::new(&data, &betas);
        assert_eq!(context.evaluate(&expr).unwrap(), 7.0);

        let empty = ParameterValues::new();
        let context = EvalContext::new(&data, &empty);
        let err = context.evaluate(&expr).unwrap_err();
        assert!(matches!(err, ChoiceError::MissingParameter { name } if name == "B"));
    }

    #[test]
    fn missing_variable_reports_kind_and_name() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let err = context
            .evaluate(&Expression::DefineVariable("CAR_AV_SP".into()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "DefineVariable `CAR_AV_SP` is not a column of the current row"
        );
    }

    #[test]
    fn elem_returns_case_or_zero() {
        let data = row(&[("key", 2.0)]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let cases = [(1, Expression::from(10.0)), (2, Expression::from(20.0))];

        let present = Expression::elem(cases.clone(), Expression::variable("key"));
        assert_eq!(context.evaluate(&present).unwrap(), 20.0);
        let absent = Expression::elem(cases, 7);
        assert_eq!(context.evaluate(&absent).unwrap(), 0.0);
    }

    #[test]
    fn elem_treats_non_finite_keys_as_absent() {
        let data = row(&[("key", f64::NAN)]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let cases = [(0, Expression::from(10.0)), (1, Expression::from(20.0))];
        let expr = Expression::elem(cases, Expression::variable("key"));
        assert_eq!(context.evaluate(&expr).unwrap(), 0.0);
    }

    #[test]
    fn unsupported_kinds_fail_loudly() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::monte_carlo(Expression::draws("e", "NORMAL"));
        assert!(matches!(
            context.evaluate(&expr),
            Err(ChoiceError::Unsupported { kind: "MonteCarlo" })
        ));
        let expr = Expression::derive(Expression::variable("x"), "x");
        assert!(matches!(
            context.evaluate(&expr),
            Err(ChoiceError::Unsupported { kind: "Derive" })
        ));
    }

    #[test]
    fn log_logit_matches_closed_form() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::log_logit(
            three_alternatives([1.0, 0.0, -1.0]),
            availabilities([true, true, true]),
            1,
        );
        let expected = -(1.0 + (-1.0f64).exp() + (-2.0f64).exp()).ln();
        assert_relative_eq!(context.evaluate(&expr).unwrap(), expected, epsilon = 1e-12);
        assert_relative_eq!(expected, -0.4076, epsilon = 1e-4);
    }

    #[test]
    fn log_logit_avoids_overflow() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::log_logit(
            three_alternatives([1000.0, 999.0, 998.0]),
            availabilities([true, true, true]),
            2,
        );
        let value = context.evaluate(&expr).unwrap();
        let expected = -1.0 - (1.0 + (-1.0f64).exp() + (-2.0f64).exp()).ln();
        assert_relative_eq!(value, expected, epsilon = 1e-12);
    }

    #[test]
    fn unavailable_chosen_alternative_has_zero_probability() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::log_logit(
            three_alternatives([1.0, 0.0, -1.0]),
            availabilities([true, false, true]),
            2,
        );
        assert_eq!(context.evaluate(&expr).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn invalid_choice_yields_nan() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::log_logit(
            three_alternatives([1.0, 0.0, -1.0]),
            availabilities([true, true, true]),
            9,
        );
        assert!(context.evaluate(&expr).unwrap().is_nan());
    }

    #[test]
    fn nan_choice_does_not_select_alternative_zero() {
        let data = row(&[("CHOICE", f64::NAN)]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let utilities = BTreeMap::from([(0, Expression::from(0.0)), (1, Expression::from(1.0))]);
        let availabilities = BTreeMap::from([(0, Expression::from(1.0)), (1, Expression::from(1.0))]);
        let expr = Expression::log_logit(utilities, availabilities, Expression::variable("CHOICE"));
        assert!(context.evaluate(&expr).unwrap().is_nan());
    }

    #[test]
    fn chosen_utility_of_minus_infinity_has_zero_probability() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let expr = Expression::log_logit(
            three_alternatives([1.0, f64::NEG_INFINITY, -1.0]),
            availabilities([true, true, true]),
            2,
        );
        assert_eq!(context.evaluate(&expr).unwrap(), f64::NEG_INFINITY);

        let expr = Expression::log_logit(
            three_alternatives([1.0, f64::NEG_INFINITY, -1.0]),
            availabilities([true, true, true]),
            1,
        );
        let expected = -(1.0 + (-2.0f64).exp()).ln();
        assert_relative_eq!(context.evaluate(&expr).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn unavailable_utilities_are_not_evaluated() {
        let data = row(&[]);
        let betas = ParameterValues::new();
        let context = EvalContext::new(&data, &betas);
        let utilities = BTreeMap::from([
            (1, Expression::from(0.0)),
            (2, Expression::variable("not_in_row")),
        ]);
        let availabilities =
            BTreeMap::from([(1, Expression::from(1.0)), (2, Expression::from(0.0))]);
        let expr = Expression::log_logit(utilities, availabilities, 1);
        assert_eq!(context.evaluate(&expr).unwrap(), 0.0);
    }
}
