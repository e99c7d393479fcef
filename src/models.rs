//! Discrete choice models expressed as log-probability expression trees.
//!
//! Every constructor takes utilities and availability conditions keyed by
//! alternative id and returns the (log) probability of the alternative selected
//! by `choice`. Multivariate extreme value models are built from the partial
//! derivatives `G_i` of their generating function, folded into the logit
//! formula through the adjusted utilities `V_i + ln G_i`.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::error::{ChoiceError, Result};
use crate::expression::{AlternativeId, Expression};

/// Utility function of each alternative.
pub type Utilities = BTreeMap<AlternativeId, Expression>;

/// Availability condition of each alternative; nonzero means available.
pub type Availabilities = BTreeMap<AlternativeId, Expression>;

/// Per-alternative expressions such as generating-function derivatives or corrections.
pub type AlternativeTerms = BTreeMap<AlternativeId, Expression>;

/// Nest of a nested logit model.
#[derive(Clone, Debug, PartialEq)]
pub struct Nest {
    /// Dissimilarity parameter `mu_m`, normally constrained to be at least 1.
    pub mu: Expression,
    pub alternatives: Vec<AlternativeId>,
}

impl Nest {
    pub fn new<M, I>(mu: M, alternatives: I) -> Self
    where
        M: Into<Expression>,
        I: IntoIterator<Item = AlternativeId>,
    {
        Self {
            mu: mu.into(),
            alternatives: alternatives.into_iter().collect(),
        }
    }
}

/// Nest of a cross-nested logit model, with the membership weight `alpha_{i,m}`
/// of each of its alternatives.
#[derive(Clone, Debug, PartialEq)]
pub struct CrossNest {
    pub mu: Expression,
    pub alphas: BTreeMap<AlternativeId, Expression>,
}

impl CrossNest {
    pub fn new<M, I, A>(mu: M, alphas: I) -> Self
    where
        M: Into<Expression>,
        I: IntoIterator<Item = (AlternativeId, A)>,
        A: Into<Expression>,
    {
        Self {
            mu: mu.into(),
            alphas: alphas
                .into_iter()
                .map(|(alternative, alpha)| (alternative, alpha.into()))
                .collect(),
        }
    }
}

/// Availability conditions marking every alternative of `utilities` as available.
pub fn all_available(utilities: &Utilities) -> Availabilities {
    utilities
        .keys()
        .map(|alternative| (*alternative, Expression::numeric(1.0)))
        .collect()
}

/// Log of the multinomial logit probability of `choice`.
pub fn log_logit<C: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    choice: C,
) -> Result<Expression> {
    check_availabilities(utilities, availabilities)?;
    Ok(Expression::log_logit(
        utilities.clone(),
        availabilities.clone(),
        choice,
    ))
}

/// Multinomial logit probability of `choice`.
pub fn logit<C: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    choice: C,
) -> Result<Expression> {
    Ok(log_logit(utilities, availabilities, choice)?.exp())
}

/// Box-Cox transform `(x^lambda - 1) / lambda`.
pub fn boxcox<X, L>(x: X, lambda: L) -> Expression
where
    X: Into<Expression>,
    L: Into<Expression>,
{
    let lambda = lambda.into();
    (x.into().pow(lambda.clone()) - 1.0) / lambda
}

/// Log probability of a multivariate extreme value model with generating-function
/// derivatives `g`.
///
/// Alternatives whose availability condition is zero are left out, so `ln G_i` is
/// never evaluated for them. An available alternative with `G_i = 0` gets the
/// adjusted utility `-inf`, hence probability zero.
pub fn log_mev<C: Into<Expression>>(
    utilities: &Utilities,
    g: &AlternativeTerms,
    availabilities: &Availabilities,
    choice: C,
) -> Result<Expression> {
    check_availabilities(utilities, availabilities)?;
    let adjusted = utilities
        .iter()
        .map(|(alternative, v)| -> Result<(AlternativeId, Expression)> {
            let g = term(g, *alternative, "generating function derivative")?;
            let h = Expression::elem(
                [(0, Expression::numeric(0.0)), (1, v.clone() + g.clone().log())],
                available(&availabilities[alternative]),
            );
            Ok((*alternative, h))
        })
        .collect::<Result<Utilities>>()?;
    Ok(Expression::log_logit(adjusted, availabilities.clone(), choice))
}

/// Probability of a multivariate extreme value model, see [`log_mev`].
pub fn mev<C: Into<Expression>>(
    utilities: &Utilities,
    g: &AlternativeTerms,
    availabilities: &Availabilities,
    choice: C,
) -> Result<Expression> {
    Ok(log_mev(utilities, g, availabilities, choice)?.exp())
}

/// Log probability of an MEV model estimated on an endogenous sample: each
/// adjusted utility carries the additive `correction` of its alternative.
pub fn log_mev_selection_bias<C: Into<Expression>>(
    utilities: &Utilities,
    g: &AlternativeTerms,
    availabilities: &Availabilities,
    correction: &AlternativeTerms,
    choice: C,
) -> Result<Expression> {
    check_availabilities(utilities, availabilities)?;
    let adjusted = utilities
        .iter()
        .map(|(alternative, v)| -> Result<(AlternativeId, Expression)> {
            let g = term(g, *alternative, "generating function derivative")?;
            let correction = term(correction, *alternative, "selection bias correction")?;
            Ok((*alternative, v.clone() + g.clone().log() + correction.clone()))
        })
        .collect::<Result<Utilities>>()?;
    Ok(Expression::log_logit(adjusted, availabilities.clone(), choice))
}

/// Probability counterpart of [`log_mev_selection_bias`].
pub fn mev_selection_bias<C: Into<Expression>>(
    utilities: &Utilities,
    g: &AlternativeTerms,
    availabilities: &Availabilities,
    correction: &AlternativeTerms,
    choice: C,
) -> Result<Expression> {
    Ok(log_mev_selection_bias(utilities, g, availabilities, correction, choice)?.exp())
}

/// Generating-function derivatives of the nested logit model,
/// `G_i = exp((mu_m - 1) V_i) * (sum_{j in m} exp(mu_m V_j))^(1/mu_m - 1)`.
///
/// Each nest is evaluated relative to `R_m`, the largest utility among its
/// available members, as `exp((mu_m - 1)(V_i - R_m)) * S_m'^(1/mu_m - 1)` with
/// `S_m' = sum_{j in m} exp(mu_m (V_j - R_m))`, which is the same quantity without
/// overflowing for large utilities.
///
/// Alternatives outside every nest form their own nest with `mu = 1`, so `G_i = 1`.
pub fn mev_for_nested(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
) -> Result<AlternativeTerms> {
    nested_terms(utilities, availabilities, nests, None)
}

/// Nested logit derivatives with an explicit top-level scale `mu`:
/// `G_i = mu * exp((mu_m - 1) V_i) * S_m^(mu/mu_m - 1)`.
///
/// Shifted as in [`mev_for_nested`], which leaves a factor `exp((mu - 1) R_m)`.
pub fn mev_for_nested_mu<M: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
    mu: M,
) -> Result<AlternativeTerms> {
    nested_terms(utilities, availabilities, nests, Some(mu.into()))
}

fn nested_terms(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
    scale: Option<Expression>,
) -> Result<AlternativeTerms> {
    check_availabilities(utilities, availabilities)?;
    check_nests(utilities, nests)?;

    let mut g = AlternativeTerms::new();
    for nest in nests {
        let mu = &nest.mu;
        let reference = reference_utility(nest.alternatives.iter().map(|alternative| {
            (
                utilities[alternative].clone(),
                available(&availabilities[alternative]),
            )
        }));
        let shifted =
            |alternative: &AlternativeId| utilities[alternative].clone() - reference.clone();
        let sum = Expression::mult_sum(nest.alternatives.iter().map(|alternative| {
            gated(
                (mu.clone() * shifted(alternative)).exp(),
                available(&availabilities[alternative]),
            )
        }));
        for alternative in &nest.alternatives {
            let exponent = (mu.clone() - 1.0) * shifted(alternative);
            let term = match &scale {
                None => exponent.exp() * sum.clone().pow(1.0 / mu.clone() - 1.0),
                Some(scale) => {
                    let exponent = exponent + (scale.clone() - 1.0) * reference.clone();
                    scale.clone()
                        * exponent.exp()
                        * sum.clone().pow(scale.clone() / mu.clone() - 1.0)
                }
            };
            g.insert(
                *alternative,
                gated(term, available(&availabilities[alternative])),
            );
        }
    }
    for alternative in utilities.keys() {
        g.entry(*alternative).or_insert_with(|| Expression::numeric(1.0));
    }
    Ok(g)
}

/// Log probability of the nested logit model.
pub fn log_nested<C: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
    choice: C,
) -> Result<Expression> {
    let g = mev_for_nested(utilities, availabilities, nests)?;
    log_mev(utilities, &g, availabilities, choice)
}

/// Probability of the nested logit model.
pub fn nested<C: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
    choice: C,
) -> Result<Expression> {
    let g = mev_for_nested(utilities, availabilities, nests)?;
    mev(utilities, &g, availabilities, choice)
}

/// Log probability of the nested logit model normalized with the top-level scale `mu`.
pub fn log_nested_mev_mu<C, M>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
    choice: C,
    mu: M,
) -> Result<Expression>
where
    C: Into<Expression>,
    M: Into<Expression>,
{
    let g = mev_for_nested_mu(utilities, availabilities, nests, mu)?;
    log_mev(utilities, &g, availabilities, choice)
}

pub fn nested_mev_mu<C, M>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[Nest],
    choice: C,
    mu: M,
) -> Result<Expression>
where
    C: Into<Expression>,
    M: Into<Expression>,
{
    let g = mev_for_nested_mu(utilities, availabilities, nests, mu)?;
    mev(utilities, &g, availabilities, choice)
}

/// Generating-function derivatives of the cross-nested logit model.
///
/// With `S_m = sum_{j in m} alpha_{j,m}^mu_m exp(mu_m V_j)` over available members,
/// `G_i = sum_m alpha_{i,m}^mu_m exp((mu_m - 1) V_i) S_m^(1/mu_m - 1)`.
/// Nests are shifted by the largest utility among their available members with a
/// nonzero weight, as in [`mev_for_nested`].
pub fn mev_for_cross_nested(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
) -> Result<AlternativeTerms> {
    cross_nested_terms(utilities, availabilities, nests, None)
}

/// Cross-nested derivatives kept homogeneous of degree one through `mu0`:
/// weights enter as `alpha^(mu_m/mu0)` and each contribution is
/// `mu0 * S_m^(mu0/mu_m - 1) * alpha_{i,m}^(mu_m/mu0) * exp((mu_m - 1) V_i)`.
pub fn mev_for_cross_nested_mu<M: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
    mu0: M,
) -> Result<AlternativeTerms> {
    cross_nested_terms(utilities, availabilities, nests, Some(mu0.into()))
}

fn cross_nested_terms(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
    mu0: Option<Expression>,
) -> Result<AlternativeTerms> {
    check_availabilities(utilities, availabilities)?;
    for (index, nest) in nests.iter().enumerate() {
        if nest.alphas.is_empty() {
            return Err(ChoiceError::EmptyNest { nest: index });
        }
        check_known(utilities, nest.alphas.keys(), "cross nest")?;
    }

    let mut contributions: BTreeMap<AlternativeId, Vec<Expression>> =
        utilities.keys().map(|alternative| (*alternative, Vec::new())).collect();
    for nest in nests {
        let mu = &nest.mu;
        let weight = |alpha: &Expression| match &mu0 {
            None => alpha.clone().pow(mu.clone()),
            Some(mu0) => alpha.clone().pow(mu.clone() / mu0.clone()),
        };
        // Members with a zero weight take no part in the nest.
        let member = |alternative: &AlternativeId, alpha: &Expression| {
            available(&availabilities[alternative]) & alpha.clone().not_equal(0)
        };
        let reference = reference_utility(nest.alphas.iter().map(|(alternative, alpha)| {
            (utilities[alternative].clone(), member(alternative, alpha))
        }));
        let shifted =
            |alternative: &AlternativeId| utilities[alternative].clone() - reference.clone();
        let sum = Expression::mult_sum(nest.alphas.iter().map(|(alternative, alpha)| {
            gated(
                weight(alpha) * (mu.clone() * shifted(alternative)).exp(),
                member(alternative, alpha),
            )
        }));
        for (alternative, alpha) in &nest.alphas {
            let exponent = (mu.clone() - 1.0) * shifted(alternative);
            let term = match &mu0 {
                None => {
                    weight(alpha) * exponent.exp() * sum.clone().pow(1.0 / mu.clone() - 1.0)
                }
                Some(mu0) => {
                    let exponent = exponent + (mu0.clone() - 1.0) * reference.clone();
                    mu0.clone()
                        * sum.clone().pow(mu0.clone() / mu.clone() - 1.0)
                        * weight(alpha)
                        * exponent.exp()
                }
            };
            if let Some(list) = contributions.get_mut(alternative) {
                list.push(gated(term, member(alternative, alpha)));
            }
        }
    }

    Ok(contributions
        .into_iter()
        .map(|(alternative, terms)| {
            if terms.is_empty() {
                warn!("alternative {alternative} does not belong to any cross nest");
            }
            (alternative, Expression::mult_sum(terms))
        })
        .collect())
}

/// Log probability of the cross-nested logit model.
pub fn log_cnl_avail<C: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
    choice: C,
) -> Result<Expression> {
    let g = mev_for_cross_nested(utilities, availabilities, nests)?;
    log_mev(utilities, &g, availabilities, choice)
}

/// Probability of the cross-nested logit model.
pub fn cnl_avail<C: Into<Expression>>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
    choice: C,
) -> Result<Expression> {
    let g = mev_for_cross_nested(utilities, availabilities, nests)?;
    mev(utilities, &g, availabilities, choice)
}

/// Log probability of the cross-nested logit model with homogeneity parameter `mu0`.
pub fn log_cnl_mu<C, M>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
    choice: C,
    mu0: M,
) -> Result<Expression>
where
    C: Into<Expression>,
    M: Into<Expression>,
{
    let g = mev_for_cross_nested_mu(utilities, availabilities, nests, mu0)?;
    log_mev(utilities, &g, availabilities, choice)
}

pub fn cnl_mu<C, M>(
    utilities: &Utilities,
    availabilities: &Availabilities,
    nests: &[CrossNest],
    choice: C,
    mu0: M,
) -> Result<Expression>
where
    C: Into<Expression>,
    M: Into<Expression>,
{
    let g = mev_for_cross_nested_mu(utilities, availabilities, nests, mu0)?;
    mev(utilities, &g, availabilities, choice)
}

/// `value` when the 0/1 `condition` is 1, 0 otherwise. `value` is not evaluated
/// when the condition is 0.
fn gated(value: Expression, condition: Expression) -> Expression {
    Expression::elem([(0, Expression::numeric(0.0)), (1, value)], condition)
}

fn available(availability: &Expression) -> Expression {
    availability.clone().not_equal(0)
}

/// Largest utility among the members whose 0/1 condition is 1, `-inf` if none.
fn reference_utility<I>(members: I) -> Expression
where
    I: IntoIterator<Item = (Expression, Expression)>,
{
    members
        .into_iter()
        .map(|(utility, condition)| {
            Expression::elem(
                [(0, Expression::numeric(f64::NEG_INFINITY)), (1, utility)],
                condition,
            )
        })
        .reduce(|left, right| left.max(right))
        .unwrap_or(Expression::Numeric(f64::NEG_INFINITY))
}

fn term<'a>(
    terms: &'a AlternativeTerms,
    alternative: AlternativeId,
    context: &'static str,
) -> Result<&'a Expression> {
    terms
        .get(&alternative)
        .ok_or(ChoiceError::IncompleteMapping {
            context,
            alternative,
        })
}

/// Utilities and availability conditions must cover the same alternatives.
fn check_availabilities(utilities: &Utilities, availabilities: &Availabilities) -> Result<()> {
    check_known(utilities, availabilities.keys(), "availability conditions")?;
    match utilities
        .keys()
        .find(|alternative| !availabilities.contains_key(*alternative))
    {
        Some(alternative) => Err(ChoiceError::IncompleteMapping {
            context: "availability condition",
            alternative: *alternative,
        }),
        None => Ok(()),
    }
}

fn check_known<'a, I>(utilities: &Utilities, alternatives: I, context: &'static str) -> Result<()>
where
    I: IntoIterator<Item = &'a AlternativeId>,
{
    match alternatives
        .into_iter()
        .find(|alternative| !utilities.contains_key(*alternative))
    {
        Some(alternative) => Err(ChoiceError::UnknownAlternative {
            context,
            alternative: *alternative,
        }),
        None => Ok(()),
    }
}

fn check_nests(utilities: &Utilities, nests: &[Nest]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for (index, nest) in nests.iter().enumerate() {
        if nest.alternatives.is_empty() {
            return Err(ChoiceError::EmptyNest { nest: index });
        }
        check_known(utilities, &nest.alternatives, "nest")?;
        for alternative in &nest.alternatives {
            if !seen.insert(*alternative) {
                return Err(ChoiceError::DuplicateNestMembership {
                    alternative: *alternative,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use approx::assert_relative_eq;

    use super::*;
    use crate::evaluate::{EvalContext, ParameterValues};
    use crate::expression::Beta;

    fn utilities(values: &[(AlternativeId, f64)]) -> Utilities {
        values
            .iter()
            .map(|(alternative, v)| (*alternative, Expression::numeric(*v)))
            .collect()
    }

    fn eval(expression: &Expression) -> f64 {
        let row: HashMap<String, f64> = HashMap::new();
        let parameters = ParameterValues::initial_values(expression);
        EvalContext::new(&row, &parameters)
            .evaluate(expression)
            .unwrap()
    }

    fn probabilities<F>(alternatives: &[AlternativeId], model: F) -> Vec<f64>
    where
        F: Fn(AlternativeId) -> Result<Expression>,
    {
        alternatives
            .iter()
            .map(|alternative| eval(&model(*alternative).unwrap()).exp())
            .collect()
    }

    #[test]
    fn logit_matches_closed_form() {
        let v = utilities(&[(1, 1.0), (2, 0.0), (3, -1.0)]);
        let av = all_available(&v);
        let p = eval(&logit(&v, &av, 1).unwrap());
        let expected = 1.0_f64.exp() / (1.0_f64.exp() + 1.0 + (-1.0_f64).exp());
        assert_relative_eq!(p, expected, epsilon = 1e-12);
    }

    #[test]
    fn boxcox_transform() {
        let value = eval(&boxcox(4.0, 0.5));
        assert_relative_eq!(value, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn construction_rejects_mismatched_mappings() {
        let v = utilities(&[(1, 0.0), (2, 0.0)]);
        let mut av = all_available(&v);
        av.remove(&2);
        assert!(matches!(
            log_logit(&v, &av, 1),
            Err(ChoiceError::IncompleteMapping { alternative: 2, .. })
        ));
        av.insert(2, Expression::numeric(1.0));
        av.insert(9, Expression::numeric(1.0));
        assert!(matches!(
            log_logit(&v, &av, 1),
            Err(ChoiceError::UnknownAlternative { alternative: 9, .. })
        ));
    }

    #[test]
    fn nest_validation() {
        let v = utilities(&[(1, 0.0), (2, 0.0), (3, 0.0)]);
        let av = all_available(&v);
        let duplicate = [Nest::new(2.0, [1, 2]), Nest::new(1.0, [2, 3])];
        assert!(matches!(
            log_nested(&v, &av, &duplicate, 1),
            Err(ChoiceError::DuplicateNestMembership { alternative: 2 })
        ));
        let empty = [Nest::new(2.0, [1, 2]), Nest::new(1.0, [])];
        assert!(matches!(
            log_nested(&v, &av, &empty, 1),
            Err(ChoiceError::EmptyNest { nest: 1 })
        ));
        let unknown = [Nest::new(2.0, [1, 4])];
        assert!(matches!(
            log_nested(&v, &av, &unknown, 1),
            Err(ChoiceError::UnknownAlternative { alternative: 4, .. })
        ));
    }

    #[test]
    fn single_nest_with_unit_mu_is_logit() {
        let v = utilities(&[(1, 0.4), (2, -1.2), (3, 2.5)]);
        let av = all_available(&v);
        let nests = [Nest::new(1.0, [1, 2, 3])];
        for alternative in [1, 2, 3] {
            let nested = eval(&log_nested(&v, &av, &nests, alternative).unwrap());
            let logit = eval(&log_logit(&v, &av, alternative).unwrap());
            assert_relative_eq!(nested, logit, epsilon = 1e-12);
        }
    }

    #[test]
    fn two_nest_scenario() {
        let v = utilities(&[(1, 0.0), (2, 0.0), (3, 0.0)]);
        let av = all_available(&v);
        let nests = [Nest::new(2.0, [1, 2]), Nest::new(1.0, [3])];
        let p3 = eval(&nested(&v, &av, &nests, 3).unwrap());
        // Nest {1, 2} has inclusive value 2^(1/2), nest {3} has 1.
        assert_relative_eq!(p3, 1.0 / (1.0 + 2.0_f64.sqrt()), epsilon = 1e-9);

        let total: f64 = probabilities(&[1, 2, 3], |c| log_nested(&v, &av, &nests, c))
            .iter()
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn unnested_alternatives_are_singletons() {
        let v = utilities(&[(1, 0.0), (2, 0.0), (3, 0.0)]);
        let av = all_available(&v);
        let partial = [Nest::new(2.0, [1, 2])];
        let explicit = [Nest::new(2.0, [1, 2]), Nest::new(1.0, [3])];
        let g = mev_for_nested(&v, &av, &partial).unwrap();
        assert_eq!(g[&3], Expression::numeric(1.0));
        assert_relative_eq!(
            eval(&log_nested(&v, &av, &partial, 3).unwrap()),
            eval(&log_nested(&v, &av, &explicit, 3).unwrap()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn nested_respects_availability() {
        let v = utilities(&[(1, 0.3), (2, 0.1), (3, -0.5)]);
        let mut av = all_available(&v);
        av.insert(2, Expression::numeric(0.0));
        let nests = [Nest::new(Beta::fixed("MU", 1.7), [1, 2]), Nest::new(1.0, [3])];
        let p = probabilities(&[1, 2, 3], |c| log_nested(&v, &av, &nests, c));
        assert_eq!(p[1], 0.0);
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // With a single available member, the nest collapses to that alternative.
        let logit = probabilities(&[1, 2, 3], |c| log_logit(&v, &av, c));
        assert_relative_eq!(p[0], logit[0], epsilon = 1e-12);
    }

    #[test]
    fn nested_mu_with_unit_scale_matches_nested() {
        let v = utilities(&[(1, 0.2), (2, -0.7), (3, 1.1), (4, 0.0)]);
        let av = all_available(&v);
        let nests = [Nest::new(1.5, [1, 2]), Nest::new(2.5, [3, 4])];
        for alternative in [1, 2, 3, 4] {
            let plain = eval(&log_nested(&v, &av, &nests, alternative).unwrap());
            let scaled = eval(&log_nested_mev_mu(&v, &av, &nests, alternative, 1.0).unwrap());
            assert_relative_eq!(plain, scaled, epsilon = 1e-12);
        }
        let p = probabilities(&[1, 2, 3, 4], |c| {
            nested_mev_mu(&v, &av, &nests, c, 1.3).map(Expression::log)
        });
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn unit_weight_cross_nesting_is_nested() {
        let v = utilities(&[(1, 0.5), (2, -0.25), (3, 1.0), (4, 0.0)]);
        let av = all_available(&v);
        let nests = [Nest::new(1.8, [1, 2]), Nest::new(3.0, [3, 4])];
        let cross = [
            CrossNest::new(1.8, [(1, 1.0), (2, 1.0)]),
            CrossNest::new(3.0, [(3, 1.0), (4, 1.0)]),
        ];
        for alternative in [1, 2, 3, 4] {
            assert_relative_eq!(
                eval(&log_cnl_avail(&v, &av, &cross, alternative).unwrap()),
                eval(&log_nested(&v, &av, &nests, alternative).unwrap()),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn cross_nested_probabilities_sum_to_one() {
        let v = utilities(&[(1, 0.5), (2, -0.25), (3, 1.0)]);
        let mut av = all_available(&v);
        let nests = [
            CrossNest::new(2.0, [(1, 1.0), (2, 0.3)]),
            CrossNest::new(1.5, [(2, 0.7), (3, 1.0)]),
        ];
        let p = probabilities(&[1, 2, 3], |c| log_cnl_avail(&v, &av, &nests, c));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        av.insert(3, Expression::numeric(0.0));
        let p = probabilities(&[1, 2, 3], |c| cnl_avail(&v, &av, &nests, c).map(Expression::log));
        assert_eq!(p[2], 0.0);
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        let av = all_available(&v);
        let p = probabilities(&[1, 2, 3], |c| log_cnl_mu(&v, &av, &nests, c, 1.0));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn alternative_outside_cross_nests_has_zero_derivative() {
        let v = utilities(&[(1, 0.0), (2, 0.0)]);
        let av = all_available(&v);
        let g = mev_for_cross_nested(&v, &av, &[CrossNest::new(2.0, [(1, 1.0)])]).unwrap();
        assert_eq!(eval(&g[&2]), 0.0);
    }

    #[test]
    fn zero_weight_alternative_has_zero_probability() {
        let v = utilities(&[(1, 0.0), (2, 0.0)]);
        let av = all_available(&v);
        let nests = [CrossNest::new(2.0, [(1, 1.0), (2, 0.0)])];
        let log_p2 = log_cnl_avail(&v, &av, &nests, 2).unwrap();
        assert_eq!(eval(&log_p2), f64::NEG_INFINITY);
        let log_p1 = log_cnl_avail(&v, &av, &nests, 1).unwrap();
        assert_relative_eq!(eval(&log_p1), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn nested_logit_with_large_utilities() {
        let v = utilities(&[(1, 400.0), (2, 399.0), (3, 0.0)]);
        let av = all_available(&v);
        let nests = [Nest::new(2.0, [1, 2])];
        let log_p1 = eval(&log_nested(&v, &av, &nests, 1).unwrap());
        assert_relative_eq!(log_p1, -(1.0 + (-2.0_f64).exp()).ln(), epsilon = 1e-12);

        let v = utilities(&[(1, 80.0), (2, 79.5), (3, 1.0), (4, 75.0)]);
        let av = all_available(&v);
        let nests = [Nest::new(10.0, [1, 2]), Nest::new(4.0, [3, 4])];
        let p = probabilities(&[1, 2, 3, 4], |c| log_nested(&v, &av, &nests, c));
        assert!(p.iter().all(|p| p.is_finite()));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        let p = probabilities(&[1, 2, 3, 4], |c| log_nested_mev_mu(&v, &av, &nests, c, 1.0));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn cross_nested_logit_with_large_utilities() {
        let v = utilities(&[(1, 400.0), (2, 399.0), (3, 0.0)]);
        let av = all_available(&v);
        let nests = [
            CrossNest::new(2.0, [(1, 1.0), (2, 1.0)]),
            CrossNest::new(1.0, [(3, 1.0)]),
        ];
        let log_p1 = eval(&log_cnl_avail(&v, &av, &nests, 1).unwrap());
        assert_relative_eq!(log_p1, -(1.0 + (-2.0_f64).exp()).ln(), epsilon = 1e-12);

        let v = utilities(&[(1, 80.0), (2, 79.5), (3, 78.0)]);
        let av = all_available(&v);
        let nests = [
            CrossNest::new(10.0, [(1, 1.0), (2, 0.5), (3, 0.0)]),
            CrossNest::new(6.0, [(2, 0.5), (3, 1.0)]),
        ];
        let p = probabilities(&[1, 2, 3], |c| log_cnl_avail(&v, &av, &nests, c));
        assert!(p.iter().all(|p| p.is_finite()));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        let p = probabilities(&[1, 2, 3], |c| log_cnl_mu(&v, &av, &nests, c, 1.0));
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn selection_bias_with_zero_derivative() {
        let v = utilities(&[(1, 0.0), (2, 0.0)]);
        let av = all_available(&v);
        let g = utilities(&[(1, 1.0), (2, 0.0)]);
        let correction = utilities(&[(1, 0.0), (2, 0.5)]);
        let log_p2 = log_mev_selection_bias(&v, &g, &av, &correction, 2).unwrap();
        assert_eq!(eval(&log_p2), f64::NEG_INFINITY);
        let log_p1 = log_mev_selection_bias(&v, &g, &av, &correction, 1).unwrap();
        assert_relative_eq!(eval(&log_p1), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn selection_bias_shifts_utilities() {
        let v = utilities(&[(1, 0.0), (2, 0.0)]);
        let av = all_available(&v);
        let g = mev_for_nested(&v, &av, &[]).unwrap();
        let correction = utilities(&[(1, 2.0_f64.ln()), (2, 0.0)]);
        let p1 = eval(&mev_selection_bias(&v, &g, &av, &correction, 1).unwrap());
        assert_relative_eq!(p1, 2.0 / 3.0, epsilon = 1e-12);

        let missing = utilities(&[(1, 0.0)]);
        assert!(matches!(
            log_mev_selection_bias(&v, &g, &av, &missing, 1),
            Err(ChoiceError::IncompleteMapping { alternative: 2, .. })
        ));
    }
}
