//! Expression trees describing utilities, availability conditions and likelihoods.
//!
//! An [`Expression`] is an immutable tree. Each node owns its children; the only
//! state that changes between evaluations (the current row and the current
//! parameter values) lives in an [`EvalContext`](crate::evaluate::EvalContext)
//! passed alongside the tree, so a single tree can be evaluated from many
//! threads at once.
//!
//! Plain numbers and booleans are accepted wherever an expression is expected
//! and are turned into [`Expression::Numeric`] nodes by the `From` conversions,
//! which every constructor funnels through.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Integer identifier of an alternative in a choice set.
pub type AlternativeId = i64;

/// Whether a parameter is estimated or kept at its initial value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterStatus {
    /// The parameter is estimated; its value comes from the parameter assignment.
    Free,
    /// The parameter keeps its initial value.
    Fixed,
}

/// A model parameter ("beta").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Beta {
    pub name: String,
    pub initial_value: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub status: ParameterStatus,
    pub description: String,
}

impl Beta {
    /// Creates a parameter with explicit bounds and status.
    pub fn new<S: Into<String>>(
        name: S,
        initial_value: f64,
        lower_bound: Option<f64>,
        upper_bound: Option<f64>,
        status: ParameterStatus,
    ) -> Self {
        Self {
            name: name.into(),
            initial_value,
            lower_bound,
            upper_bound,
            status,
            description: String::new(),
        }
    }

    /// Unbounded parameter to be estimated.
    pub fn free<S: Into<String>>(name: S, initial_value: f64) -> Self {
        Self::new(name, initial_value, None, None, ParameterStatus::Free)
    }

    /// Parameter held at `value` during estimation.
    pub fn fixed<S: Into<String>>(name: S, value: f64) -> Self {
        Self::new(name, value, None, None, ParameterStatus::Fixed)
    }

    /// Replaces the bounds; `None` leaves that side unbounded.
    pub fn with_bounds(mut self, lower_bound: Option<f64>, upper_bound: Option<f64>) -> Self {
        self.lower_bound = lower_bound;
        self.upper_bound = upper_bound;
        self
    }

    /// Attaches a free-form description used in reports.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Whether the parameter is estimated.
    pub fn is_free(&self) -> bool {
        self.status == ParameterStatus::Free
    }
}

/// Operators combining two sub-expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl BinaryOp {
    /// Applies the operator to two evaluated operands.
    ///
    /// Comparisons and logical operators return `1.0` or `0.0`. Both operands
    /// are always computed by the caller, there is no short-circuiting.
    pub fn apply(self, left: f64, right: f64) -> f64 {
        fn flag(value: bool) -> f64 {
            if value {
                1.0
            } else {
                0.0
            }
        }
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div => left / right,
            Self::Pow => left.powf(right),
            Self::Min => {
                if left <= right {
                    left
                } else {
                    right
                }
            }
            Self::Max => {
                if left >= right {
                    left
                } else {
                    right
                }
            }
            Self::And => flag(left != 0.0 && right != 0.0),
            Self::Or => flag(left != 0.0 || right != 0.0),
            Self::Equal => flag(left == right),
            Self::NotEqual => flag(left != right),
            Self::Less => flag(left < right),
            Self::LessOrEqual => flag(left <= right),
            Self::Greater => flag(left > right),
            Self::GreaterOrEqual => flag(left >= right),
        }
    }

    fn kind(self) -> NodeKind {
        match self {
            Self::Add => NodeKind::Plus,
            Self::Sub => NodeKind::Minus,
            Self::Mul => NodeKind::Times,
            Self::Div => NodeKind::Divide,
            Self::Pow => NodeKind::Power,
            Self::Min => NodeKind::Min,
            Self::Max => NodeKind::Max,
            Self::And => NodeKind::And,
            Self::Or => NodeKind::Or,
            Self::Equal => NodeKind::Equal,
            Self::NotEqual => NodeKind::NotEqual,
            Self::Less => NodeKind::Less,
            Self::LessOrEqual => NodeKind::LessOrEqual,
            Self::Greater => NodeKind::Greater,
            Self::GreaterOrEqual => NodeKind::GreaterOrEqual,
        }
    }

    fn symbol(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("+"),
            Self::Sub => Some("-"),
            Self::Mul => Some("*"),
            Self::Div => Some("/"),
            Self::Pow => Some("**"),
            Self::Min | Self::Max => None,
            Self::And => Some("and"),
            Self::Or => Some("or"),
            Self::Equal => Some("=="),
            Self::NotEqual => Some("!="),
            Self::Less => Some("<"),
            Self::LessOrEqual => Some("<="),
            Self::Greater => Some(">"),
            Self::GreaterOrEqual => Some(">="),
        }
    }
}

/// Operators applied to a single sub-expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    /// Average over simulation draws. Requires a numerical backend.
    MonteCarlo,
    /// Standard normal CDF. Requires a numerical backend.
    NormalCdf,
    /// Product of per-row likelihoods over a panel group. Requires a numerical backend.
    PanelLikelihoodTrajectory,
}

impl UnaryOp {
    fn kind(self) -> NodeKind {
        match self {
            Self::Neg => NodeKind::UnaryMinus,
            Self::Exp => NodeKind::Exp,
            Self::Log => NodeKind::Log,
            Self::MonteCarlo => NodeKind::MonteCarlo,
            Self::NormalCdf => NodeKind::NormalCdf,
            Self::PanelLikelihoodTrajectory => NodeKind::PanelLikelihoodTrajectory,
        }
    }
}

/// Fieldless tag of every node kind, used for structural queries and diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Numeric,
    Variable,
    DefineVariable,
    RandomVariable,
    Beta,
    Plus,
    Minus,
    Times,
    Divide,
    Power,
    Min,
    Max,
    And,
    Or,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    UnaryMinus,
    Exp,
    Log,
    MonteCarlo,
    NormalCdf,
    PanelLikelihoodTrajectory,
    Derive,
    Integrate,
    Draws,
    MultSum,
    Elem,
    LogitLike,
}

impl NodeKind {
    /// Name used in diagnostics and signatures.
    pub fn name(self) -> &'static str {
        match self {
            Self::Numeric => "Numeric",
            Self::Variable => "Variable",
            Self::DefineVariable => "DefineVariable",
            Self::RandomVariable => "RandomVariable",
            Self::Beta => "Beta",
            Self::Plus => "Plus",
            Self::Minus => "Minus",
            Self::Times => "Times",
            Self::Divide => "Divide",
            Self::Power => "Power",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::And => "And",
            Self::Or => "Or",
            Self::Equal => "Equal",
            Self::NotEqual => "NotEqual",
            Self::Less => "Less",
            Self::LessOrEqual => "LessOrEqual",
            Self::Greater => "Greater",
            Self::GreaterOrEqual => "GreaterOrEqual",
            Self::UnaryMinus => "UnaryMinus",
            Self::Exp => "Exp",
            Self::Log => "Log",
            Self::MonteCarlo => "MonteCarlo",
            Self::NormalCdf => "NormalCdf",
            Self::PanelLikelihoodTrajectory => "PanelLikelihoodTrajectory",
            Self::Derive => "Derive",
            Self::Integrate => "Integrate",
            Self::Draws => "Draws",
            Self::MultSum => "MultSum",
            Self::Elem => "Elem",
            Self::LogitLike => "LogitLike",
        }
    }

    /// Named leaves resolved against the row or the parameter values.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            Self::Variable | Self::DefineVariable | Self::RandomVariable | Self::Beta
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A node of a choice-model expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Numeric(f64),
    /// Column of the current row.
    Variable(String),
    /// Column materialized into the database by
    /// [`Database::define_variable`](crate::database::Database::define_variable).
    DefineVariable(String),
    /// Integration variable of an [`Expression::Integrate`] node.
    RandomVariable(String),
    Beta(Beta),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        child: Box<Expression>,
    },
    /// Derivative of `child` with respect to the literal `name`.
    Derive {
        child: Box<Expression>,
        name: String,
    },
    /// Integral of `child` over the random variable `name`.
    Integrate {
        child: Box<Expression>,
        name: String,
    },
    /// Simulation draws of the given type.
    Draws { name: String, draw_type: String },
    /// Sum of an arbitrary number of terms.
    MultSum(Vec<Expression>),
    /// Value of the case selected by the integer value of `key`, or 0 if no such case.
    Elem {
        cases: BTreeMap<i64, Expression>,
        key: Box<Expression>,
    },
    /// Log of the logit probability of the chosen alternative.
    LogitLike {
        utilities: BTreeMap<AlternativeId, Expression>,
        availabilities: BTreeMap<AlternativeId, Expression>,
        choice: Box<Expression>,
    },
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Self::Numeric(value)
    }
}

impl From<i32> for Expression {
    fn from(value: i32) -> Self {
        Self::Numeric(f64::from(value))
    }
}

/// Alternative ids used as constant choices.
impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Self::Numeric(value as f64)
    }
}

impl From<bool> for Expression {
    fn from(value: bool) -> Self {
        Self::Numeric(if value { 1.0 } else { 0.0 })
    }
}

impl From<Beta> for Expression {
    fn from(value: Beta) -> Self {
        Self::Beta(value)
    }
}

impl Expression {
    /// Constant node.
    pub fn numeric(value: f64) -> Self {
        Self::Numeric(value)
    }

    /// Reference to the column `name` of the row being evaluated.
    pub fn variable<S: Into<String>>(name: S) -> Self {
        Self::Variable(name.into())
    }

    /// Integration variable, see [`Expression::integrate`].
    pub fn random_variable<S: Into<String>>(name: S) -> Self {
        Self::RandomVariable(name.into())
    }

    /// Combines two operands, converting literals into numeric nodes.
    pub fn binary<L, R>(op: BinaryOp, left: L, right: R) -> Self
    where
        L: Into<Expression>,
        R: Into<Expression>,
    {
        Self::Binary {
            op,
            left: Box::new(left.into()),
            right: Box::new(right.into()),
        }
    }

    /// Applies `op` to a single operand.
    pub fn unary<E: Into<Expression>>(op: UnaryOp, child: E) -> Self {
        Self::Unary {
            op,
            child: Box::new(child.into()),
        }
    }

    /// `self ** exponent`.
    pub fn pow<R: Into<Expression>>(self, exponent: R) -> Self {
        Self::binary(BinaryOp::Pow, self, exponent)
    }

    /// Exponential.
    pub fn exp(self) -> Self {
        Self::unary(UnaryOp::Exp, self)
    }

    /// Natural logarithm.
    pub fn log(self) -> Self {
        Self::unary(UnaryOp::Log, self)
    }

    /// Smaller of the two operands.
    pub fn min<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::Min, self, other)
    }

    /// Larger of the two operands.
    pub fn max<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::Max, self, other)
    }

    /// 1 if both operands are nonzero, 0 otherwise. Same as `self & other`.
    pub fn and<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::And, self, other)
    }

    /// 1 if either operand is nonzero, 0 otherwise. Same as `self | other`.
    pub fn or<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::Or, self, other)
    }

    /// Comparisons evaluate to 1 when they hold and 0 otherwise.
    pub fn equal<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::Equal, self, other)
    }

    /// `self != other`, as 0 or 1.
    pub fn not_equal<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::NotEqual, self, other)
    }

    /// `self < other`, as 0 or 1.
    pub fn less<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::Less, self, other)
    }

    /// `self <= other`, as 0 or 1.
    pub fn less_or_equal<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::LessOrEqual, self, other)
    }

    /// `self > other`, as 0 or 1.
    pub fn greater<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::Greater, self, other)
    }

    /// `self >= other`, as 0 or 1.
    pub fn greater_or_equal<R: Into<Expression>>(self, other: R) -> Self {
        Self::binary(BinaryOp::GreaterOrEqual, self, other)
    }

    /// Sum of all `terms`. An empty sum evaluates to 0.
    pub fn mult_sum<I, E>(terms: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Expression>,
    {
        Self::MultSum(terms.into_iter().map(Into::into).collect())
    }

    /// Selects the case registered under the integer value of `key`.
    pub fn elem<I, E, K>(cases: I, key: K) -> Self
    where
        I: IntoIterator<Item = (i64, E)>,
        E: Into<Expression>,
        K: Into<Expression>,
    {
        Self::Elem {
            cases: cases.into_iter().map(|(k, e)| (k, e.into())).collect(),
            key: Box::new(key.into()),
        }
    }

    /// Log of the logit probability of the alternative designated by `choice`.
    ///
    /// The two maps are expected to share their keys; [`Expression::audit`] reports
    /// a mismatch, evaluation does not check it.
    pub fn log_logit<K: Into<Expression>>(
        utilities: BTreeMap<AlternativeId, Expression>,
        availabilities: BTreeMap<AlternativeId, Expression>,
        choice: K,
    ) -> Self {
        Self::LogitLike {
            utilities,
            availabilities,
            choice: Box::new(choice.into()),
        }
    }

    /// Derivative of `child` with respect to the parameter `name`. Not evaluated by this crate.
    pub fn derive<E: Into<Expression>, S: Into<String>>(child: E, name: S) -> Self {
        Self::Derive {
            child: Box::new(child.into()),
            name: name.into(),
        }
    }

    /// Integral of `child` in the random variable `name`. Audited, not evaluated.
    pub fn integrate<E: Into<Expression>, S: Into<String>>(child: E, name: S) -> Self {
        Self::Integrate {
            child: Box::new(child.into()),
            name: name.into(),
        }
    }

    /// Simulation draw of type `draw_type`; only valid inside [`Expression::monte_carlo`].
    pub fn draws<S: Into<String>, T: Into<String>>(name: S, draw_type: T) -> Self {
        Self::Draws {
            name: name.into(),
            draw_type: draw_type.into(),
        }
    }

    /// Simulated average of `child` over its draws. Audited, not evaluated.
    pub fn monte_carlo<E: Into<Expression>>(child: E) -> Self {
        Self::unary(UnaryOp::MonteCarlo, child)
    }

    /// Standard normal cumulative distribution function. Not evaluated by this crate.
    pub fn normal_cdf<E: Into<Expression>>(child: E) -> Self {
        Self::unary(UnaryOp::NormalCdf, child)
    }

    /// Product of `child` over the rows of a panel individual. Audited, not evaluated.
    pub fn panel_likelihood_trajectory<E: Into<Expression>>(child: E) -> Self {
        Self::unary(UnaryOp::PanelLikelihoodTrajectory, child)
    }

    /// Operator of the root node.
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Numeric(_) => NodeKind::Numeric,
            Self::Variable(_) => NodeKind::Variable,
            Self::DefineVariable(_) => NodeKind::DefineVariable,
            Self::RandomVariable(_) => NodeKind::RandomVariable,
            Self::Beta(_) => NodeKind::Beta,
            Self::Binary { op, .. } => op.kind(),
            Self::Unary { op, .. } => op.kind(),
            Self::Derive { .. } => NodeKind::Derive,
            Self::Integrate { .. } => NodeKind::Integrate,
            Self::Draws { .. } => NodeKind::Draws,
            Self::MultSum(_) => NodeKind::MultSum,
            Self::Elem { .. } => NodeKind::Elem,
            Self::LogitLike { .. } => NodeKind::LogitLike,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Name of a literal node (variable, random variable or parameter).
    pub fn literal_name(&self) -> Option<&str> {
        match self {
            Self::Variable(name) | Self::DefineVariable(name) | Self::RandomVariable(name) => {
                Some(name)
            }
            Self::Beta(beta) => Some(&beta.name),
            _ => None,
        }
    }

    /// Direct children in a fixed order: operands left to right, `Elem` cases
    /// before the key, `LogitLike` choice before utilities and availabilities.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Self::Numeric(_)
            | Self::Variable(_)
            | Self::DefineVariable(_)
            | Self::RandomVariable(_)
            | Self::Beta(_)
            | Self::Draws { .. } => Vec::new(),
            Self::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::Unary { child, .. }
            | Self::Derive { child, .. }
            | Self::Integrate { child, .. } => vec![child.as_ref()],
            Self::MultSum(terms) => terms.iter().collect(),
            Self::Elem { cases, key } => {
                let mut children: Vec<&Expression> = cases.values().collect();
                children.push(key.as_ref());
                children
            }
            Self::LogitLike {
                utilities,
                availabilities,
                choice,
            } => std::iter::once(choice.as_ref())
                .chain(utilities.values())
                .chain(availabilities.values())
                .collect(),
        }
    }

    /// Visits every node in pre-order together with the kinds of its ancestors,
    /// nearest ancestor last.
    pub fn walk_with_ancestors<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a Expression, &[NodeKind]),
    {
        let mut ancestors = Vec::new();
        self.walk_inner(&mut ancestors, visit);
    }

    fn walk_inner<'a, F>(&'a self, ancestors: &mut Vec<NodeKind>, visit: &mut F)
    where
        F: FnMut(&'a Expression, &[NodeKind]),
    {
        visit(self, ancestors.as_slice());
        ancestors.push(self.kind());
        for child in self.children() {
            child.walk_inner(ancestors, visit);
        }
        ancestors.pop();
    }

    fn for_each_node<'a, F: FnMut(&'a Expression)>(&'a self, visit: &mut F) {
        visit(self);
        for child in self.children() {
            child.for_each_node(visit);
        }
    }

    /// Names of every variable, random variable and parameter in the tree.
    pub fn set_of_literals(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.for_each_node(&mut |node| {
            if let Some(name) = node.literal_name() {
                names.insert(name.to_string());
            }
        });
        names
    }

    /// Names of the parameters whose status is selected by `free` and `fixed`.
    pub fn set_of_betas(&self, free: bool, fixed: bool) -> BTreeSet<String> {
        self.betas(free, fixed).into_keys().collect()
    }

    /// Parameters of the tree keyed by name, filtered by status.
    pub fn betas(&self, free: bool, fixed: bool) -> BTreeMap<String, Beta> {
        let mut betas = BTreeMap::new();
        self.for_each_node(&mut |node| {
            if let Self::Beta(beta) = node {
                let selected = if beta.is_free() { free } else { fixed };
                if selected {
                    betas
                        .entry(beta.name.clone())
                        .or_insert_with(|| beta.clone());
                }
            }
        });
        betas
    }

    /// Names of every random variable in the tree.
    pub fn random_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.for_each_node(&mut |node| {
            if let Self::RandomVariable(name) = node {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Draw names mapped to their draw type.
    pub fn draw_types(&self) -> BTreeMap<String, String> {
        let mut draws = BTreeMap::new();
        self.for_each_node(&mut |node| {
            if let Self::Draws { name, draw_type } = node {
                draws.insert(name.clone(), draw_type.clone());
            }
        });
        draws
    }

    /// First literal node called `name`, in pre-order.
    pub fn get_literal(&self, name: &str) -> Option<&Expression> {
        if self.literal_name() == Some(name) {
            return Some(self);
        }
        self.children()
            .into_iter()
            .find_map(|child| child.get_literal(name))
    }

    /// Whether this node or one of its descendants is of kind `kind`.
    pub fn embeds(&self, kind: NodeKind) -> bool {
        self.kind() == kind || self.children().into_iter().any(|child| child.embeds(kind))
    }

    /// One signature line per node, in post-order.
    ///
    /// Nodes are identified by their post-order index, so two trees built the
    /// same way produce the same signatures in any process.
    pub fn signatures(&self) -> Vec<String> {
        let mut signatures = Vec::new();
        self.push_signatures(&mut signatures);
        signatures
    }

    fn push_signatures(&self, out: &mut Vec<String>) -> usize {
        let child_ids: Vec<usize> = self
            .children()
            .into_iter()
            .map(|child| child.push_signatures(out))
            .collect();
        let id = out.len();
        let mut signature = format!("<{}>{{{}}}", self.kind_name(), id);
        match self {
            Self::Numeric(value) => signature.push_str(&format!(",{value}")),
            Self::Beta(beta) => signature.push_str(&format!(
                "\"{}\"[{:?}]",
                beta.name, beta.status
            )),
            Self::Variable(name) | Self::DefineVariable(name) | Self::RandomVariable(name) => {
                signature.push_str(&format!("\"{name}\""))
            }
            Self::Draws { name, draw_type } => {
                signature.push_str(&format!("\"{name}\"[{draw_type}]"))
            }
            Self::Derive { name, .. } | Self::Integrate { name, .. } => {
                signature.push_str(&format!(",{},\"{name}\"", child_ids[0]))
            }
            Self::Elem { cases, .. } => {
                let key_id = child_ids[cases.len()];
                signature.push_str(&format!("({}),{key_id}", cases.len()));
                for (case, child_id) in cases.keys().zip(&child_ids) {
                    signature.push_str(&format!(",{case},{child_id}"));
                }
            }
            Self::LogitLike { utilities, .. } => {
                let n = utilities.len();
                signature.push_str(&format!("({n}),{}", child_ids[0]));
                for (offset, alternative) in utilities.keys().enumerate() {
                    signature.push_str(&format!(
                        ",{alternative},{},{}",
                        child_ids[1 + offset],
                        child_ids[1 + n + offset]
                    ));
                }
            }
            Self::Binary { .. } | Self::Unary { .. } | Self::MultSum(_) => {
                signature.push_str(&format!("({})", child_ids.len()));
                for child_id in &child_ids {
                    signature.push_str(&format!(",{child_id}"));
                }
            }
        }
        out.push(signature);
        id
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "`{value}`"),
            Self::Variable(name) | Self::DefineVariable(name) | Self::RandomVariable(name) => {
                f.write_str(name)
            }
            Self::Beta(beta) => write!(f, "{}({})", beta.name, beta.initial_value),
            Self::Binary { op, left, right } => match op.symbol() {
                Some(symbol) => write!(f, "({left} {symbol} {right})"),
                None => write!(f, "{}({left},{right})", op.kind().name()),
            },
            Self::Unary { op, child } => match op {
                UnaryOp::Neg => write!(f, "(-{child})"),
                UnaryOp::Exp => write!(f, "exp({child})"),
                UnaryOp::Log => write!(f, "log({child})"),
                other => write!(f, "{}({child})", other.kind().name()),
            },
            Self::Derive { child, name } => write!(f, "Derive({child},'{name}')"),
            Self::Integrate { child, name } => write!(f, "Integrate({child},'{name}')"),
            Self::Draws { name, draw_type } => write!(f, "Draws('{name}','{draw_type}')"),
            Self::MultSum(terms) => {
                f.write_str("(")?;
                for (index, term) in terms.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" + ")?;
                    }
                    write!(f, "{term}")?;
                }
                f.write_str(")")
            }
            Self::Elem { cases, key } => {
                f.write_str("{")?;
                for (index, (case, expression)) in cases.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{case}:{expression}")?;
                }
                write!(f, "}}[{key}]")
            }
            Self::LogitLike {
                utilities, choice, ..
            } => {
                f.write_str("LogitLike(")?;
                for (index, (alternative, utility)) in utilities.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{alternative}:{utility}")?;
                }
                write!(f, ")[{choice}]")
            }
        }
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expression>> $trait<R> for Expression {
            type Output = Expression;

            fn $method(self, rhs: R) -> Expression {
                Expression::binary($op, self, rhs)
            }
        }

        impl $trait<Expression> for f64 {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::binary($op, self, rhs)
            }
        }

        impl $trait<Expression> for i32 {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::binary($op, self, rhs)
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);
binary_operator!(BitAnd, bitand, BinaryOp::And);
binary_operator!(BitOr, bitor, BinaryOp::Or);

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        Expression::unary(UnaryOp::Neg, self)
    }
}
