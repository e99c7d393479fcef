//! Expression engine for multivariate extreme value (MEV) discrete choice models.
//!
//! Models are written as expression trees over dataset columns and named
//! parameters, combined with the usual arithmetic operators. The crate offers
//! tools to
//!
//! - build and inspect expression trees (`expression` module),
//! - evaluate a tree against one row and a parameter assignment (`evaluate` module),
//! - validate trees against a dataset before use (`audit` module),
//! - store observations and evaluate trees over all of them (`database` module),
//! - construct logit, nested logit and cross-nested logit log probabilities (`models` module), and
//! - bind a dataset and a log likelihood into an object an optimizer can drive (`estimation` module).
//!
//! Trees are immutable once built. Rows and parameter values are passed to each
//! evaluation through an [`EvalContext`], so one tree can be evaluated on many
//! rows in parallel.
//!
//! # Quick start
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! use mevrs::database::DatabaseBuilder;
//! use mevrs::estimation::ChoiceModel;
//! use mevrs::expression::{Beta, Expression};
//! use mevrs::models::{log_nested, Nest};
//! use mevrs::options::ModelOptions;
//!
//! let database = DatabaseBuilder::new("swissmetro")
//!     .column("CHOICE", vec![1.0, 2.0, 3.0, 3.0])
//!     .column("TRAIN_TT", vec![112.0, 103.0, 130.0, 103.0])
//!     .column("SM_TT", vec![63.0, 60.0, 67.0, 63.0])
//!     .column("CAR_TT", vec![117.0, 117.0, 72.0, 90.0])
//!     .build()
//!     .expect("validated database");
//!
//! let b_time = Expression::from(Beta::free("B_TIME", 0.0));
//! let asc_train = Expression::from(Beta::free("ASC_TRAIN", 0.0));
//! let asc_car = Expression::from(Beta::free("ASC_CAR", 0.0));
//! let time = |column: &str| Expression::variable(column) / 100.0;
//!
//! let utilities = BTreeMap::from([
//!     (1, asc_train + b_time.clone() * time("TRAIN_TT")),
//!     (2, b_time.clone() * time("SM_TT")),
//!     (3, asc_car + b_time * time("CAR_TT")),
//! ]);
//! let availabilities = mevrs::models::all_available(&utilities);
//! let nests = [
//!     Nest::new(Beta::free("MU", 1.0).with_bounds(Some(1.0), Some(10.0)), [1, 3]),
//!     Nest::new(1.0, [2]),
//! ];
//!
//! let log_probability =
//!     log_nested(&utilities, &availabilities, &nests, Expression::variable("CHOICE"))
//!         .expect("well-formed nests");
//! let model = ChoiceModel::new(database, log_probability, ModelOptions::default())
//!     .expect("audited model");
//!
//! let x = model.initial_vector();
//! println!("log likelihood: {}", model.log_likelihood_at(&x).unwrap());
//! println!("gradient: {}", model.gradient(&x).unwrap());
//! ```

pub mod audit;
pub mod database;
pub mod derivatives;
pub mod error;
pub mod estimation;
pub mod evaluate;
pub mod expression;
pub mod models;
pub mod options;
pub mod results;

pub use audit::AuditReport;
pub use database::{Database, DatabaseBuilder};
pub use error::{ChoiceError, Result};
pub use estimation::ChoiceModel;
pub use evaluate::{EvalContext, ParameterValues, RowBinding};
pub use expression::{AlternativeId, Beta, Expression, ParameterStatus};
pub use models::{CrossNest, Nest};
pub use options::{DerivativeOptions, EvaluationOptions, ModelOptions};
pub use results::{ModelSummary, ParameterEstimate};
