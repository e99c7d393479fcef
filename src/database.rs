//! Tabular observations and the dataset-wide evaluation modes used by choice models.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::audit::AuditReport;
use crate::error::{ChoiceError, Result};
use crate::evaluate::{integer_key, EvalContext, ParameterValues, RowBinding};
use crate::expression::{AlternativeId, Expression};
use crate::options::EvaluationOptions;

/// Named numeric columns, one row per observation.
#[derive(Clone, Debug)]
pub struct Database {
    name: String,
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    data: DMatrix<f64>,
    excluded: usize,
    panel_column: Option<String>,
    partition: Option<PanelPartition>,
    options: EvaluationOptions,
}

impl Database {
    /// Creates a database from column names and an `observations x columns` matrix.
    ///
    /// Fails if the shapes disagree, a name is repeated, or a column contains NaN.
    pub fn new<S: Into<String>>(name: S, columns: Vec<String>, data: DMatrix<f64>) -> Result<Self> {
        if columns.len() != data.ncols() {
            return Err(ChoiceError::dimension_mismatch(
                "column names",
                data.ncols(),
                columns.len(),
            ));
        }
        let mut column_index = HashMap::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            if column_index.insert(column.clone(), index).is_some() {
                return Err(ChoiceError::DuplicateColumn {
                    name: column.clone(),
                });
            }
        }

        let database = Self {
            name: name.into(),
            columns,
            column_index,
            data,
            excluded: 0,
            panel_column: None,
            partition: None,
            options: EvaluationOptions::default(),
        };
        for warning in database.audit().into_result()? {
            warn!("{warning}");
        }
        Ok(database)
    }

    /// Replaces the row evaluation settings.
    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    /// In-place counterpart of [`Database::with_options`].
    pub fn set_options(&mut self, options: EvaluationOptions) {
        self.options = options;
    }

    /// Current row evaluation settings.
    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    /// Name used in logs and as the default model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column names, in matrix column order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Read-only view of the `observations x columns` matrix.
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Copy of the values of column `name`.
    pub fn column(&self, name: &str) -> Option<DVector<f64>> {
        self.column_index
            .get(name)
            .map(|&index| self.data.column(index).into_owned())
    }

    /// Number of rows currently held, after exclusions.
    pub fn number_of_observations(&self) -> usize {
        self.data.nrows()
    }

    /// Number of independent units: groups when paneled, rows otherwise.
    pub fn sample_size(&self) -> usize {
        match &self.partition {
            Some(partition) => partition.group_count(),
            None => self.number_of_observations(),
        }
    }

    /// Total number of rows dropped by [`Database::remove`].
    pub fn excluded_count(&self) -> usize {
        self.excluded
    }

    /// Whether [`Database::panel`] has been called.
    pub fn is_panel(&self) -> bool {
        self.panel_column.is_some()
    }

    /// Name of the panel key column, if any.
    pub fn panel_column(&self) -> Option<&str> {
        self.panel_column.as_deref()
    }

    /// Contiguous row ranges of each individual, when paneled.
    pub fn partition(&self) -> Option<&PanelPartition> {
        self.partition.as_ref()
    }

    /// Binding of row `index` for expression evaluation.
    pub fn row(&self, index: usize) -> Row<'_> {
        Row {
            database: self,
            index,
        }
    }

    /// Reports columns containing NaN values as errors.
    pub fn audit(&self) -> AuditReport {
        let mut report = AuditReport::default();
        for (index, column) in self.columns.iter().enumerate() {
            let nans = self.data.column(index).iter().filter(|v| v.is_nan()).count();
            if nans > 0 {
                report.error(format!(
                    "Column {column} in the database contains {nans} NaN value(s)"
                ));
            }
        }
        report
    }

    fn evaluate_rows(
        &self,
        expression: &Expression,
        parameters: &ParameterValues,
        rows: Range<usize>,
    ) -> Result<Vec<f64>> {
        let evaluate_row = |index: usize| -> Result<f64> {
            let row = self.row(index);
            EvalContext::new(&row, parameters).evaluate(expression)
        };
        if self.options.use_parallel(rows.len()) {
            rows.into_par_iter().map(evaluate_row).collect()
        } else {
            rows.map(evaluate_row).collect()
        }
    }

    /// Value of `expression` for every row, in row order.
    pub fn values_from_database(
        &self,
        expression: &Expression,
        parameters: &ParameterValues,
    ) -> Result<DVector<f64>> {
        let values = self.evaluate_rows(expression, parameters, 0..self.number_of_observations())?;
        Ok(DVector::from_vec(values))
    }

    /// Sum of `expression` over all rows; rows evaluating to NaN contribute nothing.
    pub fn sum_from_database(
        &self,
        expression: &Expression,
        parameters: &ParameterValues,
    ) -> Result<f64> {
        let values = self.evaluate_rows(expression, parameters, 0..self.number_of_observations())?;
        let skipped = values.iter().filter(|v| v.is_nan()).count();
        if skipped > 0 {
            debug!("{skipped} row(s) evaluated to NaN and were left out of the sum");
        }
        Ok(nan_sum(&values))
    }

    /// NaN-excluding sum of `expression` within each panel group, in group order.
    pub fn sum_by_group(
        &self,
        expression: &Expression,
        parameters: &ParameterValues,
    ) -> Result<Vec<f64>> {
        let partition = self
            .partition
            .as_ref()
            .ok_or_else(|| ChoiceError::missing_component("panel column"))?;
        partition
            .groups()
            .map(|group| {
                self.evaluate_rows(expression, parameters, group.range())
                    .map(|values| nan_sum(&values))
            })
            .collect()
    }

    /// Evaluates `expression` with the initial values of its parameters and stores
    /// the result as column `name`, replacing any existing column of that name.
    pub fn add_column(&mut self, expression: &Expression, name: &str) -> Result<()> {
        let parameters = ParameterValues::initial_values(expression);
        let values = self.values_from_database(expression, &parameters)?;
        debug!("materialized column `{name}` in database `{}`", self.name);
        match self.column_index.get(name) {
            Some(&index) => self.data.set_column(index, &values),
            None => {
                let (rows, cols) = self.data.shape();
                let data = &self.data;
                self.data = DMatrix::from_fn(rows, cols + 1, |r, c| {
                    if c < cols {
                        data[(r, c)]
                    } else {
                        values[r]
                    }
                });
                self.column_index.insert(name.to_string(), cols);
                self.columns.push(name.to_string());
            }
        }
        Ok(())
    }

    /// Materializes `expression` as column `name` and returns a variable reading it.
    pub fn define_variable<E: Into<Expression>>(
        &mut self,
        name: &str,
        expression: E,
    ) -> Result<Expression> {
        self.add_column(&expression.into(), name)?;
        Ok(Expression::DefineVariable(name.to_string()))
    }

    /// Drops every row for which `mask` is nonzero and returns how many were dropped.
    pub fn remove(&mut self, mask: &Expression) -> Result<usize> {
        let parameters = ParameterValues::initial_values(mask);
        let flags = self.values_from_database(mask, &parameters)?;
        let kept: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag == 0.0)
            .map(|(index, _)| index)
            .collect();
        let removed = self.number_of_observations() - kept.len();
        self.keep_rows(&kept);
        self.excluded += removed;
        info!(
            "removed {removed} row(s) from database `{}`; {} remain",
            self.name,
            self.number_of_observations()
        );
        if self.partition.is_some() {
            self.build_panel_map()?;
        }
        Ok(removed)
    }

    fn keep_rows(&mut self, rows: &[usize]) {
        let data = &self.data;
        self.data = DMatrix::from_fn(rows.len(), data.ncols(), |r, c| data[(rows[r], c)]);
    }

    /// Whether the chosen alternative of each row is available.
    ///
    /// Rows whose choice has no availability condition, or is not finite, are
    /// reported as unavailable.
    pub fn check_availability_of_chosen_alt(
        &self,
        availabilities: &BTreeMap<AlternativeId, Expression>,
        choice: &Expression,
        parameters: &ParameterValues,
    ) -> Result<Vec<bool>> {
        (0..self.number_of_observations())
            .map(|index| {
                let row = self.row(index);
                let context = EvalContext::new(&row, parameters);
                let chosen = integer_key(context.evaluate(choice)?);
                match chosen.and_then(|chosen| availabilities.get(&chosen)) {
                    Some(availability) => Ok(context.evaluate(availability)? != 0.0),
                    None => Ok(false),
                }
            })
            .collect()
    }

    /// Number of rows where column `column` equals `value`.
    pub fn count(&self, column: &str, value: f64) -> Result<usize> {
        let index = self.column_position(column)?;
        Ok(self.data.column(index).iter().filter(|v| **v == value).count())
    }

    fn column_position(&self, column: &str) -> Result<usize> {
        self.column_index
            .get(column)
            .copied()
            .ok_or_else(|| ChoiceError::UnknownColumn {
                name: column.to_string(),
            })
    }

    /// Declares `column` as the panel key: rows are sorted by it and each
    /// individual's rows become one contiguous group.
    pub fn panel(&mut self, column: &str) -> Result<()> {
        self.column_position(column)?;
        self.panel_column = Some(column.to_string());
        self.build_panel_map()
    }

    fn build_panel_map(&mut self) -> Result<()> {
        let Some(column) = self.panel_column.clone() else {
            return Ok(());
        };
        let index = self.column_position(&column)?;
        let mut order: Vec<usize> = (0..self.number_of_observations()).collect();
        order.sort_by(|&a, &b| self.data[(a, index)].total_cmp(&self.data[(b, index)]));
        self.keep_rows(&order);

        let keys: Vec<f64> = self.data.column(index).iter().copied().collect();
        let partition = PanelPartition::new(&keys);
        info!(
            "database `{}` has {} individual(s) over {} row(s)",
            self.name,
            partition.group_count(),
            keys.len()
        );
        self.partition = Some(partition);
        Ok(())
    }

    /// Bootstrap sample of `size` rows (all rows by default) drawn with replacement.
    pub fn sample_with_replacement(&self, size: Option<usize>, seed: u64) -> Result<Database> {
        let n = self.number_of_observations();
        if n == 0 {
            return Err(ChoiceError::dimension_mismatch("bootstrap sample", 1, 0));
        }
        let size = size.unwrap_or(n);
        let mut rng = SmallRng::seed_from_u64(seed);
        let rows: Vec<usize> = (0..size).map(|_| rng.gen_range(0..n)).collect();
        let mut sample = Database {
            name: self.name.clone(),
            columns: self.columns.clone(),
            column_index: self.column_index.clone(),
            data: DMatrix::zeros(0, 0),
            excluded: 0,
            panel_column: None,
            partition: None,
            options: self.options.clone(),
        };
        let data = &self.data;
        sample.data = DMatrix::from_fn(size, data.ncols(), |r, c| data[(rows[r], c)]);
        Ok(sample)
    }

    /// Bootstrap sample of `size` panel groups (all groups by default) drawn with replacement.
    pub fn sample_groups_with_replacement(
        &self,
        size: Option<usize>,
        seed: u64,
    ) -> Result<Vec<PanelGroup>> {
        let partition = self
            .partition
            .as_ref()
            .ok_or_else(|| ChoiceError::missing_component("panel column"))?;
        let n = partition.group_count();
        if n == 0 {
            return Err(ChoiceError::dimension_mismatch("bootstrap sample", 1, 0));
        }
        let size = size.unwrap_or(n);
        let mut rng = SmallRng::seed_from_u64(seed);
        Ok((0..size)
            .map(|_| partition.groups[rng.gen_range(0..n)].clone())
            .collect())
    }
}

fn nan_sum(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).sum()
}

/// A single row of a [`Database`], bound for evaluation.
#[derive(Clone, Copy, Debug)]
pub struct Row<'a> {
    database: &'a Database,
    index: usize,
}

impl Row<'_> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl RowBinding for Row<'_> {
    fn variable(&self, name: &str) -> Option<f64> {
        self.database
            .column_index
            .get(name)
            .map(|&column| self.database.data[(self.index, column)])
    }
}

/// Builder that collects named columns before constructing a [`Database`].
#[derive(Debug)]
pub struct DatabaseBuilder {
    name: String,
    columns: Vec<(String, Vec<f64>)>,
    options: EvaluationOptions,
}

impl DatabaseBuilder {
    /// Empty builder with default evaluation settings.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            options: EvaluationOptions::default(),
        }
    }

    /// Appends a column.
    pub fn column<S: Into<String>>(mut self, name: S, values: Vec<f64>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    /// Evaluation settings of the built database.
    pub fn options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates column lengths and builds the database.
    pub fn build(self) -> Result<Database> {
        let Some((_, first)) = self.columns.first() else {
            return Err(ChoiceError::missing_component("at least one column"));
        };
        let rows = first.len();
        for (_, values) in &self.columns {
            if values.len() != rows {
                return Err(ChoiceError::dimension_mismatch(
                    "column length",
                    rows,
                    values.len(),
                ));
            }
        }
        let data = DMatrix::from_fn(rows, self.columns.len(), |r, c| self.columns[c].1[r]);
        let names = self.columns.into_iter().map(|(name, _)| name).collect();
        Ok(Database::new(self.name, names, data)?.with_options(self.options))
    }
}

/// Contiguous row ranges of the individuals of a paneled database.
#[derive(Clone, Debug)]
pub struct PanelPartition {
    groups: Vec<PanelGroup>,
    row_to_group: Vec<usize>,
}

impl PanelPartition {
    /// Scans sorted keys and records one group per run of equal keys.
    fn new(keys: &[f64]) -> Self {
        let n = keys.len();
        let mut groups = Vec::new();
        let mut row_to_group = vec![0usize; n];

        let mut start = 0usize;
        while start < n {
            let id = keys[start];
            let mut end = start + 1;
            while end < n && keys[end] == id {
                end += 1;
            }
            for slot in &mut row_to_group[start..end] {
                *slot = groups.len();
            }
            groups.push(PanelGroup { id, start, end });
            start = end;
        }

        Self {
            groups,
            row_to_group,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> impl Iterator<Item = &PanelGroup> {
        self.groups.iter()
    }

    /// Index of the group containing `row`.
    pub fn group_of(&self, row: usize) -> usize {
        self.row_to_group[row]
    }
}

/// Rows of one individual.
#[derive(Clone, Debug, PartialEq)]
pub struct PanelGroup {
    /// Value of the panel column for this individual.
    pub id: f64,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl PanelGroup {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn row_count(&self) -> usize {
        self.end - self.start
    }
}
