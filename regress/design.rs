//! Design-matrix construction.
//!
//! A model is an explicit response plus an ordered list of predictor
//! variables. The builder turns that list into `X` with an intercept column
//! and records, for every predictor *term*, the range of columns it owns.
//! Numeric predictors own one column; categorical predictors are treatment
//! coded against their first level and own one column per remaining level.

use crate::data::{Dataset, RowId, Variable, VariableKind};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Name of the intercept column in every design and report.
pub const INTERCEPT_NAME: &str = "(Intercept)";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DesignError {
    #[error("The response '{0}' is categorical; only numeric responses can be modelled.")]
    CategoricalResponse(Variable),

    #[error("Predictor '{0}' is listed more than once.")]
    DuplicatePredictor(Variable),

    #[error("'{0}' cannot be both the response and a predictor.")]
    ResponseAsPredictor(Variable),

    #[error("Cannot build a design matrix from an empty dataset.")]
    EmptyDataset,

    #[error("Term index {index} is out of range for a model with {count} terms.")]
    TermOutOfRange { index: usize, count: usize },
}

/// Response plus ordered predictor list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub response: Variable,
    pub predictors: Vec<Variable>,
}

impl ModelSpec {
    pub fn new(
        response: Variable,
        predictors: impl IntoIterator<Item = Variable>,
    ) -> Result<Self, DesignError> {
        if response.kind() == VariableKind::Categorical {
            return Err(DesignError::CategoricalResponse(response));
        }
        let mut list: Vec<Variable> = Vec::new();
        for p in predictors {
            if p == response {
                return Err(DesignError::ResponseAsPredictor(p));
            }
            if list.contains(&p) {
                return Err(DesignError::DuplicatePredictor(p));
            }
            list.push(p);
        }
        Ok(Self {
            response,
            predictors: list,
        })
    }

    /// Same model with one predictor dropped (no-op if it is absent).
    pub fn without(&self, variable: Variable) -> ModelSpec {
        ModelSpec {
            response: self.response,
            predictors: self
                .predictors
                .iter()
                .copied()
                .filter(|&p| p != variable)
                .collect(),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ ", self.response)?;
        if self.predictors.is_empty() {
            return f.write_str("1");
        }
        let names: Vec<&str> = self.predictors.iter().map(|p| p.name()).collect();
        f.write_str(&names.join(" + "))
    }
}

/// One predictor term and the design columns it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub variable: Variable,
    pub col_range: Range<usize>,
}

/// Holds the layout of the design matrix `X`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermLayout {
    pub intercept_col: usize,
    pub terms: Vec<Term>,
    pub total_cols: usize,
}

impl TermLayout {
    fn new(predictors: &[Variable]) -> Self {
        let intercept_col = 0;
        let mut current_col = intercept_col + 1;
        let mut terms = Vec::with_capacity(predictors.len());
        for &variable in predictors {
            let width = term_width(variable);
            terms.push(Term {
                variable,
                col_range: current_col..current_col + width,
            });
            current_col += width;
        }
        Self {
            intercept_col,
            terms,
            total_cols: current_col,
        }
    }

    /// Names of all columns in layout order, intercept first.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.total_cols);
        names.push(INTERCEPT_NAME.to_string());
        for term in &self.terms {
            match term.variable.kind() {
                VariableKind::Numeric => names.push(term.variable.name().to_string()),
                VariableKind::Categorical => names.extend(
                    term.variable.levels()[1..]
                        .iter()
                        .map(|level| format!("{}:{}", term.variable.name(), level)),
                ),
            }
        }
        names
    }
}

fn term_width(variable: Variable) -> usize {
    match variable.kind() {
        VariableKind::Numeric => 1,
        VariableKind::Categorical => variable.levels().len() - 1,
    }
}

/// A fully materialized design: `y`, `X`, column names and the row ids the
/// rows came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub spec: ModelSpec,
    pub y: Array1<f64>,
    pub x: Array2<f64>,
    pub column_names: Vec<String>,
    pub row_ids: Vec<RowId>,
    pub layout: TermLayout,
}

impl DesignMatrix {
    pub fn build(dataset: &Dataset, spec: &ModelSpec) -> Result<Self, DesignError> {
        if dataset.is_empty() {
            return Err(DesignError::EmptyDataset);
        }
        let layout = TermLayout::new(&spec.predictors);
        let n = dataset.len();
        let mut x = Array2::<f64>::zeros((n, layout.total_cols));
        x.column_mut(layout.intercept_col).fill(1.0);

        for (mut row, obs) in x.axis_iter_mut(Axis(0)).zip(dataset.iter()) {
            for term in &layout.terms {
                match obs.level_index(term.variable) {
                    None => row[term.col_range.start] = obs.value(term.variable),
                    // Baseline level (index 0) leaves all indicator columns at zero.
                    Some(0) => {}
                    Some(level) => row[term.col_range.start + level - 1] = 1.0,
                }
            }
        }

        log::debug!(
            "Built design for {} with {} rows and {} columns",
            spec,
            n,
            layout.total_cols
        );

        Ok(Self {
            spec: spec.clone(),
            y: dataset.numeric_column(spec.response),
            x,
            column_names: layout.column_names(),
            row_ids: dataset.row_ids(),
            layout,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_terms(&self) -> usize {
        self.layout.terms.len()
    }

    pub fn term_index(&self, variable: Variable) -> Option<usize> {
        self.layout.terms.iter().position(|t| t.variable == variable)
    }

    /// Sub-design with the intercept and the given terms, kept in their
    /// original order. Rows are shared, so sub-models are directly comparable.
    pub fn select_terms(&self, term_indices: &[usize]) -> Result<DesignMatrix, DesignError> {
        let count = self.n_terms();
        let mut chosen: Vec<usize> = term_indices.to_vec();
        chosen.sort_unstable();
        chosen.dedup();
        if let Some(&index) = chosen.iter().find(|&&i| i >= count) {
            return Err(DesignError::TermOutOfRange { index, count });
        }

        let predictors: Vec<Variable> = chosen
            .iter()
            .map(|&i| self.layout.terms[i].variable)
            .collect();
        let mut columns = vec![self.layout.intercept_col];
        for &i in &chosen {
            columns.extend(self.layout.terms[i].col_range.clone());
        }

        let layout = TermLayout::new(&predictors);
        Ok(DesignMatrix {
            spec: ModelSpec {
                response: self.spec.response,
                predictors,
            },
            y: self.y.clone(),
            x: self.x.select(Axis(1), &columns),
            column_names: layout.column_names(),
            row_ids: self.row_ids.clone(),
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observation, RowId};
    use approx::assert_abs_diff_eq;

    fn obs(id: usize, smok: f64, fat: f64, ret: f64) -> Observation {
        let mut values = [1.0; 14];
        values[2] = smok;
        values[6] = fat;
        values[13] = ret;
        Observation::from_values(RowId::new(id).unwrap(), values).unwrap()
    }

    fn dataset() -> Dataset {
        Dataset::from_observations(vec![
            obs(1, 1.0, 50.0, 600.0),
            obs(2, 2.0, 60.0, 650.0),
            obs(3, 3.0, 70.0, 700.0),
            obs(4, 2.0, 80.0, 720.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_spec_validation() {
        assert_eq!(
            ModelSpec::new(Variable::Sex, [Variable::Age]),
            Err(DesignError::CategoricalResponse(Variable::Sex))
        );
        assert_eq!(
            ModelSpec::new(Variable::RetPlasma, [Variable::Age, Variable::Age]),
            Err(DesignError::DuplicatePredictor(Variable::Age))
        );
        assert_eq!(
            ModelSpec::new(Variable::RetPlasma, [Variable::RetPlasma]),
            Err(DesignError::ResponseAsPredictor(Variable::RetPlasma))
        );
        let spec = ModelSpec::new(Variable::RetPlasma, [Variable::Age, Variable::Fat]).unwrap();
        assert_eq!(spec.to_string(), "RETPLASMA ~ AGE + FAT");
        assert_eq!(spec.without(Variable::Age).to_string(), "RETPLASMA ~ FAT");
    }

    #[test]
    fn test_treatment_coding_of_categorical_term() {
        let spec =
            ModelSpec::new(Variable::RetPlasma, [Variable::SmokStat, Variable::Fat]).unwrap();
        let design = DesignMatrix::build(&dataset(), &spec).unwrap();

        assert_eq!(
            design.column_names,
            vec!["(Intercept)", "SMOKSTAT:former", "SMOKSTAT:current", "FAT"]
        );
        assert_eq!(design.layout.terms[0].col_range, 1..3);
        assert_eq!(design.layout.terms[1].col_range, 3..4);

        // Row 1 is the baseline level, row 2 former, row 3 current.
        assert_eq!(design.x.row(0).to_vec(), vec![1.0, 0.0, 0.0, 50.0]);
        assert_eq!(design.x.row(1).to_vec(), vec![1.0, 1.0, 0.0, 60.0]);
        assert_eq!(design.x.row(2).to_vec(), vec![1.0, 0.0, 1.0, 70.0]);
        assert_abs_diff_eq!(design.y[3], 720.0, epsilon = 1e-12);
    }

    #[test]
    fn test_select_terms_keeps_original_order() {
        let spec = ModelSpec::new(
            Variable::RetPlasma,
            [Variable::Fat, Variable::SmokStat, Variable::Age],
        )
        .unwrap();
        let design = DesignMatrix::build(&dataset(), &spec).unwrap();
        let sub = design.select_terms(&[2, 0]).unwrap();
        assert_eq!(sub.spec.predictors, vec![Variable::Fat, Variable::Age]);
        assert_eq!(sub.column_names, vec!["(Intercept)", "FAT", "AGE"]);
        assert_eq!(sub.x.column(1).to_vec(), vec![50.0, 60.0, 70.0, 80.0]);
        assert_eq!(sub.row_ids, design.row_ids);

        let err = design.select_terms(&[3]).unwrap_err();
        assert_eq!(err, DesignError::TermOutOfRange { index: 3, count: 3 });
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let spec = ModelSpec::new(Variable::RetPlasma, [Variable::Age]).unwrap();
        let err = DesignMatrix::build(&Dataset::default(), &spec).unwrap_err();
        assert_eq!(err, DesignError::EmptyDataset);
    }
}
