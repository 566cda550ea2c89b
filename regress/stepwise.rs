//! Bidirectional stepwise selection by AIC.
//!
//! The search starts from the full model. Every iteration scores dropping each
//! included term and adding back each excluded term, then takes the single
//! move with the lowest AIC if it improves on the current model. This is a
//! greedy local search; it does not visit all `2^p` subsets and can stop at a
//! local optimum.

use crate::aicc::aic;
use crate::data::{Dataset, Variable};
use crate::design::{DesignError, DesignMatrix, ModelSpec};
use crate::ols::{LinearModel, OlsError, least_squares};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepwiseError {
    #[error("Stepwise selection needs at least one predictor in the starting model.")]
    NoTerms,

    #[error("The starting model could not be fitted: {0}")]
    InitialFit(#[source] OlsError),

    #[error("Fitting the selected model failed: {0}")]
    Fit(#[from] OlsError),

    #[error("Design construction failed: {0}")]
    Design(#[from] DesignError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Start,
    Add(Variable),
    Remove(Variable),
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Start => f.write_str("start"),
            StepAction::Add(v) => write!(f, "+ {v}"),
            StepAction::Remove(v) => write!(f, "- {v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub action: StepAction,
    /// AIC of the model after this step.
    pub aic: f64,
    pub predictors: Vec<Variable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    NoImprovement,
    CycleDetected,
    StepLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopReason::NoImprovement => "no single step lowers AIC",
            StopReason::CycleDetected => "best step revisits an earlier model",
            StopReason::StepLimit => "step limit reached",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepwiseOptions {
    /// Upper bound on moves; `None` means twice the number of terms.
    pub max_steps: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct StepwiseResult {
    pub model: LinearModel,
    pub trace: Vec<StepRecord>,
    pub stop_reason: StopReason,
}

impl StepwiseResult {
    pub fn final_aic(&self) -> f64 {
        self.trace.last().map_or(f64::NAN, |r| r.aic)
    }
}

struct Search<'a> {
    design: &'a DesignMatrix,
}

impl Search<'_> {
    fn indices(mask: &[bool]) -> Vec<usize> {
        mask.iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }

    fn predictors(&self, mask: &[bool]) -> Vec<Variable> {
        Self::indices(mask)
            .into_iter()
            .map(|i| self.design.layout.terms[i].variable)
            .collect()
    }

    fn score(&self, mask: &[bool]) -> Result<f64, OlsError> {
        let sub = self.design.select_terms(&Self::indices(mask))?;
        let fit = least_squares(sub.x.view(), sub.y.view(), &sub.column_names)?;
        Ok(aic(fit.rss, fit.n, fit.p))
    }
}

/// Runs the search from the full model `spec` on every row of `data`.
pub fn stepwise_aic(
    data: Arc<Dataset>,
    spec: &ModelSpec,
    options: &StepwiseOptions,
) -> Result<StepwiseResult, StepwiseError> {
    let design = DesignMatrix::build(&data, spec)?;
    let p = design.n_terms();
    if p == 0 {
        return Err(StepwiseError::NoTerms);
    }
    let max_steps = options.max_steps.unwrap_or(2 * p);
    let search = Search { design: &design };

    let mut current = vec![true; p];
    let mut current_aic = search.score(&current).map_err(StepwiseError::InitialFit)?;
    let mut visited: HashSet<Vec<bool>> = HashSet::new();
    visited.insert(current.clone());

    log::info!("Stepwise start: {} (AIC = {:.3})", spec, current_aic);
    let mut trace = vec![StepRecord {
        step: 0,
        action: StepAction::Start,
        aic: current_aic,
        predictors: search.predictors(&current),
    }];

    let stop_reason = loop {
        if trace.len() > max_steps {
            break StopReason::StepLimit;
        }

        // Removals in term order, then additions in term order; a strict
        // comparison keeps the earliest of equally good moves.
        let removals = (0..p).filter(|&j| current[j]);
        let additions = (0..p).filter(|&j| !current[j]);
        let mut best: Option<(usize, f64)> = None;
        for j in removals.chain(additions) {
            let mut candidate = current.clone();
            candidate[j] = !candidate[j];
            match search.score(&candidate) {
                Ok(value) => {
                    if value < best.map_or(current_aic, |(_, b)| b) {
                        best = Some((j, value));
                    }
                }
                Err(e) => log::warn!(
                    "Skipping stepwise candidate {:?}: {}",
                    search.predictors(&candidate),
                    e
                ),
            }
        }

        let Some((j, value)) = best else {
            break StopReason::NoImprovement;
        };
        let variable = design.layout.terms[j].variable;
        let action = if current[j] {
            StepAction::Remove(variable)
        } else {
            StepAction::Add(variable)
        };
        current[j] = !current[j];
        if !visited.insert(current.clone()) {
            current[j] = !current[j];
            break StopReason::CycleDetected;
        }
        current_aic = value;
        log::info!("Stepwise step {}: {} (AIC = {:.3})", trace.len(), action, value);
        trace.push(StepRecord {
            step: trace.len(),
            action,
            aic: value,
            predictors: search.predictors(&current),
        });
    };

    log::info!("Stepwise stopped: {}", stop_reason);
    let selected = design.select_terms(&Search::indices(&current))?;
    let model = LinearModel::from_design(Arc::clone(&data), selected)?;
    Ok(StepwiseResult {
        model,
        trace,
        stop_reason,
    })
}
