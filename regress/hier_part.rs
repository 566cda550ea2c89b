//! Hierarchical partitioning of explained variance.
//!
//! Every non-empty subset of the predictor terms is fitted and its R² stored
//! by subset bitmask. For term `i` and hierarchy level `s`, the average gain
//! `R²(S ∪ {i}) - R²(S)` over all subsets `S` of size `s - 1` that exclude `i`
//! is computed; the independent contribution is the mean of these level
//! averages. The independent contributions add up to the R² of the full model.
//!
//! The number of fits is `2^p - 1`, so `p` is capped.

use crate::data::{Dataset, Variable};
use crate::design::{DesignError, DesignMatrix, ModelSpec};
use crate::ols::{OlsError, least_squares};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub const DEFAULT_MAX_PREDICTORS: usize = 12;
/// No configuration may raise the cap above this.
pub const MAX_PREDICTORS_CEILING: usize = 20;

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("Hierarchical partitioning needs at least one predictor.")]
    NoPredictors,

    #[error(
        "Hierarchical partitioning over {p} predictors needs {} model fits; the configured limit is {limit} predictors.",
        subset_count(.p)
    )]
    TooManyPredictors { p: usize, limit: usize },

    #[error("max_predictors = {limit} exceeds the hard ceiling of {ceiling}.")]
    LimitAboveCeiling { limit: usize, ceiling: usize },

    #[error("Fitting the subset [{}] failed: {source}", format_subset(.subset))]
    SubsetFit {
        subset: Vec<Variable>,
        source: OlsError,
    },

    #[error("Hierarchical partitioning was cancelled.")]
    Cancelled,

    #[error("Design construction failed: {0}")]
    Design(#[from] DesignError),
}

fn subset_count(p: &usize) -> u64 {
    (1u64 << (*p).min(63)) - 1
}

fn format_subset(subset: &[Variable]) -> String {
    subset
        .iter()
        .map(|v| v.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOptions {
    pub max_predictors: usize,
    /// Fit subsets on the rayon pool.
    pub parallel: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            max_predictors: DEFAULT_MAX_PREDICTORS,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub variable: Variable,
    pub independent: f64,
    pub joint: f64,
    /// R² of the model with this term alone.
    pub total: f64,
    /// Share of the summed independent contributions, in percent.
    pub independent_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub contributions: Vec<Contribution>,
    pub full_r_squared: f64,
    /// R² indexed by subset bitmask; entry 0 is the intercept-only model.
    pub subset_r_squared: Vec<f64>,
}

impl Partition {
    pub fn get(&self, variable: Variable) -> Option<&Contribution> {
        self.contributions.iter().find(|c| c.variable == variable)
    }

    pub fn independent_sum(&self) -> f64 {
        self.contributions.iter().map(|c| c.independent).sum()
    }
}

/// Partitions the R² of `spec` fitted on every row of `data`.
pub fn hierarchical_partition(
    data: &Dataset,
    spec: &ModelSpec,
    options: &PartitionOptions,
    cancel: Option<&AtomicBool>,
) -> Result<Partition, PartitionError> {
    let design = DesignMatrix::build(data, spec)?;
    partition_design(&design, options, cancel)
}

pub fn partition_design(
    design: &DesignMatrix,
    options: &PartitionOptions,
    cancel: Option<&AtomicBool>,
) -> Result<Partition, PartitionError> {
    if options.max_predictors > MAX_PREDICTORS_CEILING {
        return Err(PartitionError::LimitAboveCeiling {
            limit: options.max_predictors,
            ceiling: MAX_PREDICTORS_CEILING,
        });
    }
    let p = design.n_terms();
    if p == 0 {
        return Err(PartitionError::NoPredictors);
    }
    if p > options.max_predictors {
        return Err(PartitionError::TooManyPredictors {
            p,
            limit: options.max_predictors,
        });
    }

    let n_subsets = 1usize << p;
    log::info!(
        "Hierarchical partitioning of {} over {} predictors: {} subset fits ({})",
        design.spec,
        p,
        n_subsets - 1,
        if options.parallel { "parallel" } else { "serial" }
    );

    let fit_subset = |mask: usize| -> Result<f64, PartitionError> {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(PartitionError::Cancelled);
        }
        let indices: Vec<usize> = (0..p).filter(|&i| mask & (1 << i) != 0).collect();
        let sub = design.select_terms(&indices)?;
        least_squares(sub.x.view(), sub.y.view(), &sub.column_names)
            .map(|fit| fit.r_squared())
            .map_err(|source| PartitionError::SubsetFit {
                subset: sub.spec.predictors.clone(),
                source,
            })
    };

    let fitted: Vec<f64> = if options.parallel {
        (1..n_subsets)
            .into_par_iter()
            .map(fit_subset)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        (1..n_subsets)
            .map(fit_subset)
            .collect::<Result<Vec<_>, _>>()?
    };
    let mut r2 = Vec::with_capacity(n_subsets);
    r2.push(0.0);
    r2.extend(fitted);

    let contributions = partition_from_r_squared(design, &r2);
    let full_r_squared = r2[n_subsets - 1];
    log::debug!(
        "Full-model R² = {:.5}; independent contributions sum to {:.5}",
        full_r_squared,
        contributions.iter().map(|c| c.independent).sum::<f64>()
    );

    Ok(Partition {
        contributions,
        full_r_squared,
        subset_r_squared: r2,
    })
}

fn partition_from_r_squared(design: &DesignMatrix, r2: &[f64]) -> Vec<Contribution> {
    let p = design.n_terms();
    let mut contributions: Vec<Contribution> = (0..p)
        .map(|i| {
            let bit = 1usize << i;
            // Level k collects subsets of size k that exclude i.
            let mut level_sum = vec![0.0; p];
            let mut level_count = vec![0usize; p];
            for mask in (0..r2.len()).filter(|m| m & bit == 0) {
                let level = mask.count_ones() as usize;
                level_sum[level] += r2[mask | bit] - r2[mask];
                level_count[level] += 1;
            }
            let independent = level_sum
                .iter()
                .zip(&level_count)
                .map(|(sum, &count)| sum / count as f64)
                .sum::<f64>()
                / p as f64;
            let total = r2[bit];
            Contribution {
                variable: design.layout.terms[i].variable,
                independent,
                joint: total - independent,
                total,
                independent_percent: 0.0,
            }
        })
        .collect();

    let sum: f64 = contributions.iter().map(|c| c.independent).sum();
    for c in &mut contributions {
        c.independent_percent = if sum != 0.0 {
            100.0 * c.independent / sum
        } else {
            f64::NAN
        };
    }
    contributions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::synthetic_study;
    use approx::assert_abs_diff_eq;

    fn spec(predictors: &[Variable]) -> ModelSpec {
        ModelSpec::new(Variable::RetPlasma, predictors.iter().copied()).unwrap()
    }

    fn five() -> Vec<Variable> {
        vec![
            Variable::Age,
            Variable::Calories,
            Variable::Fat,
            Variable::Alcohol,
            Variable::SmokStat,
        ]
    }

    #[test]
    fn test_independent_contributions_sum_to_full_r_squared() {
        let data = synthetic_study(150, 17);
        let result =
            hierarchical_partition(&data, &spec(&five()), &PartitionOptions::default(), None)
                .unwrap();
        assert_eq!(result.subset_r_squared.len(), 32);
        assert_abs_diff_eq!(result.independent_sum(), result.full_r_squared, epsilon = 1e-10);

        let percent: f64 = result.contributions.iter().map(|c| c.independent_percent).sum();
        assert_abs_diff_eq!(percent, 100.0, epsilon = 1e-8);
        for c in &result.contributions {
            assert_abs_diff_eq!(c.total, c.independent + c.joint, epsilon = 1e-12);
        }
        // AGE carries most of the signal in the synthetic cohort.
        let age = result.get(Variable::Age).unwrap();
        assert!(result.contributions.iter().all(|c| c.independent <= age.independent));
    }

    #[test]
    fn test_two_predictor_closed_form() {
        let data = synthetic_study(80, 2);
        let result = hierarchical_partition(
            &data,
            &spec(&[Variable::Age, Variable::Alcohol]),
            &PartitionOptions::default(),
            None,
        )
        .unwrap();
        let r2 = &result.subset_r_squared;
        let expected_age = (r2[0b01] + (r2[0b11] - r2[0b10])) / 2.0;
        let expected_alcohol = (r2[0b10] + (r2[0b11] - r2[0b01])) / 2.0;
        assert_abs_diff_eq!(result.contributions[0].independent, expected_age, epsilon = 1e-12);
        assert_abs_diff_eq!(result.contributions[1].independent, expected_alcohol, epsilon = 1e-12);
        assert_abs_diff_eq!(result.contributions[0].total, r2[0b01], epsilon = 1e-12);
    }

    #[test]
    fn test_serial_and_parallel_agree() {
        let data = synthetic_study(100, 23);
        let model = spec(&five());
        let parallel = hierarchical_partition(&data, &model, &PartitionOptions::default(), None)
            .unwrap();
        let serial = hierarchical_partition(
            &data,
            &model,
            &PartitionOptions {
                parallel: false,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(parallel.subset_r_squared.len(), serial.subset_r_squared.len());
        for (a, b) in parallel.subset_r_squared.iter().zip(&serial.subset_r_squared) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        for (a, b) in parallel.contributions.iter().zip(&serial.contributions) {
            assert_eq!(a.variable, b.variable);
            assert_abs_diff_eq!(a.independent, b.independent, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_predictor_bounds() {
        let data = synthetic_study(50, 1);
        let options = PartitionOptions {
            max_predictors: 3,
            parallel: false,
        };
        assert!(matches!(
            hierarchical_partition(&data, &spec(&five()), &options, None),
            Err(PartitionError::TooManyPredictors { p: 5, limit: 3 })
        ));
        assert!(matches!(
            hierarchical_partition(&data, &spec(&[]), &options, None),
            Err(PartitionError::NoPredictors)
        ));
        let above = PartitionOptions {
            max_predictors: 21,
            parallel: false,
        };
        assert!(matches!(
            hierarchical_partition(&data, &spec(&five()), &above, None),
            Err(PartitionError::LimitAboveCeiling { limit: 21, ceiling: 20 })
        ));
    }

    #[test]
    fn test_cancellation() {
        let data = synthetic_study(50, 4);
        let flag = AtomicBool::new(true);
        for parallel in [true, false] {
            let options = PartitionOptions {
                parallel,
                ..Default::default()
            };
            assert!(matches!(
                hierarchical_partition(&data, &spec(&five()), &options, Some(&flag)),
                Err(PartitionError::Cancelled)
            ));
        }
        let idle = AtomicBool::new(false);
        assert!(
            hierarchical_partition(&data, &spec(&five()), &PartitionOptions::default(), Some(&idle))
                .is_ok()
        );
    }

    #[test]
    fn test_singular_subset_is_named() {
        let base = synthetic_study(40, 9);
        let observations = base
            .iter()
            .map(|o| {
                let mut o = o.clone();
                o.fat = 0.04 * o.calories;
                o
            })
            .collect();
        let data = Dataset::from_observations(observations).unwrap();
        let options = PartitionOptions {
            parallel: false,
            ..Default::default()
        };
        match hierarchical_partition(
            &data,
            &spec(&[Variable::Calories, Variable::Fat]),
            &options,
            None,
        ) {
            Err(PartitionError::SubsetFit { subset, source }) => {
                assert_eq!(subset, vec![Variable::Calories, Variable::Fat]);
                assert!(matches!(source, OlsError::SingularDesign { .. }));
            }
            other => panic!("Expected SubsetFit, got {:?}", other),
        }
    }
}
