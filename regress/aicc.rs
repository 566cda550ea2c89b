//! Information-criterion model comparison.
//!
//! `k` counts the regression coefficients plus the residual variance. All
//! criteria use the profile Gaussian likelihood, dropping the constant terms
//! that cancel when models are fitted to the same observations:
//!
//! * `AIC  = n ln(RSS/n) + 2k`
//! * `AICc = AIC + 2k(k+1)/(n-k-1)`
//! * `BIC  = n ln(RSS/n) + k ln(n)`

use crate::data::{RowId, Variable};
use crate::ols::LinearModel;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AiccError {
    #[error("AICc is undefined for n = {n} observations and k = {k} parameters (needs n > k + 1).")]
    Undefined { n: usize, k: usize },

    #[error("Candidate '{name}' models {found}, but the set models {expected}.")]
    MismatchedResponse {
        name: String,
        expected: Variable,
        found: Variable,
    },

    #[error(
        "Candidate '{name}' was fitted to a different set of observations ({found} rows vs {expected}); AICc values are only comparable on identical data."
    )]
    MismatchedObservations {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("A candidate named '{0}' is already in the set.")]
    DuplicateName(String),

    #[error("The candidate set is empty.")]
    EmptySet,
}

/// Number of estimated parameters for a model with `n_coefficients`
/// regression coefficients.
pub fn parameter_count(n_coefficients: usize) -> usize {
    n_coefficients + 1
}

/// `n ln(RSS/n) + 2k`. Always defined for `n > 0`.
pub fn aic(rss: f64, n: usize, n_coefficients: usize) -> f64 {
    let n_f = n as f64;
    n_f * (rss / n_f).ln() + 2.0 * parameter_count(n_coefficients) as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationCriteria {
    pub n: usize,
    pub k: usize,
    pub aic: f64,
    pub aicc: f64,
    pub bic: f64,
}

impl InformationCriteria {
    pub fn from_rss(rss: f64, n: usize, n_coefficients: usize) -> Result<Self, AiccError> {
        let k = parameter_count(n_coefficients);
        if n <= k + 1 {
            return Err(AiccError::Undefined { n, k });
        }
        let n_f = n as f64;
        let k_f = k as f64;
        let aic = aic(rss, n, n_coefficients);
        Ok(Self {
            n,
            k,
            aic,
            aicc: aic + 2.0 * k_f * (k_f + 1.0) / (n_f - k_f - 1.0),
            bic: n_f * (rss / n_f).ln() + k_f * n_f.ln(),
        })
    }

    pub fn of(model: &LinearModel) -> Result<Self, AiccError> {
        Self::from_rss(model.rss(), model.n_obs(), model.n_coefficients())
    }

    /// The small-sample correction `AICc - AIC`.
    pub fn correction(&self) -> f64 {
        self.aicc - self.aic
    }
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub model: LinearModel,
}

/// Named models fitted to the same response and the same observations.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

fn sorted_ids(model: &LinearModel) -> Vec<RowId> {
    let mut ids = model.row_ids().to_vec();
    ids.sort_unstable();
    ids
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate after checking it is comparable with those already
    /// present.
    pub fn push(&mut self, name: impl Into<String>, model: LinearModel) -> Result<(), AiccError> {
        let name = name.into();
        if self.candidates.iter().any(|c| c.name == name) {
            return Err(AiccError::DuplicateName(name));
        }
        if let Some(first) = self.candidates.first() {
            let expected = first.model.spec().response;
            let found = model.spec().response;
            if expected != found {
                return Err(AiccError::MismatchedResponse {
                    name,
                    expected,
                    found,
                });
            }
            if sorted_ids(&first.model) != sorted_ids(&model) {
                return Err(AiccError::MismatchedObservations {
                    name,
                    expected: first.model.n_obs(),
                    found: model.n_obs(),
                });
            }
        }
        self.candidates.push(Candidate { name, model });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn get(&self, name: &str) -> Option<&LinearModel> {
        self.candidates
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.model)
    }

    /// Candidates by ascending AICc; ties keep insertion order.
    pub fn rank(&self) -> Result<Vec<RankedCandidate>, AiccError> {
        if self.candidates.is_empty() {
            return Err(AiccError::EmptySet);
        }
        let mut scored = self
            .candidates
            .iter()
            .map(|c| Ok((c.name.clone(), InformationCriteria::of(&c.model)?)))
            .collect::<Result<Vec<_>, AiccError>>()?;
        scored.sort_by(|a, b| a.1.aicc.total_cmp(&b.1.aicc));

        let best = scored[0].1.aicc;
        let relative: Vec<f64> = scored
            .iter()
            .map(|(_, ic)| (-(ic.aicc - best) / 2.0).exp())
            .collect();
        let total: f64 = relative.iter().sum();

        let ranked: Vec<RankedCandidate> = scored
            .into_iter()
            .zip(relative)
            .map(|((name, criteria), rel)| RankedCandidate {
                delta: criteria.aicc - best,
                weight: rel / total,
                name,
                criteria,
            })
            .collect();

        for r in &ranked {
            log::info!(
                "{:<16} K = {:>2}  AICc = {:>10.3}  Δ = {:>7.3}  w = {:.3}",
                r.name,
                r.criteria.k,
                r.criteria.aicc,
                r.delta,
                r.weight
            );
        }
        Ok(ranked)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub name: String,
    pub criteria: InformationCriteria,
    /// AICc minus the best AICc in the set.
    pub delta: f64,
    /// Akaike weight.
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Variable;
    use crate::design::ModelSpec;
    use crate::test_support::synthetic_study;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    #[test]
    fn test_criteria_formulas() {
        let ic = InformationCriteria::from_rss(120.0, 30, 3).unwrap();
        assert_eq!(ic.k, 4);
        let base = 30.0 * (4.0f64).ln();
        assert_abs_diff_eq!(ic.aic, base + 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ic.aicc, base + 8.0 + 40.0 / 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ic.bic, base + 4.0 * 30f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_correction_shrinks_as_n_grows() {
        let mut previous = f64::INFINITY;
        for n in [8, 10, 20, 50, 100, 315, 1000, 10_000] {
            let ic = InformationCriteria::from_rss(10.0 * n as f64, n, 4).unwrap();
            let correction = ic.correction();
            assert!(correction > 0.0);
            assert!(correction < previous, "correction did not shrink at n = {n}");
            previous = correction;
        }
    }

    #[test]
    fn test_undefined_when_too_few_observations() {
        assert_eq!(
            InformationCriteria::from_rss(1.0, 5, 3),
            Err(AiccError::Undefined { n: 5, k: 4 })
        );
        assert!(InformationCriteria::from_rss(1.0, 6, 3).is_ok());
    }

    fn fit(data: &Arc<crate::data::Dataset>, predictors: &[Variable]) -> LinearModel {
        let spec = ModelSpec::new(Variable::RetPlasma, predictors.iter().copied()).unwrap();
        LinearModel::fit(Arc::clone(data), &spec).unwrap()
    }

    #[test]
    fn test_ranking_orders_and_weights() {
        let data = Arc::new(synthetic_study(120, 5));
        let mut set = CandidateSet::new();
        set.push("noise", fit(&data, &[Variable::Fiber])).unwrap();
        set.push("true", fit(&data, &[Variable::Age, Variable::Alcohol])).unwrap();
        set.push("age", fit(&data, &[Variable::Age])).unwrap();

        let ranked = set.rank().unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].name, "true");
        assert_eq!(ranked[2].name, "noise");
        assert_abs_diff_eq!(ranked[0].delta, 0.0, epsilon = 1e-12);
        for pair in ranked.windows(2) {
            assert!(pair[0].criteria.aicc <= pair[1].criteria.aicc);
            assert!(pair[0].weight >= pair[1].weight);
        }
        let total: f64 = ranked.iter().map(|r| r.weight).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        assert!(set.get("age").is_some());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let data = Arc::new(synthetic_study(40, 6));
        let mut set = CandidateSet::new();
        set.push("first", fit(&data, &[Variable::Age])).unwrap();
        set.push("second", fit(&data, &[Variable::Age])).unwrap();
        let ranked = set.rank().unwrap();
        assert_eq!(ranked[0].name, "first");
        assert_eq!(ranked[1].name, "second");
        assert_abs_diff_eq!(ranked[0].weight, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_incomparable_candidates_rejected() {
        let data = Arc::new(synthetic_study(40, 7));
        let mut set = CandidateSet::new();
        assert_eq!(set.rank().unwrap_err(), AiccError::EmptySet);
        set.push("full", fit(&data, &[Variable::Age, Variable::Fat])).unwrap();

        assert_eq!(
            set.push("full", fit(&data, &[Variable::Age])).unwrap_err(),
            AiccError::DuplicateName("full".to_string())
        );

        let other_response = ModelSpec::new(Variable::BetaPlasma, [Variable::Age]).unwrap();
        let model = LinearModel::fit(Arc::clone(&data), &other_response).unwrap();
        assert!(matches!(
            set.push("beta", model),
            Err(AiccError::MismatchedResponse { found: Variable::BetaPlasma, .. })
        ));

        let spec = ModelSpec::new(Variable::RetPlasma, [Variable::Age]).unwrap();
        let reduced =
            LinearModel::fit_excluding(&data, &spec, &[RowId::new(3).unwrap()]).unwrap();
        assert_eq!(
            set.push("reduced", reduced).unwrap_err(),
            AiccError::MismatchedObservations {
                name: "reduced".to_string(),
                expected: 40,
                found: 39
            }
        );
        assert_eq!(set.len(), 1);
    }
}
