//! # Ordinary Least Squares
//!
//! [`least_squares`] is the pure numerical core: given `y` and a full-rank
//! design `X` (intercept included) it returns the coefficient estimates and
//! their inferential statistics. The fit is computed from a column-pivoted
//! Householder QR factorization, so `XᵀX` is never formed or inverted; the
//! pivoting also tells us exactly which columns are responsible when the design
//! is rank deficient.
//!
//! [`LinearModel`] wraps one such fit together with the model specification
//! and the working dataset it was computed from. It is fit once and is
//! immutable afterwards.

use crate::data::{DataError, Dataset, RowId};
use crate::design::{DesignError, DesignMatrix, INTERCEPT_NAME, ModelSpec};
use crate::faer_ndarray::{invert_upper_triangular, pivoted_qr, solve_upper_triangular};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};
use std::f64::consts::PI;
use std::sync::Arc;
use thiserror::Error;

/// Relative tolerance on the diagonal of `R` below which a column is treated
/// as linearly dependent on the columns pivoted before it.
pub const RANK_TOLERANCE: f64 = 1e-7;

#[derive(Error, Debug)]
pub enum OlsError {
    #[error(
        "Singular design: rank {rank} of {p}; column(s) [{}] are linear combinations of the others (perfect collinearity).",
        .columns.join(", ")
    )]
    SingularDesign {
        columns: Vec<String>,
        rank: usize,
        p: usize,
    },

    #[error(
        "Only {n} observations for {p} coefficients; least squares needs more observations than coefficients."
    )]
    InsufficientObservations { n: usize, p: usize },

    #[error("Design has {rows} rows but the response has {len} values.")]
    DimensionMismatch { rows: usize, len: usize },

    #[error("The response or design matrix contains NaN or infinite values.")]
    NonFinite,

    #[error("Could not evaluate the reference distribution: {0}")]
    Distribution(String),

    #[error("Design construction failed: {0}")]
    Design(#[from] DesignError),

    #[error("Dataset error: {0}")]
    Data(#[from] DataError),
}

/// Everything a least-squares fit produces.
#[derive(Debug, Clone)]
pub struct OlsSolution {
    pub coefficients: Array1<f64>,
    pub std_errors: Array1<f64>,
    pub t_values: Array1<f64>,
    pub p_values: Array1<f64>,
    /// `σ̂² (XᵀX)⁻¹`, in the original column order.
    pub covariance: Array2<f64>,
    pub fitted: Array1<f64>,
    pub residuals: Array1<f64>,
    /// Diagonal of the hat matrix.
    pub leverage: Array1<f64>,
    pub rss: f64,
    /// Total sum of squares about the mean of `y`.
    pub tss: f64,
    /// Residual standard error `σ̂ = sqrt(RSS / (n - p))`.
    pub sigma: f64,
    pub n: usize,
    pub p: usize,
    pub df_residual: usize,
}

impl OlsSolution {
    pub fn r_squared(&self) -> f64 {
        if self.tss > 0.0 {
            1.0 - self.rss / self.tss
        } else {
            0.0
        }
    }
}

/// Fits `y ~ X` by least squares.
///
/// `column_names` are used only to name the offending columns of a singular
/// design; pass an empty slice to fall back to positional names.
pub fn least_squares(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    column_names: &[String],
) -> Result<OlsSolution, OlsError> {
    let (n, p) = x.dim();
    if y.len() != n {
        return Err(OlsError::DimensionMismatch { rows: n, len: y.len() });
    }
    if n <= p {
        return Err(OlsError::InsufficientObservations { n, p });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(OlsError::NonFinite);
    }

    let qr = pivoted_qr(x);
    let rank = qr.rank(RANK_TOLERANCE);
    if rank < p {
        let columns = qr.pivot[rank..]
            .iter()
            .map(|&c| {
                column_names
                    .get(c)
                    .cloned()
                    .unwrap_or_else(|| format!("column {c}"))
            })
            .collect();
        return Err(OlsError::SingularDesign { columns, rank, p });
    }

    // Coefficients in pivoted order, then scattered back.
    let qty = qr.q.t().dot(&y);
    let beta_pivoted = solve_upper_triangular(qr.r.view(), qty.view());
    let mut coefficients = Array1::<f64>::zeros(p);
    for (j, &orig) in qr.pivot.iter().enumerate() {
        coefficients[orig] = beta_pivoted[j];
    }

    let fitted = qr.q.dot(&qty);
    let residuals = &y - &fitted;
    let leverage = qr.q.map_axis(ndarray::Axis(1), |row| row.dot(&row));

    let rss = residuals.dot(&residuals);
    let y_mean = y.mean().unwrap_or(0.0);
    let tss = y.iter().map(|&v| (v - y_mean).powi(2)).sum::<f64>();
    let df_residual = n - p;
    let sigma2 = rss / df_residual as f64;

    let r_inv = invert_upper_triangular(qr.r.view());
    let unscaled = r_inv.dot(&r_inv.t());
    let mut covariance = Array2::<f64>::zeros((p, p));
    for (a, &oa) in qr.pivot.iter().enumerate() {
        for (b, &ob) in qr.pivot.iter().enumerate() {
            covariance[[oa, ob]] = sigma2 * unscaled[[a, b]];
        }
    }

    let std_errors = covariance.diag().mapv(f64::sqrt);
    let t_values = &coefficients / &std_errors;
    let t_dist = StudentsT::new(0.0, 1.0, df_residual as f64)
        .map_err(|e| OlsError::Distribution(e.to_string()))?;
    let p_values = t_values.mapv(|t| {
        if t.is_nan() {
            f64::NAN
        } else {
            (2.0 * t_dist.sf(t.abs())).min(1.0)
        }
    });

    Ok(OlsSolution {
        coefficients,
        std_errors,
        t_values,
        p_values,
        covariance,
        fitted,
        residuals,
        leverage,
        rss,
        tss,
        sigma: sigma2.sqrt(),
        n,
        p,
        df_residual,
    })
}

/// Overall F-test of the fitted model against the intercept-only model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FStatistic {
    pub value: f64,
    pub df_model: usize,
    pub df_residual: usize,
    pub p_value: f64,
}

/// One line of a coefficient table.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_value: f64,
    pub p_value: f64,
}

/// A fitted linear model: specification, working dataset and OLS results.
#[derive(Debug, Clone)]
pub struct LinearModel {
    data: Arc<Dataset>,
    design: DesignMatrix,
    solution: OlsSolution,
}

impl LinearModel {
    /// Fits `spec` on every observation of `data`.
    pub fn fit(data: Arc<Dataset>, spec: &ModelSpec) -> Result<Self, OlsError> {
        let design = DesignMatrix::build(&data, spec)?;
        Self::from_design(data, design)
    }

    /// Fits `spec` on a working copy of `data` without the given row ids.
    pub fn fit_excluding(
        data: &Dataset,
        spec: &ModelSpec,
        exclude: &[RowId],
    ) -> Result<Self, OlsError> {
        let working = Arc::new(data.excluding(exclude)?);
        if !exclude.is_empty() {
            log::info!(
                "Fitting {} with {} observation(s) excluded: {:?}",
                spec,
                exclude.len(),
                exclude.iter().map(|id| id.get()).collect::<Vec<_>>()
            );
        }
        Self::fit(working, spec)
    }

    /// Fits a prepared design whose rows came from `data`.
    pub fn from_design(data: Arc<Dataset>, design: DesignMatrix) -> Result<Self, OlsError> {
        let solution = least_squares(design.x.view(), design.y.view(), &design.column_names)?;
        log::debug!(
            "Fitted {}: n = {}, p = {}, RSS = {:.4}",
            design.spec,
            solution.n,
            solution.p,
            solution.rss
        );
        Ok(Self {
            data,
            design,
            solution,
        })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.design.spec
    }

    /// The working dataset, exclusions already applied.
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.data
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    pub fn solution(&self) -> &OlsSolution {
        &self.solution
    }

    pub fn column_names(&self) -> &[String] {
        &self.design.column_names
    }

    pub fn row_ids(&self) -> &[RowId] {
        &self.design.row_ids
    }

    pub fn coefficients(&self) -> &Array1<f64> {
        &self.solution.coefficients
    }

    pub fn std_errors(&self) -> &Array1<f64> {
        &self.solution.std_errors
    }

    pub fn t_values(&self) -> &Array1<f64> {
        &self.solution.t_values
    }

    pub fn p_values(&self) -> &Array1<f64> {
        &self.solution.p_values
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.solution.covariance
    }

    pub fn residuals(&self) -> &Array1<f64> {
        &self.solution.residuals
    }

    pub fn fitted(&self) -> &Array1<f64> {
        &self.solution.fitted
    }

    pub fn leverage(&self) -> &Array1<f64> {
        &self.solution.leverage
    }

    pub fn n_obs(&self) -> usize {
        self.solution.n
    }

    pub fn n_coefficients(&self) -> usize {
        self.solution.p
    }

    pub fn df_residual(&self) -> usize {
        self.solution.df_residual
    }

    pub fn rss(&self) -> f64 {
        self.solution.rss
    }

    pub fn sigma(&self) -> f64 {
        self.solution.sigma
    }

    pub fn r_squared(&self) -> f64 {
        self.solution.r_squared()
    }

    pub fn adj_r_squared(&self) -> f64 {
        let n = self.solution.n as f64;
        let p = self.solution.p as f64;
        1.0 - (1.0 - self.r_squared()) * (n - 1.0) / (n - p)
    }

    /// `None` for the intercept-only model or a perfect fit.
    pub fn f_statistic(&self) -> Option<FStatistic> {
        let s = &self.solution;
        if s.p < 2 || s.rss <= 0.0 {
            return None;
        }
        let df_model = s.p - 1;
        let value = ((s.tss - s.rss) / df_model as f64) / (s.rss / s.df_residual as f64);
        let dist = FisherSnedecor::new(df_model as f64, s.df_residual as f64).ok()?;
        Some(FStatistic {
            value,
            df_model,
            df_residual: s.df_residual,
            p_value: dist.sf(value),
        })
    }

    /// Gaussian log-likelihood at the maximum-likelihood variance `RSS / n`.
    pub fn log_likelihood(&self) -> f64 {
        let n = self.solution.n as f64;
        -0.5 * n * ((2.0 * PI).ln() + (self.solution.rss / n).ln() + 1.0)
    }

    pub fn coefficient_table(&self) -> Vec<CoefficientRow> {
        let s = &self.solution;
        self.design
            .column_names
            .iter()
            .enumerate()
            .map(|(j, name)| CoefficientRow {
                name: name.clone(),
                estimate: s.coefficients[j],
                std_error: s.std_errors[j],
                t_value: s.t_values[j],
                p_value: s.p_values[j],
            })
            .collect()
    }

    /// Names of non-intercept columns with p-value below `alpha`.
    pub fn significant_columns(&self, alpha: f64) -> Vec<&str> {
        self.design
            .column_names
            .iter()
            .zip(self.solution.p_values.iter())
            .filter(|(name, p)| name.as_str() != INTERCEPT_NAME && **p < alpha)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Estimate for a named column, if present.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.design
            .column_names
            .iter()
            .position(|c| c == name)
            .map(|j| self.solution.coefficients[j])
    }
}
