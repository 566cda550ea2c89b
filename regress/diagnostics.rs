//! Post-fit diagnostics: influence measures, influence flags, the series behind
//! the four standard residual plots, variance inflation factors and a residual
//! normality summary.
//!
//! Nothing here mutates a fitted model or excludes observations. Flagged rows
//! are reported; acting on them is left to the caller.

use crate::data::RowId;
use crate::design::{DesignMatrix, INTERCEPT_NAME};
use crate::faer_ndarray::pivoted_qr;
use crate::ols::{LinearModel, OlsError, OlsSolution, RANK_TOLERANCE, least_squares};
use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use std::fmt;
use thiserror::Error;

/// Conventional VIF above which collinearity is reported.
pub const DEFAULT_VIF_THRESHOLD: f64 = 5.0;

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("VIF for '{column}' is undefined: its auxiliary regression failed: {source}")]
    UndefinedVif { column: String, source: OlsError },

    #[error("VIF for '{0}' is undefined: the column is constant.")]
    ConstantColumn(String),

    #[error("Influence threshold '{name}' must be positive and finite, got {value}.")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Could not evaluate the reference distribution: {0}")]
    Distribution(String),
}

// --- Influence -------------------------------------------------------------

/// Per-observation influence quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceRecord {
    pub row_id: RowId,
    pub fitted: f64,
    pub residual: f64,
    pub leverage: f64,
    /// Internally studentized residual.
    pub std_residual: f64,
    /// Externally studentized (leave-one-out) residual.
    pub student_residual: f64,
    pub cooks_distance: f64,
    pub sqrt_abs_std_residual: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceMeasures {
    pub records: Vec<InfluenceRecord>,
    pub n: usize,
    pub p: usize,
}

impl InfluenceMeasures {
    pub fn from_model(model: &LinearModel) -> Self {
        Self::from_solution(model.solution(), model.row_ids())
    }

    /// Rows with `h = 1` get NaN studentized values and Cook's distance.
    pub fn from_solution(solution: &OlsSolution, row_ids: &[RowId]) -> Self {
        let n = solution.n;
        let p = solution.p;
        let sigma = solution.sigma;
        let df = solution.df_residual as f64;

        let records = row_ids
            .iter()
            .enumerate()
            .map(|(i, &row_id)| {
                let e = solution.residuals[i];
                let h = solution.leverage[i];
                let one_minus_h = 1.0 - h;
                let (std_residual, student_residual, cooks_distance) =
                    if one_minus_h <= 1e-10 || sigma <= 0.0 {
                        (f64::NAN, f64::NAN, f64::NAN)
                    } else {
                        let r = e / (sigma * one_minus_h.sqrt());
                        let denom = df - r * r;
                        let t = if df > 1.0 && denom > 0.0 {
                            r * ((df - 1.0) / denom).sqrt()
                        } else {
                            f64::NAN
                        };
                        let d = r * r * h / (p as f64 * one_minus_h);
                        (r, t, d)
                    };
                InfluenceRecord {
                    row_id,
                    fitted: solution.fitted[i],
                    residual: e,
                    leverage: h,
                    std_residual,
                    student_residual,
                    cooks_distance,
                    sqrt_abs_std_residual: std_residual.abs().sqrt(),
                }
            })
            .collect();

        Self { records, n, p }
    }

    pub fn get(&self, row_id: RowId) -> Option<&InfluenceRecord> {
        self.records.iter().find(|r| r.row_id == row_id)
    }

    /// Row with the largest Cook's distance, ignoring NaN.
    pub fn most_influential(&self) -> Option<&InfluenceRecord> {
        self.records
            .iter()
            .filter(|r| r.cooks_distance.is_finite())
            .max_by(|a, b| a.cooks_distance.total_cmp(&b.cooks_distance))
    }
}

/// Cut-offs for [`flag_influential`]. Leverage and Cook's distance cut-offs
/// are expressed as multiples of `p/n` and `1/n` respectively.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluenceThresholds {
    pub leverage_factor: f64,
    pub std_residual: f64,
    pub cooks_factor: f64,
}

impl Default for InfluenceThresholds {
    fn default() -> Self {
        Self {
            leverage_factor: 2.0,
            std_residual: 3.0,
            cooks_factor: 4.0,
        }
    }
}

impl InfluenceThresholds {
    pub fn validate(&self) -> Result<(), DiagnosticsError> {
        for (name, value) in [
            ("leverage_factor", self.leverage_factor),
            ("std_residual", self.std_residual),
            ("cooks_factor", self.cooks_factor),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DiagnosticsError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }

    pub fn leverage_cutoff(&self, n: usize, p: usize) -> f64 {
        self.leverage_factor * p as f64 / n as f64
    }

    pub fn cooks_cutoff(&self, n: usize) -> f64 {
        self.cooks_factor / n as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagReason {
    HighLeverage,
    LargeResidual,
    HighCooksDistance,
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlagReason::HighLeverage => "leverage",
            FlagReason::LargeResidual => "residual",
            FlagReason::HighCooksDistance => "cooks",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfluenceFlag {
    pub row_id: RowId,
    pub leverage: f64,
    pub std_residual: f64,
    pub cooks_distance: f64,
    pub reasons: Vec<FlagReason>,
}

/// Rows exceeding at least one threshold, in dataset order.
pub fn flag_influential(
    measures: &InfluenceMeasures,
    thresholds: &InfluenceThresholds,
) -> Vec<InfluenceFlag> {
    let leverage_cut = thresholds.leverage_cutoff(measures.n, measures.p);
    let cooks_cut = thresholds.cooks_cutoff(measures.n);

    let flags: Vec<InfluenceFlag> = measures
        .records
        .iter()
        .filter_map(|r| {
            let mut reasons = Vec::new();
            if r.leverage > leverage_cut {
                reasons.push(FlagReason::HighLeverage);
            }
            if r.std_residual.abs() > thresholds.std_residual {
                reasons.push(FlagReason::LargeResidual);
            }
            if r.cooks_distance > cooks_cut {
                reasons.push(FlagReason::HighCooksDistance);
            }
            (!reasons.is_empty()).then(|| InfluenceFlag {
                row_id: r.row_id,
                leverage: r.leverage,
                std_residual: r.std_residual,
                cooks_distance: r.cooks_distance,
                reasons,
            })
        })
        .collect();

    for flag in &flags {
        log::warn!(
            "Row {} flagged as influential ({}): h = {:.3}, r = {:.3}, D = {:.4}",
            flag.row_id,
            flag.reasons.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", "),
            flag.leverage,
            flag.std_residual,
            flag.cooks_distance
        );
    }
    flags
}

// --- Plot series -----------------------------------------------------------

/// Plotting position offset: Blom for small samples, Hazen otherwise.
fn plotting_offset(n: usize) -> f64 {
    if n <= 10 { 3.0 / 8.0 } else { 0.5 }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QqPoint {
    pub row_id: RowId,
    pub theoretical: f64,
    pub sample: f64,
}

/// Sorted sample values paired with standard-normal quantiles. NaN samples
/// sort last.
pub fn normal_qq(values: &[f64], row_ids: &[RowId]) -> Result<Vec<QqPoint>, DiagnosticsError> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| DiagnosticsError::Distribution(e.to_string()))?;
    let n = values.len().min(row_ids.len());
    let a = plotting_offset(n);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    Ok(order
        .into_iter()
        .enumerate()
        .map(|(rank, i)| {
            let position = (rank as f64 + 1.0 - a) / (n as f64 + 1.0 - 2.0 * a);
            QqPoint {
                row_id: row_ids[i],
                theoretical: normal.inverse_cdf(position),
                sample: values[i],
            }
        })
        .collect())
}

/// One row of the exported diagnostic-plot table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesRow {
    pub row_id: RowId,
    pub fitted: f64,
    pub residual: f64,
    pub std_residual: f64,
    pub sqrt_abs_std_residual: f64,
    pub leverage: f64,
    pub cooks_distance: f64,
    pub theoretical_quantile: f64,
}

/// Data for residuals-vs-fitted, normal Q-Q, scale-location and
/// residuals-vs-leverage plots, one row per observation in dataset order.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticSeries {
    pub rows: Vec<SeriesRow>,
}

impl DiagnosticSeries {
    pub fn from_measures(measures: &InfluenceMeasures) -> Result<Self, DiagnosticsError> {
        // Rows with an undefined standardized residual (h = 1) get no quantile
        // and do not count towards the plotting positions.
        let defined: Vec<usize> = (0..measures.records.len())
            .filter(|&i| measures.records[i].std_residual.is_finite())
            .collect();
        let std_residuals: Vec<f64> =
            defined.iter().map(|&i| measures.records[i].std_residual).collect();
        let row_ids: Vec<RowId> = defined.iter().map(|&i| measures.records[i].row_id).collect();

        // Q-Q points come back sorted; map each to its row position.
        let mut order: Vec<usize> = (0..std_residuals.len()).collect();
        order.sort_by(|&i, &j| std_residuals[i].total_cmp(&std_residuals[j]));
        let mut quantiles = vec![f64::NAN; measures.records.len()];
        for (point, k) in normal_qq(&std_residuals, &row_ids)?.into_iter().zip(order) {
            quantiles[defined[k]] = point.theoretical;
        }

        let rows = measures
            .records
            .iter()
            .zip(quantiles)
            .map(|(r, q)| SeriesRow {
                row_id: r.row_id,
                fitted: r.fitted,
                residual: r.residual,
                std_residual: r.std_residual,
                sqrt_abs_std_residual: r.sqrt_abs_std_residual,
                leverage: r.leverage,
                cooks_distance: r.cooks_distance,
                theoretical_quantile: q,
            })
            .collect();
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// --- Variance inflation ----------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct VifEntry {
    pub column: String,
    /// R² of the column regressed on all other design columns.
    pub r_squared: f64,
    pub vif: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VifReport {
    pub entries: Vec<VifEntry>,
}

impl VifReport {
    pub fn get(&self, column: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.column == column)
            .map(|e| e.vif)
    }

    /// Entries with VIF strictly above `threshold`.
    pub fn exceeding(&self, threshold: f64) -> Vec<&VifEntry> {
        self.entries.iter().filter(|e| e.vif > threshold).collect()
    }

    pub fn max(&self) -> Option<&VifEntry> {
        self.entries
            .iter()
            .max_by(|a, b| a.vif.total_cmp(&b.vif))
    }
}

/// VIF of every non-intercept column of a design.
pub fn variance_inflation(design: &DesignMatrix) -> Result<VifReport, DiagnosticsError> {
    vif_for_columns(design.x.view(), &design.column_names)
}

/// VIF of every column of `x` not named [`INTERCEPT_NAME`]. The auxiliary
/// regressions keep the intercept column.
///
/// An exactly collinear design has no defined VIF; the error names the first
/// column the pivoted factorization found dependent.
pub fn vif_for_columns(
    x: ArrayView2<f64>,
    column_names: &[String],
) -> Result<VifReport, DiagnosticsError> {
    let (n, p) = x.dim();
    if n > p {
        let qr = pivoted_qr(x);
        let rank = qr.rank(RANK_TOLERANCE);
        if rank < p {
            let columns: Vec<String> = qr.pivot[rank..]
                .iter()
                .map(|&c| column_names.get(c).cloned().unwrap_or_else(|| format!("column {c}")))
                .collect();
            return Err(DiagnosticsError::UndefinedVif {
                column: columns[0].clone(),
                source: OlsError::SingularDesign { columns, rank, p },
            });
        }
    }

    let mut entries = Vec::new();
    for (j, name) in column_names.iter().enumerate() {
        if name == INTERCEPT_NAME {
            continue;
        }
        let others: Vec<usize> = (0..x.ncols()).filter(|&c| c != j).collect();
        let aux_x = x.select(Axis(1), &others);
        let aux_names: Vec<String> = others.iter().map(|&c| column_names[c].clone()).collect();
        let target = x.column(j);

        let fit = least_squares(aux_x.view(), target, &aux_names).map_err(|source| {
            DiagnosticsError::UndefinedVif {
                column: name.clone(),
                source,
            }
        })?;
        if fit.tss <= 0.0 {
            return Err(DiagnosticsError::ConstantColumn(name.clone()));
        }
        let r_squared = fit.r_squared();
        let vif = 1.0 / (1.0 - r_squared);
        log::debug!("VIF({}) = {:.3} (aux R² = {:.4})", name, vif, r_squared);
        entries.push(VifEntry {
            column: name.clone(),
            r_squared,
            vif,
        });
    }
    Ok(VifReport { entries })
}

// --- Normality ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalitySummary {
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub jarque_bera: f64,
    pub p_value: f64,
}

/// Moment-based skewness, excess kurtosis and the Jarque–Bera test against a
/// χ²(2) reference.
pub fn normality_summary(residuals: ArrayView1<f64>) -> Result<NormalitySummary, DiagnosticsError> {
    let n = residuals.len() as f64;
    let mean = residuals.mean().unwrap_or(0.0);
    let moment = |k: i32| residuals.iter().map(|e| (e - mean).powi(k)).sum::<f64>() / n;
    let m2 = moment(2);
    if !(m2 > 0.0) {
        return Ok(NormalitySummary {
            skewness: f64::NAN,
            excess_kurtosis: f64::NAN,
            jarque_bera: f64::NAN,
            p_value: f64::NAN,
        });
    }
    let skewness = moment(3) / m2.powf(1.5);
    let excess_kurtosis = moment(4) / (m2 * m2) - 3.0;
    let jarque_bera = n / 6.0 * (skewness.powi(2) + excess_kurtosis.powi(2) / 4.0);
    let chi2 = ChiSquared::new(2.0).map_err(|e| DiagnosticsError::Distribution(e.to_string()))?;
    Ok(NormalitySummary {
        skewness,
        excess_kurtosis,
        jarque_bera,
        p_value: chi2.sf(jarque_bera),
    })
}
