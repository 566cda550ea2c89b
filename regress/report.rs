//! Plain-text rendering of analysis results and TSV export of the diagnostic
//! plot series.
//!
//! Each table is a small borrowing wrapper implementing `Display`, so callers
//! can print it directly or collect it into the report file.

use crate::aicc::RankedCandidate;
use crate::data::ColumnSummary;
use crate::design::INTERCEPT_NAME;
use crate::diagnostics::{DiagnosticSeries, InfluenceFlag, NormalitySummary, VifReport};
use crate::hier_part::Partition;
use crate::ols::LinearModel;
use crate::stepwise::StepwiseResult;
use csv::WriterBuilder;
use itertools::Itertools;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report output: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to write series table: {0}")]
    CsvError(#[from] csv::Error),
}

/// R-style significance code.
pub fn significance_marker(p: f64) -> &'static str {
    match p {
        p if p < 0.001 => "***",
        p if p < 0.01 => "**",
        p if p < 0.05 => "*",
        p if p < 0.1 => ".",
        _ => "",
    }
}

fn format_p(p: f64) -> String {
    if p.is_nan() {
        "NA".to_string()
    } else if p < 2e-16 {
        "<2e-16".to_string()
    } else if p < 1e-4 {
        format!("{p:.2e}")
    } else {
        format!("{p:.4}")
    }
}

/// Coefficient table with an optional VIF column and the model summary line.
pub struct CoefficientTable<'a> {
    pub model: &'a LinearModel,
    pub vif: Option<&'a VifReport>,
}

impl fmt::Display for CoefficientTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.model;
        writeln!(f, "Model: {}   (n = {})", model.spec(), model.n_obs())?;
        writeln!(
            f,
            "{:<22} {:>12} {:>11} {:>8} {:>10} {:<4} {:>8}",
            "Term", "Estimate", "Std.Error", "t", "p", "", "VIF"
        )?;
        for row in model.coefficient_table() {
            let vif = match self.vif.and_then(|v| v.get(&row.name)) {
                Some(v) if row.name != INTERCEPT_NAME => format!("{v:.2}"),
                _ => String::new(),
            };
            writeln!(
                f,
                "{:<22} {:>12.5} {:>11.5} {:>8.3} {:>10} {:<4} {:>8}",
                row.name,
                row.estimate,
                row.std_error,
                row.t_value,
                format_p(row.p_value),
                significance_marker(row.p_value),
                vif
            )?;
        }
        writeln!(f, "---")?;
        writeln!(f, "Signif. codes: 0 '***' 0.001 '**' 0.01 '*' 0.05 '.' 0.1 ' ' 1")?;
        write!(
            f,
            "Residual standard error: {:.4} on {} degrees of freedom; R² = {:.4}, adjusted R² = {:.4}",
            model.sigma(),
            model.df_residual(),
            model.r_squared(),
            model.adj_r_squared()
        )?;
        match model.f_statistic() {
            Some(fs) => writeln!(
                f,
                "\nF-statistic: {:.3} on {} and {} DF, p-value: {}",
                fs.value,
                fs.df_model,
                fs.df_residual,
                format_p(fs.p_value)
            ),
            None => writeln!(f),
        }
    }
}

pub struct VifTable<'a> {
    pub report: &'a VifReport,
    pub threshold: f64,
}

impl fmt::Display for VifTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<22} {:>10} {:>10}", "Column", "VIF", "aux R²")?;
        for e in &self.report.entries {
            let mark = if e.vif > self.threshold { "  <" } else { "" };
            writeln!(f, "{:<22} {:>10.3} {:>10.4}{}", e.column, e.vif, e.r_squared, mark)?;
        }
        let over = self.report.exceeding(self.threshold);
        if over.is_empty() {
            writeln!(f, "No column exceeds VIF {}.", self.threshold)
        } else {
            writeln!(
                f,
                "Above VIF {}: {}",
                self.threshold,
                over.iter().map(|e| e.column.as_str()).join(", ")
            )
        }
    }
}

pub struct InfluenceTable<'a>(pub &'a [InfluenceFlag]);

impl fmt::Display for InfluenceTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No influential observations flagged.");
        }
        writeln!(
            f,
            "{:>6} {:>10} {:>12} {:>10}  {}",
            "Row", "Leverage", "Std.Resid", "Cook's D", "Reason"
        )?;
        for flag in self.0 {
            writeln!(
                f,
                "{:>6} {:>10.4} {:>12.3} {:>10.4}  {}",
                flag.row_id.get(),
                flag.leverage,
                flag.std_residual,
                flag.cooks_distance,
                flag.reasons.iter().join(", ")
            )?;
        }
        Ok(())
    }
}

pub struct AiccTable<'a>(pub &'a [RankedCandidate]);

impl fmt::Display for AiccTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<20} {:>3} {:>11} {:>9} {:>8}",
            "Model", "K", "AICc", "ΔAICc", "Weight"
        )?;
        for r in self.0 {
            writeln!(
                f,
                "{:<20} {:>3} {:>11.3} {:>9.3} {:>8.4}",
                r.name, r.criteria.k, r.criteria.aicc, r.delta, r.weight
            )?;
        }
        Ok(())
    }
}

pub struct StepwiseTable<'a>(pub &'a StepwiseResult);

impl fmt::Display for StepwiseTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>4} {:<18} {:>11}", "Step", "Action", "AIC")?;
        for record in &self.0.trace {
            writeln!(
                f,
                "{:>4} {:<18} {:>11.3}",
                record.step,
                record.action.to_string(),
                record.aic
            )?;
        }
        writeln!(f, "Stopped: {}.", self.0.stop_reason)?;
        writeln!(
            f,
            "Selected: {}",
            self.0.model.spec().predictors.iter().map(|v| v.name()).join(" + ")
        )
    }
}

pub struct PartitionTable<'a>(pub &'a Partition);

impl fmt::Display for PartitionTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:>12} {:>12} {:>12} {:>8}",
            "Predictor", "Independent", "Joint", "Total", "I (%)"
        )?;
        for c in &self.0.contributions {
            writeln!(
                f,
                "{:<14} {:>12.5} {:>12.5} {:>12.5} {:>8.2}",
                c.variable.name(),
                c.independent,
                c.joint,
                c.total,
                c.independent_percent
            )?;
        }
        writeln!(
            f,
            "Sum of independent contributions = {:.5}; full-model R² = {:.5}",
            self.0.independent_sum(),
            self.0.full_r_squared
        )
    }
}

pub struct NormalityLine<'a>(pub &'a NormalitySummary);

impl fmt::Display for NormalityLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Residual skewness = {:.3}, excess kurtosis = {:.3}, Jarque-Bera = {:.3} (p = {})",
            self.0.skewness,
            self.0.excess_kurtosis,
            self.0.jarque_bera,
            format_p(self.0.p_value)
        )
    }
}

pub struct DatasetSummaryTable<'a>(pub &'a [ColumnSummary]);

impl fmt::Display for DatasetSummaryTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>11} {:>11} {:>11} {:>11}",
            "Variable", "Mean", "Std.Dev", "Min", "Max"
        )?;
        for s in self.0 {
            writeln!(
                f,
                "{:<12} {:>11.3} {:>11.3} {:>11.3} {:>11.3}",
                s.variable.name(),
                s.mean,
                s.std_dev,
                s.min,
                s.max
            )?;
        }
        Ok(())
    }
}

/// Writes the plot series as a tab-separated table with a header row.
pub fn write_series_to<W: Write>(series: &DiagnosticSeries, writer: W) -> Result<(), ReportError> {
    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for row in &series.rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_series(series: &DiagnosticSeries, path: &Path) -> Result<(), ReportError> {
    write_series_to(series, File::create(path)?)?;
    log::info!("Wrote {} diagnostic rows to '{}'", series.len(), path.display());
    Ok(())
}
