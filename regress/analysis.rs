//! The end-to-end study workflow.
//!
//! 1. Load the table.
//! 2. Fit the full model on every row and screen it for influential points.
//! 3. Refit with the configured exclusions; everything after this step uses
//!    the reduced working dataset.
//! 4. VIF for the full model and every candidate, AICc ranking of the
//!    candidates, stepwise AIC search and hierarchical partitioning.

use crate::aicc::{AiccError, CandidateSet, RankedCandidate};
use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{ColumnSummary, DataError, Dataset, RowId, load_dataset};
use crate::design::DesignError;
use crate::diagnostics::{
    DiagnosticSeries, DiagnosticsError, InfluenceFlag, InfluenceMeasures, NormalitySummary,
    VifReport, flag_influential, normality_summary, variance_inflation,
};
use crate::hier_part::{Partition, PartitionError, hierarchical_partition};
use crate::ols::{LinearModel, OlsError};
use crate::report::{
    AiccTable, CoefficientTable, DatasetSummaryTable, InfluenceTable, NormalityLine, PartitionTable,
    ReportError, StepwiseTable, VifTable, write_series,
};
use crate::stepwise::{StepwiseError, StepwiseResult, stepwise_aic};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model specification error: {0}")]
    Design(#[from] DesignError),

    #[error("Model fit failed: {0}")]
    Ols(#[from] OlsError),

    #[error("Diagnostics failed: {0}")]
    Diagnostics(#[from] DiagnosticsError),

    #[error("Model comparison failed: {0}")]
    Aicc(#[from] AiccError),

    #[error("Stepwise selection failed: {0}")]
    Stepwise(#[from] StepwiseError),

    #[error("Hierarchical partitioning failed: {0}")]
    Partition(#[from] PartitionError),

    #[error("Writing results failed: {0}")]
    Report(#[from] ReportError),
}

/// Diagnostics of one fitted model.
#[derive(Debug, Clone)]
pub struct FitDiagnostics {
    pub model: LinearModel,
    pub influence: InfluenceMeasures,
    pub flags: Vec<InfluenceFlag>,
    pub series: DiagnosticSeries,
    pub normality: NormalitySummary,
}

impl FitDiagnostics {
    fn compute(model: LinearModel, config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let influence = InfluenceMeasures::from_model(&model);
        let flags = flag_influential(&influence, &config.influence);
        let series = DiagnosticSeries::from_measures(&influence)?;
        let normality = normality_summary(model.residuals().view())?;
        Ok(Self {
            model,
            influence,
            flags,
            series,
            normality,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub vif_threshold: f64,
    pub n_loaded: usize,
    pub excluded: Vec<RowId>,
    pub dataset_summary: Vec<ColumnSummary>,
    /// Full model on every loaded row.
    pub screening: FitDiagnostics,
    /// Full model on the working dataset.
    pub full: FitDiagnostics,
    pub full_vif: VifReport,
    pub candidate_vifs: Vec<(String, VifReport)>,
    pub ranking: Vec<RankedCandidate>,
    pub stepwise: StepwiseResult,
    pub partition: Partition,
}

/// Loads the configured table and runs [`analyze`] on it.
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    let data = load_dataset(&config.data_path, &config.load_options()?)?;
    analyze(Arc::new(data), config)
}

/// Runs every stage on an already loaded dataset.
pub fn analyze(
    data: Arc<Dataset>,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    let spec = config.full_spec()?;

    log::info!("Screening fit of {} on all {} rows", spec, data.len());
    let screening_model = LinearModel::fit(Arc::clone(&data), &spec)?;
    let screening = FitDiagnostics::compute(screening_model, config)?;

    let working = Arc::new(data.excluding(&config.exclude_rows)?);
    log::info!(
        "Working dataset: {} rows ({} excluded)",
        working.len(),
        config.exclude_rows.len()
    );
    let full_model = LinearModel::fit(Arc::clone(&working), &spec)?;
    let full_vif = variance_inflation(full_model.design())?;
    let full = FitDiagnostics::compute(full_model, config)?;

    let mut candidates = CandidateSet::new();
    let mut candidate_vifs = Vec::new();
    for (name, candidate_spec) in config.candidate_specs()? {
        let model = LinearModel::fit(Arc::clone(&working), &candidate_spec)?;
        candidate_vifs.push((name.clone(), variance_inflation(model.design())?));
        candidates.push(name, model)?;
    }
    let ranking = if candidates.is_empty() {
        Vec::new()
    } else {
        candidates.rank()?
    };

    let stepwise = stepwise_aic(Arc::clone(&working), &spec, &config.stepwise_options())?;
    let partition = hierarchical_partition(&working, &spec, &config.partition_options(), None)?;

    Ok(AnalysisReport {
        vif_threshold: config.vif_threshold,
        n_loaded: data.len(),
        excluded: config.exclude_rows.clone(),
        dataset_summary: data.describe(),
        screening,
        full,
        full_vif,
        candidate_vifs,
        ranking,
        stepwise,
        partition,
    })
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let excluded = self
            .excluded
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(f, "== Data ({} rows loaded) ==", self.n_loaded)?;
        writeln!(f, "{}", DatasetSummaryTable(&self.dataset_summary))?;

        writeln!(f, "== Screening fit (all rows) ==")?;
        writeln!(f, "{}", CoefficientTable { model: &self.screening.model, vif: None })?;
        writeln!(f, "{}", InfluenceTable(&self.screening.flags))?;

        writeln!(
            f,
            "== Full model (excluded rows: {}) ==",
            if excluded.is_empty() { "none" } else { excluded.as_str() }
        )?;
        writeln!(
            f,
            "{}",
            CoefficientTable {
                model: &self.full.model,
                vif: Some(&self.full_vif)
            }
        )?;
        write!(f, "{}", NormalityLine(&self.full.normality))?;
        writeln!(f, "{}", InfluenceTable(&self.full.flags))?;

        writeln!(f, "== Variance inflation ==")?;
        writeln!(f, "-- full --")?;
        writeln!(f, "{}", VifTable { report: &self.full_vif, threshold: self.vif_threshold })?;
        for (name, vif) in &self.candidate_vifs {
            writeln!(f, "-- {name} --")?;
            writeln!(f, "{}", VifTable { report: vif, threshold: self.vif_threshold })?;
        }

        if !self.ranking.is_empty() {
            writeln!(f, "== AICc ranking ==")?;
            writeln!(f, "{}", AiccTable(&self.ranking))?;
        }

        writeln!(f, "== Stepwise AIC ==")?;
        writeln!(f, "{}", StepwiseTable(&self.stepwise))?;

        writeln!(f, "== Hierarchical partitioning ==")?;
        write!(f, "{}", PartitionTable(&self.partition))
    }
}

/// Files written by [`write_outputs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub report: PathBuf,
    pub screening_series: PathBuf,
    pub full_series: PathBuf,
}

/// Writes `report.txt` and the two diagnostic series tables into `dir`.
pub fn write_outputs(report: &AnalysisReport, dir: &Path) -> Result<OutputPaths, AnalysisError> {
    fs::create_dir_all(dir).map_err(ReportError::from)?;
    let paths = OutputPaths {
        report: dir.join("report.txt"),
        screening_series: dir.join("diagnostics_all_rows.tsv"),
        full_series: dir.join("diagnostics_working.tsv"),
    };
    fs::write(&paths.report, report.to_string()).map_err(ReportError::from)?;
    write_series(&report.screening.series, &paths.screening_series)?;
    write_series(&report.full.series, &paths.full_series)?;
    log::info!("Report written to '{}'", paths.report.display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CandidateModel;
    use crate::data::Variable;
    use crate::test_support::synthetic_study;
    use tempfile::tempdir;

    fn small_config() -> AnalysisConfig {
        let mut config = AnalysisConfig::retinol_study();
        config.predictors = vec![
            Variable::Age,
            Variable::Calories,
            Variable::Fat,
            Variable::Alcohol,
            Variable::Fiber,
        ];
        config.candidates = vec![
            CandidateModel {
                name: "full".to_string(),
                predictors: config.predictors.clone(),
            },
            CandidateModel {
                name: "no_calories".to_string(),
                predictors: vec![Variable::Age, Variable::Fat, Variable::Alcohol, Variable::Fiber],
            },
        ];
        config.exclude_rows = vec![RowId::new(5).unwrap()];
        config
    }

    #[test]
    fn test_pipeline_stages_use_working_dataset() {
        let data = Arc::new(synthetic_study(120, 77));
        let report = analyze(data, &small_config()).unwrap();

        assert_eq!(report.n_loaded, 120);
        assert_eq!(report.screening.model.n_obs(), 120);
        assert_eq!(report.full.model.n_obs(), 119);
        assert_eq!(report.full.model.df_residual(), 119 - 6);
        assert_eq!(report.stepwise.model.n_obs(), 119);
        assert_eq!(report.full.series.len(), 119);
        assert_eq!(report.ranking.len(), 2);
        assert_eq!(report.candidate_vifs.len(), 2);
        assert_eq!(report.partition.contributions.len(), 5);

        // Calories and fat are strongly collinear; dropping calories relieves fat.
        let fat_full = report.full_vif.get("FAT").unwrap();
        let fat_reduced = report.candidate_vifs[1].1.get("FAT").unwrap();
        assert!(fat_full > fat_reduced);
        assert!(fat_reduced < 5.0);

        let text = report.to_string();
        for heading in ["AICc ranking", "Stepwise AIC", "Hierarchical partitioning"] {
            assert!(text.contains(heading));
        }
    }

    #[test]
    fn test_unknown_exclusion_aborts() {
        let data = Arc::new(synthetic_study(30, 1));
        let mut config = small_config();
        config.exclude_rows = vec![RowId::new(31).unwrap()];
        assert!(matches!(
            analyze(data, &config),
            Err(AnalysisError::Data(DataError::UnknownRowId(_)))
        ));
    }

    #[test]
    fn test_outputs_written() {
        let data = Arc::new(synthetic_study(60, 3));
        let report = analyze(data, &small_config()).unwrap();
        let dir = tempdir().unwrap();
        let paths = write_outputs(&report, &dir.path().join("out")).unwrap();
        let text = fs::read_to_string(&paths.report).unwrap();
        assert!(text.contains("Full model (excluded rows: 5)"));
        let series = fs::read_to_string(&paths.full_series).unwrap();
        assert_eq!(series.lines().count(), 60);
        let screening = fs::read_to_string(&paths.screening_series).unwrap();
        assert_eq!(screening.lines().count(), 61);
    }
}
