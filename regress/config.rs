//! Analysis configuration, persisted as TOML.
//!
//! Every field has a default, so a configuration file only needs to list what
//! differs from [`AnalysisConfig::retinol_study`].

use crate::data::{LoadOptions, RowId, Variable};
use crate::design::{DesignError, ModelSpec};
use crate::diagnostics::{DEFAULT_VIF_THRESHOLD, DiagnosticsError, InfluenceThresholds};
use crate::hier_part::{DEFAULT_MAX_PREDICTORS, MAX_PREDICTORS_CEILING, PartitionOptions};
use crate::stepwise::StepwiseOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Invalid model in configuration: {0}")]
    Design(#[from] DesignError),

    #[error("Invalid influence thresholds: {0}")]
    Diagnostics(#[from] DiagnosticsError),

    #[error("The {0} must be a single ASCII character, got '{1}'.")]
    NonAsciiSeparator(&'static str, char),

    #[error("The full model must list at least one predictor.")]
    NoPredictors,

    #[error("Candidate model names must be non-empty.")]
    EmptyCandidateName,

    #[error("Candidate model '{0}' is defined more than once.")]
    DuplicateCandidate(String),

    #[error("The VIF threshold must be positive and finite, got {0}.")]
    InvalidVifThreshold(f64),

    #[error("hier_part.max_predictors must be between 1 and {ceiling}, got {limit}.")]
    InvalidPartitionLimit { limit: usize, ceiling: usize },
}

/// A named candidate for AICc comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateModel {
    pub name: String,
    pub predictors: Vec<Variable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierPartConfig {
    pub max_predictors: usize,
    pub parallel: bool,
}

impl Default for HierPartConfig {
    fn default() -> Self {
        Self {
            max_predictors: DEFAULT_MAX_PREDICTORS,
            parallel: true,
        }
    }
}

/// Inputs and tuning knobs for one run of the analysis pipeline.
///
/// Table-valued fields come last so the serialized TOML stays flat at the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub data_path: PathBuf,
    pub output_dir: PathBuf,
    pub delimiter: char,
    /// Lines starting with this character are skipped.
    pub comment: Option<char>,
    pub response: Variable,
    /// Predictors of the full model, in report order.
    pub predictors: Vec<Variable>,
    /// Row ids removed before every fit except the initial screening fit.
    pub exclude_rows: Vec<RowId>,
    pub vif_threshold: f64,
    /// `None` bounds the search at twice the number of predictors.
    pub stepwise_max_steps: Option<usize>,
    pub influence: InfluenceThresholds,
    pub hier_part: HierPartConfig,
    pub candidates: Vec<CandidateModel>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::retinol_study()
    }
}

impl AnalysisConfig {
    /// The plasma retinol workflow: nine numeric predictors of RETPLASMA,
    /// observation 62 excluded, and three candidates for AICc.
    pub fn retinol_study() -> Self {
        let predictors = vec![
            Variable::Age,
            Variable::Quetelet,
            Variable::Calories,
            Variable::Fat,
            Variable::Fiber,
            Variable::Alcohol,
            Variable::Cholesterol,
            Variable::BetaDiet,
            Variable::RetDiet,
        ];
        let without = |dropped: Variable| -> Vec<Variable> {
            predictors.iter().copied().filter(|&p| p != dropped).collect()
        };
        let candidates = vec![
            CandidateModel {
                name: "full".to_string(),
                predictors: predictors.clone(),
            },
            CandidateModel {
                name: "no_calories".to_string(),
                predictors: without(Variable::Calories),
            },
            CandidateModel {
                name: "no_fat".to_string(),
                predictors: without(Variable::Fat),
            },
        ];

        Self {
            data_path: PathBuf::from("data/plasma_retinol.tsv"),
            output_dir: PathBuf::from("retinol_output"),
            delimiter: '\t',
            comment: Some('#'),
            response: Variable::RetPlasma,
            predictors,
            exclude_rows: RowId::new(62).into_iter().collect(),
            vif_threshold: DEFAULT_VIF_THRESHOLD,
            stepwise_max_steps: None,
            influence: InfluenceThresholds::default(),
            hier_part: HierPartConfig::default(),
            candidates,
        }
    }

    /// Saves the configuration to a human-readable TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.load_options()?;
        if self.predictors.is_empty() {
            return Err(ConfigError::NoPredictors);
        }
        self.full_spec()?;

        let mut names = HashSet::new();
        for candidate in &self.candidates {
            if candidate.name.trim().is_empty() {
                return Err(ConfigError::EmptyCandidateName);
            }
            if !names.insert(candidate.name.as_str()) {
                return Err(ConfigError::DuplicateCandidate(candidate.name.clone()));
            }
            ModelSpec::new(self.response, candidate.predictors.iter().copied())?;
        }

        if !(self.vif_threshold.is_finite() && self.vif_threshold > 0.0) {
            return Err(ConfigError::InvalidVifThreshold(self.vif_threshold));
        }
        self.influence.validate()?;

        let limit = self.hier_part.max_predictors;
        if limit == 0 || limit > MAX_PREDICTORS_CEILING {
            return Err(ConfigError::InvalidPartitionLimit {
                limit,
                ceiling: MAX_PREDICTORS_CEILING,
            });
        }
        Ok(())
    }

    pub fn full_spec(&self) -> Result<ModelSpec, ConfigError> {
        Ok(ModelSpec::new(self.response, self.predictors.iter().copied())?)
    }

    pub fn candidate_specs(&self) -> Result<Vec<(String, ModelSpec)>, ConfigError> {
        self.candidates
            .iter()
            .map(|c| {
                let spec = ModelSpec::new(self.response, c.predictors.iter().copied())?;
                Ok((c.name.clone(), spec))
            })
            .collect()
    }

    pub fn load_options(&self) -> Result<LoadOptions, ConfigError> {
        let delimiter = ascii_byte("delimiter", self.delimiter)?;
        let comment = self
            .comment
            .map(|c| ascii_byte("comment prefix", c))
            .transpose()?;
        Ok(LoadOptions { delimiter, comment })
    }

    pub fn stepwise_options(&self) -> StepwiseOptions {
        StepwiseOptions {
            max_steps: self.stepwise_max_steps,
        }
    }

    pub fn partition_options(&self) -> PartitionOptions {
        PartitionOptions {
            max_predictors: self.hier_part.max_predictors,
            parallel: self.hier_part.parallel,
        }
    }
}

fn ascii_byte(what: &'static str, c: char) -> Result<u8, ConfigError> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConfigError::NonAsciiSeparator(what, c))
    }
}
