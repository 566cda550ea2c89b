//! # Data Loading and Validation Module
//!
//! This module is the exclusive entry point for the study data. It reads the
//! delimited patient table, validates it against the fixed fourteen-column
//! schema, decodes the integer-coded categorical fields into closed label sets
//! and hands back an immutable [`Dataset`].
//!
//! - Strict Schema: column names are not configurable. Headers are matched
//!   case-insensitively against the canonical names (`AGE`, `SEX`, ...), in any
//!   order; extra columns are ignored.
//! - Stable Identity: each observation receives a 1-based [`RowId`] in file
//!   order. Exclusions downstream are expressed by id, never by position.
//! - User-Centric Errors: failures are assumed to be input errors, and
//!   [`DataError`] names the column and line involved.

use csv::{ReaderBuilder, Trim};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Stable, 1-based identifier of an observation, assigned at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct RowId(usize);

impl RowId {
    /// Returns `None` for zero, since row ids are 1-based.
    pub fn new(id: usize) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for RowId {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        RowId::new(value).ok_or_else(|| "row ids are 1-based; 0 is not a valid row id".to_string())
    }
}

impl From<RowId> for usize {
    fn from(id: RowId) -> usize {
        id.0
    }
}

/// Whether a column is used as a number or decoded into a label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Numeric,
    Categorical,
}

/// The fourteen columns of the study table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Variable {
    Age,
    Sex,
    SmokStat,
    Quetelet,
    VitUse,
    Calories,
    Fat,
    Fiber,
    Alcohol,
    Cholesterol,
    BetaDiet,
    RetDiet,
    BetaPlasma,
    RetPlasma,
}

impl Variable {
    /// All variables, in the column order of the source file.
    pub const ALL: [Variable; 14] = [
        Variable::Age,
        Variable::Sex,
        Variable::SmokStat,
        Variable::Quetelet,
        Variable::VitUse,
        Variable::Calories,
        Variable::Fat,
        Variable::Fiber,
        Variable::Alcohol,
        Variable::Cholesterol,
        Variable::BetaDiet,
        Variable::RetDiet,
        Variable::BetaPlasma,
        Variable::RetPlasma,
    ];

    /// Canonical upper-case column name.
    pub fn name(self) -> &'static str {
        match self {
            Variable::Age => "AGE",
            Variable::Sex => "SEX",
            Variable::SmokStat => "SMOKSTAT",
            Variable::Quetelet => "QUETELET",
            Variable::VitUse => "VITUSE",
            Variable::Calories => "CALORIES",
            Variable::Fat => "FAT",
            Variable::Fiber => "FIBER",
            Variable::Alcohol => "ALCOHOL",
            Variable::Cholesterol => "CHOLESTEROL",
            Variable::BetaDiet => "BETADIET",
            Variable::RetDiet => "RETDIET",
            Variable::BetaPlasma => "BETAPLASMA",
            Variable::RetPlasma => "RETPLASMA",
        }
    }

    pub fn kind(self) -> VariableKind {
        match self {
            Variable::Sex | Variable::SmokStat | Variable::VitUse => VariableKind::Categorical,
            _ => VariableKind::Numeric,
        }
    }

    /// Ordered level labels for categorical variables; empty for numeric ones.
    /// The first level is the baseline used by treatment coding.
    pub fn levels(self) -> &'static [&'static str] {
        match self {
            Variable::Sex => Sex::LABELS,
            Variable::SmokStat => SmokingStatus::LABELS,
            Variable::VitUse => VitaminUse::LABELS,
            _ => &[],
        }
    }

    fn position(self) -> usize {
        Variable::ALL
            .iter()
            .position(|&v| v == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variable {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Variable::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| DataError::UnknownVariable(trimmed.to_string()))
    }
}

impl TryFrom<String> for Variable {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Variable> for String {
    fn from(v: Variable) -> String {
        v.name().to_string()
    }
}

macro_rules! categorical {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const LABELS: &'static [&'static str] = &[$($label),+];

            pub fn from_code(code: u8) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            /// Zero-based position of this level in [`Self::LABELS`].
            pub fn level_index(self) -> usize {
                usize::from(self.code() - 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

categorical!(
    /// SEX: 1 = male, 2 = female.
    Sex { Male = 1 => "male", Female = 2 => "female" }
);

categorical!(
    /// SMOKSTAT: 1 = never, 2 = former, 3 = current.
    SmokingStatus { Never = 1 => "never", Former = 2 => "former", Current = 3 => "current" }
);

categorical!(
    /// VITUSE: 1 = yes (fairly often), 2 = infrequent, 3 = no.
    VitaminUse { Yes = 1 => "yes", Infrequent = 2 => "infrequent", No = 3 => "no" }
);

/// One patient record with its categorical fields already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub row_id: RowId,
    pub age: f64,
    pub sex: Sex,
    pub smoking: SmokingStatus,
    pub quetelet: f64,
    pub vitamin_use: VitaminUse,
    pub calories: f64,
    pub fat: f64,
    pub fiber: f64,
    pub alcohol: f64,
    pub cholesterol: f64,
    pub beta_diet: f64,
    pub ret_diet: f64,
    pub beta_plasma: f64,
    pub ret_plasma: f64,
}

impl Observation {
    /// Builds an observation from raw values in [`Variable::ALL`] order,
    /// decoding the categorical codes.
    pub fn from_values(row_id: RowId, values: [f64; 14]) -> Result<Self, DataError> {
        let value = |v: Variable| values[v.position()];
        let code = |v: Variable| -> Result<u8, DataError> {
            let raw = value(v);
            if raw.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&raw) {
                return Err(DataError::UnknownCategoryCode {
                    column: v.name(),
                    row: row_id,
                    code: raw,
                });
            }
            Ok(raw as u8)
        };
        let unknown = |v: Variable| DataError::UnknownCategoryCode {
            column: v.name(),
            row: row_id,
            code: value(v),
        };

        Ok(Observation {
            row_id,
            age: value(Variable::Age),
            sex: Sex::from_code(code(Variable::Sex)?).ok_or_else(|| unknown(Variable::Sex))?,
            smoking: SmokingStatus::from_code(code(Variable::SmokStat)?)
                .ok_or_else(|| unknown(Variable::SmokStat))?,
            quetelet: value(Variable::Quetelet),
            vitamin_use: VitaminUse::from_code(code(Variable::VitUse)?)
                .ok_or_else(|| unknown(Variable::VitUse))?,
            calories: value(Variable::Calories),
            fat: value(Variable::Fat),
            fiber: value(Variable::Fiber),
            alcohol: value(Variable::Alcohol),
            cholesterol: value(Variable::Cholesterol),
            beta_diet: value(Variable::BetaDiet),
            ret_diet: value(Variable::RetDiet),
            beta_plasma: value(Variable::BetaPlasma),
            ret_plasma: value(Variable::RetPlasma),
        })
    }

    /// Numeric value of a variable. Categorical variables yield their integer code.
    pub fn value(&self, variable: Variable) -> f64 {
        match variable {
            Variable::Age => self.age,
            Variable::Sex => f64::from(self.sex.code()),
            Variable::SmokStat => f64::from(self.smoking.code()),
            Variable::Quetelet => self.quetelet,
            Variable::VitUse => f64::from(self.vitamin_use.code()),
            Variable::Calories => self.calories,
            Variable::Fat => self.fat,
            Variable::Fiber => self.fiber,
            Variable::Alcohol => self.alcohol,
            Variable::Cholesterol => self.cholesterol,
            Variable::BetaDiet => self.beta_diet,
            Variable::RetDiet => self.ret_diet,
            Variable::BetaPlasma => self.beta_plasma,
            Variable::RetPlasma => self.ret_plasma,
        }
    }

    /// Zero-based level index for categorical variables, `None` for numeric ones.
    pub fn level_index(&self, variable: Variable) -> Option<usize> {
        match variable {
            Variable::Sex => Some(self.sex.level_index()),
            Variable::SmokStat => Some(self.smoking.level_index()),
            Variable::VitUse => Some(self.vitamin_use.level_index()),
            _ => None,
        }
    }
}

/// Descriptive statistics of one column, used in the report preamble.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub variable: Variable,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

/// An ordered, immutable collection of observations in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    /// Wraps observations, rejecting duplicated row ids.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self, DataError> {
        let mut seen = HashSet::with_capacity(observations.len());
        for obs in &observations {
            if !seen.insert(obs.row_id) {
                return Err(DataError::DuplicateRowId(obs.row_id));
            }
        }
        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.observations.iter().map(|o| o.row_id).collect()
    }

    pub fn get(&self, id: RowId) -> Option<&Observation> {
        self.observations.iter().find(|o| o.row_id == id)
    }

    /// Returns a copy without the given observations. Every id must exist,
    /// so a stale exclusion list fails loudly instead of silently doing nothing.
    pub fn excluding(&self, ids: &[RowId]) -> Result<Dataset, DataError> {
        let excluded: BTreeSet<RowId> = ids.iter().copied().collect();
        let present: HashSet<RowId> = self.observations.iter().map(|o| o.row_id).collect();
        if let Some(&missing) = excluded.iter().find(|id| !present.contains(id)) {
            return Err(DataError::UnknownRowId(missing));
        }
        let observations = self
            .observations
            .iter()
            .filter(|o| !excluded.contains(&o.row_id))
            .cloned()
            .collect();
        Ok(Dataset { observations })
    }

    pub fn numeric_column(&self, variable: Variable) -> Array1<f64> {
        self.observations.iter().map(|o| o.value(variable)).collect()
    }

    /// Mean, sample standard deviation and range of every numeric column.
    pub fn describe(&self) -> Vec<ColumnSummary> {
        Variable::ALL
            .iter()
            .copied()
            .filter(|v| v.kind() == VariableKind::Numeric)
            .map(|variable| {
                let column = self.numeric_column(variable);
                let std_dev = if column.len() > 1 { column.std(1.0) } else { 0.0 };
                ColumnSummary {
                    variable,
                    mean: column.mean().unwrap_or(f64::NAN),
                    std_dev,
                    min: column.iter().copied().fold(f64::INFINITY, f64::min),
                    max: column.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect()
    }
}

/// Parsing options for the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub delimiter: u8,
    /// Lines starting with this byte are skipped entirely.
    pub comment: Option<u8>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            comment: Some(b'#'),
        }
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed input table: {0}")]
    Malformed(#[from] csv::Error),

    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling."
    )]
    ColumnNotFound(&'static str),

    #[error("Missing value in required column '{column}' on line {line}.")]
    MissingValue { column: &'static str, line: u64 },

    #[error("Column '{column}' on line {line} holds '{value}', which is not a number.")]
    NotNumeric {
        column: &'static str,
        line: u64,
        value: String,
    },

    #[error("Non-finite value (NaN or Infinity) in column '{column}' on line {line}.")]
    NonFiniteValue { column: &'static str, line: u64 },

    #[error("Unrecognized code {code} in categorical column '{column}' for row {row}.")]
    UnknownCategoryCode {
        column: &'static str,
        row: RowId,
        code: f64,
    },

    #[error("The input file contains no data rows.")]
    Empty,

    #[error("Row id {0} appears more than once.")]
    DuplicateRowId(RowId),

    #[error("Row id {0} does not exist in the dataset.")]
    UnknownRowId(RowId),

    #[error("'{0}' is not one of the study variables.")]
    UnknownVariable(String),
}

/// Loads and validates the study table from disk.
pub fn load_dataset(path: &Path, options: &LoadOptions) -> Result<Dataset, DataError> {
    log::info!("Loading data from '{}'", path.display());
    let dataset = read_dataset(File::open(path)?, options)?;
    log::info!("Loaded {} observations.", dataset.len());
    Ok(dataset)
}

/// Reads the study table from any reader. Row ids count data rows only, so
/// comment lines never shift them.
pub fn read_dataset<R: Read>(reader: R, options: &LoadOptions) -> Result<Dataset, DataError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .comment(options.comment)
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let mut column_index = [0usize; 14];
    for (slot, variable) in column_index.iter_mut().zip(Variable::ALL) {
        *slot = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(variable.name()))
            .ok_or(DataError::ColumnNotFound(variable.name()))?;
    }
    log::debug!("Header columns resolved: {column_index:?}");

    let mut observations = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let mut values = [0.0f64; 14];
        for ((value, variable), &col) in values.iter_mut().zip(Variable::ALL).zip(&column_index) {
            *value = parse_field(record.get(col), variable.name(), line)?;
        }
        let row_id = RowId(idx + 1);
        observations.push(Observation::from_values(row_id, values)?);
    }

    if observations.is_empty() {
        return Err(DataError::Empty);
    }
    Dataset::from_observations(observations)
}

fn parse_field(field: Option<&str>, column: &'static str, line: u64) -> Result<f64, DataError> {
    let text = field.unwrap_or("");
    if text.is_empty() || text.eq_ignore_ascii_case("NA") {
        return Err(DataError::MissingValue { column, line });
    }
    let value: f64 = text.parse().map_err(|_| DataError::NotNumeric {
        column,
        line,
        value: text.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DataError::NonFiniteValue { column, line });
    }
    Ok(value)
}
