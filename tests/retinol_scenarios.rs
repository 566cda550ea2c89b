//! The documented study workflow, checked on two tables:
//!
//! - `tests/data/study_cohort.tsv`: a 315-row synthetic cohort in the study
//!   layout. RETPLASMA depends on AGE and ALCOHOL only, FAT tracks CALORIES,
//!   and row 62 carries an extreme ALCOHOL value. Always run.
//! - `data/plasma_retinol.tsv`: the published table. It is not redistributed
//!   with the crate, so those tests are ignored; run them with
//!   `cargo test -- --ignored` after placing the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use retinol::aicc::CandidateSet;
use retinol::config::AnalysisConfig;
use retinol::data::{Dataset, LoadOptions, RowId, Variable, load_dataset};
use retinol::diagnostics::{InfluenceMeasures, variance_inflation};
use retinol::ols::LinearModel;

fn load(relative: &str) -> Dataset {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative);
    assert!(
        Path::new(&path).exists(),
        "{} not found; place the study table there to run this test",
        path.display()
    );
    load_dataset(&path, &LoadOptions::default()).expect("load study table")
}

fn cohort() -> Dataset {
    load("tests/data/study_cohort.tsv")
}

fn published_table() -> Dataset {
    load("data/plasma_retinol.tsv")
}

fn row_62() -> RowId {
    RowId::new(62).unwrap()
}

fn assert_row_62_most_influential(data: Dataset) {
    let config = AnalysisConfig::retinol_study();
    let spec = config.full_spec().unwrap();
    let model = LinearModel::fit(Arc::new(data), &spec).unwrap();
    let measures = InfluenceMeasures::from_model(&model);
    assert_eq!(measures.most_influential().unwrap().row_id, row_62());
}

fn assert_age_and_alcohol_only_significant(data: Dataset) {
    let config = AnalysisConfig::retinol_study();
    let spec = config.full_spec().unwrap();
    let model = LinearModel::fit_excluding(&data, &spec, &[row_62()]).unwrap();
    assert_eq!(model.n_obs(), 314);
    assert_eq!(model.df_residual(), 314 - 10);
    assert_eq!(model.significant_columns(0.05), vec!["AGE", "ALCOHOL"]);
    assert!(model.coefficient("AGE").unwrap() > 0.0);
    assert!(model.coefficient("ALCOHOL").unwrap() > 0.0);
}

fn assert_dropping_calories_relieves_fat(data: Dataset) {
    let config = AnalysisConfig::retinol_study();
    let working = Arc::new(data.excluding(&[row_62()]).unwrap());

    let full = config.full_spec().unwrap();
    let reduced = full.without(Variable::Calories);
    let full_model = LinearModel::fit(Arc::clone(&working), &full).unwrap();
    let reduced_model = LinearModel::fit(working, &reduced).unwrap();

    let fat_full = variance_inflation(full_model.design()).unwrap().get("FAT").unwrap();
    let fat_reduced = variance_inflation(reduced_model.design())
        .unwrap()
        .get("FAT")
        .unwrap();
    assert!(fat_full > 5.0, "FAT VIF with CALORIES = {fat_full}");
    assert!(fat_reduced < 5.0, "FAT VIF without CALORIES = {fat_reduced}");
}

fn assert_no_calories_competitive(data: Dataset) {
    let config = AnalysisConfig::retinol_study();
    let working = Arc::new(data.excluding(&config.exclude_rows).unwrap());

    let mut set = CandidateSet::new();
    for (name, spec) in config.candidate_specs().unwrap() {
        set.push(name, LinearModel::fit(Arc::clone(&working), &spec).unwrap())
            .unwrap();
    }
    let ranked = set.rank().unwrap();
    let no_calories = ranked.iter().find(|r| r.name == "no_calories").unwrap();
    assert!(no_calories.delta < 2.0, "ΔAICc = {}", no_calories.delta);
}

#[test]
fn cohort_has_study_shape() {
    let data = cohort();
    assert_eq!(data.len(), 315);
    let outlier = data.get(row_62()).unwrap();
    assert!(outlier.alcohol > 200.0);
}

#[test]
fn cohort_row_62_dominates_influence_of_full_fit() {
    assert_row_62_most_influential(cohort());
}

#[test]
fn cohort_age_and_alcohol_are_the_significant_predictors() {
    assert_age_and_alcohol_only_significant(cohort());
}

#[test]
fn cohort_dropping_calories_relieves_fat_collinearity() {
    assert_dropping_calories_relieves_fat(cohort());
}

#[test]
fn cohort_no_calories_model_is_competitive_by_aicc() {
    assert_no_calories_competitive(cohort());
}

#[test]
#[ignore = "needs the published table at data/plasma_retinol.tsv"]
fn published_table_has_expected_shape() {
    let data = published_table();
    assert_eq!(data.len(), 315);
    assert!(data.get(row_62()).is_some());
}

#[test]
#[ignore = "needs the published table at data/plasma_retinol.tsv"]
fn published_row_62_dominates_influence_of_full_fit() {
    assert_row_62_most_influential(published_table());
}

#[test]
#[ignore = "needs the published table at data/plasma_retinol.tsv"]
fn published_age_and_alcohol_are_the_significant_predictors() {
    assert_age_and_alcohol_only_significant(published_table());
}

#[test]
#[ignore = "needs the published table at data/plasma_retinol.tsv"]
fn published_dropping_calories_relieves_fat_collinearity() {
    assert_dropping_calories_relieves_fat(published_table());
}

#[test]
#[ignore = "needs the published table at data/plasma_retinol.tsv"]
fn published_no_calories_model_is_competitive_by_aicc() {
    assert_no_calories_competitive(published_table());
}
