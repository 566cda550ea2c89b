#![deny(dead_code)]

pub mod aicc;
pub mod analysis;
pub mod config;
pub mod data;
pub mod design;
pub mod diagnostics;
pub mod faer_ndarray;
pub mod hier_part;
pub mod ols;
pub mod report;
pub mod stepwise;

#[cfg(test)]
mod test_support;
