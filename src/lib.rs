//! Cribar - change-impact-aware predictive test selection
//!
//! This library decides which automated tests are worth executing for a given
//! set of code changes, ranked by predicted risk: static change-impact
//! analysis, historical feature derivation, a trainable failure-probability
//! model, and constrained prioritization combined into one selection.

pub mod cli;
pub mod config;
pub mod diff;
pub mod engine;
pub mod features;
pub mod forest;
pub mod generate;
pub mod history;
pub mod impact;
pub mod persistence;
pub mod predictor;
pub mod prioritize;
pub mod report;
pub mod structural;
