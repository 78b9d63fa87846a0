//! Core domain types and logic.

pub mod bar;
pub mod series;
pub mod label;
pub mod walk_forward;
pub mod decision;
pub mod simulation;
pub mod scoring;
pub mod groups;
pub mod backtest;
pub mod report;
pub mod config_validation;
pub mod error;
