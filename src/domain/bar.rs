//! Feature-annotated price bar.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Columns that encode information only known after the bar closes.
pub const FORWARD_LOOKING_COLUMNS: &[&str] = &["target", "label", "forward_return", "next_close"];

pub fn is_forward_looking(name: &str) -> bool {
    FORWARD_LOOKING_COLUMNS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: f64,
    pub features: BTreeMap<String, f64>,
}

impl Bar {
    /// A finite feature value; NaN and infinities count as missing.
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied().filter(|v| v.is_finite())
    }
}
