//! Symbol lists and named prediction groups.
//!
//! Groups map a name to an ordered list of symbols. Membership is checked
//! once at run start against the symbols actually requested.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::domain::error::ForecastError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

/// Splits a comma-separated symbol list, keeping order.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, GroupError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let symbol = token.trim();
        if symbol.is_empty() {
            return Err(GroupError::EmptyToken);
        }
        if !seen.insert(symbol.to_string()) {
            return Err(GroupError::DuplicateSymbol(symbol.to_string()));
        }
        symbols.push(symbol.to_string());
    }

    Ok(symbols)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PredictionGroups(BTreeMap<String, Vec<String>>);

impl PredictionGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, members: Vec<String>) {
        self.0.insert(name.to_string(), members);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every member must be one of `symbols`.
    pub fn validate(&self, symbols: &[String]) -> Result<(), ForecastError> {
        let known: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        for (group, members) in self.iter() {
            if let Some(unknown) = members.iter().find(|m| !known.contains(m.as_str())) {
                return Err(ForecastError::UnknownGroupSymbol {
                    group: group.to_string(),
                    symbol: unknown.clone(),
                });
            }
        }
        Ok(())
    }
}
