//! Per-bar decisions and their realized outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::label::{Label, LabeledReturn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Short,
    Flat,
    Long,
}

impl Stance {
    pub fn sign(self) -> f64 {
        match self {
            Stance::Short => -1.0,
            Stance::Flat => 0.0,
            Stance::Long => 1.0,
        }
    }
}

impl From<Label> for Stance {
    fn from(label: Label) -> Self {
        match label {
            Label::Down => Stance::Short,
            Label::Neutral => Stance::Flat,
            Label::Up => Stance::Long,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub timestamp: DateTime<Utc>,
    pub predicted: Label,
    pub probabilities: [f64; 3],
    pub stance: Stance,
}

impl Decision {
    /// Argmax over Down, Neutral, Up; ties keep the earlier class.
    pub fn from_probabilities(timestamp: DateTime<Utc>, probabilities: [f64; 3]) -> Self {
        let mut best = 0;
        for i in 1..probabilities.len() {
            if probabilities[i] > probabilities[best] {
                best = i;
            }
        }
        let predicted = Label::ALL[best];
        Decision {
            timestamp,
            predicted,
            probabilities,
            stance: Stance::from(predicted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub decision: Decision,
    pub actual: Label,
    pub forward_return: f64,
}

impl Outcome {
    pub fn new(decision: Decision, realized: LabeledReturn) -> Self {
        Outcome {
            decision,
            actual: realized.label,
            forward_return: realized.forward_return,
        }
    }

    pub fn is_correct(&self) -> bool {
        self.decision.predicted == self.actual
    }

    /// Signed return attributed to the stance: short negates, flat is zero.
    pub fn contribution(&self) -> f64 {
        match self.decision.stance {
            Stance::Flat => 0.0,
            stance => stance.sign() * self.forward_return,
        }
    }
}

/// A bar the engine could not decide on because a feature was missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBar {
    pub timestamp: DateTime<Utc>,
    pub feature: String,
}
