//! Direction labels derived from forward returns.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::bar::Bar;
use super::series::ValidatedSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Down,
    Neutral,
    Up,
}

impl Label {
    /// Model output order.
    pub const ALL: [Label; 3] = [Label::Down, Label::Neutral, Label::Up];

    pub fn index(self) -> usize {
        match self {
            Label::Down => 0,
            Label::Neutral => 1,
            Label::Up => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Label> {
        Label::ALL.get(index).copied()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Down => "Down",
            Label::Neutral => "Neutral",
            Label::Up => "Up",
        };
        f.write_str(name)
    }
}

/// Neutral zone as fractions of price; configured in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabelThresholds {
    pub up: f64,
    pub down: f64,
}

impl LabelThresholds {
    pub fn symmetric_percent(percent: f64) -> Self {
        Self::from_percent(percent, percent)
    }

    pub fn from_percent(up_percent: f64, down_percent: f64) -> Self {
        LabelThresholds {
            up: up_percent / 100.0,
            down: down_percent / 100.0,
        }
    }

    /// Strictly above `up` is Up, strictly below `-down` is Down.
    pub fn classify(&self, forward_return: f64) -> Label {
        if forward_return > self.up {
            Label::Up
        } else if forward_return < -self.down {
            Label::Down
        } else {
            Label::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Close,
    AdjClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePreference {
    Auto,
    Close,
    AdjClose,
}

impl PricePreference {
    /// One field per symbol: adjusted close only if every bar carries it.
    pub fn resolve(self, bars: &[Bar]) -> PriceField {
        let all_adjusted = !bars.is_empty() && bars.iter().all(|b| b.adj_close.is_some());
        match self {
            PricePreference::Close => PriceField::Close,
            PricePreference::AdjClose | PricePreference::Auto if all_adjusted => {
                PriceField::AdjClose
            }
            _ => PriceField::Close,
        }
    }
}

impl PriceField {
    pub fn price(self, bar: &Bar) -> f64 {
        match self {
            PriceField::Close => bar.close,
            PriceField::AdjClose => bar.adj_close.unwrap_or(bar.close),
        }
    }
}

pub fn forward_return(bar: &Bar, next_bar: &Bar, field: PriceField) -> f64 {
    let now = field.price(bar);
    (field.price(next_bar) - now) / now
}

/// `None` when there is no successor, or the successor is further away
/// than `max_gap`. Never defaults to Neutral.
pub fn label(
    bar: &Bar,
    next_bar: Option<&Bar>,
    thresholds: &LabelThresholds,
    field: PriceField,
    max_gap: Option<Duration>,
) -> Option<LabeledReturn> {
    let next = next_bar?;
    if let Some(gap) = max_gap {
        if next.timestamp - bar.timestamp > gap {
            return None;
        }
    }
    let ret = forward_return(bar, next, field);
    Some(LabeledReturn {
        label: thresholds.classify(ret),
        forward_return: ret,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabeledReturn {
    pub label: Label,
    pub forward_return: f64,
}

/// Labels for every bar of a validated series, aligned by index.
#[derive(Debug, Clone)]
pub struct LabeledSeries {
    pub series: ValidatedSeries,
    pub price_field: PriceField,
    labels: Vec<Option<LabeledReturn>>,
}

impl LabeledSeries {
    pub fn new(
        series: ValidatedSeries,
        thresholds: &LabelThresholds,
        preference: PricePreference,
        max_gap: Option<Duration>,
    ) -> Self {
        let bars = series.bars();
        let price_field = preference.resolve(bars);
        let labels = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| label(bar, bars.get(i + 1), thresholds, price_field, max_gap))
            .collect();
        LabeledSeries {
            series,
            price_field,
            labels,
        }
    }

    pub fn symbol(&self) -> &str {
        self.series.symbol()
    }

    pub fn label_at(&self, index: usize) -> Option<LabeledReturn> {
        self.labels.get(index).copied().flatten()
    }

    pub fn labels(&self) -> &[Option<LabeledReturn>] {
        &self.labels
    }

    pub fn labeled_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }
}
