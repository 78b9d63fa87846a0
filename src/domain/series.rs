//! Temporal index and calendar guard.
//!
//! [`validate_series`] is the only way to obtain a [`ValidatedSeries`]: bars
//! come out strictly increasing, unique, finite, and annotated with calendar
//! flags. Values are never repaired; the first violation aborts the symbol.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::bar::Bar;
use super::error::{ForecastError, IntegrityViolation};
use crate::ports::calendar_port::TradingCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Regular,
    Holiday,
    NonTrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPosition {
    Pre,
    On,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventMark {
    pub event: String,
    pub position: EventPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarFlags {
    pub date: NaiveDate,
    pub session: SessionKind,
    pub pre_holiday: bool,
    pub post_holiday: bool,
    pub events: Vec<EventMark>,
}

impl CalendarFlags {
    pub fn classify(calendar: &dyn TradingCalendar, timestamp: DateTime<Utc>) -> Self {
        let date = calendar.local_date(timestamp);
        let session = if calendar.is_holiday(date) {
            SessionKind::Holiday
        } else if calendar.is_trading_day(date) {
            SessionKind::Regular
        } else {
            SessionKind::NonTrading
        };

        let mut events = Vec::new();
        for event in calendar.event_names() {
            let position = if calendar.is_event_day(&event, date) {
                Some(EventPosition::On)
            } else if calendar.is_pre_event(&event, date) {
                Some(EventPosition::Pre)
            } else if calendar.is_post_event(&event, date) {
                Some(EventPosition::Post)
            } else {
                None
            };
            if let Some(position) = position {
                events.push(EventMark { event, position });
            }
        }

        CalendarFlags {
            date,
            session,
            pre_holiday: calendar.is_pre_holiday(date),
            post_holiday: calendar.is_post_holiday(date),
            events,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub pre: usize,
    pub on: usize,
    pub post: usize,
}

/// Bar counts per calendar flag for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarSummary {
    pub regular: usize,
    pub holiday: usize,
    pub non_trading: usize,
    pub pre_holiday: usize,
    pub post_holiday: usize,
    pub events: BTreeMap<String, EventCounts>,
}

impl CalendarSummary {
    pub fn from_flags(flags: &[CalendarFlags]) -> Self {
        let mut summary = CalendarSummary::default();
        for flag in flags {
            match flag.session {
                SessionKind::Regular => summary.regular += 1,
                SessionKind::Holiday => summary.holiday += 1,
                SessionKind::NonTrading => summary.non_trading += 1,
            }
            summary.pre_holiday += usize::from(flag.pre_holiday);
            summary.post_holiday += usize::from(flag.post_holiday);
            for mark in &flag.events {
                let counts = summary.events.entry(mark.event.clone()).or_default();
                match mark.position {
                    EventPosition::Pre => counts.pre += 1,
                    EventPosition::On => counts.on += 1,
                    EventPosition::Post => counts.post += 1,
                }
            }
        }
        summary
    }
}

/// A symbol's bars after integrity checks. Immutable once built.
#[derive(Debug, Clone)]
pub struct ValidatedSeries {
    symbol: String,
    bars: Vec<Bar>,
    flags: Vec<CalendarFlags>,
}

impl ValidatedSeries {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn flags(&self) -> &[CalendarFlags] {
        &self.flags
    }

    pub fn calendar_summary(&self) -> CalendarSummary {
        CalendarSummary::from_flags(&self.flags)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.bars.get(index).map(|b| b.timestamp)
    }

    /// Bars that can ever carry a label: all but the last.
    pub fn labelable_len(&self) -> usize {
        self.bars.len().saturating_sub(1)
    }
}

pub fn validate_series(
    symbol: &str,
    bars: Vec<Bar>,
    calendar: &dyn TradingCalendar,
    max_gap: Duration,
) -> Result<ValidatedSeries, ForecastError> {
    let fail = |violation| ForecastError::DataIntegrity {
        symbol: symbol.to_string(),
        violation,
    };

    for (index, bar) in bars.iter().enumerate() {
        check_values(index, bar).map_err(fail)?;
        if index == 0 {
            continue;
        }
        let previous = bars[index - 1].timestamp;
        check_ordering(index, previous, bar.timestamp, max_gap).map_err(fail)?;
    }

    let flags = bars
        .iter()
        .map(|b| CalendarFlags::classify(calendar, b.timestamp))
        .collect();

    Ok(ValidatedSeries {
        symbol: symbol.to_string(),
        bars,
        flags,
    })
}

fn check_values(index: usize, bar: &Bar) -> Result<(), IntegrityViolation> {
    let fields = [
        ("open", bar.open),
        ("high", bar.high),
        ("low", bar.low),
        ("close", bar.close),
        ("volume", bar.volume),
    ];
    for (field, value) in fields {
        if !value.is_finite() {
            return Err(IntegrityViolation::NonFinite { index, field });
        }
    }
    if let Some(adj) = bar.adj_close {
        if !adj.is_finite() {
            return Err(IntegrityViolation::NonFinite {
                index,
                field: "adj_close",
            });
        }
        if adj <= 0.0 {
            return Err(IntegrityViolation::NonPositivePrice {
                index,
                field: "adj_close",
                value: adj,
            });
        }
    }
    if bar.close <= 0.0 {
        return Err(IntegrityViolation::NonPositivePrice {
            index,
            field: "close",
            value: bar.close,
        });
    }
    Ok(())
}

fn check_ordering(
    index: usize,
    previous: DateTime<Utc>,
    current: DateTime<Utc>,
    max_gap: Duration,
) -> Result<(), IntegrityViolation> {
    if current == previous {
        return Err(IntegrityViolation::Duplicate {
            index,
            timestamp: current,
        });
    }
    if current < previous {
        return Err(IntegrityViolation::OutOfOrder {
            index,
            previous,
            current,
        });
    }
    let gap = current - previous;
    if gap > max_gap {
        return Err(IntegrityViolation::GapExceeded {
            index,
            gap_days: gap.num_days(),
            tolerance_days: max_gap.num_days(),
        });
    }
    Ok(())
}
