//! Weekly-schedule exchange calendars with holiday and event dates.

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::domain::error::ForecastError;
use crate::ports::calendar_port::TradingCalendar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeCalendar {
    name: String,
    timezone: Tz,
    /// Indexed by days from Monday.
    session_days: [bool; 7],
    holidays: BTreeSet<NaiveDate>,
    events: BTreeMap<String, BTreeSet<NaiveDate>>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsFile {
    #[serde(default)]
    holidays: Vec<NaiveDate>,
    #[serde(default)]
    events: BTreeMap<String, Vec<NaiveDate>>,
}

impl ExchangeCalendar {
    fn preset(name: &str, timezone: Tz, session_days: [bool; 7]) -> Self {
        ExchangeCalendar {
            name: name.to_string(),
            timezone,
            session_days,
            holidays: BTreeSet::new(),
            events: BTreeMap::new(),
        }
    }

    /// Monday to Friday, dates taken in New York time (EST or EDT).
    pub fn nyse() -> Self {
        Self::preset(
            "NYSE",
            chrono_tz::America::New_York,
            [true, true, true, true, true, false, false],
        )
    }

    pub fn crypto() -> Self {
        Self::preset("CRYPTO", Tz::UTC, [true; 7])
    }

    pub fn fx() -> Self {
        Self::preset("FX", Tz::UTC, [true, true, true, true, true, false, false])
    }

    pub fn from_code(code: &str) -> Result<Self, ForecastError> {
        match code.trim().to_uppercase().as_str() {
            "NYSE" => Ok(Self::nyse()),
            "CRYPTO" => Ok(Self::crypto()),
            "FX" => Ok(Self::fx()),
            other => Err(ForecastError::config_invalid(
                "calendar",
                "exchange",
                format!("unknown exchange {other:?} (expected NYSE, CRYPTO or FX)"),
            )),
        }
    }

    pub fn with_holidays(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(dates);
        self
    }

    pub fn with_event(mut self, event: &str, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.events.entry(event.to_string()).or_default().extend(dates);
        self
    }

    /// Merges `{"holidays": [...], "events": {"fed": [...]}}` into the calendar.
    pub fn with_events_json(self, json: &str) -> Result<Self, ForecastError> {
        let file: EventsFile = serde_json::from_str(json).map_err(|e| {
            ForecastError::config_invalid("calendar", "events_path", e.to_string())
        })?;
        let mut calendar = self.with_holidays(file.holidays);
        for (event, dates) in file.events {
            calendar = calendar.with_event(&event, dates);
        }
        Ok(calendar)
    }

    pub fn with_events_file(self, path: &Path) -> Result<Self, ForecastError> {
        let json = std::fs::read_to_string(path)?;
        self.with_events_json(&json)
    }
}

impl TradingCalendar for ExchangeCalendar {
    fn name(&self) -> &str {
        &self.name
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }

    fn is_session_day(&self, date: NaiveDate) -> bool {
        self.session_days[date.weekday().num_days_from_monday() as usize]
    }

    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    fn event_names(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }

    fn is_event_day(&self, event: &str, date: NaiveDate) -> bool {
        self.events.get(event).is_some_and(|dates| dates.contains(&date))
    }
}
