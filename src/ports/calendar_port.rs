//! Trading calendar port.
//!
//! Session days come from the weekly schedule; a holiday is a session day
//! on which the market is closed. Pre/post windows are resolved against the
//! neighbouring session days, not calendar days.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

const WINDOW_SEARCH_DAYS: i64 = 10;

pub trait TradingCalendar: Sync {
    fn name(&self) -> &str;

    /// Market time zone; trading dates are read in this zone, including
    /// across daylight-saving changes.
    fn timezone(&self) -> Tz {
        Tz::UTC
    }

    fn is_session_day(&self, date: NaiveDate) -> bool;

    fn is_holiday(&self, date: NaiveDate) -> bool;

    fn event_names(&self) -> Vec<String>;

    fn is_event_day(&self, event: &str, date: NaiveDate) -> bool;

    fn local_date(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.timezone()).date_naive()
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.is_session_day(date) && !self.is_holiday(date)
    }

    fn next_session_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=WINDOW_SEARCH_DAYS)
            .map(|d| date + Duration::days(d))
            .find(|d| self.is_session_day(*d))
    }

    fn previous_session_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=WINDOW_SEARCH_DAYS)
            .map(|d| date - Duration::days(d))
            .find(|d| self.is_session_day(*d))
    }

    fn is_pre_event(&self, event: &str, date: NaiveDate) -> bool {
        self.next_session_day(date)
            .is_some_and(|d| self.is_event_day(event, d))
    }

    fn is_post_event(&self, event: &str, date: NaiveDate) -> bool {
        self.previous_session_day(date)
            .is_some_and(|d| self.is_event_day(event, d))
    }

    fn is_pre_holiday(&self, date: NaiveDate) -> bool {
        self.next_session_day(date)
            .is_some_and(|d| self.is_holiday(d))
    }

    fn is_post_holiday(&self, date: NaiveDate) -> bool {
        self.previous_session_day(date)
            .is_some_and(|d| self.is_holiday(d))
    }
}
