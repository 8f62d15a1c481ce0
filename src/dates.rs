//! Inclusive date ranges walked one calendar day at a time.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// One request window: `start` up to one second before the next day starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Day {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidDate(format!(
                "end {} is before start {}",
                end, start
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_instant(start)?, parse_instant(end)?)
    }

    pub fn days(&self) -> impl Iterator<Item = Day> {
        let end = self.end;
        std::iter::successors(Some(self.start), |current| Some(*current + Duration::days(1)))
            .take_while(move |current| *current <= end)
            .map(|start| Day {
                start,
                end: start + Duration::days(1) - Duration::seconds(1),
            })
    }

    pub fn day_count(&self) -> usize {
        self.days().count()
    }

    /// `2024-05-01_2024-05-31`
    pub fn label(&self) -> String {
        format!("{}_{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

impl Day {
    /// `2024-05-01T00-00-00Z_2024-05-01T23-59-59Z`, safe for file names.
    pub fn label(&self) -> String {
        format!(
            "{}_{}",
            crate::download::iso_utc(self.start),
            crate::download::iso_utc(self.end)
        )
        .replace(':', "-")
    }
}

/// Accepts `2024-05-01T00:00:00Z`, `2024-05-01T00:00:00` or `2024-05-01` (midnight). Any
/// trailing `Z` is dropped; times are treated as naive UTC.
pub fn parse_instant(s: &str) -> Result<NaiveDateTime> {
    let trimmed = s.trim().trim_end_matches('Z');

    if let Ok(instant) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(instant);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(instant) = date.and_hms_opt(0, 0, 0) {
            return Ok(instant);
        }
    }

    Err(Error::InvalidDate(s.to_string()))
}

// -- Tests -------------------------------------------------------------------
