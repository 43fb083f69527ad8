//! Time windows and storm start metadata.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A fixed-length accumulation window of whole hours.
///
/// Covers the hourly grids beginning at `start`, `start + 1h`, ...,
/// `start + duration - 1h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub duration_hours: u32,
}

impl Window {
    pub fn new(start: DateTime<Utc>, duration_hours: u32) -> Self {
        Self {
            start,
            duration_hours,
        }
    }

    /// Start of the last hour in the window.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::hours(self.duration_hours as i64 - 1)
    }

    /// Exclusive end of the window interval.
    pub fn end_exclusive(&self) -> DateTime<Utc> {
        self.start + Duration::hours(self.duration_hours as i64)
    }

    /// Start time of every hour in the window.
    pub fn hours(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.duration_hours as i64).map(move |h| self.start + Duration::hours(h))
    }

    /// Whether the half-open intervals `[start, start + duration)` intersect.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end_exclusive() && other.start < self.end_exclusive()
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}+{}h",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.duration_hours
        )
    }
}

/// Meteorological season of a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    /// Season boundaries: spring Mar 21, summer Jun 21, autumn Sep 23, winter Dec 21.
    pub fn of(dt: &DateTime<Utc>) -> Self {
        let md = (dt.month(), dt.day());
        if md >= (12, 21) || md <= (3, 20) {
            Season::Winter
        } else if md <= (6, 20) {
            Season::Spring
        } else if md <= (9, 22) {
            Season::Summer
        } else {
            Season::Autumn
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
        }
    }
}

/// Water year of a date: October onward belongs to the next year.
pub fn water_year(dt: &DateTime<Utc>) -> i32 {
    if dt.month() >= 10 {
        dt.year() + 1
    } else {
        dt.year()
    }
}

/// Descriptive start-time fields recorded with each storm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormStart {
    pub datetime: String,
    pub timestamp: i64,
    pub calendar_year: i32,
    pub water_year: i32,
    pub season: Season,
}

impl StormStart {
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            datetime: dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            timestamp: dt.timestamp(),
            calendar_year: dt.year(),
            water_year: water_year(dt),
            season: Season::of(dt),
        }
    }
}

/// How storms are grouped before ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    #[default]
    CalendarYear,
    WaterYear,
}

impl Partition {
    /// Partition key for a storm starting at `dt`.
    pub fn key(&self, dt: &DateTime<Utc>) -> i32 {
        match self {
            Partition::CalendarYear => dt.year(),
            Partition::WaterYear => water_year(dt),
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "calendar_year" | "calendar" | "year" => Some(Partition::CalendarYear),
            "water_year" | "water" => Some(Partition::WaterYear),
            _ => None,
        }
    }
}
