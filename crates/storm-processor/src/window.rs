//! Sliding accumulation windows over the period of record.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use storm_common::{StormError, StormResult, Window};

/// Enumerates midnight-anchored windows of fixed length.
///
/// The generator is a description of the sequence, not the sequence
/// itself; every call to [`WindowGenerator::iter`] starts over.
#[derive(Debug, Clone)]
pub struct WindowGenerator {
    first_start: DateTime<Utc>,
    por_end: DateTime<Utc>,
    duration_hours: u32,
    step_hours: u32,
}

impl WindowGenerator {
    /// `por_end` is the start of the last hour with data.
    pub fn new(
        por_start: DateTime<Utc>,
        por_end: DateTime<Utc>,
        duration_hours: u32,
        step_hours: u32,
    ) -> StormResult<Self> {
        if duration_hours == 0 {
            return Err(StormError::InvalidConfig(
                "duration_hours must be > 0".to_string(),
            ));
        }
        if step_hours == 0 {
            return Err(StormError::InvalidConfig("step_hours must be > 0".to_string()));
        }

        Ok(Self {
            first_start: next_midnight(por_start),
            por_end,
            duration_hours,
            step_hours,
        })
    }

    pub fn iter(&self) -> Windows {
        Windows {
            next: self.first_start,
            por_end: self.por_end,
            duration_hours: self.duration_hours,
            step: Duration::hours(self.step_hours as i64),
        }
    }

    /// Number of windows in the sequence.
    pub fn len(&self) -> usize {
        let last_start = self.por_end - Duration::hours(self.duration_hours as i64 - 1);
        if last_start < self.first_start {
            return 0;
        }
        let span = (last_start - self.first_start).num_hours() as usize;
        span / self.step_hours as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> IntoIterator for &'a WindowGenerator {
    type Item = Window;
    type IntoIter = Windows;

    fn into_iter(self) -> Windows {
        self.iter()
    }
}

/// Iterator over the windows of a [`WindowGenerator`].
#[derive(Debug, Clone)]
pub struct Windows {
    next: DateTime<Utc>,
    por_end: DateTime<Utc>,
    duration_hours: u32,
    step: Duration,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let window = Window::new(self.next, self.duration_hours);
        if window.end() > self.por_end {
            return None;
        }
        self.next += self.step;
        Some(window)
    }
}

/// Midnight at or after `dt`.
fn next_midnight(dt: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = dt.date_naive().and_time(NaiveTime::MIN).and_utc();
    if midnight == dt {
        midnight
    } else {
        midnight + Duration::days(1)
    }
}
