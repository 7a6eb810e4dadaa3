//! Date-like integer helpers for `YYYYMMDD` days and `YYYYWW` epiweeks.

use time::{Date, Duration, Month};

use super::error::{Result, StoreError};
use super::observation::TimeType;

/// Parses a `YYYYMMDD` integer into a calendar date.
pub fn parse_day(value: i64) -> Result<Date> {
    let year = value / 10_000;
    let month = (value / 100) % 100;
    let day = value % 100;
    if !(1..=9999).contains(&year) {
        return Err(StoreError::invalid_value(format!("{value} is not a YYYYMMDD day")));
    }
    let month = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .ok_or_else(|| StoreError::invalid_value(format!("{value} has no valid month")))?;
    let day = u8::try_from(day)
        .map_err(|_| StoreError::invalid_value(format!("{value} has no valid day")))?;
    Date::from_calendar_date(year as i32, month, day)
        .map_err(|err| StoreError::invalid_value(format!("{value}: {err}")))
}

/// First day (a Sunday) of MMWR week 1: the week holding January 4th.
fn epiweek_one(year: i32) -> Result<Date> {
    let jan4 = Date::from_calendar_date(year, Month::January, 4)
        .map_err(|err| StoreError::invalid_value(format!("year {year}: {err}")))?;
    let back = i64::from(jan4.weekday().number_days_from_sunday());
    Ok(jan4 - Duration::days(back))
}

/// Parses a `YYYYWW` epiweek into the Sunday that starts it.
pub fn parse_epiweek(value: i64) -> Result<Date> {
    let year = value / 100;
    let week = value % 100;
    if !(1..=9999).contains(&year) || !(1..=53).contains(&week) {
        return Err(StoreError::invalid_value(format!("{value} is not a YYYYWW epiweek")));
    }
    let start = epiweek_one(year as i32)? + Duration::weeks(week - 1);
    if week == 53 && start >= epiweek_one(year as i32 + 1)? {
        return Err(StoreError::invalid_value(format!("{value}: year {year} has 52 epiweeks")));
    }
    Ok(start)
}

/// Distance from `time_value` to `issue`, in days or epiweeks.
pub fn lag(time_type: TimeType, time_value: i64, issue: i64) -> Result<i64> {
    match time_type {
        TimeType::Day => Ok((parse_day(issue)? - parse_day(time_value)?).whole_days()),
        TimeType::Week => Ok((parse_epiweek(issue)? - parse_epiweek(time_value)?).whole_weeks()),
    }
}
