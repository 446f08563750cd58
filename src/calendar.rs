//! National holiday table and the month view built from it.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};

use crate::entities::CalendarEvent;
use crate::error::{AppError, AppResult};

/// Holidays on the same day every year, as `(month, day, name)`.
const FIXED_HOLIDAYS: [(u32, u32, &str); 9] = [
    (1, 1, "Ano Novo"),
    (4, 21, "Tiradentes"),
    (5, 1, "Dia do Trabalho"),
    (9, 7, "Independência do Brasil"),
    (10, 12, "Nossa Senhora Aparecida"),
    (11, 2, "Finados"),
    (11, 15, "Proclamação da República"),
    (11, 20, "Dia da Consciência Negra"),
    (12, 25, "Natal"),
];

/// Holidays relative to Easter Sunday, as `(offset in days, name)`.
const MOVABLE_HOLIDAYS: [(i64, &str); 5] = [
    (-48, "Carnaval"),
    (-47, "Carnaval"),
    (-2, "Sexta-feira Santa"),
    (0, "Páscoa"),
    (60, "Corpus Christi"),
];

/// A named public holiday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holiday {
    /// Day it falls on.
    pub date: NaiveDate,
    /// Portuguese name, as shown in the calendar.
    pub name: &'static str,
}

/// One cell of the month view.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDay {
    /// The day this cell shows.
    pub date: NaiveDate,
    /// Holiday name, when the overlay is on and one falls here.
    pub holiday: Option<&'static str>,
    /// Events scheduled on this day.
    pub events: Vec<CalendarEvent>,
}

/// Easter Sunday of `year` (Gregorian, anonymous algorithm).
pub fn easter(year: i32) -> Option<NaiveDate> {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15).rem_euclid(30);
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k).rem_euclid(7);
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// Every national holiday of `year`, in date order.
///
/// A movable holiday landing on a fixed one replaces it.
pub fn holidays_for_year(year: i32) -> Vec<Holiday> {
    let mut by_date: BTreeMap<NaiveDate, &'static str> = BTreeMap::new();

    for (month, day, name) in FIXED_HOLIDAYS {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            by_date.insert(date, name);
        }
    }

    if let Some(sunday) = easter(year) {
        for (offset, name) in MOVABLE_HOLIDAYS {
            if let Some(date) = sunday.checked_add_signed(Duration::days(offset)) {
                by_date.insert(date, name);
            }
        }
    }

    by_date
        .into_iter()
        .map(|(date, name)| Holiday { date, name })
        .collect()
}

/// Name of the holiday on `date`, if any.
pub fn holiday_on(date: NaiveDate) -> Option<&'static str> {
    holidays_for_year(date.year())
        .into_iter()
        .find(|h| h.date == date)
        .map(|h| h.name)
}

/// Month view: one [`CalendarDay`] per day with its events and, when
/// `holidays_enabled`, the holiday falling on it.
pub fn month_overlay(
    events: &[CalendarEvent],
    year: i32,
    month: u32,
    holidays_enabled: bool,
) -> AppResult<Vec<CalendarDay>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::validation("month", format!("{}-{} is not a valid month", year, month)))?;

    let holidays: BTreeMap<NaiveDate, &'static str> = if holidays_enabled {
        holidays_for_year(year)
            .into_iter()
            .map(|h| (h.date, h.name))
            .collect()
    } else {
        BTreeMap::new()
    };

    let days = first
        .iter_days()
        .take_while(|d| d.month() == month)
        .map(|date| CalendarDay {
            date,
            holiday: holidays.get(&date).copied(),
            events: events
                .iter()
                .filter(|e| e.day() == Some(date))
                .cloned()
                .collect(),
        })
        .collect();

    Ok(days)
}
