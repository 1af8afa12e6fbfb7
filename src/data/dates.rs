use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::model::{Table, Value};
use crate::error::LoadError;

/// Which number comes first in an ambiguous `NN/NN/YYYY` date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    MonthFirst,
    DayFirst,
}

const SEPARATORS: [char; 3] = ['/', '-', '.'];
const TIME_SUFFIXES: [&str; 3] = ["", " %H:%M", " %H:%M:%S%.f"];

struct Formats {
    /// Formats that carry a time of day.
    with_time: Vec<String>,
    /// Date-only formats, widened to midnight.
    date_only: Vec<String>,
}

impl Formats {
    fn build(order: DateOrder) -> Formats {
        let mut with_time = vec![
            "%Y-%m-%dT%H:%M:%S%.f".to_string(),
            "%Y-%m-%dT%H:%M".to_string(),
        ];
        let mut date_only = Vec::new();

        let mut date_parts: Vec<String> = SEPARATORS
            .iter()
            .map(|sep| format!("%Y{sep}%m{sep}%d"))
            .collect();
        date_parts.extend(SEPARATORS.iter().map(|sep| match order {
            DateOrder::MonthFirst => format!("%m{sep}%d{sep}%Y"),
            DateOrder::DayFirst => format!("%d{sep}%m{sep}%Y"),
        }));

        for date in &date_parts {
            for suffix in TIME_SUFFIXES {
                if suffix.is_empty() {
                    date_only.push(date.clone());
                } else {
                    with_time.push(format!("{date}{suffix}"));
                }
            }
        }
        Formats {
            with_time,
            date_only,
        }
    }
}

static MONTH_FIRST: LazyLock<Formats> = LazyLock::new(|| Formats::build(DateOrder::MonthFirst));
static DAY_FIRST: LazyLock<Formats> = LazyLock::new(|| Formats::build(DateOrder::DayFirst));

/// Parse one date or date-time string under the given ordering.
/// Year-first forms parse the same under both orderings.
pub fn parse_datetime(raw: &str, order: DateOrder) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let formats = match order {
        DateOrder::MonthFirst => &*MONTH_FIRST,
        DateOrder::DayFirst => &*DAY_FIRST,
    };
    formats
        .with_time
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            formats
                .date_only
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Month-first, then day-first, for a single value.
pub fn parse_datetime_any(raw: &str) -> Option<NaiveDateTime> {
    parse_datetime(raw, DateOrder::MonthFirst).or_else(|| parse_datetime(raw, DateOrder::DayFirst))
}

/// Convert column `idx` of `table` to dates.
///
/// The whole column is tried month-first; if any cell fails, the whole column
/// is retried day-first. Cells that are already dates are kept as they are.
pub fn parse_date_column(table: &mut Table, idx: usize) -> Result<DateOrder, LoadError> {
    let column = table.columns()[idx].clone();

    let first_failure = match convert_column(table, idx, DateOrder::MonthFirst) {
        Ok(cells) => {
            table.set_column(idx, cells);
            return Ok(DateOrder::MonthFirst);
        }
        Err(value) => value,
    };
    log::debug!("column {column:?}: {first_failure:?} is not month-first, retrying day-first");

    match convert_column(table, idx, DateOrder::DayFirst) {
        Ok(cells) => {
            table.set_column(idx, cells);
            Ok(DateOrder::DayFirst)
        }
        Err(value) => Err(LoadError::DateParse { column, value }),
    }
}

/// All cells converted, or the first offending value as text.
fn convert_column(table: &Table, idx: usize, order: DateOrder) -> Result<Vec<Value>, String> {
    table
        .column(idx)
        .map(|cell| match cell {
            Value::Null | Value::Date(_) => Ok(cell.clone()),
            Value::String(s) => parse_datetime(s, order)
                .map(Value::Date)
                .ok_or_else(|| s.clone()),
            other => Err(other.to_string()),
        })
        .collect()
}
