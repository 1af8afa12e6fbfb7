use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::Serialize;

use super::dates;
use super::filter_spec::FilterSpec;
use super::loader::parse_bool;
use super::model::{Table, Value};
use crate::error::FilterError;

static NUMERIC_COMPARISON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(<=|>=|==|<|>)\s*(-?\d+(?:\.\d+)?)$").unwrap());
static STRING_PREDICATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(contains|startswith|endswith) (.+)$").unwrap());
static DATE_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(<=|>=|==|<|>)\s*(\d{2}[.,/\\-]\d{2}[.,/\\-]\d{4}|\d{4}[.,/\\-]\d{2}[.,/\\-]\d{2})$",
    )
    .unwrap()
});

// ---------------------------------------------------------------------------
// Policy: what to do with plain lines next to comparison lines
// ---------------------------------------------------------------------------

/// A column's lines can mix grammar lines (`>=10`, `contains foo`) with plain
/// values (`42`). Only one of the two readings can apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MixedLinePolicy {
    /// Honor the grammar lines, ignore the plain ones.
    #[default]
    DropPlain,
    /// Fail the file.
    Reject,
}

// ---------------------------------------------------------------------------
// Runtime type of a column
// ---------------------------------------------------------------------------

/// Type of a column as found in the data, which selects the predicate grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    Integer,
    Float,
    Text,
    Date,
    Boolean,
}

impl RuntimeType {
    pub fn of(value: &Value) -> Option<RuntimeType> {
        match value {
            Value::Integer(_) => Some(RuntimeType::Integer),
            Value::Float(_) => Some(RuntimeType::Float),
            Value::String(_) => Some(RuntimeType::Text),
            Value::Date(_) => Some(RuntimeType::Date),
            Value::Bool(_) => Some(RuntimeType::Boolean),
            Value::Null => None,
        }
    }

    /// Sampled from the first non-null cell. An all-null column is text.
    pub fn of_column(table: &Table, idx: usize) -> RuntimeType {
        table
            .column(idx)
            .find_map(RuntimeType::of)
            .unwrap_or(RuntimeType::Text)
    }
}

// ---------------------------------------------------------------------------
// Parsed predicates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

impl CompareOp {
    fn from_symbol(symbol: &str) -> Option<CompareOp> {
        match symbol {
            "<" => Some(CompareOp::Lt),
            ">" => Some(CompareOp::Gt),
            "<=" => Some(CompareOp::Le),
            ">=" => Some(CompareOp::Ge),
            "==" => Some(CompareOp::Eq),
            _ => None,
        }
    }

    /// `lhs <op> rhs`
    fn holds<T: PartialOrd>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    fn parse(s: &str) -> Option<Number> {
        if !s.contains('.') {
            if let Ok(i) = s.parse() {
                return Some(Number::Integer(i));
            }
        }
        s.parse().ok().map(Number::Float)
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Contains,
    StartsWith,
    EndsWith,
}

/// One compiled predicate. A row passes a column when it matches every
/// predicate compiled for that column.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPredicate {
    NumericComparison { op: CompareOp, operand: Number },
    /// `operand` is stored lowercased.
    StringPredicate { kind: TextMatch, operand: String },
    DateComparison { op: CompareOp, operand: NaiveDate },
    ValueSet(BTreeSet<Value>),
}

impl ParsedPredicate {
    /// Null cells never match.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (ParsedPredicate::NumericComparison { op, operand }, value) => match (value, operand) {
                (Value::Integer(a), Number::Integer(b)) => op.holds(a, b),
                (value, operand) => value
                    .as_f64()
                    .is_some_and(|a| op.holds(&a, &operand.as_f64())),
            },
            (ParsedPredicate::StringPredicate { kind, operand }, Value::String(s)) => {
                let s = s.to_lowercase();
                match kind {
                    TextMatch::Contains => s.contains(operand.as_str()),
                    TextMatch::StartsWith => s.starts_with(operand.as_str()),
                    TextMatch::EndsWith => s.ends_with(operand.as_str()),
                }
            }
            (ParsedPredicate::DateComparison { op, operand }, Value::Date(d)) => {
                op.holds(&d.date(), operand)
            }
            (ParsedPredicate::ValueSet(values), value) => values.contains(value),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Grammars
// ---------------------------------------------------------------------------

/// `<op><number>`, e.g. `>=10`, `< 2.5`.
pub fn parse_numeric_comparison(line: &str) -> Option<ParsedPredicate> {
    let caps = NUMERIC_COMPARISON.captures(line)?;
    Some(ParsedPredicate::NumericComparison {
        op: CompareOp::from_symbol(&caps[1])?,
        operand: Number::parse(&caps[2])?,
    })
}

/// `contains <text>`, `startswith <text>`, `endswith <text>`.
pub fn parse_string_predicate(line: &str) -> Option<ParsedPredicate> {
    let caps = STRING_PREDICATE.captures(line)?;
    let kind = match &caps[1] {
        "contains" => TextMatch::Contains,
        "startswith" => TextMatch::StartsWith,
        "endswith" => TextMatch::EndsWith,
        _ => return None,
    };
    Some(ParsedPredicate::StringPredicate {
        kind,
        operand: caps[2].to_lowercase(),
    })
}

/// `<op>DD.MM.YYYY` or `<op>YYYY.MM.DD`, any of `. , / \ -` as separator.
///
/// `None` if the line is not in this grammar; `Some(Err)` if it is but the
/// operand is not a calendar date.
pub fn parse_date_comparison(line: &str, column: &str) -> Option<Result<ParsedPredicate, FilterError>> {
    let caps = DATE_COMPARISON.captures(line)?;
    let op = CompareOp::from_symbol(&caps[1])?;
    let invalid = || FilterError::InvalidDate {
        column: column.to_string(),
        line: line.to_string(),
    };
    Some(operand_date(&caps[2]).ok_or_else(invalid).map(|operand| {
        ParsedPredicate::DateComparison { op, operand }
    }))
}

fn operand_date(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split(['.', ',', '/', '\\', '-']).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    let (year, month, day) = if a.len() == 4 { (a, b, c) } else { (c, b, a) };
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

// ---------------------------------------------------------------------------
// Compilation and evaluation
// ---------------------------------------------------------------------------

/// Compile the lines of one column against the grammar of its runtime type.
///
/// If at least one line is in the grammar, those lines are the column's
/// predicates (combined with AND). Otherwise all lines form a value set,
/// converted to the column's type.
pub fn compile_column(
    column: &str,
    runtime: RuntimeType,
    lines: &[String],
    policy: MixedLinePolicy,
) -> Result<Vec<ParsedPredicate>, FilterError> {
    let parsed: Vec<Option<ParsedPredicate>> = match runtime {
        RuntimeType::Integer | RuntimeType::Float => {
            lines.iter().map(|l| parse_numeric_comparison(l)).collect()
        }
        RuntimeType::Text => lines.iter().map(|l| parse_string_predicate(l)).collect(),
        RuntimeType::Date => lines
            .iter()
            .map(|l| parse_date_comparison(l, column).transpose())
            .collect::<Result<_, _>>()?,
        RuntimeType::Boolean => vec![None; lines.len()],
    };

    if parsed.iter().any(Option::is_some) {
        let plain: Vec<String> = lines
            .iter()
            .zip(&parsed)
            .filter(|(_, p)| p.is_none())
            .map(|(l, _)| l.clone())
            .collect();
        if !plain.is_empty() {
            match policy {
                MixedLinePolicy::DropPlain => {
                    log::debug!("column {column:?}: plain lines {plain:?} ignored next to comparisons")
                }
                MixedLinePolicy::Reject => {
                    return Err(FilterError::MixedLines {
                        column: column.to_string(),
                        plain,
                    })
                }
            }
        }
        return Ok(parsed.into_iter().flatten().collect());
    }

    value_set(column, runtime, lines).map(|set| vec![ParsedPredicate::ValueSet(set)])
}

fn value_set(
    column: &str,
    runtime: RuntimeType,
    lines: &[String],
) -> Result<BTreeSet<Value>, FilterError> {
    let coerce_err = |line: &String, expected: &'static str| FilterError::Coerce {
        column: column.to_string(),
        value: line.clone(),
        expected,
    };
    lines
        .iter()
        .map(|line| match runtime {
            RuntimeType::Integer => line
                .parse()
                .map(Value::Integer)
                .map_err(|_| coerce_err(line, "integer")),
            RuntimeType::Float => line
                .parse()
                .map(Value::Float)
                .map_err(|_| coerce_err(line, "float")),
            RuntimeType::Text => Ok(Value::String(line.clone())),
            RuntimeType::Date => operand_date(line)
                .map(|d| d.and_time(NaiveTime::MIN))
                .or_else(|| dates::parse_datetime_any(line))
                .map(Value::Date)
                .ok_or_else(|| coerce_err(line, "date")),
            RuntimeType::Boolean => parse_bool(line, true)
                .map(Value::Bool)
                .ok_or_else(|| coerce_err(line, "boolean")),
        })
        .collect()
}

/// Narrow `table` by every column of `spec`.
///
/// Columns with no lines are unconstrained; columns missing from the table are
/// skipped with a warning. Evaluation stops as soon as no rows remain, so later
/// columns are never compiled against an empty table.
pub fn apply_filters(
    mut table: Table,
    spec: &FilterSpec,
    policy: MixedLinePolicy,
) -> Result<Table, FilterError> {
    for (column, lines) in spec {
        if table.is_empty() {
            break;
        }
        if lines.is_empty() {
            continue;
        }
        let Some(idx) = table.column_index(column) else {
            log::warn!("filter column {column:?} is not in the table, skipped");
            continue;
        };

        let runtime = RuntimeType::of_column(&table, idx);
        let predicates = compile_column(column, runtime, lines, policy)?;
        table.retain_rows(|row| predicates.iter().all(|p| p.matches(&row[idx])));
        log::trace!("column {column:?} ({runtime:?}): {} rows left", table.len());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDateTime, NaiveTime};

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_time(NaiveTime::MIN)
    }

    fn spec(entries: &[(&str, &[&str])]) -> FilterSpec {
        entries
            .iter()
            .map(|(c, lines)| (c.to_string(), lines.iter().map(|l| l.to_string()).collect()))
            .collect()
    }

    fn single(column: &str, cells: Vec<Value>) -> Table {
        Table::from_rows(vec![column.to_string()], cells.into_iter().map(|v| vec![v]).collect())
    }

    fn ints(table: &Table) -> Vec<i64> {
        table
            .column(0)
            .map(|v| match v {
                Value::Integer(i) => *i,
                other => panic!("not an integer: {other:?}"),
            })
            .collect()
    }

    fn people() -> Table {
        Table::from_rows(
            vec!["age".into(), "name".into(), "joined".into()],
            vec![
                vec![Value::Integer(25), Value::String("A".into()), Value::Date(date(2021, 5, 1))],
                vec![Value::Integer(40), Value::String("B".into()), Value::Date(date(2021, 5, 1))],
            ],
        )
    }

    #[test]
    fn scenario_age_and_join_date() {
        let filters = spec(&[("age", &["<=30"]), ("name", &[]), ("joined", &[">01.01.2020"])]);
        let out = apply_filters(people(), &filters, MixedLinePolicy::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out.rows()[0],
            vec![Value::Integer(25), Value::String("A".into()), Value::Date(date(2021, 5, 1))]
        );
    }

    #[test]
    fn empty_predicate_list_is_identity() {
        let filters = spec(&[("age", &[]), ("name", &[])]);
        let out = apply_filters(people(), &filters, MixedLinePolicy::default()).unwrap();
        assert_eq!(out, people());
    }

    #[test]
    fn closed_numeric_range() {
        let table = single("n", (0..10).map(Value::Integer).collect());
        let out = apply_filters(table, &spec(&[("n", &[">=3", "<=6"])]), MixedLinePolicy::default())
            .unwrap();
        assert_eq!(ints(&out), vec![3, 4, 5, 6]);
    }

    #[test]
    fn float_columns_compare_with_integer_operands() {
        let table = single("x", vec![Value::Float(1.5), Value::Float(2.5), Value::Null]);
        let out = apply_filters(table, &spec(&[("x", &["> 2"])]), MixedLinePolicy::default()).unwrap();
        assert_eq!(out.rows(), &[vec![Value::Float(2.5)]]);
    }

    #[test]
    fn contains_ignores_case() {
        let table = single(
            "name",
            vec![
                Value::String("MAX".into()),
                Value::String("max".into()),
                Value::String("Anna".into()),
            ],
        );
        let out =
            apply_filters(table, &spec(&[("name", &["contains X"])]), MixedLinePolicy::default()).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn string_predicates_are_conjunctive() {
        let table = single(
            "city",
            vec![
                Value::String("Berlin".into()),
                Value::String("Bern".into()),
                Value::String("Bonn".into()),
            ],
        );
        let filters = spec(&[("city", &["startswith be", "endswith n"])]);
        let out = apply_filters(table, &filters, MixedLinePolicy::default()).unwrap();
        assert_eq!(
            out.rows(),
            &[vec![Value::String("Berlin".into())], vec![Value::String("Bern".into())]]
        );
    }

    #[test]
    fn plain_text_lines_are_exact_case_sensitive_set() {
        let table = single(
            "code",
            vec![
                Value::String("AB".into()),
                Value::String("ab".into()),
                Value::String("CD".into()),
            ],
        );
        let out = apply_filters(table, &spec(&[("code", &["AB", "CD"])]), MixedLinePolicy::default())
            .unwrap();
        assert_eq!(
            out.rows(),
            &[vec![Value::String("AB".into())], vec![Value::String("CD".into())]]
        );
    }

    #[test]
    fn value_set_is_idempotent() {
        let table = single("n", (0..6).map(Value::Integer).collect());
        let filters = spec(&[("n", &["1", "4", "5"])]);
        let once = apply_filters(table, &filters, MixedLinePolicy::default()).unwrap();
        let twice = apply_filters(once.clone(), &filters, MixedLinePolicy::default()).unwrap();
        assert_eq!(ints(&once), vec![1, 4, 5]);
        assert_eq!(once, twice);
    }

    #[test]
    fn mixed_lines_keep_only_comparisons_by_default() {
        let table = single("n", (0..6).map(Value::Integer).collect());
        let filters = spec(&[("n", &[">=4", "1"])]);
        let out = apply_filters(table.clone(), &filters, MixedLinePolicy::DropPlain).unwrap();
        assert_eq!(ints(&out), vec![4, 5]);

        let err = apply_filters(table, &filters, MixedLinePolicy::Reject).unwrap_err();
        assert!(matches!(err, FilterError::MixedLines { ref plain, .. } if plain == &["1".to_string()]));
    }

    #[test]
    fn uncoercible_plain_value_fails() {
        let table = single("n", vec![Value::Integer(1)]);
        let err = apply_filters(table, &spec(&[("n", &["abc"])]), MixedLinePolicy::default()).unwrap_err();
        assert!(matches!(err, FilterError::Coerce { expected: "integer", .. }));
    }

    #[test]
    fn empty_table_skips_malformed_predicates() {
        let table = Table::new(vec!["n".into()]);
        let out = apply_filters(table, &spec(&[("n", &["abc"])]), MixedLinePolicy::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn stops_after_a_column_empties_the_table() {
        let table = Table::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Integer(1), Value::Integer(2)]],
        );
        // `a` removes every row; `b` would otherwise fail coercion.
        let filters = spec(&[("a", &[">100"]), ("b", &["not-a-number"])]);
        let out = apply_filters(table, &filters, MixedLinePolicy::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn date_comparisons_accept_both_operand_orders() {
        let table = single(
            "d",
            vec![
                Value::Date(date(2019, 12, 31)),
                Value::Date(date(2020, 6, 15).date().and_hms_opt(18, 30, 0).unwrap()),
                Value::Date(date(2021, 1, 1)),
            ],
        );
        let filters = spec(&[("d", &[">=01/01/2020", "<2020-12-31"])]);
        let out = apply_filters(table.clone(), &filters, MixedLinePolicy::default()).unwrap();
        assert_eq!(out.len(), 1);

        // time of day is ignored
        let out = apply_filters(table, &spec(&[("d", &["==15.06.2020"])]), MixedLinePolicy::default())
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn impossible_date_operand_is_an_error() {
        let table = single("d", vec![Value::Date(date(2020, 1, 1))]);
        let err = apply_filters(table, &spec(&[("d", &[">31.02.2020"])]), MixedLinePolicy::default())
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidDate { .. }));
    }

    #[test]
    fn plain_date_lines_are_a_value_set() {
        let table = single("d", vec![Value::Date(date(2020, 1, 2)), Value::Date(date(2020, 1, 3))]);
        let out = apply_filters(table, &spec(&[("d", &["2020-01-02"])]), MixedLinePolicy::default())
            .unwrap();
        assert_eq!(out.rows(), &[vec![Value::Date(date(2020, 1, 2))]]);
    }

    #[test]
    fn plain_and_compared_dates_read_day_first_alike() {
        let table = single("d", vec![Value::Date(date(2020, 2, 1)), Value::Date(date(2020, 1, 2))]);
        for line in ["==01.02.2020", "01.02.2020"] {
            let out = apply_filters(table.clone(), &spec(&[("d", &[line])]), MixedLinePolicy::default())
                .unwrap();
            assert_eq!(out.rows(), &[vec![Value::Date(date(2020, 2, 1))]], "line {line:?}");
        }
    }

    #[test]
    fn runtime_type_skips_leading_nulls() {
        let table = single("n", vec![Value::Null, Value::Integer(7), Value::Integer(9)]);
        assert_eq!(RuntimeType::of_column(&table, 0), RuntimeType::Integer);
        let out = apply_filters(table, &spec(&[("n", &[">8"])]), MixedLinePolicy::default()).unwrap();
        assert_eq!(ints(&out), vec![9]);
    }

    #[test]
    fn filter_columns_missing_from_table_are_skipped() {
        let out = apply_filters(people(), &spec(&[("salary", &[">1"])]), MixedLinePolicy::default())
            .unwrap();
        assert_eq!(out.len(), 2);
    }
}
