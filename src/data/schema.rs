use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use super::encoding;
use crate::error::SchemaError;

/// Declared scalar type of a non-date column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
}

impl ColumnType {
    /// Resolve a type token from `dtypes.txt`. `date` is handled by the caller.
    pub fn from_token(token: &str) -> Option<ColumnType> {
        match token.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "int64" | "i64" => Some(ColumnType::Integer),
            "float" | "double" | "float64" | "f64" => Some(ColumnType::Float),
            "str" | "string" | "text" | "object" => Some(ColumnType::Text),
            "bool" | "boolean" => Some(ColumnType::Bool),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Bool => "boolean",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Column name → declared type, date columns excluded.
pub type ColumnSchema = BTreeMap<String, ColumnType>;

/// Ordered list of columns kept in every loaded table.
pub type ColumnSelection = Vec<String>;

/// Everything the reader needs to shape one input file.
#[derive(Debug, Clone, Default)]
pub struct TableLayout {
    /// Declared non-date types.
    pub schema: ColumnSchema,
    /// Columns parsed as dates.
    pub date_columns: Vec<String>,
    /// Columns kept, in output order.
    pub selection: ColumnSelection,
}

const DATE_TOKEN: &str = "date";

/// Load `dtypes.txt`: one `column:type` per line.
///
/// Returns the non-date schema and, separately, the date columns in file order.
pub fn load_schema(path: &Path) -> Result<(ColumnSchema, Vec<String>), SchemaError> {
    let bytes = std::fs::read(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, _) = encoding::decode(&bytes, &path.display().to_string());
    parse_schema(&text)
}

/// Parse the body of a type-declaration file.
pub fn parse_schema(text: &str) -> Result<(ColumnSchema, Vec<String>), SchemaError> {
    let mut schema = ColumnSchema::new();
    let mut date_columns = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let (column, token) = raw.split_once(':').ok_or_else(|| SchemaError::Malformed {
            line_no,
            line: raw.to_string(),
        })?;
        let column = column.trim().to_string();
        let token = token.trim();

        if token.eq_ignore_ascii_case(DATE_TOKEN) {
            if !date_columns.contains(&column) {
                date_columns.push(column);
            }
            continue;
        }
        let ty = ColumnType::from_token(token).ok_or_else(|| SchemaError::UnknownType {
            line_no,
            column: column.clone(),
            token: token.to_string(),
        })?;
        schema.insert(column, ty);
    }

    Ok((schema, date_columns))
}

/// Load `columns.txt`: one column name per non-blank line.
pub fn load_columns(path: &Path) -> std::io::Result<ColumnSelection> {
    let bytes = std::fs::read(path)?;
    let (text, _) = encoding::decode(&bytes, &path.display().to_string());
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_date_columns_from_schema() {
        let (schema, dates) = parse_schema("age:int\nname: str \njoined:date\nscore:float\n").unwrap();
        assert_eq!(schema.get("age"), Some(&ColumnType::Integer));
        assert_eq!(schema.get("name"), Some(&ColumnType::Text));
        assert_eq!(schema.get("score"), Some(&ColumnType::Float));
        assert!(!schema.contains_key("joined"));
        assert_eq!(dates, vec!["joined".to_string()]);
    }

    #[test]
    fn blank_lines_are_ignored() {
        let (schema, dates) = parse_schema("\nage:int\n\n").unwrap();
        assert_eq!(schema.len(), 1);
        assert!(dates.is_empty());
    }

    #[test]
    fn missing_colon_is_malformed() {
        let err = parse_schema("age:int\nname str\n").unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { line_no: 2, .. }));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = parse_schema("age:decimal\n").unwrap_err();
        match err {
            SchemaError::UnknownType { column, token, .. } => {
                assert_eq!(column, "age");
                assert_eq!(token, "decimal");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
