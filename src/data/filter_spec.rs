use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::encoding;

/// Column name → raw predicate lines, in file order.
/// An empty list means "no constraint on this column".
pub type FilterSpec = BTreeMap<String, Vec<String>>;

/// Filter files in `dir`: every `*.txt` whose file name is not in `reserved`.
/// Sorted so runs are reproducible.
pub fn filter_files(dir: &Path, reserved: &[&str]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_txt = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        let is_reserved = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| reserved.contains(&n));
        if is_txt && !is_reserved {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read every filter file; the column name is the file stem.
pub fn load_filter_spec(files: &[PathBuf]) -> std::io::Result<FilterSpec> {
    let mut spec = FilterSpec::new();
    for path in files {
        let Some(column) = path.file_stem().and_then(|s| s.to_str()) else {
            log::warn!("{}: file name is not valid UTF-8, ignored", path.display());
            continue;
        };
        let bytes = std::fs::read(path)?;
        let (text, _) = encoding::decode(&bytes, &path.display().to_string());
        spec.insert(column.to_string(), predicate_lines(&text));
    }
    Ok(spec)
}

/// Non-empty, trimmed lines of a filter file.
pub fn predicate_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_trimmed_and_blank_lines_dropped() {
        assert_eq!(
            predicate_lines("  >=10 \r\n\n<=20\n   \n"),
            vec![">=10".to_string(), "<=20".to_string()]
        );
        assert!(predicate_lines("").is_empty());
    }

    #[test]
    fn reserved_and_non_txt_files_are_not_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["dtypes.txt", "columns.txt", "age.txt", "name.TXT", "notes.md"] {
            std::fs::write(dir.path().join(name), "x\n").unwrap();
        }
        let files = filter_files(dir.path(), &["dtypes.txt", "columns.txt"]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["age.txt", "name.TXT"]);

        let spec = load_filter_spec(&files).unwrap();
        assert_eq!(spec.get("age"), Some(&vec!["x".to_string()]));
        assert!(spec.contains_key("name"));
    }
}
