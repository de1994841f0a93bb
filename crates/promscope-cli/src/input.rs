//! Input handling for files, inline expressions and stdin.

use anyhow::{Context, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One query to analyze, with the name issues are reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySource {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("{0} does not contain a query")]
    Empty(String),
}

/// Collect queries from `--expr` values and files.
///
/// Inline expressions come first, named `<expr N>`. If neither is provided,
/// reads a single query from stdin.
pub fn read_input(files: &[PathBuf], exprs: &[String]) -> Result<Vec<QuerySource>> {
    if files.is_empty() && exprs.is_empty() {
        return Ok(vec![read_from_stdin()?]);
    }

    let mut sources: Vec<QuerySource> = exprs
        .iter()
        .enumerate()
        .map(|(i, expr)| QuerySource {
            name: format!("<expr {}>", i + 1),
            query: expr.clone(),
        })
        .collect();
    for path in files {
        sources.push(read_from_file(path)?);
    }

    for source in &sources {
        if source.query.trim().is_empty() {
            return Err(InputError::Empty(source.name.clone()).into());
        }
    }
    Ok(sources)
}

fn read_from_stdin() -> Result<QuerySource> {
    let mut query = String::new();
    io::stdin()
        .read_to_string(&mut query)
        .context("Failed to read from stdin")?;
    if query.trim().is_empty() {
        return Err(InputError::Empty("<stdin>".to_string()).into());
    }

    Ok(QuerySource {
        name: "<stdin>".to_string(),
        query: strip_trailing_newline(query),
    })
}

fn read_from_file(path: &Path) -> Result<QuerySource> {
    let query = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    Ok(QuerySource {
        name: path.display().to_string(),
        query: strip_trailing_newline(query),
    })
}

/// Drops the final newline editors add, so reported offsets stay inside the query.
fn strip_trailing_newline(mut query: String) -> String {
    let trimmed = query.trim_end_matches(['\n', '\r']).len();
    query.truncate(trimmed);
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_single_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sum(rate(foo[5m])) by (job)").unwrap();

        let sources = read_input(&[file.path().to_path_buf()], &[]).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].query, "sum(rate(foo[5m])) by (job)");
    }

    #[test]
    fn test_exprs_come_before_files() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "bar").unwrap();

        let sources = read_input(
            &[file.path().to_path_buf()],
            &["up".to_string(), "foo".to_string()],
        )
        .unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names[..2], ["<expr 1>", "<expr 2>"]);
        assert_eq!(sources[2].query, "bar");
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_input(&[PathBuf::from("/nonexistent/rule.promql")], &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let err = read_input(&[file.path().to_path_buf()], &[]).unwrap_err();
        assert!(err.to_string().contains("does not contain a query"));
    }

    #[test]
    fn test_strip_trailing_newline() {
        assert_eq!(strip_trailing_newline("up\r\n\n".to_string()), "up");
        assert_eq!(strip_trailing_newline("sum(\n  up\n)\n".to_string()), "sum(\n  up\n)");
    }
}
