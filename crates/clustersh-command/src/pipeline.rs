//! In-process pipeline stages.
//!
//! Stages transform the output of the previous stage and keep its
//! provenance (contributors, failures, generation) untouched.

use std::cmp::Ordering;

use clustersh_common::{Payload, Value};

use crate::ast::CommandNode;
use crate::error::{ExecutionError, Result};
use crate::grammar::StageKind;
use crate::output::{Output, Table};

/// Applies stage `kind`, parsed as `node`, to `input`.
pub fn apply(kind: StageKind, node: &CommandNode, input: Output) -> Result<Output> {
    let name = node.name().unwrap_or_default();
    let args: Vec<&str> = node.positionals().collect();
    match kind {
        StageKind::Like => like(name, &args, input),
        StageKind::Select => select(name, &args, input),
        StageKind::Sort => sort(name, &args, node.has_option("desc"), input),
        StageKind::Limit => limit(name, &args, input),
        StageKind::Count => count(name, &args, input),
    }
}

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

fn cell_text(cell: &Option<Value>) -> String {
    cell.as_ref().map(Value::to_string).unwrap_or_default()
}

fn like(name: &str, patterns: &[&str], input: Output) -> Result<Output> {
    if patterns.is_empty() {
        return Err(ExecutionError::invalid(name, "expects at least one pattern"));
    }
    match input {
        Output::Table(mut table) => {
            table
                .rows
                .retain(|row| row.iter().any(|cell| matches_any(&cell_text(cell), patterns)));
            Ok(Output::Table(table))
        }
        Output::Map(map) => Ok(Output::Map(
            map.into_iter()
                .filter(|(k, v)| matches_any(k, patterns) || matches_any(&v.to_string(), patterns))
                .collect(),
        )),
        Output::List(list) => Ok(Output::List(
            list.into_iter().filter(|v| matches_any(&v.to_string(), patterns)).collect(),
        )),
        Output::Message(_) => Err(ExecutionError::invalid(name, "cannot filter a message")),
    }
}

/// Resolves a column by exact name, then by unique prefix.
fn resolve_column(name: &str, table: &Table, column: &str) -> Result<usize> {
    if let Some(index) = table.column_index(column) {
        return Ok(index);
    }
    let candidates: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with(column))
        .map(|(i, _)| i)
        .collect();
    match candidates.as_slice() {
        [index] => Ok(*index),
        [] => Err(ExecutionError::invalid(name, format!("no column '{}'", column))),
        _ => Err(ExecutionError::invalid(name, format!("column '{}' is ambiguous", column))),
    }
}

fn select(name: &str, columns: &[&str], input: Output) -> Result<Output> {
    if columns.is_empty() {
        return Err(ExecutionError::invalid(name, "expects at least one column"));
    }
    match input {
        Output::Table(table) => {
            let indices = columns
                .iter()
                .map(|c| resolve_column(name, &table, c))
                .collect::<Result<Vec<usize>>>()?;
            let mut projected = Table::new(indices.iter().map(|&i| table.columns[i].clone()).collect());
            for row in &table.rows {
                projected.push(indices.iter().map(|&i| row.get(i).cloned().flatten()).collect());
            }
            Ok(Output::Table(projected))
        }
        Output::Map(map) => {
            let kept: Payload = map
                .into_iter()
                .filter(|(k, _)| columns.contains(&k.as_str()))
                .collect();
            Ok(Output::Map(kept))
        }
        other => Err(ExecutionError::invalid(name, format!("cannot select from a {}", other.kind()))),
    }
}

/// Numbers compare numerically, everything else by text. Missing cells
/// sort last.
fn compare_cells(a: &Option<Value>, b: &Option<Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(m), Some(n)) => m.partial_cmp(&n).unwrap_or(Ordering::Equal),
            _ => x.to_string().cmp(&y.to_string()),
        },
    }
}

fn sort(name: &str, args: &[&str], descending: bool, input: Output) -> Result<Output> {
    let [column] = args else {
        return Err(ExecutionError::invalid(name, "expects exactly one column"));
    };
    match input {
        Output::Table(mut table) => {
            let index = resolve_column(name, &table, column)?;
            table.rows.sort_by(|a, b| {
                let (x, y) = (a.get(index).cloned().flatten(), b.get(index).cloned().flatten());
                match (&x, &y, descending) {
                    // Missing cells stay last either way
                    (None, _, _) | (_, None, _) => compare_cells(&x, &y),
                    (_, _, true) => compare_cells(&y, &x),
                    (_, _, false) => compare_cells(&x, &y),
                }
            });
            Ok(Output::Table(table))
        }
        other => Err(ExecutionError::invalid(name, format!("cannot sort a {}", other.kind()))),
    }
}

fn limit(name: &str, args: &[&str], input: Output) -> Result<Output> {
    let n: usize = match args {
        [n] => n
            .parse()
            .map_err(|_| ExecutionError::invalid(name, format!("'{}' is not a row count", n)))?,
        _ => return Err(ExecutionError::invalid(name, "expects one row count")),
    };
    match input {
        Output::Table(mut table) => {
            table.rows.truncate(n);
            Ok(Output::Table(table))
        }
        Output::List(mut list) => {
            list.truncate(n);
            Ok(Output::List(list))
        }
        Output::Map(map) => Ok(Output::Map(map.into_iter().take(n).collect())),
        other => Err(ExecutionError::invalid(name, format!("cannot limit a {}", other.kind()))),
    }
}

fn count(name: &str, args: &[&str], input: Output) -> Result<Output> {
    if !args.is_empty() {
        return Err(ExecutionError::invalid(name, "takes no arguments"));
    }
    let n = match &input {
        Output::Table(table) => table.len(),
        Output::List(list) => list.len(),
        Output::Map(map) => map.len(),
        Output::Message(_) => return Err(ExecutionError::invalid(name, "cannot count a message")),
    };
    let mut table = Table::new(vec!["count".to_string()]);
    table.push(vec![Some(Value::from(n as u64))]);
    Ok(Output::Table(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use clustersh_common::payload;

    fn table() -> Output {
        let mut table = Table::new(vec!["key".into(), "10.0.0.1:3000".into(), "10.0.0.2:3000".into()]);
        table.push(vec![Some(Value::from("objects")), Some(Value::from(10)), Some(Value::from(3))]);
        table.push(vec![Some(Value::from("uptime")), Some(Value::from(900)), None]);
        table.push(vec![Some(Value::from("client_connections")), Some(Value::from(2)), Some(Value::from(40))]);
        Output::Table(table)
    }

    fn run(stage: &str, input: Output) -> Result<Output> {
        let node = parse(stage).unwrap();
        let kind = match node.name() {
            Some("like") => StageKind::Like,
            Some("select") => StageKind::Select,
            Some("sort") => StageKind::Sort,
            Some("limit") => StageKind::Limit,
            Some("count") => StageKind::Count,
            other => panic!("not a stage: {:?}", other),
        };
        apply(kind, &node, input)
    }

    fn keys(output: &Output) -> Vec<String> {
        output
            .as_table()
            .unwrap()
            .rows
            .iter()
            .map(|row| cell_text(&row[0]))
            .collect()
    }

    #[test]
    fn test_like_keeps_matching_rows() {
        let out = run("like obj conn", table()).unwrap();
        assert_eq!(keys(&out), vec!["objects", "client_connections"]);
    }

    #[test]
    fn test_like_on_map() {
        let out = run("like geo", Output::Map(payload! { "geo" => true, "batch" => "no-geo", "tls" => false })).unwrap();
        assert_eq!(out, Output::Map(payload! { "geo" => true, "batch" => "no-geo" }));
    }

    #[test]
    fn test_select_by_name_and_prefix() {
        let out = run("select key 10.0.0.2", table()).unwrap();
        let t = out.as_table().unwrap();
        assert_eq!(t.columns, vec!["key", "10.0.0.2:3000"]);
        assert_eq!(t.rows[1], vec![Some(Value::from("uptime")), None]);

        assert!(matches!(
            run("select 10.0", table()).unwrap_err(),
            ExecutionError::InvalidArgument { .. }
        ));
        assert!(run("select nope", table()).is_err());
    }

    #[test]
    fn test_sort_numeric_and_descending() {
        let out = run("sort 10.0.0.2:3000", table()).unwrap();
        assert_eq!(keys(&out), vec!["objects", "client_connections", "uptime"]);

        let out = run("sort 10.0.0.2:3000 -desc", table()).unwrap();
        assert_eq!(keys(&out), vec!["client_connections", "objects", "uptime"]);

        let out = run("sort key", table()).unwrap();
        assert_eq!(keys(&out), vec!["client_connections", "objects", "uptime"]);
    }

    #[test]
    fn test_sort_needs_one_column() {
        assert!(run("sort", table()).is_err());
        assert!(run("sort a b", table()).is_err());
        assert!(run("sort key", Output::Message("x".into())).is_err());
    }

    #[test]
    fn test_limit() {
        let out = run("limit 2", table()).unwrap();
        assert_eq!(keys(&out), vec!["objects", "uptime"]);
        assert_eq!(run("limit 0", table()).unwrap().as_table().unwrap().len(), 0);
        assert!(run("limit -1", table()).is_err());
        assert!(run("limit many", table()).is_err());
    }

    #[test]
    fn test_count() {
        let out = run("count", table()).unwrap();
        assert_eq!(out.as_table().unwrap().cell(0, "count"), Some(&Value::Int(3)));
        assert!(run("count x", table()).is_err());
    }
}
