//! Cluster-level merges of per-node replies.
//!
//! Every merge reads only the successful entries of an
//! [`AggregatedResponse`], in address order, so the result never depends on
//! the order nodes answered in.

use std::collections::{BTreeMap, BTreeSet};

use clustersh_common::{Payload, Value};
use clustersh_session::AggregatedResponse;

use crate::error::{ExecutionError, Result};
use crate::output::{Output, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// One row per key, one column per node.
    PassThrough,
    /// Every key any node reported.
    KeyUnion,
    /// Sum, average, minimum and maximum per numeric key.
    NumericAggregate,
    /// Like [`Merge::PassThrough`], restricted to keys whose values differ.
    Diff,
}

impl Merge {
    pub fn apply(&self, response: &AggregatedResponse) -> Result<Output> {
        let replies: Vec<(&String, &Payload)> = response.successes().collect();
        match self {
            Merge::PassThrough => Ok(Output::Table(per_node_table(&replies, false))),
            Merge::Diff => Ok(Output::Table(per_node_table(&replies, true))),
            Merge::KeyUnion => key_union(&replies).map(Output::Map),
            Merge::NumericAggregate => numeric_aggregate(&replies).map(Output::Table),
        }
    }
}

fn all_keys<'a>(payloads: impl Iterator<Item = &'a Payload>) -> BTreeSet<&'a String> {
    payloads.flat_map(|payload| payload.keys()).collect()
}

fn per_node_table(replies: &[(&String, &Payload)], differing_only: bool) -> Table {
    let mut columns = vec!["key".to_string()];
    columns.extend(replies.iter().map(|(address, _)| (*address).clone()));
    let mut table = Table::new(columns);

    for key in all_keys(replies.iter().map(|&(_, payload)| payload)) {
        let cells: Vec<Option<&Value>> = replies.iter().map(|(_, payload)| payload.get(key)).collect();
        if differing_only && cells.windows(2).all(|pair| pair[0] == pair[1]) {
            continue;
        }
        let mut row = Vec::with_capacity(cells.len() + 1);
        row.push(Some(Value::Str(key.clone())));
        row.extend(cells.into_iter().map(|cell| cell.cloned()));
        table.push(row);
    }
    table
}

fn key_union(replies: &[(&String, &Payload)]) -> Result<Payload> {
    let mut merged = Payload::new();
    for key in all_keys(replies.iter().map(|&(_, payload)| payload)) {
        let values: Vec<&Value> = replies.iter().filter_map(|(_, payload)| payload.get(key)).collect();
        merged.insert(key.clone(), union_values(key, &values)?);
    }
    Ok(merged)
}

/// Combines the values one key has across nodes.
///
/// Equal values collapse, maps merge key by key, lists concatenate without
/// duplicates and differing scalars become the sorted list of distinct
/// values. A map or list against a scalar cannot be combined.
fn union_values(key: &str, values: &[&Value]) -> Result<Value> {
    let Some((first, rest)) = values.split_first() else {
        return Ok(Value::List(Vec::new()));
    };
    if rest.iter().all(|v| *v == *first) {
        return Ok((*first).clone());
    }

    for value in rest {
        let structured = |v: &Value| matches!(v, Value::Map(_) | Value::List(_));
        if (structured(*first) || structured(*value)) && first.type_name() != value.type_name() {
            return Err(ExecutionError::Irreconcilable {
                key: key.to_string(),
                left: first.type_name(),
                right: value.type_name(),
            });
        }
    }

    match first {
        Value::Map(_) => {
            let maps: Vec<&Payload> = values.iter().filter_map(|v| v.as_map()).collect();
            let mut merged = Payload::new();
            for nested in all_keys(maps.iter().copied()) {
                let nested_values: Vec<&Value> = maps.iter().filter_map(|m| m.get(nested)).collect();
                merged.insert(nested.clone(), union_values(&format!("{}.{}", key, nested), &nested_values)?);
            }
            Ok(Value::Map(merged))
        }
        Value::List(_) => Ok(Value::List(distinct(
            values.iter().filter_map(|v| v.as_list()).flatten(),
        ))),
        _ => Ok(Value::List(distinct(values.iter().copied()))),
    }
}

/// Distinct values in a stable order.
fn distinct<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out.sort_by(|a, b| {
        a.type_name()
            .cmp(b.type_name())
            .then_with(|| a.to_string().cmp(&b.to_string()))
    });
    out
}

/// Running statistics for one key.
struct Aggregate {
    sum: f64,
    int_sum: Option<i64>,
    min: f64,
    max: f64,
    count: usize,
    /// Type seen first, for conflict reporting.
    seen: &'static str,
}

impl Aggregate {
    fn new(seen: &'static str) -> Self {
        Self {
            sum: 0.0,
            int_sum: Some(0),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
            seen,
        }
    }

    fn add(&mut self, value: &Value, number: f64) {
        self.sum += number;
        self.int_sum = match (self.int_sum, value.as_i64()) {
            (Some(total), Some(n)) if !matches!(value, Value::Float(_)) => total.checked_add(n),
            _ => None,
        };
        self.min = self.min.min(number);
        self.max = self.max.max(number);
        self.count += 1;
    }

    fn number(&self, x: f64) -> Value {
        if self.int_sum.is_some() && x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
            Value::Int(x as i64)
        } else {
            Value::Float(x)
        }
    }

    fn row(&self, key: &str) -> Vec<Option<Value>> {
        let sum = match self.int_sum {
            Some(total) => Value::Int(total),
            None => Value::Float(self.sum),
        };
        vec![
            Some(Value::Str(key.to_string())),
            Some(sum),
            Some(Value::Float(self.sum / self.count as f64)),
            Some(self.number(self.min)),
            Some(self.number(self.max)),
            Some(Value::Int(self.count as i64)),
        ]
    }
}

/// Aggregates every numeric key. Keys holding text that is not a number
/// are left out; a key that is numeric on one node and structured on
/// another is an error.
fn numeric_aggregate(replies: &[(&String, &Payload)]) -> Result<Table> {
    let mut aggregates: BTreeMap<&String, Aggregate> = BTreeMap::new();
    let mut structured: BTreeMap<&String, &'static str> = BTreeMap::new();
    let mut skipped: BTreeSet<&String> = BTreeSet::new();

    for &(_, payload) in replies {
        for (key, value) in payload {
            match value {
                Value::Map(_) | Value::List(_) => {
                    if let Some(aggregate) = aggregates.get(key) {
                        return Err(ExecutionError::Irreconcilable {
                            key: key.clone(),
                            left: aggregate.seen,
                            right: value.type_name(),
                        });
                    }
                    structured.entry(key).or_insert(value.type_name());
                }
                _ => match value.as_f64() {
                    Some(number) => {
                        if let Some(kind) = structured.get(key) {
                            return Err(ExecutionError::Irreconcilable {
                                key: key.clone(),
                                left: *kind,
                                right: value.type_name(),
                            });
                        }
                        aggregates
                            .entry(key)
                            .or_insert_with(|| Aggregate::new(value.type_name()))
                            .add(value, number);
                    }
                    None => {
                        skipped.insert(key);
                    }
                },
            }
        }
    }

    let mut table = Table::new(
        ["key", "sum", "avg", "min", "max", "nodes"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
    );
    for (key, aggregate) in aggregates {
        if !skipped.contains(key) {
            table.push(aggregate.row(key));
        }
    }
    Ok(table)
}
