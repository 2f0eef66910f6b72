//! Structured command results.
//!
//! Results are typed values, not text. They serialize with serde so an
//! output collaborator can render them as JSON, tables or anything else.

use std::collections::BTreeMap;

use clustersh_common::{Payload, Value};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Ordered rows under named columns. Missing cells are `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    #[serde(serialize_with = "rows_as_json")]
    pub rows: Vec<Vec<Option<Value>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Option<Value>>) {
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` under column `column`.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Output {
    Table(Table),
    Map(#[serde(serialize_with = "payload_as_json")] Payload),
    List(#[serde(serialize_with = "list_as_json")] Vec<Value>),
    Message(String),
}

impl Output {
    pub fn kind(&self) -> &'static str {
        match self {
            Output::Table(_) => "table",
            Output::Map(_) => "map",
            Output::List(_) => "list",
            Output::Message(_) => "message",
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Output::Table(t) => Some(t),
            _ => None,
        }
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub output: Output,
    /// Nodes whose replies went into the output.
    pub contributors: Vec<String>,
    /// Error text per node that failed.
    pub failures: BTreeMap<String, String>,
    /// View generation the data was collected under.
    pub generation: Option<u64>,
    /// Served from the session cache.
    pub cached: bool,
}

impl CommandResult {
    /// Result that involved no node.
    pub fn local(output: Output) -> Self {
        Self {
            output,
            contributors: Vec::new(),
            failures: BTreeMap::new(),
            generation: None,
            cached: false,
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::local(Output::Message(text.into()))
    }

    /// Same provenance, different output.
    pub fn with_output(self, output: Output) -> Self {
        Self { output, ..self }
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn payload_as_json<S: Serializer>(payload: &Payload, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(payload.len()))?;
    for (key, value) in payload {
        map.serialize_entry(key, &value.to_json())?;
    }
    map.end()
}

fn list_as_json<S: Serializer>(list: &[Value], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(list.len()))?;
    for value in list {
        seq.serialize_element(&value.to_json())?;
    }
    seq.end()
}

fn rows_as_json<S: Serializer>(rows: &[Vec<Option<Value>>], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(rows.len()))?;
    for row in rows {
        let cells: Vec<serde_json::Value> = row
            .iter()
            .map(|cell| cell.as_ref().map(Value::to_json).unwrap_or(serde_json::Value::Null))
            .collect();
        seq.serialize_element(&cells)?;
    }
    seq.end()
}
