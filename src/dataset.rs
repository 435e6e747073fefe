// Local dataset access.
//
// Benchmarks are read from JSONL files that were downloaded ahead of time:
// `<task_dir>/<task>/<split>.jsonl`, falling back to `<task_dir>/<task>.jsonl`.
// Few-shot examples live in `<root>/fewshot/<task>.json` and chain-of-thought
// examples in `<root>/cot_fewshot/<task>.json`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::DatasetError;

pub type Record = Map<String, Value>;

pub fn task_file(task_dir: &Path, task: &str, split: &str) -> PathBuf {
    let nested = task_dir.join(task).join(format!("{split}.jsonl"));
    if nested.exists() {
        nested
    } else {
        task_dir.join(format!("{task}.jsonl"))
    }
}

pub fn load_task(task_dir: &Path, task: &str, split: &str) -> Result<Vec<Record>, DatasetError> {
    let path = task_file(task_dir, task, split);
    let records = load_jsonl(&path)?;
    debug!(task, path = %path.display(), records = records.len(), "loaded task");
    Ok(records)
}

pub fn load_jsonl(path: &Path) -> Result<Vec<Record>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| DatasetError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| DatasetError::Record {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        match value {
            Value::Object(record) => records.push(record),
            _ => {
                return Err(DatasetError::Record {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: "expected a JSON object".to_string(),
                });
            }
        }
    }
    Ok(records)
}

pub fn fewshot_file(root: &Path, task: &str, cot: bool) -> PathBuf {
    let dir = if cot { "cot_fewshot" } else { "fewshot" };
    root.join(dir).join(format!("{task}.json"))
}

// Few-shot examples, either a list of records or a table of columns
// ({"question": [...], "prompts": [...]}) which is turned into records.
pub fn load_fewshot(root: &Path, task: &str, cot: bool) -> Result<Vec<Record>, DatasetError> {
    let path = fewshot_file(root, task, cot);
    let text = std::fs::read_to_string(&path).map_err(|source| DatasetError::Open {
        path: path.clone(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|e| DatasetError::Record {
        path: path.clone(),
        line: 1,
        reason: e.to_string(),
    })?;
    examples_from_value(value).map_err(|reason| DatasetError::Record {
        path,
        line: 1,
        reason,
    })
}

fn examples_from_value(value: Value) -> Result<Vec<Record>, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                _ => Err("few-shot entries must be objects".to_string()),
            })
            .collect(),
        Value::Object(columns) => {
            let rows = columns
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .max()
                .unwrap_or(0);
            let mut records = vec![Record::new(); rows];
            for (name, column) in columns {
                let Value::Array(cells) = column else {
                    return Err(format!("column '{name}' is not a list"));
                };
                for (row, cell) in cells.into_iter().enumerate() {
                    records[row].insert(name.clone(), cell);
                }
            }
            Ok(records)
        }
        _ => Err("few-shot file must hold a list or a table".to_string()),
    }
}

// field as text; numbers and booleans are rendered, null/missing is an error
pub fn field_text(record: &Record, field: &str, index: usize) -> Result<String, DatasetError> {
    match record.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(other @ (Value::Array(_) | Value::Object(_))) => Ok(other.to_string()),
        Some(Value::Null) | None => Err(missing(field, index)),
    }
}

fn missing(field: &str, index: usize) -> DatasetError {
    DatasetError::MissingField {
        field: field.to_string(),
        index,
    }
}

// Encode an image file as a data url the chat endpoint accepts
pub fn image_data_url(path: &Path) -> Result<String, DatasetError> {
    let bytes = std::fs::read(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}
