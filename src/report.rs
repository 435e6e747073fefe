// Result files and summary tables for evaluation runs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

// One evaluated item as written to `<task>.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRow {
    pub question: String,
    pub prompt: String,
    pub correct_answer: String,
    pub response: String,
    // Set for benchmarks judged right/wrong
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    // Set for benchmarks scored by a model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl DetailRow {
    pub fn judged(
        question: String,
        prompt: String,
        correct_answer: String,
        response: String,
        correct: bool,
    ) -> Self {
        Self {
            question,
            prompt,
            correct_answer,
            response,
            correct: Some(correct),
            score: None,
        }
    }

    // DrawBench rows: the response column holds the image path
    pub fn scored(prompt: String, image_path: String, score: f64) -> Self {
        Self {
            question: prompt,
            prompt: String::new(),
            correct_answer: String::new(),
            response: image_path,
            correct: None,
            score: Some(score),
        }
    }
}

// Aggregate result of one task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub task: String,
    pub model_id: String,
    pub num_fewshot: usize,
    pub chain_of_thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_match: Option<usize>,
    pub num_sum: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

// Every task of one benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub benchmark: String,
    pub uuid: String,
    pub timestamp: String,
    pub tasks: Vec<TaskSummary>,
}

impl RunReport {
    pub fn new(benchmark: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            uuid: uuid.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            tasks: Vec::new(),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# {} Benchmark\n\n", self.benchmark));
        md.push_str(&format!("**Run**: {}\n\n", self.uuid));
        md.push_str(&format!("**Timestamp**: {}\n\n", self.timestamp));
        md.push_str(&table_header());
        for task in &self.tasks {
            md.push_str(&table_row(task));
        }
        md
    }
}

fn table_header() -> String {
    "| Task | Model | Few-shot | CoT | Match | Total | Result |\n\
     |------|-------|----------|-----|-------|-------|--------|\n"
        .to_string()
}

fn table_row(task: &TaskSummary) -> String {
    let result = match (task.accuracy, task.score) {
        (Some(acc), _) => format!("{:.2}%", acc * 100.0),
        (None, Some(score)) => format!("{score:.4}"),
        (None, None) => "-".to_string(),
    };
    format!(
        "| {} | {} | {} | {} | {} | {} | {} |\n",
        task.task,
        task.model_id,
        task.num_fewshot,
        task.chain_of_thought,
        task.num_match.map_or_else(|| "-".to_string(), |m| m.to_string()),
        task.num_sum,
        result
    )
}

// Log one task's summary as a small table
pub fn print_table(benchmark: &str, summary: &TaskSummary) {
    info!("{}/{} Benchmark", benchmark, summary.task);
    for line in format!("{}{}", table_header(), table_row(summary)).lines() {
        info!("{line}");
    }
}

pub fn run_dir(output_dir: &Path, uuid: &str) -> PathBuf {
    output_dir.join(uuid)
}

pub fn write_details(dir: &Path, task: &str, rows: &[DetailRow]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    // task names may contain '/' (e.g. MMMU subjects), keep files flat
    let path = dir.join(format!("{}.json", task.replace('/', "_")));
    std::fs::write(&path, serde_json::to_string_pretty(rows)?)?;
    Ok(path)
}

// Write `<benchmark>_summary.json` and `.md` next to the detail files
pub fn write_summary(dir: &Path, report: &RunReport) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stem = report.benchmark.to_lowercase();
    let json_path = dir.join(format!("{stem}_summary.json"));
    std::fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
    std::fs::write(dir.join(format!("{stem}_summary.md")), report.to_markdown())?;
    Ok(json_path)
}
