pub mod bbh;
pub mod drawbench;
pub mod mmmu;

use std::path::Path;

use crate::dataset::{self, Record};
use crate::error::{ConfigError, DatasetError};
use crate::models::{ChatMessage, Outcome};
use crate::report::DetailRow;
use crate::template::ChatTemplate;

pub const COT_PROMPT: &str = " Let's think step by step. ";

// How prompts are assembled for one run
#[derive(Debug, Clone, Copy)]
pub struct PromptSettings {
    pub template: &'static ChatTemplate,
    pub n_shot: usize,
    pub cot: bool,
}

// One prompt ready to be sent, tied back to its dataset record
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInput {
    pub question_id: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
}

impl TaskInput {
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::user_with_images(
            self.prompt.clone(),
            self.image_urls.clone(),
        )]
    }
}

// Scored task: detail rows plus the match count
#[derive(Debug, Clone, Default)]
pub struct TaskScore {
    pub rows: Vec<DetailRow>,
    pub num_match: usize,
    pub num_sum: usize,
}

impl TaskScore {
    pub fn accuracy(&self) -> f64 {
        if self.num_sum == 0 {
            0.0
        } else {
            self.num_match as f64 / self.num_sum as f64
        }
    }
}

// Benchmarks answered by a chat model and scored against reference answers
pub trait TextBenchmark: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, _settings: &PromptSettings) -> Result<(), ConfigError> {
        Ok(())
    }

    // few-shot examples for a task, empty when n_shot is 0
    fn load_fewshot(
        &self,
        root: &Path,
        task: &str,
        settings: &PromptSettings,
    ) -> Result<Vec<Record>, DatasetError> {
        if settings.n_shot == 0 {
            return Ok(Vec::new());
        }
        let mut examples = dataset::load_fewshot(root, task, settings.cot)?;
        examples.truncate(settings.n_shot);
        Ok(examples)
    }

    fn build_inputs(
        &self,
        records: &[Record],
        fewshot: &[Record],
        settings: &PromptSettings,
        task_dir: &Path,
    ) -> Result<Vec<TaskInput>, DatasetError>;

    fn score(
        &self,
        records: &[Record],
        inputs: &[TaskInput],
        outcomes: &[Outcome],
    ) -> Result<TaskScore, DatasetError>;
}

// question id from the record's "id" field, else its position
pub fn question_id(record: &Record, index: usize) -> String {
    dataset::field_text(record, "id", index).unwrap_or_else(|_| index.to_string())
}
