// MMMU: multimodal multiple-choice and open questions, substring judged.

use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use super::{PromptSettings, TaskInput, TaskScore, TextBenchmark, question_id};
use crate::dataset::{Record, field_text, image_data_url};
use crate::error::{ConfigError, DatasetError};
use crate::models::Outcome;
use crate::report::DetailRow;

pub const MAX_IMAGES: usize = 7;
pub const IMAGE_TAG: &str = "<image>";

#[derive(Debug, Default, Clone, Copy)]
pub struct Mmmu;

// options arrive either as a list or as a python-style "['a', 'b']" string
pub fn parse_options(options: Option<&Value>) -> Vec<String> {
    match options {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(raw)) => {
            let inner = raw.trim().trim_matches(|c: char| c == '[' || c == ']');
            if inner.trim().is_empty() {
                return Vec::new();
            }
            inner
                .replace('\'', "")
                .split(", ")
                .map(str::to_string)
                .collect()
        }
        _ => Vec::new(),
    }
}

fn options_text(record: &Record) -> String {
    match record.get("options") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(_)) => format!("{:?}", parse_options(record.get("options"))),
        _ => String::new(),
    }
}

pub fn build_example_prompt(
    record: &Record,
    with_answer: bool,
    index: usize,
) -> Result<String, DatasetError> {
    let question_type = field_text(record, "question_type", index)?;
    let question = field_text(record, "question", index)?;
    let choices = if question_type == "multiple-choice" {
        format!(
            "Please choose the correct answer from the following options:\n{}",
            options_text(record)
        )
    } else {
        String::new()
    };
    let answer = if with_answer {
        format!("Answer: ({})", field_text(record, "answer", index)?)
    } else {
        "Answer: ".to_string()
    };
    Ok(format!("Question_type: {question_type}\n{question}{choices}\n{answer}"))
}

// image_1..image_7 fields that are set
pub fn image_keys(record: &Record) -> Vec<String> {
    (1..=MAX_IMAGES)
        .map(|i| format!("image_{i}"))
        .filter(|key| match record.get(key) {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        })
        .collect()
}

// images become data urls; relative paths resolve against the task dir
fn image_urls(record: &Record, task_dir: &Path, index: usize) -> Result<Vec<String>, DatasetError> {
    image_keys(record)
        .into_iter()
        .map(|key| {
            let value = field_text(record, &key, index)?;
            if value.starts_with("data:") || value.starts_with("http://") || value.starts_with("https://") {
                return Ok(value);
            }
            image_data_url(&task_dir.join(value))
        })
        .collect()
}

// option text picked by letter, or the raw answer for open questions
pub fn correct_answer(answer: &str, options: &[String]) -> String {
    let mut chars = answer.trim().chars();
    if let (Some(letter), None) = (chars.next(), chars.next()) {
        if letter.is_ascii_uppercase() {
            let idx = (letter as u8 - b'A') as usize;
            if let Some(option) = options.get(idx) {
                return option.clone();
            }
        }
    }
    answer.trim().to_string()
}

pub fn judge(correct_answer: &str, response: &str) -> bool {
    !correct_answer.is_empty() && response.contains(correct_answer)
}

pub fn strip_image_tags(prompt: &str) -> String {
    prompt.replace(IMAGE_TAG, "")
}

impl TextBenchmark for Mmmu {
    fn name(&self) -> &'static str {
        "MMMU"
    }

    fn validate(&self, settings: &PromptSettings) -> Result<(), ConfigError> {
        if settings.n_shot > 0 {
            return Err(ConfigError::Invalid {
                field: "eval_cfgs.n_shot".to_string(),
                reason: if settings.cot {
                    "few-shot and chain-of-thought cannot be used together for MMMU".to_string()
                } else {
                    "MMMU does not support few-shot prompting".to_string()
                },
            });
        }
        Ok(())
    }

    fn build_inputs(
        &self,
        records: &[Record],
        _fewshot: &[Record],
        settings: &PromptSettings,
        task_dir: &Path,
    ) -> Result<Vec<TaskInput>, DatasetError> {
        records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let question = build_example_prompt(record, false, i)?;
                Ok(TaskInput {
                    question_id: question_id(record, i),
                    prompt: settings.template.format(&question, ""),
                    image_urls: image_urls(record, task_dir, i)?,
                })
            })
            .collect()
    }

    fn score(
        &self,
        records: &[Record],
        inputs: &[TaskInput],
        outcomes: &[Outcome],
    ) -> Result<TaskScore, DatasetError> {
        let mut score = TaskScore::default();
        let mut seen = HashSet::new();

        for (i, ((record, input), outcome)) in records.iter().zip(inputs).zip(outcomes).enumerate() {
            if !seen.insert(input.question_id.clone()) {
                continue;
            }
            let options = parse_options(record.get("options"));
            let expected = correct_answer(&field_text(record, "answer", i)?, &options);
            let correct = outcome.text().is_some_and(|text| judge(&expected, text));

            score.num_sum += 1;
            if correct {
                score.num_match += 1;
            }
            score.rows.push(DetailRow::judged(
                field_text(record, "question", i)?,
                strip_image_tags(&input.prompt),
                expected,
                outcome.text_or_error(),
                correct,
            ));
        }
        Ok(score)
    }
}
