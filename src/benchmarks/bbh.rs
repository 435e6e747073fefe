// BIG-Bench Hard: free-form answers compared after light normalization.

use std::path::Path;

use super::{COT_PROMPT, PromptSettings, TaskInput, TaskScore, TextBenchmark, question_id};
use crate::dataset::{Record, field_text};
use crate::error::DatasetError;
use crate::models::Outcome;
use crate::report::DetailRow;

pub const PREAMBLE: &str = "The following are questions (with answers).\n\n";

#[derive(Debug, Default, Clone, Copy)]
pub struct Bbh;

pub fn build_example_prompt(
    record: &Record,
    with_answer: bool,
    index: usize,
) -> Result<String, DatasetError> {
    let input = field_text(record, "input", index)?;
    let answer = if with_answer {
        format!("Answer: {}", field_text(record, "target", index)?)
    } else {
        "Answer: ".to_string()
    };
    Ok(format!("{input}\n{answer}"))
}

pub fn build_prompt(
    record: &Record,
    few_shots: &[String],
    settings: &PromptSettings,
    index: usize,
) -> Result<String, DatasetError> {
    let question = build_example_prompt(record, false, index)?;
    if few_shots.is_empty() {
        return Ok(settings
            .template
            .format(&format!("{PREAMBLE}{question}"), ""));
    }

    let mut examples = few_shots.to_vec();
    examples.push(question);
    let output = if settings.cot { COT_PROMPT } else { "" };
    Ok(settings
        .template
        .format(&format!("{PREAMBLE}{}", examples.join("\n\n")), output))
}

// text after the last "answer is", else the first non-empty line
pub fn extract_answer(response: &str) -> &str {
    let lower = response.to_ascii_lowercase();
    let tail = match lower.rfind("answer is") {
        Some(pos) => &response[pos + "answer is".len()..],
        None => response,
    };
    let line = tail
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    line.strip_prefix("Answer:")
        .unwrap_or(line)
        .trim_start_matches(':')
        .trim()
}

fn normalize(answer: &str) -> String {
    answer
        .trim()
        .trim_end_matches('.')
        .trim()
        .trim_matches(|c: char| c == '(' || c == ')')
        .trim()
        .to_lowercase()
}

pub fn judge(target: &str, response: &str) -> bool {
    let expected = normalize(target);
    !expected.is_empty() && normalize(extract_answer(response)) == expected
}

impl TextBenchmark for Bbh {
    fn name(&self) -> &'static str {
        "BBH"
    }

    fn build_inputs(
        &self,
        records: &[Record],
        fewshot: &[Record],
        settings: &PromptSettings,
        _task_dir: &Path,
    ) -> Result<Vec<TaskInput>, DatasetError> {
        let few_shots = fewshot
            .iter()
            .enumerate()
            .map(|(i, example)| build_example_prompt(example, true, i))
            .collect::<Result<Vec<_>, _>>()?;

        records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                Ok(TaskInput {
                    question_id: question_id(record, i),
                    prompt: build_prompt(record, &few_shots, settings, i)?,
                    image_urls: Vec::new(),
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
        for (i, ((record, input), outcome)) in records.iter().zip(inputs).zip(outcomes).enumerate() {
            let target = field_text(record, "target", i)?;
            let response = outcome.text_or_error();
            let correct = outcome.text().is_some_and(|text| judge(&target, text));

            score.num_sum += 1;
            if correct {
                score.num_match += 1;
            }
            score.rows.push(DetailRow::judged(
                field_text(record, "input", i)?,
                input.prompt.clone(),
                target,
                response,
                correct,
            ));
        }
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::get_template;
    use serde_json::json;

    fn record(input: &str, target: &str) -> Record {
        json!({"input": input, "target": target})
            .as_object()
            .unwrap()
            .clone()
    }

    fn settings(n_shot: usize, cot: bool) -> PromptSettings {
        PromptSettings {
            template: get_template("Plain").unwrap(),
            n_shot,
            cot,
        }
    }

    #[test]
    fn example_prompt_with_and_without_answer() {
        let r = record("not ( True ) and True is", "False");
        assert_eq!(
            build_example_prompt(&r, true, 0).unwrap(),
            "not ( True ) and True is\nAnswer: False"
        );
        assert_eq!(
            build_example_prompt(&r, false, 0).unwrap(),
            "not ( True ) and True is\nAnswer: "
        );
    }

    #[test]
    fn zero_shot_prompt_has_no_cot_cue() {
        let prompt = build_prompt(&record("Q", "A"), &[], &settings(0, true), 0).unwrap();
        assert_eq!(
            prompt,
            "The following are questions (with answers).\n\nQ\nAnswer: "
        );
    }

    #[test]
    fn few_shot_prompt_joins_examples() {
        let shots = vec!["Q1\nAnswer: A1".to_string(), "Q2\nAnswer: A2".to_string()];
        let prompt = build_prompt(&record("Q3", "A3"), &shots, &settings(2, false), 0).unwrap();
        assert_eq!(
            prompt,
            "The following are questions (with answers).\n\nQ1\nAnswer: A1\n\nQ2\nAnswer: A2\n\nQ3\nAnswer: "
        );
    }

    #[test]
    fn cot_prefills_assistant_turn() {
        let shots = vec!["Q1\nAnswer: A1".to_string()];
        let s = PromptSettings {
            template: get_template("Dialogue").unwrap(),
            n_shot: 1,
            cot: true,
        };
        let prompt = build_prompt(&record("Q2", "A2"), &shots, &s, 0).unwrap();
        assert!(prompt.starts_with("BEGINNING OF CONVERSATION: USER: The following"));
        assert!(prompt.ends_with("ASSISTANT: Let's think step by step. "));
    }

    #[test]
    fn extracts_after_answer_is() {
        assert_eq!(
            extract_answer("Step 1 ... Step 2 ... So the answer is (B).\nDone"),
            "(B)."
        );
        assert_eq!(extract_answer("\n  Yes\nbecause"), "Yes");
        assert_eq!(extract_answer("Answer: No"), "No");
    }

    #[test]
    fn judge_normalizes() {
        assert!(judge("(B)", "So the answer is (B)."));
        assert!(judge("False", "false"));
        assert!(judge("valid", " Valid.\nExplanation follows"));
        assert!(!judge("True", "False"));
        assert!(!judge("", "anything"));
        assert!(judge("3.5", "the answer is 3.5"));
    }

    #[test]
    fn failed_outcomes_count_as_wrong() {
        let records = vec![record("Q", "Yes")];
        let inputs = Bbh
            .build_inputs(&records, &[], &settings(0, false), Path::new("."))
            .unwrap();
        let outcomes = vec![Outcome::Failed {
            message: "HTTP 503: busy".into(),
            attempts: 5,
        }];
        let score = Bbh.score(&records, &inputs, &outcomes).unwrap();
        assert_eq!(score.num_sum, 1);
        assert_eq!(score.num_match, 0);
        assert_eq!(score.rows[0].response, "[error] HTTP 503: busy");
    }
}
