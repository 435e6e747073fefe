// Inference and evaluation records, plus the pairwise judge input.

use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Outcome};

pub const DEFAULT_JUDGE_PROMPT: &str = "You are a careful and impartial judge. \
Compare the two assistant responses to the user's request and decide which one is \
more helpful, accurate and harmless. Reply with a short explanation followed by your \
verdict: [[A]] if Assistant 1 is better, [[B]] if Assistant 2 is better.";

const ARENA_TEMPLATE: &str = "Human: {prompt}\nAssistant 1: {response1}\nAssistant 2: {response2}";

// Two responses to one prompt, to be compared by a judge model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArenaInput {
    pub prompt: String,
    pub response1: String,
    pub response2: String,
}

impl ArenaInput {
    pub fn render(&self) -> String {
        ARENA_TEMPLATE
            .replace("{prompt}", &self.prompt)
            .replace("{response1}", &self.response1)
            .replace("{response2}", &self.response2)
    }

    pub fn messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(self.render()),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    A,
    B,
    Unknown,
}

impl Verdict {
    // the last bracketed verdict wins; bare "A"/"B" replies are accepted too
    pub fn parse(text: &str) -> Self {
        let a = text.rfind("[[A]]");
        let b = text.rfind("[[B]]");
        match (a, b) {
            (Some(a), Some(b)) => {
                if a > b {
                    Verdict::A
                } else {
                    Verdict::B
                }
            }
            (Some(_), None) => Verdict::A,
            (None, Some(_)) => Verdict::B,
            (None, None) => match text.trim().trim_end_matches('.') {
                "A" => Verdict::A,
                "B" => Verdict::B,
                _ => Verdict::Unknown,
            },
        }
    }
}

// Judge result for one arena pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutput {
    pub input: ArenaInput,
    pub outcome: Outcome,
    pub verdict: Verdict,
}

impl EvalOutput {
    pub fn new(input: ArenaInput, outcome: Outcome) -> Self {
        let verdict = outcome.text().map_or(Verdict::Unknown, Verdict::parse);
        Self {
            input,
            outcome,
            verdict,
        }
    }
}
