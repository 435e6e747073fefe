use crate::error::ConfigError;

// Prompt wrapping applied before a prompt is sent to the serving engine.
// `user_prompt` carries an `{input}` slot, `assistant_prompt` an `{output}` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTemplate {
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub user_prompt: &'static str,
    pub assistant_prompt: &'static str,
}

impl ChatTemplate {
    pub fn format(&self, input: &str, output: &str) -> String {
        let mut prompt = String::from(self.system_prompt);
        prompt.push_str(&self.user_prompt.replace("{input}", input));
        prompt.push_str(&self.assistant_prompt.replace("{output}", output));
        prompt
    }
}

pub const TEMPLATES: &[ChatTemplate] = &[
    ChatTemplate {
        name: "Plain",
        system_prompt: "",
        user_prompt: "{input}",
        assistant_prompt: "{output}",
    },
    ChatTemplate {
        name: "Dialogue",
        system_prompt: "BEGINNING OF CONVERSATION: ",
        user_prompt: "USER: {input} ",
        assistant_prompt: "ASSISTANT:{output}",
    },
    ChatTemplate {
        name: "Llava",
        system_prompt: "",
        user_prompt: "USER: <image>\n{input} ",
        assistant_prompt: "ASSISTANT:{output}",
    },
    ChatTemplate {
        name: "Chatml",
        system_prompt: "<|im_start|>system\nYou are a helpful assistant.<|im_end|>\n",
        user_prompt: "<|im_start|>user\n{input}<|im_end|>\n",
        assistant_prompt: "<|im_start|>assistant\n{output}",
    },
];

pub fn get_template(name: &str) -> Result<&'static ChatTemplate, ConfigError> {
    TEMPLATES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| ConfigError::UnknownTemplate(name.to_string()))
}
