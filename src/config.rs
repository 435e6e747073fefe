use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{ModelParams, SamplingParams};
use crate::retry::RetryPolicy;

// CLI argument structure
#[derive(Parser, Debug)]
#[command(name = "align-eval")]
#[command(about = "Benchmark evaluation harness with a cached concurrent completion client")]
pub struct Args {
    // -v for debug, -vv for trace; RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    // Serve /health and /metrics on this port while running
    #[arg(long, global = true)]
    pub metrics_port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Run the BIG-Bench Hard benchmark")]
    Bbh(EvalArgs),
    #[command(about = "Run the MMMU benchmark")]
    Mmmu(EvalArgs),
    #[command(about = "Run the DrawBench text-to-image benchmark")]
    Drawbench(EvalArgs),
    #[command(about = "Send a JSONL file of message lists through the cached batcher")]
    Batch(BatchArgs),
    #[command(about = "Judge pairs of responses with a model")]
    Arena(ArenaArgs),
    #[command(about = "Remove every entry from a cache directory")]
    ClearCache {
        #[arg(long)]
        cache_dir: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct EvalArgs {
    // TOML evaluation config
    #[arg(short, long)]
    pub config: PathBuf,

    // Override config values, e.g. --set eval_cfgs.n_shot=3
    #[arg(long = "set", value_name = "SECTION.KEY=VALUE")]
    pub overrides: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct EndpointArgs {
    // Falls back to OPENAI_API_KEY
    #[arg(long)]
    pub api_key: Option<String>,

    // Falls back to OPENAI_API_BASE_URL
    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    // Attempts per request, the first call included
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}

impl EndpointArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    // JSONL, one message list per line
    #[arg(short, long)]
    pub input: PathBuf,

    // JSONL, one outcome per line in input order
    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(short, long)]
    pub model: String,

    // Label mixed into every cache key
    #[arg(long = "type", default_value = "batch")]
    pub request_type: String,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

#[derive(clap::Args, Debug)]
pub struct ArenaArgs {
    // JSONL of {prompt, response1, response2}
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(short, long)]
    pub model: String,

    #[arg(long, default_value = crate::outputs::DEFAULT_JUDGE_PROMPT)]
    pub system_prompt: String,

    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

// Evaluation config file
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EvalConfig {
    pub model_cfgs: ModelCfgs,
    pub data_cfgs: DataCfgs,
    #[serde(default)]
    pub eval_cfgs: EvalCfgs,
    #[serde(default)]
    pub infer_cfgs: InferCfgs,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelCfgs {
    // name used in result tables
    pub model_id: String,
    // model name served by the endpoint
    pub model_name_or_path: String,
    #[serde(default = "default_template")]
    pub chat_template: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum TaskList {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DataCfgs {
    pub task_dir: PathBuf,
    pub task: TaskList,
    #[serde(default = "default_split")]
    pub split: String,
    // holds fewshot/ and cot_fewshot/, defaults to task_dir
    #[serde(default)]
    pub fewshot_dir: Option<PathBuf>,
}

impl DataCfgs {
    pub fn task_names(&self) -> Vec<String> {
        match &self.task {
            TaskList::One(task) => vec![task.clone()],
            TaskList::Many(tasks) => tasks.clone(),
        }
    }

    pub fn fewshot_root(&self) -> &Path {
        self.fewshot_dir.as_deref().unwrap_or(&self.task_dir)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EvalCfgs {
    #[serde(default)]
    pub n_shot: usize,
    #[serde(default)]
    pub cot: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    // run id, generated when absent
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    // image scoring service used by DrawBench
    #[serde(default)]
    pub scorer_url: Option<String>,
}

impl Default for EvalCfgs {
    fn default() -> Self {
        Self {
            n_shot: 0,
            cot: false,
            output_dir: default_output_dir(),
            uuid: None,
            image_dir: default_image_dir(),
            scorer_url: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InferCfgs {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_workers")]
    pub num_workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    // any other key in the section goes to the endpoint untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for InferCfgs {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            num_workers: default_workers(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_secs: default_timeout_secs(),
            cache_dir: None,
            sampling: SamplingParams::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl InferCfgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_template() -> String {
    "Plain".to_string()
}

fn default_split() -> String {
    "test".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_workers() -> usize {
    8
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    120
}

impl EvalConfig {
    // read a TOML config and apply `section.key=value` overrides on top
    pub fn load(path: &Path, overrides: &[String]) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, overrides)
    }

    pub fn from_toml(text: &str, overrides: &[String]) -> Result<Self, ConfigError> {
        let mut table: toml::Table =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        for raw in overrides {
            apply_override(&mut table, raw)?;
        }

        let mut config: EvalConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        if config.eval_cfgs.uuid.is_none() {
            config.eval_cfgs.uuid = Some(uuid::Uuid::new_v4().to_string());
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.infer_cfgs.sampling.stream {
            return Err(ConfigError::Invalid {
                field: "infer_cfgs.stream".to_string(),
                reason: "streaming responses are not supported".to_string(),
            });
        }
        if self.infer_cfgs.num_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "infer_cfgs.num_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.data_cfgs.task_names().is_empty() {
            return Err(ConfigError::Invalid {
                field: "data_cfgs.task".to_string(),
                reason: "no task given".to_string(),
            });
        }
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        self.eval_cfgs.uuid.as_deref().unwrap_or("default")
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            model: self.model_cfgs.model_name_or_path.clone(),
            sampling: self.infer_cfgs.sampling.clone(),
            extra: self.infer_cfgs.extra.clone(),
        }
    }
}

// set a nested value from "section.key=value"; empty values are skipped
pub fn apply_override(table: &mut toml::Table, raw: &str) -> Result<(), ConfigError> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(raw.to_string()))?;
    let path = path.trim().trim_start_matches("--");
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }

    let keys: Vec<&str> = path.split('.').collect();
    if keys.iter().any(|k| k.is_empty()) {
        return Err(ConfigError::InvalidOverride(raw.to_string()));
    }
    let Some((last, parents)) = keys.split_last() else {
        return Err(ConfigError::InvalidOverride(raw.to_string()));
    };

    let mut current = table;
    for key in parents {
        let entry = current
            .entry(key.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(t) => t,
            _ => return Err(ConfigError::InvalidOverride(raw.to_string())),
        };
    }
    current.insert(last.to_string(), parse_value(value));
    Ok(())
}

fn parse_value(raw: &str) -> toml::Value {
    match raw {
        "true" | "True" => return toml::Value::Boolean(true),
        "false" | "False" => return toml::Value::Boolean(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}
