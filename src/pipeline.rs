use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::benchmarks::bbh::Bbh;
use crate::benchmarks::drawbench::{
    self, HttpImageScorer, ImageGenerator, ImageScorer, OpenAiImageGenerator,
};
use crate::benchmarks::mmmu::Mmmu;
use crate::benchmarks::{PromptSettings, TaskInput, TextBenchmark};
use crate::cache::{DiskCache, clear_cache};
use crate::client::{CompletionBackend, Credentials, OpenAiClient};
use crate::config::{ArenaArgs, BatchArgs, EndpointArgs, EvalConfig};
use crate::dataset;
use crate::error::ConfigError;
use crate::models::{ChatMessage, ModelParams, Outcome};
use crate::outputs::{ArenaInput, EvalOutput, Verdict};
use crate::report::{self, RunReport, TaskSummary};
use crate::retry::RetryPolicy;
use crate::template::get_template;
use crate::worker::Batcher;

// wire a backend, an optional cache dir and the pool settings into a batcher
pub async fn make_batcher<B: CompletionBackend + ?Sized + 'static>(
    backend: Arc<B>,
    cache_dir: Option<&Path>,
    num_workers: usize,
    retry: RetryPolicy,
) -> Result<Batcher<B>> {
    let mut batcher = Batcher::new(backend)
        .with_workers(num_workers)
        .with_retry(retry);
    if let Some(dir) = cache_dir {
        let cache = DiskCache::open(dir)
            .await
            .with_context(|| format!("failed to open cache dir {}", dir.display()))?;
        info!(cache_dir = %dir.display(), "using disk cache");
        batcher = batcher.with_cache(cache);
    }
    Ok(batcher)
}

fn openai_client(
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: std::time::Duration,
) -> Result<OpenAiClient, ConfigError> {
    let credentials = Credentials::resolve(api_key, base_url)?;
    info!(base_url = %credentials.base_url, "using completion endpoint");
    OpenAiClient::new(credentials, timeout)
}

async fn eval_batcher(config: &EvalConfig) -> Result<Batcher<OpenAiClient>> {
    let infer = &config.infer_cfgs;
    let client = openai_client(infer.api_key.clone(), infer.base_url.clone(), infer.timeout())?;
    make_batcher(
        Arc::new(client),
        infer.cache_dir.as_deref(),
        infer.num_workers,
        infer.retry_policy(),
    )
    .await
}

async fn endpoint_batcher(endpoint: &EndpointArgs) -> Result<Batcher<OpenAiClient>> {
    let client = openai_client(
        endpoint.api_key.clone(),
        endpoint.base_url.clone(),
        std::time::Duration::from_secs(endpoint.timeout_secs),
    )?;
    make_batcher(
        Arc::new(client),
        endpoint.cache_dir.as_deref(),
        endpoint.num_workers,
        endpoint.retry_policy(),
    )
    .await
}

fn prompt_settings(config: &EvalConfig) -> Result<PromptSettings, ConfigError> {
    Ok(PromptSettings {
        template: get_template(&config.model_cfgs.chat_template)?,
        n_shot: config.eval_cfgs.n_shot,
        cot: config.eval_cfgs.cot,
    })
}

// directory the task's records were read from, used to resolve image paths
fn record_dir(config: &EvalConfig, task: &str) -> PathBuf {
    let file = dataset::task_file(&config.data_cfgs.task_dir, task, &config.data_cfgs.split);
    file.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.data_cfgs.task_dir.clone())
}

// Run every configured task of a chat benchmark and write its result files
pub async fn evaluate_text_benchmark<B: CompletionBackend + ?Sized + 'static>(
    bench: &dyn TextBenchmark,
    config: &EvalConfig,
    batcher: &Batcher<B>,
) -> Result<RunReport> {
    let settings = prompt_settings(config)?;
    bench.validate(&settings)?;

    let params = config.model_params();
    let out_dir = report::run_dir(&config.eval_cfgs.output_dir, config.run_id());
    let mut run = RunReport::new(bench.name(), config.run_id());

    for task in config.data_cfgs.task_names() {
        let records =
            dataset::load_task(&config.data_cfgs.task_dir, &task, &config.data_cfgs.split)
                .with_context(|| format!("failed to load {} task {task}", bench.name()))?;
        let fewshot = bench.load_fewshot(config.data_cfgs.fewshot_root(), &task, &settings)?;
        let inputs = bench.build_inputs(&records, &fewshot, &settings, &record_dir(config, &task))?;
        info!(task, records = records.len(), fewshot = fewshot.len(), "prompts built");

        let messages = inputs.iter().map(TaskInput::messages).collect();
        let request_type = format!("{}/{task}", bench.name());
        let outcomes = batcher.run_messages(&request_type, &params, messages).await?;

        let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
        if failed > 0 {
            warn!(task, failed, "some requests failed and are scored as incorrect");
        }

        let score = bench.score(&records, &inputs, &outcomes)?;
        report::write_details(&out_dir, &task, &score.rows)?;

        let summary = TaskSummary {
            task: task.clone(),
            model_id: config.model_cfgs.model_id.clone(),
            num_fewshot: config.eval_cfgs.n_shot,
            chain_of_thought: config.eval_cfgs.cot,
            num_match: Some(score.num_match),
            num_sum: score.num_sum,
            accuracy: Some(score.accuracy()),
            score: None,
        };
        report::print_table(bench.name(), &summary);
        run.tasks.push(summary);
    }

    let path = report::write_summary(&out_dir, &run)?;
    info!(summary = %path.display(), "results written");
    Ok(run)
}

pub async fn run_bbh(config: EvalConfig) -> Result<RunReport> {
    let batcher = eval_batcher(&config).await?;
    evaluate_text_benchmark(&Bbh, &config, &batcher).await
}

pub async fn run_mmmu(config: EvalConfig) -> Result<RunReport> {
    let batcher = eval_batcher(&config).await?;
    evaluate_text_benchmark(&Mmmu, &config, &batcher).await
}

pub async fn run_drawbench(config: EvalConfig) -> Result<RunReport> {
    drawbench::check_pipeline(&config.model_cfgs.model_name_or_path)?;
    let scorer_url = config
        .eval_cfgs
        .scorer_url
        .clone()
        .ok_or_else(|| ConfigError::Invalid {
            field: "eval_cfgs.scorer_url".to_string(),
            reason: "DrawBench needs an image scoring service".to_string(),
        })?;

    let infer = &config.infer_cfgs;
    let client = openai_client(infer.api_key.clone(), infer.base_url.clone(), infer.timeout())?;
    let scorer = HttpImageScorer::new(client.http().clone(), scorer_url);
    let generator = OpenAiImageGenerator::new(client, config.model_cfgs.model_name_or_path.clone());
    evaluate_drawbench(&generator, &scorer, &config).await
}

// Generate and score images for every configured DrawBench task
pub async fn evaluate_drawbench(
    generator: &dyn ImageGenerator,
    scorer: &dyn ImageScorer,
    config: &EvalConfig,
) -> Result<RunReport> {
    let out_dir = report::run_dir(&config.eval_cfgs.output_dir, config.run_id());
    let image_root = config.eval_cfgs.image_dir.join(config.run_id());
    let mut run = RunReport::new("DrawBench", config.run_id());

    for task in config.data_cfgs.task_names() {
        let records =
            dataset::load_task(&config.data_cfgs.task_dir, &task, &config.data_cfgs.split)
                .with_context(|| format!("failed to load DrawBench task {task}"))?;
        let fewshot = if config.eval_cfgs.n_shot > 0 {
            let mut examples =
                dataset::load_fewshot(config.data_cfgs.fewshot_root(), &task, config.eval_cfgs.cot)?;
            examples.truncate(config.eval_cfgs.n_shot);
            examples
        } else {
            Vec::new()
        };
        let prompts = drawbench::build_prompts(&records, &fewshot, config.eval_cfgs.cot)?;

        let images = drawbench::generate_images(
            generator,
            &prompts,
            &image_root.join(&task),
            config.infer_cfgs.retry_policy(),
        )
        .await?;
        let (mean, rows) = drawbench::evaluate(scorer, &prompts, &images).await?;
        report::write_details(&out_dir, &task, &rows)?;

        let summary = TaskSummary {
            task: task.clone(),
            model_id: config.model_cfgs.model_id.clone(),
            num_fewshot: config.eval_cfgs.n_shot,
            chain_of_thought: config.eval_cfgs.cot,
            num_match: None,
            num_sum: rows.len(),
            accuracy: None,
            score: Some(mean),
        };
        report::print_table("DrawBench", &summary);
        run.tasks.push(summary);
    }

    report::write_summary(&out_dir, &run)?;
    Ok(run)
}

// batch input lines: a bare message list or {"messages": [...]}
#[derive(Deserialize)]
#[serde(untagged)]
enum BatchLine {
    Messages(Vec<ChatMessage>),
    Wrapped { messages: Vec<ChatMessage> },
}

fn read_jsonl<T: for<'de> Deserialize<'de>>(text: &str, path: &Path) -> Result<Vec<T>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed line", path.display(), idx + 1))
        })
        .collect()
}

async fn write_jsonl<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    tokio::fs::write(path, out)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

// Send message lists through the batcher; one outcome line per input line
pub async fn batch_file<B: CompletionBackend + ?Sized + 'static>(
    batcher: &Batcher<B>,
    request_type: &str,
    params: &ModelParams,
    input: &Path,
    output: &Path,
) -> Result<Vec<Outcome>> {
    let text = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let inputs = read_jsonl::<BatchLine>(&text, input)?
        .into_iter()
        .map(|line| match line {
            BatchLine::Messages(messages) | BatchLine::Wrapped { messages } => messages,
        })
        .collect();

    let outcomes = batcher.run_messages(request_type, params, inputs).await?;
    write_jsonl(output, &outcomes).await?;

    let failed = outcomes.iter().filter(|o| !o.is_completed()).count();
    info!(
        total = outcomes.len(),
        failed,
        output = %output.display(),
        "batch written"
    );
    Ok(outcomes)
}

pub async fn run_batch(args: BatchArgs) -> Result<Vec<Outcome>> {
    let batcher = endpoint_batcher(&args.endpoint).await?;
    let mut params = ModelParams::new(&args.model);
    if let Some(max_tokens) = args.max_tokens {
        params.sampling.max_tokens = max_tokens;
    }
    if let Some(temperature) = args.temperature {
        params.sampling.temperature = temperature;
    }
    batch_file(&batcher, &args.request_type, &params, &args.input, &args.output).await
}

// Ask a judge model to pick the better response of each pair
pub async fn judge_pairs<B: CompletionBackend + ?Sized + 'static>(
    batcher: &Batcher<B>,
    params: &ModelParams,
    system_prompt: &str,
    pairs: Vec<ArenaInput>,
) -> Result<Vec<EvalOutput>> {
    let messages = pairs.iter().map(|pair| pair.messages(system_prompt)).collect();
    let outcomes = batcher.run_messages("arena", params, messages).await?;
    let results: Vec<EvalOutput> = pairs
        .into_iter()
        .zip(outcomes)
        .map(|(pair, outcome)| EvalOutput::new(pair, outcome))
        .collect();

    let wins_a = results.iter().filter(|r| r.verdict == Verdict::A).count();
    let wins_b = results.iter().filter(|r| r.verdict == Verdict::B).count();
    info!(
        pairs = results.len(),
        wins_a,
        wins_b,
        unknown = results.len() - wins_a - wins_b,
        "arena judged"
    );
    Ok(results)
}

pub async fn run_arena(args: ArenaArgs) -> Result<Vec<EvalOutput>> {
    let batcher = endpoint_batcher(&args.endpoint).await?;
    let text = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let pairs = read_jsonl::<ArenaInput>(&text, &args.input)?;

    let results = judge_pairs(
        &batcher,
        &ModelParams::new(&args.model),
        &args.system_prompt,
        pairs,
    )
    .await?;
    write_jsonl(&args.output, &results).await?;
    Ok(results)
}

pub async fn clear(cache_dir: &Path) -> Result<usize> {
    let removed = clear_cache(cache_dir)
        .await
        .with_context(|| format!("failed to clear {}", cache_dir.display()))?;
    info!(removed, cache_dir = %cache_dir.display(), "cache cleared");
    Ok(removed)
}
