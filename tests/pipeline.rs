use align_eval::benchmarks::bbh::Bbh;
use align_eval::benchmarks::drawbench::{ImageGenerator, ImageScorer};
use align_eval::benchmarks::mmmu::Mmmu;
use align_eval::client::{BackendIdentity, CompletionBackend};
use align_eval::config::EvalConfig;
use align_eval::error::CompletionError;
use align_eval::models::{ChatCompletion, ChatMessage, ChatRequest, ModelParams, Outcome};
use align_eval::outputs::{ArenaInput, Verdict};
use align_eval::pipeline::{
    batch_file, evaluate_drawbench, evaluate_text_benchmark, judge_pairs, make_batcher,
};
use align_eval::report::DetailRow;
use align_eval::retry::RetryPolicy;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Canned replies chosen by the shape of the prompt
#[derive(Default)]
struct AlwaysTrue {
    calls: AtomicU32,
}

#[async_trait]
impl CompletionBackend for AlwaysTrue {
    fn identity(&self) -> BackendIdentity {
        BackendIdentity::new("http://fake/v1", "sk-test")
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.messages.last().map(ChatMessage::text).unwrap_or_default();
        let text = if prompt.contains("Assistant 2") {
            "The second one is better. [[B]]".to_string()
        } else if prompt.contains("Question_type") {
            "The shape is a square.".to_string()
        } else {
            "So the answer is True.".to_string()
        };
        Ok(serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": text}}]
        }))
        .unwrap())
    }
}

fn write(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn config(root: &Path, task: &str, extra: &str) -> EvalConfig {
    let text = format!(
        r#"
[model_cfgs]
model_id = "fake-7b"
model_name_or_path = "fake/model"

[data_cfgs]
task_dir = '{data}'
task = "{task}"

[eval_cfgs]
output_dir = '{out}'
image_dir = '{images}'
uuid = "run-1"
{extra}

[infer_cfgs]
num_workers = 2
max_retries = 1
retry_delay_ms = 0
"#,
        data = root.join("data").display(),
        out = root.join("results").display(),
        images = root.join("images").display(),
    );
    EvalConfig::from_toml(&text, &[]).unwrap()
}

#[tokio::test]
async fn bbh_run_writes_details_and_summary() {
    let root = tempfile::tempdir().unwrap();
    write(
        &root.path().join("data/boolean_expressions.jsonl"),
        "{\"input\": \"True and True is\", \"target\": \"True\"}\n\
         {\"input\": \"True and False is\", \"target\": \"False\"}\n",
    );
    write(
        &root.path().join("data/fewshot/boolean_expressions.json"),
        r#"[{"input": "not False is", "target": "True"}]"#,
    );
    let cfg = config(root.path(), "boolean_expressions", "n_shot = 1");

    let cache_dir = root.path().join("cache");
    let backend = Arc::new(AlwaysTrue::default());
    let batcher = make_batcher(
        Arc::clone(&backend),
        Some(cache_dir.as_path()),
        2,
        RetryPolicy::new(1, Duration::ZERO),
    )
    .await
    .unwrap();

    let report = evaluate_text_benchmark(&Bbh, &cfg, &batcher).await.unwrap();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.tasks.len(), 1);
    assert_eq!(report.tasks[0].num_match, Some(1));
    assert_eq!(report.tasks[0].accuracy, Some(0.5));

    let run_dir = root.path().join("results/run-1");
    let rows: Vec<DetailRow> = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join("boolean_expressions.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].prompt.contains("not False is\nAnswer: True\n\nTrue and True is"));
    assert_eq!(rows[0].correct, Some(true));
    assert!(run_dir.join("bbh_summary.json").exists());
    assert!(run_dir.join("bbh_summary.md").exists());

    // second run is served from the cache
    evaluate_text_benchmark(&Bbh, &cfg, &batcher).await.unwrap();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn mmmu_rejects_few_shot_before_any_call() {
    let root = tempfile::tempdir().unwrap();
    let cfg = config(root.path(), "Art", "n_shot = 2");
    let backend = Arc::new(AlwaysTrue::default());
    let batcher = make_batcher(Arc::clone(&backend), None, 1, RetryPolicy::default())
        .await
        .unwrap();

    assert!(evaluate_text_benchmark(&Mmmu, &cfg, &batcher).await.is_err());
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mmmu_run_scores_by_option_text() {
    let root = tempfile::tempdir().unwrap();
    write(
        &root.path().join("data/Art/test.jsonl"),
        "{\"id\": \"validation_Art_1\", \"question\": \"Which shape?\", \"question_type\": \"multiple-choice\", \"options\": \"['circle', 'square']\", \"answer\": \"B\"}\n",
    );
    let cfg = config(root.path(), "Art", "");
    let batcher = make_batcher(Arc::new(AlwaysTrue::default()), None, 1, RetryPolicy::default())
        .await
        .unwrap();

    let report = evaluate_text_benchmark(&Mmmu, &cfg, &batcher).await.unwrap();
    assert_eq!(report.benchmark, "MMMU");
    assert_eq!(report.tasks[0].accuracy, Some(1.0));
}

struct EchoGenerator;

#[async_trait]
impl ImageGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, CompletionError> {
        Ok(prompt.as_bytes().to_vec())
    }
}

struct HalfScorer;

#[async_trait]
impl ImageScorer for HalfScorer {
    async fn score(&self, _image_path: &Path, _prompt: &str) -> Result<f64, CompletionError> {
        Ok(0.5)
    }
}

#[tokio::test]
async fn drawbench_saves_images_per_run_and_task() {
    let root = tempfile::tempdir().unwrap();
    write(
        &root.path().join("data/Colors.jsonl"),
        "{\"prompts\": \"A red cube.\"}\n{\"prompts\": \"A blue ball.\"}\n",
    );
    let cfg = config(root.path(), "Colors", "");

    let report = evaluate_drawbench(&EchoGenerator, &HalfScorer, &cfg)
        .await
        .unwrap();
    assert_eq!(report.tasks[0].score, Some(0.5));
    assert_eq!(report.tasks[0].num_sum, 2);

    let image = root.path().join("images/run-1/Colors/image_2.png");
    assert_eq!(std::fs::read(image).unwrap(), b"A blue ball.");
    assert!(root.path().join("results/run-1/drawbench_summary.json").exists());
}

#[tokio::test]
async fn batch_file_keeps_line_order() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in.jsonl");
    write(
        &input,
        "[{\"role\": \"user\", \"content\": \"one\"}]\n\
         \n\
         {\"messages\": [{\"role\": \"system\", \"content\": \"be brief\"}, {\"role\": \"user\", \"content\": \"two\"}]}\n",
    );
    let output = root.path().join("out/outcomes.jsonl");
    let batcher = make_batcher(Arc::new(AlwaysTrue::default()), None, 2, RetryPolicy::default())
        .await
        .unwrap();

    let outcomes = batch_file(&batcher, "batch", &ModelParams::new("m"), &input, &output)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);

    let written: Vec<Outcome> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(written, outcomes);
}

#[tokio::test]
async fn arena_verdicts_are_parsed() {
    let batcher = make_batcher(Arc::new(AlwaysTrue::default()), None, 1, RetryPolicy::default())
        .await
        .unwrap();
    let pairs = vec![ArenaInput {
        prompt: "Say hi".into(),
        response1: "hi".into(),
        response2: "Hello there!".into(),
    }];

    let results = judge_pairs(&batcher, &ModelParams::new("judge"), "judge fairly", pairs)
        .await
        .unwrap();
    assert_eq!(results[0].verdict, Verdict::B);
}
