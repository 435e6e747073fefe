use align_eval::config::{Args, Command, EvalConfig};
use align_eval::{handlers, pipeline};
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    // metrics are optional, a busy port should not stop the evaluation
    let _metrics = match args.metrics_port {
        Some(port) => match handlers::spawn_metrics_server(port).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(port, error = %e, "could not start metrics server");
                None
            }
        },
        None => None,
    };

    match args.command {
        Command::Bbh(eval) => {
            let config = EvalConfig::load(&eval.config, &eval.overrides)
                .with_context(|| format!("invalid config {}", eval.config.display()))?;
            info!(model = %config.model_cfgs.model_id, run = config.run_id(), "starting BBH");
            pipeline::run_bbh(config).await?;
        }
        Command::Mmmu(eval) => {
            let config = EvalConfig::load(&eval.config, &eval.overrides)
                .with_context(|| format!("invalid config {}", eval.config.display()))?;
            info!(model = %config.model_cfgs.model_id, run = config.run_id(), "starting MMMU");
            pipeline::run_mmmu(config).await?;
        }
        Command::Drawbench(eval) => {
            let config = EvalConfig::load(&eval.config, &eval.overrides)
                .with_context(|| format!("invalid config {}", eval.config.display()))?;
            info!(model = %config.model_cfgs.model_id, run = config.run_id(), "starting DrawBench");
            pipeline::run_drawbench(config).await?;
        }
        Command::Batch(batch) => {
            pipeline::run_batch(batch).await?;
        }
        Command::Arena(arena) => {
            pipeline::run_arena(arena).await?;
        }
        Command::ClearCache { cache_dir } => {
            pipeline::clear(&cache_dir).await?;
        }
    }
    Ok(())
}

// -v debug, -vv trace; RUST_LOG takes precedence
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
