use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, register_counter, register_gauge, register_histogram};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("align_eval_requests_total", "Total number of batched inputs").unwrap();
    pub static ref CACHE_HITS: Counter =
        register_counter!("align_eval_cache_hits_total", "Inputs served from memo or disk cache").unwrap();
    pub static ref CACHE_MISSES: Counter =
        register_counter!("align_eval_cache_misses_total", "Distinct keys sent to the endpoint").unwrap();
    pub static ref CALL_ATTEMPTS: Counter =
        register_counter!("align_eval_call_attempts_total", "Completion calls issued, retries included").unwrap();
    pub static ref RETRIES: Counter =
        register_counter!("align_eval_retries_total", "Completion calls that were retries").unwrap();
    pub static ref FAILURES: Counter =
        register_counter!("align_eval_failures_total", "Keys resolved to a terminal error").unwrap();
    pub static ref CALL_LATENCY: Histogram = register_histogram!(
        "align_eval_call_latency_seconds",
        "Latency of a single completion call in seconds"
    )
    .unwrap();
    pub static ref MEMO_SIZE: Gauge =
        register_gauge!("align_eval_memo_size", "Resolved keys held in memory").unwrap();
}
