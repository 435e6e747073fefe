use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{DiskCache, make_cache_key};
use crate::client::CompletionBackend;
use crate::error::{BatchError, CacheError};
use crate::metrics::{
    CACHE_HITS, CACHE_MISSES, CALL_ATTEMPTS, CALL_LATENCY, FAILURES, MEMO_SIZE, REQUEST_TOTAL,
    RETRIES,
};
use crate::models::{BatchedRequest, ChatMessage, ChatRequest, ModelParams, Outcome};
use crate::retry::RetryPolicy;

type JobQueue = Arc<Mutex<mpsc::Receiver<BatchedRequest>>>;
// keys queued to a worker, with the callers waiting on them
type InFlight = Arc<DashMap<String, Vec<oneshot::Sender<Outcome>>>>;

// Concurrent cache-backed request batcher.
//
// Every distinct key is resolved at most once per batcher (memo plus the
// in-flight map shared by concurrent runs) and at most once per cache
// directory. Results come back in input order.
pub struct Batcher<B: CompletionBackend + ?Sized + 'static> {
    backend: Arc<B>,
    cache: Option<DiskCache>,
    memo: Arc<DashMap<String, Outcome>>,
    inflight: InFlight,
    num_workers: usize,
    retry: RetryPolicy,
}

impl<B: CompletionBackend + ?Sized + 'static> Batcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            cache: None,
            memo: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            num_workers: 1,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // build one request per message list and run them
    pub async fn run_messages(
        &self,
        request_type: &str,
        params: &ModelParams,
        inputs: Vec<Vec<ChatMessage>>,
    ) -> Result<Vec<Outcome>, BatchError> {
        let requests = inputs
            .into_iter()
            .map(|messages| params.request(messages))
            .collect();
        self.run(request_type, requests).await
    }

    pub async fn run(
        &self,
        request_type: &str,
        requests: Vec<ChatRequest>,
    ) -> Result<Vec<Outcome>, BatchError> {
        REQUEST_TOTAL.inc_by(requests.len() as f64);
        info!(
            request_type,
            inputs = requests.len(),
            workers = self.num_workers,
            "start batch request"
        );

        let identity = self.backend.identity();
        let keys = requests
            .iter()
            .map(|req| make_cache_key(request_type, req, &identity))
            .collect::<Result<Vec<_>, CacheError>>()?;

        // group duplicate inputs so each key is resolved once
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for (idx, key) in keys.iter().enumerate() {
            match group_of.get(key.as_str()) {
                Some(&g) => groups[g].1.push(idx),
                None => {
                    group_of.insert(key, groups.len());
                    groups.push((key.clone(), vec![idx]));
                }
            }
        }

        let mut results: Vec<Option<Outcome>> = vec![None; requests.len()];
        let mut misses = Vec::new();
        for (key, indices) in groups {
            match self.lookup(&key).await? {
                Some(outcome) => {
                    CACHE_HITS.inc_by(indices.len() as f64);
                    fill(&mut results, &indices, &outcome);
                }
                None => misses.push((key, indices)),
            }
        }

        // claims happen only after every lookup succeeded, so no early return
        // can leave a claimed key without an owner
        let mut pending = Vec::new();
        let mut joined = Vec::new();
        for (key, indices) in misses {
            match self.claim(&key) {
                Claim::Resolved(outcome) => {
                    CACHE_HITS.inc_by(indices.len() as f64);
                    fill(&mut results, &indices, &outcome);
                }
                Claim::Waiting(rx) => {
                    debug!(key = %short(&key), "joined in-flight request");
                    joined.push((key, indices, rx));
                }
                Claim::Owned => {
                    CACHE_MISSES.inc();
                    let request = requests[indices[0]].clone();
                    pending.push((key, indices, request));
                }
            }
        }

        info!(
            pending = pending.len(),
            in_flight = joined.len(),
            "cache lookup done"
        );

        if !pending.is_empty() {
            let owned: Vec<String> = pending.iter().map(|(key, _, _)| key.clone()).collect();
            if let Err(e) = self.dispatch(pending, &mut results).await {
                // drop waiters of keys that will never resolve
                for key in owned {
                    self.inflight.remove(&key);
                }
                return Err(e);
            }
        }

        for (key, indices, rx) in joined {
            let outcome = rx.await.map_err(|_| BatchError::WorkerLost(key))?;
            fill(&mut results, &indices, &outcome);
        }

        info!(request_type, "finished all requests");
        results
            .into_iter()
            .zip(keys)
            .map(|(outcome, key)| outcome.ok_or(BatchError::WorkerLost(key)))
            .collect()
    }

    async fn lookup(&self, key: &str) -> Result<Option<Outcome>, CacheError> {
        if let Some(entry) = self.memo.get(key) {
            debug!(key, "memo hit");
            return Ok(Some(entry.value().clone()));
        }
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let loaded = cache.load(key).await?;
        if let Some(outcome) = &loaded {
            debug!(key, "disk cache hit");
            self.memo.insert(key.to_string(), outcome.clone());
            MEMO_SIZE.set(self.memo.len() as f64);
        }
        Ok(loaded)
    }

    // take ownership of a missed key, or wait on the run that already owns it.
    // The memo is re-read under the entry lock: workers publish to the memo
    // before they remove their in-flight entry.
    fn claim(&self, key: &str) -> Claim {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(mut waiting) => {
                let (tx, rx) = oneshot::channel();
                waiting.get_mut().push(tx);
                Claim::Waiting(rx)
            }
            Entry::Vacant(slot) => {
                if let Some(outcome) = self.memo.get(key) {
                    return Claim::Resolved(outcome.value().clone());
                }
                slot.insert(Vec::new());
                Claim::Owned
            }
        }
    }

    // queue uncached keys to the worker pool and collect replies by index
    async fn dispatch(
        &self,
        pending: Vec<(String, Vec<usize>, ChatRequest)>,
        results: &mut [Option<Outcome>],
    ) -> Result<(), BatchError> {
        let (job_tx, job_rx) = mpsc::channel::<BatchedRequest>(pending.len());
        let queue: JobQueue = Arc::new(Mutex::new(job_rx));

        let workers = self.num_workers.min(pending.len());
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker_id| {
                tokio::spawn(batch_worker(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&self.backend),
                    self.cache.clone(),
                    Arc::clone(&self.memo),
                    Arc::clone(&self.inflight),
                    self.retry,
                ))
            })
            .collect();

        let mut waiting = Vec::with_capacity(pending.len());
        for (key, indices, request) in pending {
            let (response_tx, response_rx) = oneshot::channel();
            let job = BatchedRequest {
                key: key.clone(),
                request,
                response_tx,
            };
            job_tx
                .send(job)
                .await
                .map_err(|_| BatchError::WorkerLost(key.clone()))?;
            waiting.push((key, indices, response_rx));
        }
        // workers exit once the queue drains
        drop(job_tx);

        for (key, indices, response_rx) in waiting {
            let outcome = response_rx
                .await
                .map_err(|_| BatchError::WorkerLost(key))?;
            fill(results, &indices, &outcome);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        Ok(())
    }
}

enum Claim {
    Owned,
    Waiting(oneshot::Receiver<Outcome>),
    Resolved(Outcome),
}

fn fill(results: &mut [Option<Outcome>], indices: &[usize], outcome: &Outcome) {
    for &idx in indices {
        results[idx] = Some(outcome.clone());
    }
}

// Background worker -> pulls jobs until the queue is closed
async fn batch_worker<B: CompletionBackend + ?Sized + 'static>(
    worker_id: usize,
    queue: JobQueue,
    backend: Arc<B>,
    cache: Option<DiskCache>,
    memo: Arc<DashMap<String, Outcome>>,
    inflight: InFlight,
    retry: RetryPolicy,
) {
    debug!(worker_id, "worker started");

    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let outcome = resolve(Arc::clone(&backend), &job.request, retry).await;
        match &outcome {
            Outcome::Completed { .. } => info!(worker_id, key = %short(&job.key), "request succeeded"),
            Outcome::Failed { message, attempts } => {
                FAILURES.inc();
                warn!(
                    worker_id,
                    key = %short(&job.key),
                    attempts,
                    error = %message,
                    "request failed, recording error"
                );
            }
        }

        memo.insert(job.key.clone(), outcome.clone());
        MEMO_SIZE.set(memo.len() as f64);

        // a failed write only costs a recomputation on the next run
        if let Some(cache) = &cache {
            if let Err(e) = cache.store(&job.key, &outcome).await {
                warn!(key = %short(&job.key), error = %e, "failed to persist cache entry");
            }
        }

        if let Some((_, waiters)) = inflight.remove(&job.key) {
            for tx in waiters {
                let _ = tx.send(outcome.clone());
            }
        }
        let _ = job.response_tx.send(outcome);
    }

    debug!(worker_id, "worker stopped");
}

// run one logical request under the retry policy
async fn resolve<B: CompletionBackend + ?Sized + 'static>(
    backend: Arc<B>,
    request: &ChatRequest,
    retry: RetryPolicy,
) -> Outcome {
    let attempted = retry
        .run(|attempt| {
            let backend = Arc::clone(&backend);
            let request = request.clone();
            async move {
                CALL_ATTEMPTS.inc();
                if attempt > 1 {
                    RETRIES.inc();
                }
                let _timer = CALL_LATENCY.start_timer();
                backend.complete(&request).await
            }
        })
        .await;

    match attempted.result {
        Ok(response) => Outcome::Completed { response },
        Err(err) => Outcome::Failed {
            message: err.to_string(),
            attempts: attempted.attempts,
        },
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
