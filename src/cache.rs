use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::client::BackendIdentity;
use crate::error::CacheError;
use crate::models::{ChatRequest, Outcome};

// bump when the record layout changes, old files then read as corrupt
pub const CACHE_FORMAT_VERSION: u32 = 1;

const CACHE_EXTENSION: &str = "json";

// everything that makes two requests different
#[derive(Serialize)]
struct KeyMaterial<'a> {
    request_type: &'a str,
    request: &'a ChatRequest,
    base_url: &'a str,
    credential: &'a str,
}

// Create a cache key (hash of type + request + endpoint identity)
pub fn make_cache_key(
    request_type: &str,
    request: &ChatRequest,
    identity: &BackendIdentity,
) -> Result<String, CacheError> {
    let material = KeyMaterial {
        request_type,
        request,
        base_url: &identity.base_url,
        credential: &identity.credential_fingerprint,
    };
    let bytes = serde_json::to_vec(&material).map_err(|e| CacheError::Encode(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

// Persisted cache entry
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CacheRecord {
    pub version: u32,
    pub key: String,
    pub outcome: Outcome,
}

impl CacheRecord {
    pub fn new(key: &str, outcome: Outcome) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            key: key.to_string(),
            outcome,
        }
    }
}

// Handle to a cache directory, one file per key
#[derive(Clone, Debug)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{CACHE_EXTENSION}"))
    }

    // read a cached outcome, None when the key was never stored
    pub async fn load(&self, key: &str) -> Result<Option<Outcome>, CacheError> {
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        let record: CacheRecord =
            serde_json::from_str(&text).map_err(|e| CacheError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if record.version != CACHE_FORMAT_VERSION {
            return Err(CacheError::Corrupt {
                path,
                reason: format!(
                    "unsupported version {} (expected {})",
                    record.version, CACHE_FORMAT_VERSION
                ),
            });
        }
        if record.key != key {
            return Err(CacheError::Corrupt {
                path,
                reason: format!("entry belongs to key {}", record.key),
            });
        }

        Ok(Some(record.outcome))
    }

    // write a new entry; an existing file for the key is left untouched.
    // returns false when the entry was already present
    pub async fn store(&self, key: &str, outcome: &Outcome) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(key, "cache entry already present, not overwriting");
            return Ok(false);
        }

        let record = CacheRecord::new(key, outcome.clone());
        let json =
            serde_json::to_string_pretty(&record).map_err(|e| CacheError::Encode(e.to_string()))?;

        // write beside the target and link it in; the link fails when the
        // entry already exists
        let tmp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, json).await.map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        let linked = fs::hard_link(&tmp, &path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(key, "cache entry written concurrently, keeping the first");
                Ok(false)
            }
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    // remove every file present in the directory, returns how many went
    pub async fn clear(&self) -> Result<usize, CacheError> {
        clear_cache(&self.dir).await
    }
}

pub async fn clear_cache(dir: &Path) -> Result<usize, CacheError> {
    let io_err = |source: std::io::Error| CacheError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_err(e)),
    };

    // snapshot first so files created during removal are not touched
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let file_type = entry.file_type().await.map_err(io_err)?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }

    for path in &files {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.clone(),
                    source,
                });
            }
        }
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatCompletion, ChatMessage, SamplingParams};
    use std::collections::BTreeMap;

    fn identity() -> BackendIdentity {
        BackendIdentity::new("http://localhost:8000/v1", "sk-test")
    }

    fn request(prompt: &str) -> ChatRequest {
        ChatRequest {
            model: "qwen".to_string(),
            messages: vec![ChatMessage::user(prompt)],
            sampling: SamplingParams::default(),
            extra: BTreeMap::new(),
        }
    }

    fn completed(text: &str) -> Outcome {
        let response: ChatCompletion = serde_json::from_value(serde_json::json!({
            "id": "cmpl-1",
            "model": "qwen",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
        }))
        .unwrap();
        Outcome::Completed { response }
    }

    #[test]
    fn key_is_deterministic() {
        let a = make_cache_key("BBH", &request("q"), &identity()).unwrap();
        let b = make_cache_key("BBH", &request("q"), &identity()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_covers_every_input() {
        let base = make_cache_key("BBH", &request("q"), &identity()).unwrap();

        assert_ne!(base, make_cache_key("MMMU", &request("q"), &identity()).unwrap());
        assert_ne!(base, make_cache_key("BBH", &request("q2"), &identity()).unwrap());

        let mut other_model = request("q");
        other_model.model = "llama".to_string();
        assert_ne!(base, make_cache_key("BBH", &other_model, &identity()).unwrap());

        let mut other_params = request("q");
        other_params.sampling.temperature = 0.0;
        assert_ne!(base, make_cache_key("BBH", &other_params, &identity()).unwrap());

        let mut extra = request("q");
        extra.extra.insert("seed".to_string(), serde_json::Value::from(1));
        assert_ne!(base, make_cache_key("BBH", &extra, &identity()).unwrap());

        let other_key = BackendIdentity::new("http://localhost:8000/v1", "sk-other");
        assert_ne!(base, make_cache_key("BBH", &request("q"), &other_key).unwrap());

        let other_url = BackendIdentity::new("http://remote/v1", "sk-test");
        assert_ne!(base, make_cache_key("BBH", &request("q"), &other_url).unwrap());
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let a = make_cache_key("ab", &request("c"), &identity()).unwrap();
        let b = make_cache_key("a", &request("bc"), &identity()).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();

        assert_eq!(cache.load("abc").await.unwrap(), None);
        assert!(cache.store("abc", &completed("hello")).await.unwrap());
        assert_eq!(cache.load("abc").await.unwrap(), Some(completed("hello")));
    }

    #[tokio::test]
    async fn store_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();

        assert!(cache.store("abc", &completed("first")).await.unwrap());
        assert!(!cache.store("abc", &completed("second")).await.unwrap());
        assert_eq!(cache.load("abc").await.unwrap(), Some(completed("first")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_keep_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let outcome = completed(&format!("writer {i}"));
                    let stored = cache.store("race", &outcome).await.unwrap();
                    (stored, outcome)
                })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            let (stored, outcome) = handle.await.unwrap();
            if stored {
                winners.push(outcome);
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(cache.load("race").await.unwrap(), Some(winners.remove(0)));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["race.json".to_string()]);
    }

    #[tokio::test]
    async fn failed_outcome_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        let failed = Outcome::Failed {
            message: "HTTP 503: overloaded".to_string(),
            attempts: 3,
        };
        cache.store("k", &failed).await.unwrap();
        assert_eq!(cache.load("k").await.unwrap(), Some(failed));
    }

    #[tokio::test]
    async fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        std::fs::write(cache.path_for("bad"), "{'error': Exception()}").unwrap();

        let err = cache.load("bad").await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn wrong_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        let mut record = CacheRecord::new("k", completed("x"));
        record.version = 99;
        std::fs::write(cache.path_for("k"), serde_json::to_string(&record).unwrap()).unwrap();

        let err = cache.load("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn mismatched_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        let record = CacheRecord::new("other", completed("x"));
        std::fs::write(cache.path_for("k"), serde_json::to_string(&record).unwrap()).unwrap();

        assert!(matches!(
            cache.load("k").await.unwrap_err(),
            CacheError::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn clear_removes_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).await.unwrap();
        cache.store("a", &completed("1")).await.unwrap();
        cache.store("b", &completed("2")).await.unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.load("a").await.unwrap(), None);
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn clear_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(clear_cache(&missing).await.unwrap(), 0);
    }
}
