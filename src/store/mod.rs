use async_trait::async_trait;
use log::warn;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::Error;

pub mod memory;

pub use memory::MemoryStore;

/// External associative store holding the camera debounce state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), Error>;

    /// Value stored under `key`, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Write `value` only if the current value equals `expected`.
    ///
    /// `expected = None` means the key must be absent. Returns whether the write happened.
    /// Not idempotent: repeating a call whose write committed reports `false`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, Error>;

    /// All keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, Error>;

    /// Delete `key` only if it still holds `expected`
    async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, Error>;

    /// Remove every key
    async fn flush_all(&self) -> Result<(), Error>;
}

/// Store handle that bounds every call with a timeout and retries transient failures.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<dyn StateStore>,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl StoreClient {
    pub fn new(inner: Arc<dyn StateStore>, config: &StoreConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_millis(config.timeout_ms),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    async fn call<T, F, Fut>(&self, op: &str, f: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.call_with(op, self.retry_attempts, f).await
    }

    async fn call_with<T, F, Fut>(&self, op: &str, max_attempts: u32, f: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} exceeded {} ms",
                    op,
                    self.timeout.as_millis()
                ))),
            };

            match result {
                Err(err) if err.is_transient() && attempts < max_attempts => {
                    warn!(
                        "Store {} failed (attempt {}/{}): {}",
                        op, attempts, max_attempts, err
                    );
                    tokio::time::sleep(self.backoff(attempts)).await;
                }
                other => return other,
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_delay.as_millis() as u64 * attempt as u64;
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.call("ping", move || self.inner.ping()).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.call("get", move || self.inner.get(key)).await
    }

    /// Single attempt with timeout. A failure may still have committed the write,
    /// so the caller decides by reading the key back.
    pub async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, Error> {
        self.call_with("compare_and_swap", 1, move || {
            self.inner.compare_and_swap(key, expected, value)
        })
        .await
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.call("scan", move || self.inner.scan_prefix(prefix)).await
    }

    pub async fn delete_if(&self, key: &str, expected: &str) -> Result<bool, Error> {
        self.call("delete", move || self.inner.delete_if(key, expected))
            .await
    }

    pub async fn flush_all(&self) -> Result<(), Error> {
        self.call("flush_all", move || self.inner.flush_all()).await
    }
}
