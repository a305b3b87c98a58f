//! Chain reader: chunked, retried `eth_getLogs`.

use std::future::Future;

use tracing::{debug, warn};

use verifield_core::config::MAX_BLOCK_SPAN;
use verifield_core::error::IndexerError;
use verifield_core::retry::RetryPolicy;

use crate::rpc::{EvmRpcClient, LogFilter, RawLog};

/// Wraps an [`EvmRpcClient`] with range chunking and bounded retry.
pub struct ChainReader<C> {
    client: C,
    max_span: u64,
    retry: RetryPolicy,
}

impl<C: EvmRpcClient> ChainReader<C> {
    pub fn new(client: C, max_span: u64, retry: RetryPolicy) -> Self {
        Self {
            client,
            max_span: max_span.clamp(1, MAX_BLOCK_SPAN),
            retry,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn max_span(&self) -> u64 {
        self.max_span
    }

    /// Current chain head.
    pub async fn head(&self) -> Result<u64, IndexerError> {
        self.with_retry("eth_blockNumber", || self.client.block_number())
            .await
    }

    /// All logs of `topic0` emitted by `address` in `[from, to]`, in
    /// ascending `(block, logIndex)` order.
    ///
    /// The range is split into chunks of at most `max_span` blocks. Each
    /// chunk is retried on its own; a chunk that exhausts its attempts
    /// fails the whole fetch.
    pub async fn fetch_logs(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let mut logs = Vec::new();
        for (start, end) in chunks(from, to, self.max_span) {
            let filter = LogFilter {
                address: address.to_string(),
                topic0: topic0.to_string(),
                from_block: start,
                to_block: end,
            };
            let chunk = self
                .with_retry("eth_getLogs", || self.client.get_logs(&filter))
                .await?;
            debug!(address, from = start, to = end, logs = chunk.len(), "chunk fetched");
            logs.extend(chunk);
        }

        let mut keyed = Vec::with_capacity(logs.len());
        for log in logs {
            let key = (log.block_number_u64()?, log.log_index_u32()?);
            keyed.push((key, log));
        }
        keyed.sort_by_key(|(key, _)| *key);
        Ok(keyed.into_iter().map(|(_, log)| log).collect())
    }

    async fn with_retry<T, F, Fut>(&self, method: &str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    match self.retry.next_delay(failures) {
                        Some(delay) => {
                            warn!(
                                method,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "chain unavailable, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            warn!(method, attempts = failures, error = %e, "retries exhausted");
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Split `[from, to]` into inclusive chunks of at most `span` blocks.
pub fn chunks(from: u64, to: u64, span: u64) -> Vec<(u64, u64)> {
    let span = span.max(1);
    let mut out = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(span - 1).min(to);
        out.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use verifield_core::retry::RetryConfig;

    #[test]
    fn chunks_are_inclusive_and_bounded() {
        assert_eq!(chunks(1, 100, 2000), vec![(1, 100)]);
        assert_eq!(chunks(1, 4500, 2000), vec![(1, 2000), (2001, 4000), (4001, 4500)]);
        assert_eq!(chunks(5, 5, 2000), vec![(5, 5)]);
        assert!(chunks(6, 5, 2000).is_empty());
    }

    fn log(block: u64, index: u32) -> RawLog {
        RawLog {
            address: "0xc".into(),
            topics: vec!["0xt".into()],
            data: "0x".into(),
            block_number: format!("0x{block:x}"),
            tx_hash: format!("0x{block:x}{index:x}"),
            log_index: format!("0x{index:x}"),
            removed: None,
        }
    }

    /// Replies to `get_logs` from a script of results, recording each range.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<Result<Vec<RawLog>, IndexerError>>>,
        ranges: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl EvmRpcClient for Scripted {
        async fn block_number(&self) -> Result<u64, IndexerError> {
            Ok(0)
        }

        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
            self.ranges.lock().unwrap().push((filter.from_block, filter.to_block));
            self.replies.lock().unwrap().pop_front().unwrap_or(Ok(vec![]))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        })
    }

    #[tokio::test]
    async fn concatenates_chunks_in_block_order() {
        let client = Scripted::default();
        client.replies.lock().unwrap().extend([
            Ok(vec![log(3, 1), log(2, 0)]),
            Ok(vec![log(12, 0)]),
        ]);
        let reader = ChainReader::new(client, 10, fast_retry(1));

        let logs = reader.fetch_logs("0xc", "0xt", 1, 15).await.unwrap();
        let blocks: Vec<u64> = logs.iter().map(|l| l.block_number_u64().unwrap()).collect();
        assert_eq!(blocks, vec![2, 3, 12]);
        assert_eq!(*reader.client().ranges.lock().unwrap(), vec![(1, 10), (11, 15)]);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let client = Scripted::default();
        client.replies.lock().unwrap().extend([
            Err(IndexerError::ChainUnavailable("connection refused".into())),
            Err(IndexerError::ChainUnavailable("HTTP 503".into())),
            Ok(vec![log(7, 0)]),
        ]);
        let reader = ChainReader::new(client, 2000, fast_retry(5));

        let logs = reader.fetch_logs("0xc", "0xt", 1, 100).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(reader.client().ranges.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = Scripted::default();
        for _ in 0..5 {
            client
                .replies
                .lock()
                .unwrap()
                .push_back(Err(IndexerError::ChainUnavailable("down".into())));
        }
        let reader = ChainReader::new(client, 2000, fast_retry(3));

        let err = reader.fetch_logs("0xc", "0xt", 1, 100).await.unwrap_err();
        assert!(matches!(err, IndexerError::ChainUnavailable(_)));
        assert_eq!(reader.client().ranges.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn query_errors_are_not_retried() {
        let client = Scripted::default();
        client
            .replies
            .lock()
            .unwrap()
            .push_back(Err(IndexerError::ChainQuery("bad response".into())));
        let reader = ChainReader::new(client, 2000, fast_retry(5));

        let err = reader.fetch_logs("0xc", "0xt", 1, 100).await.unwrap_err();
        assert!(matches!(err, IndexerError::ChainQuery(_)));
        assert_eq!(reader.client().ranges.lock().unwrap().len(), 1);
    }
}
