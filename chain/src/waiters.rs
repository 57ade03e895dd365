//! Readiness pollers.
//!
//! Two predicate families, both bounded by a deadline: wait until a chain
//! has produced N more blocks, and wait until an RPC endpoint answers a
//! synthetic JSON-RPC probe. Cancellation is by dropping the future (or
//! racing it with `tokio::time::timeout`) and takes effect within one tick.

use log::{debug, warn};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::error::ChainError;
use crate::node::HeightQuery;

/// Default interval between height samples.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between RPC probes. Sub-second so a devnet with short block
/// times is picked up promptly.
pub const RPC_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Default deadline for chain readiness after start.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Wait until `chain` has produced `delta` more blocks, polling at the
/// default interval. Returns the height that satisfied the condition.
pub async fn wait_for_blocks<C>(
    chain: &C,
    delta: u64,
    timeout: Duration,
) -> Result<u64, ChainError>
where
    C: HeightQuery + ?Sized,
{
    wait_for_blocks_with(chain, delta, timeout, DEFAULT_POLL_INTERVAL).await
}

/// [`wait_for_blocks`] with an explicit poll interval.
///
/// The first successful height sample is the baseline. Transient query
/// errors are retried until the deadline; if the deadline elapses while an
/// error is pending, that error is returned instead of a bare timeout so
/// the failure stays diagnosable.
pub async fn wait_for_blocks_with<C>(
    chain: &C,
    delta: u64,
    timeout: Duration,
    poll: Duration,
) -> Result<u64, ChainError>
where
    C: HeightQuery + ?Sized,
{
    let started = Instant::now();
    let mut baseline: Option<u64> = None;
    let mut pending_err: Option<ChainError> = None;
    loop {
        if started.elapsed() >= timeout {
            return Err(match pending_err {
                Some(e) => e,
                None => ChainError::DeadlineExceeded {
                    condition: format!("{delta} more blocks"),
                    timeout,
                },
            });
        }
        match chain.height().await {
            Ok(height) => {
                let base = *baseline.get_or_insert(height);
                if height >= base + delta {
                    return Ok(height);
                }
                debug!("waiting for blocks: at {height}, need {}", base + delta);
                pending_err = None;
            }
            Err(e) => {
                warn!("height query failed while waiting for blocks: {e}");
                pending_err = Some(e);
            }
        }
        sleep(poll).await;
    }
}

/// Probe a JSON-RPC endpoint until it answers a block-number request with a
/// 2xx status, or the deadline elapses.
pub async fn wait_for_rpc(url: &str, timeout: Duration) -> Result<(), ChainError> {
    let client = reqwest::Client::new();
    let probe = serde_json::json!({
        "jsonrpc": "2.0",
        "method": "eth_blockNumber",
        "params": [],
        "id": 1,
    });
    let started = Instant::now();
    loop {
        if started.elapsed() >= timeout {
            return Err(ChainError::RpcNotReady {
                url: url.to_string(),
                timeout,
            });
        }
        match client.post(url).json(&probe).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("rpc endpoint {url} is ready");
                return Ok(());
            }
            Ok(resp) => debug!("rpc probe of {url} answered {}", resp.status()),
            Err(e) => debug!("rpc probe of {url} failed: {e}"),
        }
        sleep(RPC_PROBE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Height source that advances by one on every query.
    struct TickingChain {
        height: AtomicU64,
    }

    #[async_trait]
    impl HeightQuery for TickingChain {
        async fn height(&self) -> Result<u64, ChainError> {
            Ok(self.height.fetch_add(1, Ordering::SeqCst))
        }
    }

    /// Height source stuck at a fixed height.
    struct StalledChain {
        height: u64,
    }

    #[async_trait]
    impl HeightQuery for StalledChain {
        async fn height(&self) -> Result<u64, ChainError> {
            Ok(self.height)
        }
    }

    /// Height source that fails a fixed number of times before answering.
    struct FlakyChain {
        failures_left: Mutex<u32>,
        height: AtomicU64,
    }

    #[async_trait]
    impl HeightQuery for FlakyChain {
        async fn height(&self) -> Result<u64, ChainError> {
            let mut left = self.failures_left.lock().await;
            if *left > 0 {
                *left -= 1;
                return Err(ChainError::Protocol {
                    what: "height",
                    output: "connection refused".to_string(),
                });
            }
            Ok(self.height.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_until_enough_blocks_are_produced() {
        let chain = TickingChain {
            height: AtomicU64::new(10),
        };
        let height = wait_for_blocks(&chain, 3, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(height >= 13);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_respected_when_blocks_never_come() {
        let chain = StalledChain { height: 5 };
        let timeout = Duration::from_secs(5);
        let started = tokio::time::Instant::now();
        let err = wait_for_blocks(&chain, 1, timeout).await.unwrap_err();
        assert!(matches!(err, ChainError::DeadlineExceeded { .. }));
        // Returns within the deadline plus one poll interval.
        assert!(started.elapsed() <= timeout + DEFAULT_POLL_INTERVAL + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let chain = FlakyChain {
            failures_left: Mutex::new(3),
            height: AtomicU64::new(0),
        };
        let height = wait_for_blocks(&chain, 2, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(height >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_error_is_returned_when_only_errors_were_observed() {
        struct BrokenChain;

        #[async_trait]
        impl HeightQuery for BrokenChain {
            async fn height(&self) -> Result<u64, ChainError> {
                Err(ChainError::Protocol {
                    what: "height",
                    output: "rpc unreachable".to_string(),
                })
            }
        }

        let err = wait_for_blocks(&BrokenChain, 1, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ChainError::Protocol { .. }),
            "expected the last height error, got {err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_wins_within_one_tick() {
        let chain = Arc::new(StalledChain { height: 0 });
        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            wait_for_blocks(chain.as_ref(), 1, Duration::from_secs(600)),
        )
        .await;
        assert!(result.is_err(), "poller should have been cancelled");
        assert!(started.elapsed() <= Duration::from_secs(1) + DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_is_sampled_at_call_time() {
        // A chain already at a large height only needs delta more blocks,
        // not delta blocks from zero.
        let chain = TickingChain {
            height: AtomicU64::new(1_000),
        };
        let height = wait_for_blocks(&chain, 1, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(height >= 1_001);
        assert!(height < 1_010);
    }
}
