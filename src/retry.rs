//! Retry harness for optimistic transactions.

use std::time::Duration;

use crate::scheduler::SchedulerError;

const MAX_RETRIES: usize = 8;
const BACKOFF_CAP_MS: u64 = 2_000;

/// Run one transaction attempt per call of `f`, retrying on SlateDB
/// transaction conflicts with exponential backoff (25ms doubling, capped at
/// 2s). Non-conflict errors propagate immediately. Exhausting the retries
/// yields `SchedulerError::TransactionConflict`.
pub async fn retry_tx<T, F, Fut>(operation_name: &str, mut f: F) -> Result<T, SchedulerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SchedulerError>>,
{
    for attempt in 0..MAX_RETRIES {
        match f().await {
            Ok(val) => return Ok(val),
            Err(SchedulerError::Slate(ref e)) if e.kind() == slatedb::ErrorKind::Transaction => {
                if attempt + 1 < MAX_RETRIES {
                    let delay_ms = (25u64 << attempt).min(BACKOFF_CAP_MS);
                    tracing::debug!(
                        operation = %operation_name,
                        attempt = attempt + 1,
                        delay_ms,
                        "transaction conflict, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    continue;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(SchedulerError::TransactionConflict(
        operation_name.to_string(),
    ))
}
