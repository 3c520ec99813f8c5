//! Exponential-backoff retry for transient Pod I/O failures.
//!
//! Network hiccups against S3-compatible backends (and occasional
//! permission/EINTR noise against a filesystem) are `POD_IO`: worth a
//! few retries before surfacing to the caller. Content-addressed digest
//! mismatches or missing keys are never retried here — those are real
//! answers, not transient failures.

use std::thread;
use std::time::Duration;

use anyhow::Result;

/// Default attempt budget for a single Pod call: bounded attempts, no
/// unbounded spin.
pub const DEFAULT_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Run `op`, retrying up to `attempts` times with doubling backoff
/// between tries. Logs a warning on every retry so a flaky backend
/// shows up in operational logs instead of only in latency.
pub fn with_retry<T>(op_name: &str, attempts: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut backoff = INITIAL_BACKOFF;
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt == attempts.max(1) {
                    last_err = Some(err);
                    break;
                }
                log::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    op_name,
                    attempt,
                    attempts,
                    backoff,
                    err
                );
                thread::sleep(backoff);
                backoff *= 2;
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("loop always runs at least once and sets last_err on failure"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn succeeds_without_retry_when_op_succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", DEFAULT_ATTEMPTS, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", DEFAULT_ATTEMPTS, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                anyhow::bail!("transient");
            }
            Ok::<_, anyhow::Error>("ok")
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn surfaces_error_after_exhausting_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("always fails");
            #[allow(unreachable_code)]
            Ok::<_, anyhow::Error>(())
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
