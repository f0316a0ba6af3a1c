//!
//! The Retry module contains the [RetryPolicy], which bounds how often and how patiently a failed
//! remote call is sent again.  Policies are plain values handed out by the
//! [TableConfig](crate::TableConfig), so they can be tuned per storage and loaded with serde.
//!

use std::time::Duration;

use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::error::{Error, OpContext, RemoteError, RemoteErrorKind};
use crate::perf_counters::PerfCounters;

/// How many times, and how far apart, a failed remote call is attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The total number of attempts, the first one included.  `1` means no retries
    pub max_attempts : u32,
    /// The wait before the first retry, doubled for every later retry
    pub initial_backoff_ms : u64,
    /// The longest wait between two attempts, jitter excluded
    pub max_backoff_ms : u64,
    /// Adds up to a quarter of the wait at random, so that callers failing together don't retry together
    pub jitter : bool,
    /// Kinds retried even when the error doesn't say it's retryable
    pub retry_on : Vec<RemoteErrorKind>,
}

impl RetryPolicy {

    /// The policy for ordinary table requests.  Covers throttling, busy servers and timeouts
    pub fn transient_table_errors() -> Self {
        Self{
            max_attempts : 7,
            initial_backoff_ms : 100,
            max_backoff_ms : 10_000,
            jitter : true,
            retry_on : vec![RemoteErrorKind::Throttled, RemoteErrorKind::ServerBusy, RemoteErrorKind::TimedOut],
        }
    }

    /// The policy for creating and deleting tables, which the store may take a while to settle
    pub fn slow_instantiation() -> Self {
        Self{
            max_attempts : 30,
            initial_backoff_ms : 500,
            max_backoff_ms : 5_000,
            jitter : true,
            retry_on : vec![RemoteErrorKind::Throttled, RemoteErrorKind::ServerBusy, RemoteErrorKind::TimedOut, RemoteErrorKind::TableNotFound],
        }
    }

    /// Retries the same kinds as [transient_table_errors](Self::transient_table_errors), without waiting
    pub fn immediate(max_attempts : u32) -> Self {
        Self{ initial_backoff_ms : 0, max_backoff_ms : 0, jitter : false, max_attempts, ..Self::transient_table_errors() }
    }

    /// Sends every request once
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Returns `true` if the policy sends a request that failed with `err` again
    pub fn is_retryable(&self, err : &RemoteError) -> bool {
        err.retryable || self.retry_on.contains(&err.kind)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_backoff_ms, self.max_backoff_ms, self.jitter)
    }

    /// Calls `call` until it succeeds, fails with an error the policy doesn't retry, or runs out
    /// of attempts.  `hand_back` picks errors the caller recovers from itself, which are returned
    /// at once even when the policy would retry them.
    pub(crate) fn run<R, H, F>(&self, context : &OpContext, counters : &PerfCounters, hand_back : H, mut call : F) -> Result<R, Failure>
    where
        H : Fn(&RemoteError) -> bool,
        F : FnMut() -> Result<R, RemoteError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.backoff();
        let mut attempt = 1;
        loop {
            let source = match call() {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            if hand_back(&source) || !self.is_retryable(&source) {
                return Err(Failure{ source, attempts : attempt, exhausted : false });
            }
            if attempt >= max_attempts {
                return Err(Failure{ source, attempts : attempt, exhausted : true });
            }

            let delay = backoff.next_delay();
            warn!(table = %context.table, operation = %context.operation, attempt, delay_ms = delay.as_millis() as u64, error = %source, "retrying remote call");
            counters.update(|c| c.retry_count += 1);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transient_table_errors()
    }
}

/// The last error of a call run under a [RetryPolicy]
#[derive(Debug, Clone)]
pub(crate) struct Failure {
    pub source : RemoteError,
    pub attempts : u32,
    /// The error was retryable but the policy ran out of attempts
    pub exhausted : bool,
}

impl Failure {
    pub fn kind(&self) -> RemoteErrorKind {
        self.source.kind
    }

    /// Surfaces the failure as a transient error if retries ran out, and unchanged otherwise
    pub fn into_error(self, context : OpContext) -> Error {
        if self.exhausted {
            Error::RemoteTransient{ context, attempts : self.attempts, source : self.source }
        } else {
            Error::RemoteUnrecoverable{ context, source : self.source }
        }
    }
}

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms : u64,
    max_ms : u64,
    jitter : bool,
    attempt : u32,
}

impl Backoff {
    /// Create a new backoff starting at `base_ms` with a cap of `max_ms`
    pub fn new(base_ms : u64, max_ms : u64, jitter : bool) -> Self {
        Self{ base_ms, max_ms, jitter, attempt : 0 }
    }

    /// Get the next delay and move on to the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_ms);
        let jitter = if self.jitter {
            rand::random::<u64>() % (capped / 4 + 1)
        } else {
            0
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped + jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
