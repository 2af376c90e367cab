//! Polling policy for the hosted private CA.

use std::future::Future;
use std::time::Duration;

use certbatch_core::{CertError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How long to keep polling a backend that answers "not yet".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay when the backend doesn't suggest one
    #[serde(default = "default_delay", with = "millis")]
    pub default_delay: Duration,

    /// Cap on backend-suggested delays
    #[serde(default = "default_max_delay", with = "millis")]
    pub max_delay: Duration,

    /// Overall time budget for one poll loop
    #[serde(default = "default_deadline", with = "opt_millis")]
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Create a policy with default limits
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_delay: default_delay(),
            max_delay: default_max_delay(),
            deadline: default_deadline(),
        }
    }

    /// Set maximum attempts
    #[must_use]
    pub const fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the fallback delay
    #[must_use]
    pub const fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Set the delay cap
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set (or clear) the overall deadline
    #[must_use]
    pub const fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Delay before the next attempt after `err`
    #[must_use]
    pub fn delay_for(&self, err: &CertError) -> Duration {
        err.retry_after()
            .unwrap_or(self.default_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the policy runs out.
    ///
    /// Only transient errors ([`CertError::is_transient`]) are retried.
    /// Running out of attempts or time yields [`CertError::RetriesExhausted`].
    /// Dropping the returned future cancels the loop.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        let poll = async {
            loop {
                attempt += 1;
                match op().await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_transient() && attempt < max_attempts => {
                        let delay = self.delay_for(&e);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "backend not ready, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) if e.is_transient() => {
                        return Err(CertError::RetriesExhausted { attempts: attempt })
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, poll).await {
                Ok(result) => result,
                Err(_) => Err(CertError::RetriesExhausted { attempts: attempt }),
            },
            None => poll.await,
        }
    }
}

const fn default_max_attempts() -> u32 {
    120
}

const fn default_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

const fn default_deadline() -> Option<Duration> {
    Some(Duration::from_secs(15 * 60))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
