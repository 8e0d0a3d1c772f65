use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// Bounded exponential backoff: attempt 1 runs immediately, every further
/// attempt waits twice as long as the previous one.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        assert!(max_attempts >= 1, "at least one attempt is required");

        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted.
///
/// The error of the final attempt is handed back to the caller; errors of
/// earlier attempts are logged at `warn` together with the upcoming delay.
pub fn retry_with_backoff<T, E: Display>(
    policy: RetryPolicy,
    what: &str,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut delay = policy.base_delay;

    for attempt in 1..=policy.max_attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt == policy.max_attempts => {
                log::warn!(
                    target: "util::retry",
                    "{what} failed on final attempt {attempt}/{}: {e}",
                    policy.max_attempts
                );
                return Err(e);
            }
            Err(e) => {
                log::warn!(
                    target: "util::retry",
                    "{what} failed on attempt {attempt}/{}: {e}, retrying in {delay:?}",
                    policy.max_attempts
                );
                thread::sleep(delay);
                delay *= 2;
            }
        }
    }

    unreachable!("loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn first_attempt_success_runs_once() {
        let mut calls = 0;
        let res: Result<u32, &str> = retry_with_backoff(fast_policy(3), "op", || {
            calls += 1;
            Ok(7)
        });

        assert_eq!(res, Ok(7));
        assert_eq!(calls, 1);
    }

    #[test]
    fn recovers_after_transient_failures() {
        let mut calls = 0;
        let res: Result<u32, &str> = retry_with_backoff(fast_policy(3), "op", || {
            calls += 1;
            if calls < 3 {
                Err("transient")
            } else {
                Ok(42)
            }
        });

        assert_eq!(res, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_attempts_and_returns_last_error() {
        let mut calls = 0;
        let res: Result<u32, String> = retry_with_backoff(fast_policy(4), "op", || {
            calls += 1;
            Err(format!("boom {calls}"))
        });

        assert_eq!(res, Err("boom 4".to_string()));
        assert_eq!(calls, 4);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let mut calls = 0;
        let res: Result<(), &str> = retry_with_backoff(fast_policy(1), "op", || {
            calls += 1;
            Err("boom")
        });

        assert!(res.is_err());
        assert_eq!(calls, 1);
    }
}
