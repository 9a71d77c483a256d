use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::unix_now_ms;
use relay_pool::{Credential, CredentialPool};
use tracing::{debug, info};

type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Picks the credential for each dispatch attempt.
///
/// Round-robin over credentials whose token is not errored. Tokens that
/// already failed in the current request are avoided while fresh ones remain.
/// With the rate limit switch on, tokens answered with 429 sit out a cooldown.
pub struct CredentialSelector {
    cursor: AtomicUsize,
    cooldown_ms: u64,
    cooldown_until: Mutex<HashMap<String, u64>>,
    clock: ClockFn,
}

impl CredentialSelector {
    pub fn new(cooldown_seconds: u64) -> Self {
        Self::new_with_clock(cooldown_seconds, Arc::new(unix_now_ms))
    }

    fn new_with_clock(cooldown_seconds: u64, clock: ClockFn) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            cooldown_ms: cooldown_seconds.saturating_mul(1_000),
            cooldown_until: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn select(
        &self,
        pool: &CredentialPool,
        tried: &HashSet<String>,
        enable_limit: bool,
    ) -> Option<Credential> {
        let now_unix_ms = (self.clock)();
        let eligible = pool
            .credentials()
            .into_iter()
            .filter(|credential| !pool.is_errored(&credential.token))
            .filter(|credential| {
                !enable_limit || self.cooling_until(&credential.token, now_unix_ms).is_none()
            })
            .collect::<Vec<_>>();
        if eligible.is_empty() {
            debug!("no eligible credential");
            return None;
        }

        let fresh = eligible
            .iter()
            .filter(|credential| !tried.contains(&credential.token))
            .collect::<Vec<_>>();
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        let chosen = if fresh.is_empty() {
            &eligible[turn % eligible.len()]
        } else {
            fresh[turn % fresh.len()]
        };
        Some(chosen.clone())
    }

    pub fn record_rate_limited(&self, token: &str) {
        let until = (self.clock)().saturating_add(self.cooldown_ms);
        lock_or_recover(&self.cooldown_until).insert(token.to_string(), until);
        info!(
            token = %relay_pool::mask_token(token),
            cooldown_until_unix_ms = until,
            "credential rate limited"
        );
    }

    pub fn record_success(&self, token: &str) {
        lock_or_recover(&self.cooldown_until).remove(token);
    }

    /// Returns the cooldown deadline when still active; expired entries are
    /// dropped.
    pub fn cooling_until(&self, token: &str, now_unix_ms: u64) -> Option<u64> {
        let mut cooldowns = lock_or_recover(&self.cooldown_until);
        let until = *cooldowns.get(token)?;
        if now_unix_ms < until {
            return Some(until);
        }
        cooldowns.remove(token);
        None
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
