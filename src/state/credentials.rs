use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Every configured credential is currently exhausted
///
/// Callers treat this as "no data right now" rather than a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all API credentials are exhausted")]
pub struct AllExhausted;

/// A credential handed out by the pool
///
/// The token is never printed by `Debug`; use `label()` in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub index: usize,
    pub token: String,
}

impl Credential {
    pub fn label(&self) -> String {
        format!("#{}", self.index)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("token", &"***")
            .finish()
    }
}

/// Point-in-time view of one credential's health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStats {
    pub index: usize,
    pub request_count: u64,
    pub error_count: u64,
    pub exhausted: bool,
    pub remaining: Option<u32>,
}

/// Asks the remote API how many requests a token has left
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    /// Returns None when the quota could not be determined
    async fn remaining(&self, token: &str) -> Option<u32>;
}

#[derive(Debug)]
struct Slot {
    token: String,
    request_count: u64,
    error_count: u64,
    exhausted: bool,
    remaining: Option<u32>,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    next: usize,
}

/// Round-robin pool of API credentials with exhaustion tracking
///
/// The rotation index and per-credential counters live behind a single
/// lock. The quota probe runs outside the lock.
pub struct CredentialPool {
    inner: Mutex<PoolState>,
    quota_buffer: u32,
    probe: Option<Arc<dyn QuotaProbe>>,
}

impl CredentialPool {
    /// Creates a pool without a quota probe
    ///
    /// # Arguments
    ///
    /// * `tokens` - API tokens in rotation order
    /// * `quota_buffer` - Remaining quota at or below which a credential counts as exhausted
    pub fn new(tokens: Vec<String>, quota_buffer: u32) -> Self {
        let slots = tokens
            .into_iter()
            .map(|token| Slot {
                token,
                request_count: 0,
                error_count: 0,
                exhausted: false,
                remaining: None,
            })
            .collect();

        Self {
            inner: Mutex::new(PoolState { slots, next: 0 }),
            quota_buffer,
            probe: None,
        }
    }

    /// Attaches a probe consulted before a credential is handed out
    pub fn with_probe(mut self, probe: Arc<dyn QuotaProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of credentials not flagged exhausted
    pub fn available(&self) -> usize {
        self.lock().slots.iter().filter(|s| !s.exhausted).count()
    }

    /// Hands out the next usable credential in rotation order
    ///
    /// Exhausted credentials are skipped. When a probe is attached, a
    /// candidate whose last observed quota is unknown or close to the buffer
    /// is probed first; if its remaining quota is at or below the buffer it
    /// is flagged exhausted and rotation moves on.
    ///
    /// # Returns
    ///
    /// * `Ok(Credential)` - A credential believed to have quota left
    /// * `Err(AllExhausted)` - Every credential is exhausted
    pub async fn acquire(&self) -> Result<Credential, AllExhausted> {
        let attempts = self.len();
        for _ in 0..attempts {
            let (credential, needs_probe) = {
                let mut state = self.lock();
                let index = next_available(&mut state).ok_or(AllExhausted)?;
                let slot = &state.slots[index];
                let needs_probe = slot
                    .remaining
                    .map_or(true, |r| r <= self.quota_buffer.saturating_mul(2));
                (
                    Credential {
                        index,
                        token: slot.token.clone(),
                    },
                    needs_probe,
                )
            };

            let Some(probe) = self.probe.as_ref().filter(|_| needs_probe) else {
                return Ok(credential);
            };

            match probe.remaining(&credential.token).await {
                Some(remaining) => {
                    self.observe_remaining(credential.index, remaining);
                    if remaining > self.quota_buffer {
                        return Ok(credential);
                    }
                }
                // Unknown quota is not evidence of exhaustion
                None => return Ok(credential),
            }
        }

        Err(AllExhausted)
    }

    /// Hands out the next usable credential without consulting the probe
    pub fn acquire_unprobed(&self) -> Result<Credential, AllExhausted> {
        let mut state = self.lock();
        let index = next_available(&mut state).ok_or(AllExhausted)?;
        Ok(Credential {
            index,
            token: state.slots[index].token.clone(),
        })
    }

    pub fn record_request(&self, index: usize) {
        if let Some(slot) = self.lock().slots.get_mut(index) {
            slot.request_count += 1;
        }
    }

    pub fn record_error(&self, index: usize) {
        if let Some(slot) = self.lock().slots.get_mut(index) {
            slot.error_count += 1;
        }
    }

    /// Stores a remaining-quota figure seen in a response or probe
    ///
    /// A figure at or below the buffer flags the credential exhausted.
    pub fn observe_remaining(&self, index: usize, remaining: u32) {
        if let Some(slot) = self.lock().slots.get_mut(index) {
            slot.remaining = Some(remaining);
            if remaining <= self.quota_buffer && !slot.exhausted {
                tracing::warn!(credential = index, remaining, "Credential quota low, marking exhausted");
                slot.exhausted = true;
            }
        }
    }

    pub fn mark_exhausted(&self, index: usize) {
        if let Some(slot) = self.lock().slots.get_mut(index) {
            if !slot.exhausted {
                tracing::warn!(credential = index, "Credential marked exhausted");
            }
            slot.exhausted = true;
        }
    }

    /// Clears the exhausted flag on one credential after its window reset
    pub fn restore(&self, index: usize) {
        if let Some(slot) = self.lock().slots.get_mut(index) {
            slot.exhausted = false;
            slot.remaining = None;
        }
    }

    /// Clears every exhausted flag
    pub fn reset(&self) {
        let mut state = self.lock();
        for slot in state.slots.iter_mut() {
            slot.exhausted = false;
            slot.remaining = None;
        }
        tracing::info!(credentials = state.slots.len(), "Credential pool reset");
    }

    pub fn snapshot(&self) -> Vec<CredentialStats> {
        self.lock()
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| CredentialStats {
                index,
                request_count: slot.request_count,
                error_count: slot.error_count,
                exhausted: slot.exhausted,
                remaining: slot.remaining,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.len())
            .field("available", &self.available())
            .field("quota_buffer", &self.quota_buffer)
            .finish()
    }
}

/// Advances the rotation index past the next non-exhausted slot
fn next_available(state: &mut PoolState) -> Option<usize> {
    let count = state.slots.len();
    (0..count)
        .map(|offset| (state.next + offset) % count)
        .find(|&i| !state.slots[i].exhausted)
        .map(|index| {
            state.next = (index + 1) % count;
            index
        })
}
