//! Per-stack mutual exclusion for mutating deployments.
//!
//! At most one deployment may mutate a given stack identity at a time. A
//! second caller is either rejected with [`HalldyllError::StackBusy`] or
//! queued behind the active one, depending on the [`ConcurrencyPolicy`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::wait::Cancellation;
use crate::error::{HalldyllError, Result};
use crate::stack::StackIdentity;

/// What to do when a stack is already being deployed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyPolicy {
    /// Fail immediately with `StackBusy`.
    #[default]
    Reject,
    /// Wait for the active deployment to finish.
    Queue,
}

/// Information about the deployment holding a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(holder: String) -> Self {
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            acquired_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    holder: Mutex<Option<LockInfo>>,
}

type Slots = Arc<Mutex<HashMap<String, Arc<Slot>>>>;

/// Registry of in-flight deployments, shared by clones of a deployer.
#[derive(Debug, Clone, Default)]
pub struct StackGuard {
    policy: ConcurrencyPolicy,
    slots: Slots,
}

/// Proof that the holder may mutate a stack. Released on drop.
#[derive(Debug)]
pub struct GuardPermit {
    _lock: OwnedMutexGuard<()>,
    slot: Arc<Slot>,
    slots: Slots,
    key: String,
    info: LockInfo,
}

impl GuardPermit {
    /// Lock information for this permit.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.slot
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        // the registry and this permit are the only owners when nobody waits
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

impl StackGuard {
    /// Creates a guard registry with the given policy.
    #[must_use]
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Self {
            policy,
            slots: Arc::default(),
        }
    }

    /// Returns the configured policy.
    #[must_use]
    pub const fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    fn slot(&self, key: String) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key).or_default())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns the current holder of a stack, if any.
    #[must_use]
    pub fn holder(&self, identity: &StackIdentity) -> Option<LockInfo> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&identity.guard_key()).and_then(|slot| {
            slot.holder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }

    /// Acquires the right to mutate `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`HalldyllError::StackBusy`] under the reject policy when the
    /// stack is held, or [`HalldyllError::Cancelled`] if the token fires while
    /// queued.
    pub async fn acquire(
        &self,
        identity: &StackIdentity,
        cancel: &Cancellation,
    ) -> Result<GuardPermit> {
        let key = identity.guard_key();
        let slot = self.slot(key.clone());

        let lock = match self.policy {
            ConcurrencyPolicy::Reject => {
                Arc::clone(&slot.lock).try_lock_owned().map_err(|_| {
                    let current = slot
                        .holder
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    HalldyllError::StackBusy {
                        stack: identity.name.clone(),
                        holder: current
                            .as_ref()
                            .map_or_else(|| String::from("unknown"), |i| i.holder.clone()),
                        since: current
                            .map_or_else(|| String::from("unknown"), |i| i.acquired_at.to_rfc3339()),
                    }
                })?
            }
            ConcurrencyPolicy::Queue => {
                debug!(stack = %identity, "Waiting for stack guard");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(HalldyllError::Cancelled {
                            stack: identity.name.clone(),
                        });
                    }
                    lock = Arc::clone(&slot.lock).lock_owned() => lock,
                }
            }
        };

        let info = LockInfo::new(generate_holder_id());
        *slot.holder.lock().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
        debug!(stack = %identity, holder = %info.holder, "Acquired stack guard");

        Ok(GuardPermit {
            _lock: lock,
            slot,
            slots: Arc::clone(&self.slots),
            key,
            info,
        })
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &uuid[..8])
}
