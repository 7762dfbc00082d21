use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Mutex;

use recoveries_core::{CustomerSnapshot, PtpRecord};

/// Mutable state of one ongoing conversation with one borrower.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub customer_snapshot: CustomerSnapshot,
    pub commitment_recorded: bool,
    pub recorded_ptp: Option<PtpRecord>,
    pub turns: u64,
}

impl Session {
    pub fn new(customer_snapshot: CustomerSnapshot) -> Self {
        Self { customer_snapshot, commitment_recorded: false, recorded_ptp: None, turns: 0 }
    }
}

pub type SessionInit<'a> = Pin<Box<dyn Future<Output = Session> + Send + 'a>>;

/// Storage abstraction over per-session state.
///
/// Reads hand out clones, writes go through the store, so the commitment
/// invariants live here rather than in whichever caller holds a
/// reference. An in-memory map backs it in this process; a networked
/// key-value store can replace it without touching the turn pipeline.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session, creating it lazily on first use. The
    /// initializer runs at most once per session id even under concurrent
    /// creation, and while it runs it blocks only callers for this id.
    async fn get_or_create(&self, session_id: &str, init: SessionInit<'_>) -> Session;

    async fn get(&self, session_id: &str) -> Option<Session>;

    /// Compare-and-set write of the one allowed PTP record. Returns false
    /// (and keeps the existing record) when the commitment flag is
    /// already set; first committed wins.
    async fn try_record_ptp(&self, session_id: &str, record: PtpRecord) -> bool;

    /// Bumps and returns the session's turn counter.
    async fn increment_turn(&self, session_id: &str) -> u64;
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Volatile session store; lives for the process lifetime, no eviction.
#[derive(Default)]
pub struct InMemorySessionStore {
    // Std mutex guards only the map itself and is never held across an
    // await; the per-session tokio mutex serializes initialization and
    // writes for one id without blocking other ids.
    slots: StdMutex<HashMap<String, Slot>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session_id: &str) -> Option<Slot> {
        self.slots.lock().ok()?.get(session_id).cloned()
    }

    fn slot_or_insert(&self, session_id: &str) -> Slot {
        match self.slots.lock() {
            Ok(mut slots) => slots.entry(session_id.to_string()).or_default().clone(),
            Err(poisoned) => {
                poisoned.into_inner().entry(session_id.to_string()).or_default().clone()
            }
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str, init: SessionInit<'_>) -> Session {
        let slot = self.slot_or_insert(session_id);
        let mut guard = slot.lock().await;
        match guard.as_ref() {
            Some(session) => session.clone(),
            None => {
                let session = init.await;
                *guard = Some(session.clone());
                session
            }
        }
    }

    async fn get(&self, session_id: &str) -> Option<Session> {
        let slot = self.slot(session_id)?;
        let guard = slot.lock().await;
        guard.clone()
    }

    async fn try_record_ptp(&self, session_id: &str, record: PtpRecord) -> bool {
        let Some(slot) = self.slot(session_id) else {
            return false;
        };
        let mut guard = slot.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };

        if session.commitment_recorded {
            return false;
        }
        session.commitment_recorded = true;
        session.recorded_ptp = Some(record);
        true
    }

    async fn increment_turn(&self, session_id: &str) -> u64 {
        let Some(slot) = self.slot(session_id) else {
            return 0;
        };
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(session) => {
                session.turns += 1;
                session.turns
            }
            None => 0,
        }
    }
}
