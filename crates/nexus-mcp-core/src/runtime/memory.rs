// crates/nexus-mcp-core/src/runtime/memory.rs
// ============================================================================
// Module: In-Memory Operation Runtime
// Description: Process-local runtime executing registered operation handlers.
// Purpose: Provide a reference runtime for local wiring and tests.
// Dependencies: async-trait, serde_json, tokio
// ============================================================================

//! ## Overview
//! [`InMemoryOperationRuntime`] runs each started operation as a tokio task
//! and records its status under a generated token (`op-{n}`). Cancellation
//! aborts the task and pins the status to `Canceled`; a handler that finishes
//! after cancellation does not overwrite it.
//!
//! Pending entries are kept until they settle. Only the most recent settled
//! entries are retained ([`DEFAULT_TERMINAL_RETENTION`] unless configured);
//! older tokens are evicted and answer [`RuntimeError::UnknownToken`].
//!
//! The runtime can be switched offline to exercise endpoint-unavailable paths.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::OperationContext;
use super::OperationHandler;
use super::OperationRuntime;
use super::OperationStatus;
use super::OperationToken;
use super::RuntimeError;
use super::StartRequest;
use crate::registry::OperationRef;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Settled entries retained before the oldest is evicted.
pub const DEFAULT_TERMINAL_RETENTION: usize = 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Tracked state for one started operation.
struct OperationEntry {
    /// Current status.
    status: OperationStatus,
    /// Task executing the handler while pending.
    task: Option<JoinHandle<()>>,
}

/// Status table with bounded retention of settled entries.
struct OperationTable {
    /// Entries keyed by token.
    entries: BTreeMap<OperationToken, OperationEntry>,
    /// Settled tokens, oldest first.
    settled: VecDeque<OperationToken>,
    /// Settled entries kept before eviction; at least one.
    retention: usize,
}

impl OperationTable {
    /// Creates an empty table.
    const fn new(retention: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            settled: VecDeque::new(),
            retention,
        }
    }

    /// Moves a pending entry to `status` and evicts the oldest settled
    /// entries beyond the retention bound.
    ///
    /// Returns the entry's task, if any. Unknown or already terminal tokens
    /// are left untouched.
    fn settle(&mut self, token: &OperationToken, status: OperationStatus) -> Option<JoinHandle<()>> {
        let entry = self.entries.get_mut(token)?;
        if entry.status.is_terminal() {
            return None;
        }
        entry.status = status;
        let task = entry.task.take();
        self.settled.push_back(token.clone());
        while self.settled.len() > self.retention
            && let Some(evicted) = self.settled.pop_front()
        {
            self.entries.remove(&evicted);
        }
        task
    }
}

/// Shared status table.
type EntryTable = Arc<Mutex<OperationTable>>;

/// Process-local operation runtime.
///
/// # Invariants
/// - A terminal status is never replaced.
/// - Tokens are unique for the lifetime of the runtime.
/// - At most the configured number of settled entries is retained.
pub struct InMemoryOperationRuntime {
    /// Handlers keyed by service and operation.
    handlers: BTreeMap<OperationRef, Arc<dyn OperationHandler>>,
    /// Status table keyed by token.
    entries: EntryTable,
    /// Token sequence.
    counter: AtomicU64,
    /// Whether the runtime accepts calls.
    online: AtomicBool,
}

impl Default for InMemoryOperationRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOperationRuntime {
    /// Creates a runtime with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            entries: Arc::new(Mutex::new(OperationTable::new(DEFAULT_TERMINAL_RETENTION))),
            counter: AtomicU64::new(1),
            online: AtomicBool::new(true),
        }
    }

    /// Registers a handler for `service/operation`, replacing any previous one.
    pub fn register_handler(
        &mut self,
        service: impl Into<String>,
        operation: impl Into<String>,
        handler: impl OperationHandler + 'static,
    ) {
        self.handlers.insert(OperationRef::new(service, operation), Arc::new(handler));
    }

    /// Builder form of [`InMemoryOperationRuntime::register_handler`].
    #[must_use]
    pub fn with_handler(
        mut self,
        service: impl Into<String>,
        operation: impl Into<String>,
        handler: impl OperationHandler + 'static,
    ) -> Self {
        self.register_handler(service, operation, handler);
        self
    }

    /// Sets how many settled entries are retained; clamped to at least one.
    #[must_use]
    pub fn with_terminal_retention(self, retention: usize) -> Self {
        if let Ok(mut table) = self.entries.lock() {
            table.retention = retention.max(1);
        }
        self
    }

    /// Switches the runtime online or offline.
    ///
    /// While offline every call fails with [`RuntimeError::Unavailable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns the number of operations that are still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock_entries(&self.entries).map_or(0, |table| {
            table.entries.values().filter(|entry| !entry.status.is_terminal()).count()
        })
    }

    /// Fails with [`RuntimeError::Unavailable`] while offline.
    fn ensure_online(&self) -> Result<(), RuntimeError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable("in-memory runtime is offline".to_string()))
        }
    }
}

#[async_trait]
impl OperationRuntime for InMemoryOperationRuntime {
    async fn start(&self, request: StartRequest) -> Result<OperationToken, RuntimeError> {
        self.ensure_online()?;
        let reference = OperationRef::new(&request.service, &request.operation);
        let Some(handler) = self.handlers.get(&reference).cloned() else {
            return Err(RuntimeError::Rejected(format!(
                "no handler registered for {}/{}",
                request.service, request.operation
            )));
        };
        let token = OperationToken::new(format!(
            "op-{}",
            self.counter.fetch_add(1, Ordering::Relaxed)
        ));
        let context = OperationContext {
            token: token.clone(),
            service: request.service,
            operation: request.operation,
            request_id: request.request_id,
        };
        let mut table = lock_entries(&self.entries)?;
        table.entries.insert(token.clone(), OperationEntry {
            status: OperationStatus::Pending,
            task: None,
        });
        let shared = Arc::clone(&self.entries);
        let task_token = token.clone();
        let input = request.input;
        let task = tokio::spawn(async move {
            let status = match handler.handle(context, input).await {
                Ok(output) => OperationStatus::Completed(output),
                Err(detail) => OperationStatus::Failed(detail),
            };
            if let Ok(mut table) = lock_entries(&shared) {
                // The task's own handle detaches on drop.
                drop(table.settle(&task_token, status));
            }
        });
        if let Some(entry) = table.entries.get_mut(&token)
            && !entry.status.is_terminal()
        {
            entry.task = Some(task);
        }
        drop(table);
        Ok(token)
    }

    async fn poll(&self, token: &OperationToken) -> Result<OperationStatus, RuntimeError> {
        self.ensure_online()?;
        let table = lock_entries(&self.entries)?;
        table
            .entries
            .get(token)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| RuntimeError::UnknownToken(token.clone()))
    }

    async fn cancel(&self, token: &OperationToken) -> Result<(), RuntimeError> {
        self.ensure_online()?;
        let mut table = lock_entries(&self.entries)?;
        let Some(entry) = table.entries.get(token) else {
            return Err(RuntimeError::UnknownToken(token.clone()));
        };
        if entry.status.is_terminal() {
            return Err(RuntimeError::AlreadyTerminal(token.clone()));
        }
        if let Some(task) = table.settle(token, OperationStatus::Canceled) {
            task.abort();
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Locks the status table, mapping poisoning to an unavailable endpoint.
fn lock_entries(entries: &Mutex<OperationTable>) -> Result<MutexGuard<'_, OperationTable>, RuntimeError> {
    entries
        .lock()
        .map_err(|_| RuntimeError::Unavailable("operation table lock poisoned".to_string()))
}
