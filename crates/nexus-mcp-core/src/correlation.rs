// crates/nexus-mcp-core/src/correlation.rs
// ============================================================================
// Module: Session Correlation
// Description: Generation of session and request correlation identifiers.
// Purpose: Give gateway sessions and transport requests unique, ordered ids.
// Dependencies: rand
// ============================================================================

//! ## Overview
//! Session identifiers are issued from a boot-scoped random seed plus a
//! monotonic counter, so ids from different processes do not collide.
//! Transport request identifiers are `{session_id}-{sequence}` and are
//! produced by [`RequestSequence`].

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rand::RngCore;
use rand::rngs::OsRng;

/// Boot-scoped correlation ID generator.
///
/// # Invariants
/// - Issued identifiers are unique within the process lifetime.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    /// Prefix included in every generated correlation ID.
    prefix: &'static str,
    /// Boot-scoped random identifier for entropy.
    boot_id: u64,
    /// Monotonic counter for IDs issued in this process.
    counter: AtomicU64,
}

impl CorrelationIdGenerator {
    /// Creates a new generator with the given prefix.
    #[must_use]
    pub fn new(prefix: &'static str) -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        Self {
            prefix,
            boot_id: u64::from_be_bytes(bytes),
            counter: AtomicU64::new(1),
        }
    }

    /// Issues a new correlation ID.
    #[must_use]
    pub fn issue(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:016x}-{:016x}", self.prefix, self.boot_id, seq)
    }
}

/// Per-session request sequence producing `{session_id}-{n}` identifiers.
///
/// # Invariants
/// - Sequence numbers start at 1 and increase by one per issued id.
#[derive(Debug)]
pub struct RequestSequence {
    /// Owning session identifier.
    session_id: String,
    /// Next sequence number.
    next: AtomicU64,
}

impl RequestSequence {
    /// Creates a sequence for `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Returns the owning session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Issues the next request identifier.
    #[must_use]
    pub fn issue(&self) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.session_id)
    }
}
