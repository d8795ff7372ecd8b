//! Error types for crmsets.
//!
//! All errors are strongly typed using thiserror. The recoverable
//! conditions from the reconciliation contract (malformed live records,
//! unresolved members, id collisions) are handled inside the engine and
//! never surface here; these types cover invariant violations and misuse.

use thiserror::Error;

/// Validation errors raised while checking inbound records.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Both sides of a live record are absent or memberless.
    #[error("Connection '{constraint_id}' has both resource-set sides empty")]
    MalformedConnection {
        constraint_id: String,
    },

    /// A resource id was empty.
    #[error("Resource id cannot be empty")]
    EmptyResourceId,

    /// A set listed the same member twice.
    #[error("Resource set '{set_id}' contains duplicate member '{member}'")]
    DuplicateMember {
        set_id: String,
        member: String,
    },

    /// A CRM version string could not be parsed.
    #[error("Invalid CRM version string: '{raw}'")]
    InvalidVersion {
        raw: String,
    },
}

/// Errors from the placeholder registry and reconciliation paths.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A registry lock was poisoned by a panicking holder.
    #[error("Placeholder registry lock poisoned: {context}")]
    RegistryPoisoned {
        context: &'static str,
    },

    /// A handle does not address any registered placeholder.
    #[error("Unknown placeholder handle: {handle}")]
    UnknownHandle {
        handle: u64,
    },

    /// The registry advanced past the snapshot a diff was computed from.
    #[error("Outcome was produced against a stale snapshot (expected next handle {expected}, registry has {actual})")]
    StaleSnapshot {
        expected: u64,
        actual: u64,
    },
}

/// Errors from set composition and chain commit.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Neither kind was requested from the composer.
    #[error("Neither colocation nor order composition was requested")]
    NothingRequested,

    /// Commit was asked to start mid-chain.
    #[error("Placeholder '{placeholder}' is not a chain head: it has placeholder parents")]
    NotChainHead {
        placeholder: String,
    },

    /// The outbound transport declined the batched directive.
    #[error("Directive sink rejected the batched command: {message}")]
    SinkRejected {
        message: String,
    },
}

/// Top-level error type for crmsets.
#[derive(Debug, Error)]
pub enum CrmError {
    /// An inbound record failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A registry or reconciliation failure.
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// A composition or chain-commit failure.
    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    /// An invariant violation with no more specific classification.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl CrmError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a reconcile error.
    #[must_use]
    pub const fn is_reconcile(&self) -> bool {
        matches!(self, Self::Reconcile(_))
    }

    /// Returns true if this is a compose error.
    #[must_use]
    pub const fn is_compose(&self) -> bool {
        matches!(self, Self::Compose(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for crmsets operations.
pub type CrmResult<T> = Result<T, CrmError>;
