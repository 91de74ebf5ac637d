//! Domain error model.

use thiserror::Error;

use crate::id::ProductId;

/// Result type used across the ledger.
pub type DomainResult<T> = Result<T, DomainError>;

/// Ledger-level error.
///
/// Every variant except [`DomainError::TransientStorage`] is deterministic:
/// retrying the same operation against the same state fails the same way.
/// Any error raised inside a transaction aborts the whole transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. quantity <= 0, unknown SKU in a new request).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An outbound movement asked for more than is physically on hand.
    #[error("insufficient stock for product {product_id}: requested {requested}, on hand {on_hand}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        on_hand: i64,
    },

    /// A reservation asked for more than is still available.
    #[error(
        "insufficient available stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientAvailable {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// A referenced product, consultant, request or reservation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request state machine does not allow the attempted transition.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The operation conflicts with existing state (e.g. stock already initialized).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A ledger invariant would be broken. Always a bug, never clamped.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Lock or serialization timeout. The aborted unit of work left no effect.
    #[error("transient storage failure: {0}")]
    TransientStorage(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientStorage(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Only transient storage failures are safe to retry blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }

    /// Invariant violations indicate a bug rather than a business outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}
