// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error types returned by the consent engine and its storage backends.

use thiserror::Error;

/// Failure raised by a [`ConsentStore`] implementation.
///
/// [`ConsentStore`]: crate::storage::ConsentStore
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend refused or failed the operation.
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded.
    #[error("storage serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying file or device failed.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A write tried to move a consent out of a terminal status.
    #[error("consent {id} is in terminal status {status}")]
    Terminal { id: String, status: String },

    /// A write referenced a record that does not exist.
    #[error("{entity} {id} missing from store")]
    Missing { entity: &'static str, id: String },
}

/// Every failure the engine reports to its caller.
///
/// Each variant maps to an HTTP status through [`ConsentError::status_code`]
/// so request handlers can translate errors without matching on them.
#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("authorisation {authorisation_id} does not belong to consent {consent_id}")]
    ConsentMismatch { consent_id: String, authorisation_id: String },

    #[error("authorisation {authorisation_id} is of type {actual}, expected {expected}")]
    AuthTypeMismatch {
        authorisation_id: String,
        expected: String,
        actual: String,
    },

    #[error("consent {consent_id} is not owned by client {client_id}")]
    ClientMismatch { consent_id: String, client_id: String },

    #[error("consent {consent_id} of type {actual} cannot serve {expected} requests")]
    ConsentTypeMismatch {
        consent_id: String,
        expected: String,
        actual: String,
    },

    #[error("consent {consent_id} is already in terminal status {status}")]
    TerminalConsent { consent_id: String, status: String },

    #[error("consent {consent_id} with status {status} cannot be used for data access")]
    ConsentNotValid { consent_id: String, status: String },

    #[error("consent {consent_id} in status {status} cannot start a new {auth_type}")]
    AuthorisationNotAllowed {
        consent_id: String,
        auth_type: String,
        status: String,
    },

    #[error("authorisation {authorisation_id} already has status {status}")]
    AuthorisationAlreadyDecided { authorisation_id: String, status: String },

    #[error("consent {consent_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        consent_id: String,
        from: String,
        to: String,
    },

    #[error("idempotency key {key} was reused with a different payload")]
    IdempotencyConflict { key: String },

    #[error("a request with idempotency key {key} is still being processed")]
    IdempotencyInFlight { key: String },

    #[error("missing or empty x-idempotency-key header")]
    MissingIdempotencyKey,

    #[error("unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("invalid account reference: {0:?}")]
    InvalidAccountReference(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConsentError {
    /// HTTP status code a request handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ConsentError::NotFound { .. } => 404,
            ConsentError::ClientMismatch { .. } => 403,
            ConsentError::TerminalConsent { .. } | ConsentError::ConsentNotValid { .. } => 401,
            ConsentError::IdempotencyConflict { .. }
            | ConsentError::IdempotencyInFlight { .. }
            | ConsentError::AuthorisationNotAllowed { .. }
            | ConsentError::AuthorisationAlreadyDecided { .. } => 409,
            ConsentError::ConsentMismatch { .. }
            | ConsentError::AuthTypeMismatch { .. }
            | ConsentError::ConsentTypeMismatch { .. }
            | ConsentError::MissingIdempotencyKey
            | ConsentError::UnsupportedRequest(_)
            | ConsentError::InvalidAccountReference(_) => 400,
            // A verdict with no legal transition means the state tables
            // disagree with the aggregator.
            ConsentError::InvalidStateTransition { .. }
            | ConsentError::Store(_)
            | ConsentError::Internal(_) => 500,
        }
    }

    /// Whether the error was caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        ConsentError::NotFound { entity, id: id.to_owned() }
    }
}
