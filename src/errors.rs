// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error taxonomy for provider operations and entry planning.
//!
//! The taxonomy distinguishes the cases the scheduler and the planner react
//! to differently:
//! - transient errors invalidate the zone cache and back off,
//! - throttling is a dedicated sentinel so the executor can demand a
//!   slower requeue than an ordinary failure,
//! - invalid desired state is terminal for the entry,
//! - foreign ownership refuses the entry but keeps polling,
//! - fatal errors park the provider until its configuration changes.

use thiserror::Error;

/// Errors surfaced by provider handlers and the change planner.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Provider-side rate limiting; both expected and a signal to slow down
    #[error("throttled by provider: {message}")]
    Throttled {
        /// Provider message accompanying the throttle response
        message: String,
    },

    /// Network failures, 5xx responses, timeouts
    #[error("transient provider error: {message}")]
    Transient {
        /// Description of the failure
        message: String,
    },

    /// Create collided with an existing record; the next reconcile converges
    #[error("conflict on '{name}': {message}")]
    Conflict {
        /// The DNS name the conflict occurred on
        name: String,
        /// Provider message
        message: String,
    },

    /// Desired state that can never be written; terminal for the entry
    #[error("invalid entry '{name}': {reason}")]
    Invalid {
        /// The DNS name of the invalid entry
        name: String,
        /// What is invalid
        reason: String,
    },

    /// The name is owned by another engine instance
    #[error("dns name {name} already busy for owner {owner}")]
    Busy {
        /// The contested DNS name
        name: String,
        /// The recorded foreign owner identity
        owner: String,
    },

    /// The provider denies access to a single zone; the zone is skipped,
    /// not a handler failure
    #[error("access to zone '{domain}' forbidden: {message}")]
    ForbiddenZone {
        /// Base domain of the inaccessible zone
        domain: String,
        /// Provider message
        message: String,
    },

    /// Credential or construction failure; no reconciliation until the
    /// provider configuration changes
    #[error("provider configuration failure: {message}")]
    Fatal {
        /// Description of the failure
        message: String,
    },
}

impl ProviderError {
    /// Whether the scheduler should retry after backoff.
    ///
    /// Conflicts count as transient: the next reconcile observes the
    /// created record and converges.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttled { .. } | Self::Transient { .. } | Self::Conflict { .. } => true,
            Self::Invalid { .. }
            | Self::Busy { .. }
            | Self::ForbiddenZone { .. }
            | Self::Fatal { .. } => false,
        }
    }

    /// Whether this is the throttling sentinel.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Structured reason code for status conditions and metrics labels.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::Throttled { .. } => "Throttled",
            Self::Transient { .. } => "TransientFailure",
            Self::Conflict { .. } => "Conflict",
            Self::Invalid { .. } => "InvalidEntry",
            Self::Busy { .. } => "Busy",
            Self::ForbiddenZone { .. } => "ForbiddenZone",
            Self::Fatal { .. } => "ProviderFailure",
        }
    }

    /// Shorthand for a transient error from any displayable source.
    #[must_use]
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient {
            message: err.to_string(),
        }
    }

    /// Classify an HTTP status plus body into the taxonomy.
    #[must_use]
    pub fn from_http_status(status: u16, name: &str, body: &str) -> Self {
        match status {
            429 => Self::Throttled {
                message: format!("HTTP 429: {body}"),
            },
            409 => Self::Conflict {
                name: name.to_string(),
                message: format!("HTTP 409: {body}"),
            },
            401 | 403 => Self::Fatal {
                message: format!("HTTP {status}: {body}"),
            },
            400 | 404 | 422 => Self::Invalid {
                name: name.to_string(),
                reason: format!("HTTP {status}: {body}"),
            },
            _ => Self::Transient {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transient {
                message: format!("request timed out: {err}"),
            }
        } else {
            ProviderError::transient(err)
        }
    }
}

// Conversion from anyhow::Error for composition boundaries
impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        ProviderError::transient(err)
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
