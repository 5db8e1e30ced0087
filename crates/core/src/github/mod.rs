//! GitHub adapter.
//!
//! One [`GithubClient`] serves as both the work-item source (open issues
//! carrying the configured label) and the pull-request host for autopilot.

mod client;
mod types;

pub use client::{rate_limit_reset, GithubClient};
pub use types::{CheckRun, CombinedStatus, Issue, PullRequest};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::autopilot::HostError;
use crate::source::SourceError;

/// Errors from the GitHub REST API.
#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl From<GithubError> for SourceError {
    fn from(err: GithubError) -> Self {
        match err {
            GithubError::RateLimited { reset_at } => SourceError::RateLimited { reset_at },
            GithubError::Api { status, message } => SourceError::Api { status, message },
            GithubError::NotFound(what) => SourceError::Api {
                status: 404,
                message: what,
            },
            GithubError::Parse(msg) => SourceError::Parse(msg),
            other => SourceError::Request(other.to_string()),
        }
    }
}

impl From<GithubError> for HostError {
    fn from(err: GithubError) -> Self {
        match err {
            GithubError::RateLimited { reset_at } => HostError::RateLimited { reset_at },
            GithubError::Api { status, message } => HostError::Api { status, message },
            GithubError::NotFound(what) => HostError::NotFound(what),
            other => HostError::Request(other.to_string()),
        }
    }
}
