//! Errors raised while targeting and dispatching events.

use crate::rooms::RoomError;
use thiserror::Error;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A sender-scoped operation was called before `set_sender`.
    #[error("Sender is not set")]
    UnsetSender,

    /// `emit` was called without a push sink attached.
    #[error("No push sink configured")]
    SinkNotConfigured,

    /// A middleware refused to pass the payload on.
    #[error("Rejected by middleware {middleware}: {reason}")]
    Rejected {
        /// Middleware name.
        middleware: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// Room store failure.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Failure raised inside an event handler.
    #[error(transparent)]
    Handler(BoxError),
}

impl Error {
    /// Wrap an arbitrary handler failure.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    /// Build a middleware rejection.
    pub fn rejected(middleware: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            middleware: middleware.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used for metrics labels and error replies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsetSender => "unset_sender",
            Self::SinkNotConfigured => "sink_not_configured",
            Self::Rejected { .. } => "rejected",
            Self::Room(_) => "room",
            Self::Handler(_) => "handler",
        }
    }
}
