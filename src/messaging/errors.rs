//! # Messaging Error Types
//!
//! Structured errors for the broker side: transport failures
//! ([`MessagingError`]), publisher failures ([`PublishError`]) and
//! per-message consumer failures ([`ProcessingError`]).

use thiserror::Error;

/// Transport-level broker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Channel operation failed: {operation}: {message}")]
    ChannelOperation { operation: String, message: String },

    #[error("Message returned as unroutable: exchange {exchange}, routing key {routing_key}")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("Message rejected by broker: exchange {exchange}, routing key {routing_key}")]
    Rejected {
        exchange: String,
        routing_key: String,
    },

    #[error("Channel closed: {message}")]
    ChannelClosed { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn channel_operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ChannelOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unroutable(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self::Unroutable {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn rejected(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self::Rejected {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn channel_closed(message: impl Into<String>) -> Self {
        Self::ChannelClosed {
            message: message.into(),
        }
    }

    /// Whether the channel that produced this error should be discarded
    pub fn invalidates_channel(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ChannelClosed { .. } | Self::ChannelOperation { .. }
        )
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
                MessagingError::channel_closed(err.to_string())
            }
            lapin::Error::IOError(_) => MessagingError::connection(err.to_string()),
            _ => MessagingError::channel_operation("amqp", err.to_string()),
        }
    }
}

/// Publishing a task event failed; never surfaced past the dispatcher
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Broker channel unavailable: {0}")]
    ChannelUnavailable(#[source] MessagingError),

    #[error("Publish rejected: {0}")]
    Rejected(#[source] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<MessagingError> for PublishError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::Unroutable { .. } | MessagingError::Rejected { .. } => {
                PublishError::Rejected(err)
            }
            other => PublishError::ChannelUnavailable(other),
        }
    }
}

/// A single delivery could not be processed; the message is dropped
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Message deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl ProcessingError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
