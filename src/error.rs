//! Error types for the LKE driver

use std::time::Duration;

use thiserror::Error;

use crate::provider::LinodeError;

/// Main error type for driver operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The desired-state descriptor is malformed or incomplete
    #[error("validation error: {0}")]
    Validation(String),

    /// Linode API call failed
    #[error("linode api error while {operation}: {source}")]
    Linode {
        /// What was being done, including cluster/pool ids
        operation: String,
        /// The underlying API error
        #[source]
        source: LinodeError,
    },

    /// Kubernetes API error against the provisioned cluster
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A bounded poll ran past its deadline
    #[error("timed out after {timeout:?} waiting for {operation}{}", last_error_suffix(.last_error))]
    Timeout {
        /// The condition being waited on
        operation: String,
        /// The configured deadline
        timeout: Duration,
        /// Last transient error observed while polling, if any
        last_error: Option<String>,
    },

    /// The wait was abandoned through its cancellation token
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    /// One attempt of a retried sequence failed; a later attempt may succeed
    #[error("{0}")]
    AttemptFailed(Box<Error>),

    /// Persisted state could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cluster kubeconfig could not be decoded or loaded
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// The requested operation is not implemented by this driver
    #[error("{0} is not supported by the LKE driver")]
    NotSupported(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Operation where the error occurred
        context: String,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap a Linode API error with the operation that produced it
    pub fn linode(operation: impl Into<String>, source: LinodeError) -> Self {
        Self::Linode {
            operation: operation.into(),
            source,
        }
    }

    /// Create a convergence timeout error
    pub fn timeout(
        operation: impl Into<String>,
        timeout: Duration,
        last_error: Option<String>,
    ) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
            last_error,
        }
    }

    /// Create a cancellation error for the given wait
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled(operation.into())
    }

    /// Mark `cause` as the failure of one retried attempt
    pub fn attempt_failed(cause: Error) -> Self {
        Self::AttemptFailed(Box::new(cause))
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a kubeconfig error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig(msg.into())
    }

    /// Create a not-supported error for the named operation
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported(operation.into())
    }

    /// Create an internal error with operation context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True when the remote resource does not exist (HTTP 404)
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Linode { source, .. } => source.is_not_found(),
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True when a create collided with an existing object (HTTP 409)
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// True for failures worth another poll tick: network errors, 5xx and 429
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Linode { source, .. } => source.is_transient(),
            Error::Kube(kube::Error::Api(ae)) => ae.code >= 500 || ae.code == 429,
            Error::Kube(kube::Error::Service(_)) => true,
            Error::AttemptFailed(_) => true,
            _ => false,
        }
    }
}
