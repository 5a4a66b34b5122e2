//! # Client Errors
//!
//! Classification of cluster API failures. Callers branch on the variant, never
//! on the message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Write rejected because it was based on a stale resource version
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// The kind is not registered on the cluster
    #[error("no schema registered for {api_version}/{kind}")]
    SchemaUnavailable { api_version: String, kind: String },

    #[error("API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }

    pub fn is_schema_unavailable(&self) -> bool {
        matches!(self, ClientError::SchemaUnavailable { .. })
    }

    /// Absent either because the object is gone or because its kind is not served
    pub fn is_absent(&self) -> bool {
        self.is_not_found() || self.is_schema_unavailable()
    }

    /// Map a kube error for the given object onto the taxonomy
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) => match ae.code {
                404 => ClientError::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 if ae.reason == "AlreadyExists" => ClientError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 => ClientError::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    message: ae.message,
                },
                code => ClientError::Api {
                    code,
                    reason: ae.reason,
                    message: ae.message,
                },
            },
            kube::Error::SerdeError(e) => ClientError::Serialization(e),
            other => ClientError::Other(anyhow::Error::new(other)),
        }
    }
}
