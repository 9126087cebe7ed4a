// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for cache store backends.

/// Errors that can occur inside a [`CacheStore`](crate::CacheStore) backend.
///
/// Backends surface these instead of masking them: the fragment cache assumes
/// the store is reliable within a call, so an I/O failure aborts the request.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Error reading from or writing to a persistent store.
    #[error("Store I/O error at {path}: {details}")]
    Io {
        /// Path of the file that caused the error
        path: String,
        /// Details about the I/O error
        details: String,
        /// The underlying I/O error, if available
        #[source]
        source: Option<std::io::Error>,
    },

    /// Error serializing or deserializing the persisted store layout.
    #[error("Serialization error: {details}")]
    Serialization {
        /// Details about the serialization error
        details: String,
        /// The underlying serialization error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other backend failure (lock plumbing, blocking task join, ...).
    #[error("Store backend error: {details}")]
    Backend {
        /// Details about the failure
        details: String,
    },
}

impl StoreError {
    /// Create an `Io` error from an I/O error and path.
    pub fn io(path: impl Into<String>, details: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            details: details.into(),
            source: Some(source),
        }
    }

    /// Create a `Serialization` error from any serialization error.
    pub fn serialization(
        details: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Serialization {
            details: details.into(),
            source: Box::new(source),
        }
    }

    /// Create a `Backend` error.
    pub fn backend(details: impl Into<String>) -> Self {
        StoreError::Backend {
            details: details.into(),
        }
    }
}
