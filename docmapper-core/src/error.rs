//! Error types and result types for mapping operations.
//!
//! Use [`MapperResult<T>`] as the return type for fallible operations. Note that a
//! failed validation is *not* an error: `save` returns `Ok(false)` and the messages
//! are attached to the document. Only the bang variants (`save_strict`,
//! `create_strict`, ...) turn a validation failure into
//! [`MapperError::PersistenceRejected`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Represents all possible errors raised by the mapping layer or its storage backend.
#[derive(Error, Debug)]
pub enum MapperError {
    /// Serialization/deserialization error when converting between record formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A must-succeed lookup found nothing.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    NotFound(String, String),
    /// A bang operation was refused because the document failed validation.
    #[error("Document of type {0} is not valid: {1}")]
    PersistenceRejected(String, ValidationErrors),
    /// A call was made with a malformed signature (missing id, missing attributes, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A dependent destroy could not complete; the owner was not destroyed.
    #[error("Cascade failure while destroying {0}: {1}")]
    CascadeFailure(String, String),
    /// No schema is registered under the given name.
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),
    /// The schema declares no association with the given name, or it has the wrong kind.
    #[error("Unknown association {1} on {0}")]
    UnknownAssociation(String, String),
    /// A document with the given ID already exists in the collection.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// A stored record has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for mapping operations.
pub type MapperResult<T> = Result<T, MapperError>;

impl From<BsonError> for MapperError {
    fn from(err: BsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for MapperError {
    fn from(err: SerdeJsonError) -> Self {
        MapperError::Serialization(err.to_string())
    }
}
