//! Remote document database collaborators.
//!
//! The cache only reads through [`QueryExecutor`]. [`DocumentWriter`] is the
//! write side used by consumers that refresh the cache after a local
//! mutation.

use async_trait::async_trait;
use lectern_core::{Constraint, Fields, Record, RemoteQueryError};

/// Runs a collection query against the remote document database.
///
/// Implementations receive the collection name and constraint list exactly
/// as the descriptor holds them, and must honor equality, inequality and
/// range filters plus one or more sort keys. The returned sequence is an
/// ordered snapshot of the matching documents with their identifiers.
///
/// The cache never retries: a failure is returned to the caller with the
/// collaborator's own error code.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        collection: &str,
        constraints: &[Constraint],
    ) -> Result<Vec<Record>, RemoteQueryError>;
}

/// Single-document writes against the remote document database.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Create a document with a generated identifier and return it.
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, RemoteQueryError>;

    /// Merge `fields` into an existing document.
    ///
    /// Fails with `not-found` when the document does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteQueryError>;

    /// Read one document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, RemoteQueryError>;

    /// Delete one document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteQueryError>;
}
