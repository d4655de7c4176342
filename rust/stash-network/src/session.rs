use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use stash_credentials::Grant;
use tokio::io::AsyncRead;

use crate::{Context, NetworkError};

/// One entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full object key, or the grouping prefix including its trailing `/`.
    pub key: String,
    /// True when this entry groups keys below it rather than naming an
    /// object.
    pub is_prefix: bool,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was committed.
    pub created: DateTime<Utc>,
}

/// How to list a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only keys starting with this prefix are listed.
    pub prefix: String,
    /// When false, keys below the next `/` after `prefix` are folded into
    /// a single prefix entry.
    pub recursive: bool,
}

/// The bytes of an object being downloaded.
pub type Download = Pin<Box<dyn AsyncRead + Send>>;

/// A lazily paged listing.
pub type ObjectStream = BoxStream<'static, Result<ObjectEntry, NetworkError>>;

/// Opens sessions against the storage network.
#[async_trait]
pub trait Network: Send + Sync {
    /// Opens a session authorized by `grant`.
    async fn open_session(
        &self,
        cx: &Context,
        grant: &Grant,
    ) -> Result<Box<dyn Session>, NetworkError>;
}

/// A live connection to a project.
///
/// A session must be closed exactly once; closing it again fails with
/// [`NetworkError::SessionClosed`].
#[async_trait]
pub trait Session: Send + Sync {
    /// Looks up an object's metadata.
    async fn stat_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectInfo, NetworkError>;

    /// Starts an upload. Nothing becomes visible until the upload commits.
    async fn upload_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<Box<dyn Upload>, NetworkError>;

    /// Opens an object for reading.
    async fn download_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<Download, NetworkError>;

    /// Lists a bucket. Pages are fetched as the stream is polled.
    fn list_objects(&self, cx: &Context, bucket: &str, options: ListOptions) -> ObjectStream;

    /// Deletes an object and returns what was deleted.
    async fn delete_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectInfo, NetworkError>;

    /// Releases the session.
    fn close(&self) -> Result<(), NetworkError>;
}

/// An upload in progress.
#[async_trait]
pub trait Upload: Send {
    /// Appends bytes to the object.
    async fn write(&mut self, cx: &Context, data: &[u8]) -> Result<(), NetworkError>;

    /// Makes the object visible.
    async fn commit(self: Box<Self>, cx: &Context) -> Result<ObjectInfo, NetworkError>;

    /// Discards everything written so far.
    async fn abort(self: Box<Self>) -> Result<(), NetworkError>;
}
