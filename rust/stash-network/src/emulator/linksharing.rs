use std::sync::Arc;

use bytes::Bytes;
use stash_credentials::Grant;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::{Context, Network, NetworkError, Session};

/// Why a shared link could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The link is not of the form `/{token}/{bucket}/{key}`.
    #[error("malformed link: {0}")]
    Malformed(String),

    /// The embedded grant does not allow the download.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The object or bucket does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage network failed.
    #[error("upstream failure: {0}")]
    Upstream(NetworkError),
}

impl LinkError {
    /// The HTTP status this error is served with.
    pub fn status_code(&self) -> u16 {
        match self {
            LinkError::Malformed(_) => 400,
            LinkError::Forbidden(_) => 403,
            LinkError::NotFound(_) => 404,
            LinkError::Upstream(_) => 502,
        }
    }
}

impl From<NetworkError> for LinkError {
    fn from(error: NetworkError) -> Self {
        match error {
            NetworkError::PermissionDenied(_) | NetworkError::InvalidAccess(_) => {
                LinkError::Forbidden(error.to_string())
            }
            NetworkError::BucketNotFound(_) | NetworkError::ObjectNotFound { .. } => {
                LinkError::NotFound(error.to_string())
            }
            NetworkError::InvalidArgument(_) => LinkError::Malformed(error.to_string()),
            other => LinkError::Upstream(other),
        }
    }
}

/// A link-sharing front-end.
///
/// Links carry everything needed to fetch the object: the serialized grant,
/// the bucket and the key, each percent-encoded as one path segment. The
/// front-end holds no credentials of its own.
#[derive(Clone)]
pub struct Linksharing {
    network: Arc<dyn Network>,
}

impl Linksharing {
    /// A front-end that resolves links against `network`.
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self { network }
    }

    /// Resolves `path`, relative to the front-end's base URL, into the bytes
    /// of the shared object.
    pub async fn resolve(&self, cx: &Context, path: &str) -> Result<Bytes, LinkError> {
        let mut segments = path.trim_start_matches('/').splitn(3, '/');
        let (Some(token), Some(bucket), Some(key)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(LinkError::Malformed(format!(
                "expected /{{token}}/{{bucket}}/{{key}}, got {path}"
            )));
        };

        let token = decode(token)?;
        let bucket = decode(bucket)?;
        let key = decode(key)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(LinkError::Malformed("bucket and key are required".into()));
        }

        let grant =
            Grant::parse(&token).map_err(|error| LinkError::Malformed(error.to_string()))?;
        let session = self.network.open_session(cx, &grant).await?;

        let result = fetch(cx, session.as_ref(), &bucket, &key).await;
        if let Err(error) = session.close() {
            warn!(%error, "Failed to close link-sharing session");
        }
        result
    }
}

fn decode(segment: &str) -> Result<String, LinkError> {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .map_err(|error| LinkError::Malformed(error.to_string()))
}

async fn fetch(
    cx: &Context,
    session: &dyn Session,
    bucket: &str,
    key: &str,
) -> Result<Bytes, LinkError> {
    let mut download = session.download_object(cx, bucket, key).await?;
    let mut body = Vec::new();
    download
        .read_to_end(&mut body)
        .await
        .map_err(|error| LinkError::Upstream(NetworkError::Transport(error.to_string())))?;
    Ok(Bytes::from(body))
}
