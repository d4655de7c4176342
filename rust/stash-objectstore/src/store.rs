use std::collections::HashMap;
use std::sync::Arc;

use chrono::TimeDelta;
use futures_util::TryStreamExt;
use stash_network::{Context, ListOptions, Network, NetworkError, ObjectEntry, Upload};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::lease::Lease;
use crate::prefix::common_prefixes;
use crate::{
    ConfigError, ObjectReader, ObjectStoreError, Operation, RootAccess, Settings,
    build_share_url, derive_shareable_access, parse_root_access,
};

/// Where an [`ObjectStore`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// `init` has not succeeded yet.
    Uninitialized,
    /// Operations are accepted.
    Ready,
    /// `close` was called. Nothing is accepted any more.
    Closed,
}

struct Ready {
    root: RootAccess,
    linksharing_base_url: Url,
}

enum State {
    Uninitialized,
    Ready(Ready),
    Closed,
}

/// A bucket/key object store over the storage network.
///
/// After [`ObjectStore::init`] the store is read-only and can be shared
/// between tasks (for example in an `Arc`); every operation opens and
/// releases its own session.
pub struct ObjectStore {
    settings: Settings,
    network: Arc<dyn Network>,
    state: State,
}

enum CopyError {
    Body(std::io::Error),
    Network(NetworkError),
}

impl From<NetworkError> for CopyError {
    fn from(error: NetworkError) -> Self {
        CopyError::Network(error)
    }
}

async fn copy<R>(
    cx: &Context,
    body: &mut R,
    upload: &mut dyn Upload,
    buffer_size: usize,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = cx
            .run(async { body.read(&mut buffer).await.map_err(CopyError::Body) })
            .await?;
        if read == 0 {
            return Ok(total);
        }
        upload.write(cx, &buffer[..read]).await?;
        total += read as u64;
    }
}

impl ObjectStore {
    /// An uninitialized store with default [`Settings`].
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self::with_settings(network, Settings::default())
    }

    /// An uninitialized store.
    pub fn with_settings(network: Arc<dyn Network>, settings: Settings) -> Self {
        Self {
            settings,
            network,
            state: State::Uninitialized,
        }
    }

    /// The settings in effect.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Where the store is in its life.
    pub fn lifecycle(&self) -> Lifecycle {
        match self.state {
            State::Uninitialized => Lifecycle::Uninitialized,
            State::Ready(_) => Lifecycle::Ready,
            State::Closed => Lifecycle::Closed,
        }
    }

    /// Validates `config`, parses the root grant and proves it by opening a
    /// session.
    ///
    /// A failed `init` leaves the store uninitialized. A closed store cannot
    /// be initialized again.
    #[instrument(level = "debug", skip_all)]
    pub async fn init(
        &mut self,
        cx: &Context,
        config: &HashMap<String, String>,
    ) -> Result<(), ObjectStoreError> {
        if matches!(self.state, State::Closed) {
            return Err(ObjectStoreError::Closed);
        }
        self.state = State::Uninitialized;

        let config = self.settings.validate(config)?;
        let root =
            parse_root_access(&config.access_grant).map_err(ConfigError::InvalidGrant)?;

        let session = self
            .network
            .open_session(cx, root.grant())
            .await
            .map_err(|source| ObjectStoreError::Connect { source })?;
        drop(Lease::new(session));

        info!(
            satellite = root.grant().satellite(),
            linksharing = %config.linksharing_base_url,
            "Object store initialized"
        );
        self.state = State::Ready(Ready {
            root,
            linksharing_base_url: config.linksharing_base_url,
        });
        Ok(())
    }

    /// Tears the store down. Every later operation fails.
    pub fn close(&mut self) {
        if !matches!(self.state, State::Closed) {
            debug!("Object store closed");
        }
        self.state = State::Closed;
    }

    fn ready(&self) -> Result<&Ready, ObjectStoreError> {
        match &self.state {
            State::Ready(ready) => Ok(ready),
            State::Uninitialized => Err(ObjectStoreError::NotInitialized),
            State::Closed => Err(ObjectStoreError::Closed),
        }
    }

    async fn lease(
        &self,
        cx: &Context,
        operation: Operation,
        bucket: &str,
        key: &str,
    ) -> Result<Lease, ObjectStoreError> {
        let ready = self.ready()?;
        self.network
            .open_session(cx, ready.root.grant())
            .await
            .map(Lease::new)
            .map_err(|source| ObjectStoreError::network(operation, bucket, key, source))
    }

    /// Uploads everything `body` yields as `key`.
    ///
    /// The object only appears once the whole body was copied; if reading or
    /// writing fails the upload is aborted and the cause returned.
    #[instrument(level = "debug", skip_all, fields(bucket = %bucket, key = %key))]
    pub async fn put<R>(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
        mut body: R,
    ) -> Result<(), ObjectStoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let session = self.lease(cx, Operation::Put, bucket, key).await?;
        let network_error =
            |source| ObjectStoreError::network(Operation::Put, bucket, key, source);

        let mut upload = session
            .upload_object(cx, bucket, key)
            .await
            .map_err(network_error)?;

        let copied = copy(cx, &mut body, upload.as_mut(), self.settings.copy_buffer_size).await;
        let size = match copied {
            Ok(size) => size,
            Err(error) => {
                if let Err(abort_error) = upload.abort().await {
                    warn!(error = %abort_error, "Failed to abort upload");
                }
                return Err(match error {
                    CopyError::Body(source) => ObjectStoreError::Body {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        source,
                    },
                    CopyError::Network(source) => network_error(source),
                });
            }
        };

        upload.commit(cx).await.map_err(network_error)?;
        debug!(size, "Object committed");
        Ok(())
    }

    /// True when `key` exists. Missing objects and buckets are `false`.
    #[instrument(level = "debug", skip_all, fields(bucket = %bucket, key = %key))]
    pub async fn exists(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<bool, ObjectStoreError> {
        let session = self.lease(cx, Operation::Stat, bucket, key).await?;
        match session.stat_object(cx, bucket, key).await {
            Ok(_) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(source) => Err(ObjectStoreError::network(
                Operation::Stat,
                bucket,
                key,
                source,
            )),
        }
    }

    /// Opens `key` for reading.
    ///
    /// Reads honor `cx`. The session stays open until the reader is dropped.
    #[instrument(level = "debug", skip_all, fields(bucket = %bucket, key = %key))]
    pub async fn get(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectReader, ObjectStoreError> {
        let session = self.lease(cx, Operation::Get, bucket, key).await?;
        let download = session
            .download_object(cx, bucket, key)
            .await
            .map_err(|source| ObjectStoreError::network(Operation::Get, bucket, key, source))?;
        Ok(ObjectReader::new(download, cx.clone(), session))
    }

    async fn entries(
        &self,
        cx: &Context,
        operation: Operation,
        bucket: &str,
        options: ListOptions,
    ) -> Result<Vec<ObjectEntry>, ObjectStoreError> {
        let prefix = options.prefix.clone();
        let session = self.lease(cx, operation, bucket, &prefix).await?;
        session
            .list_objects(cx, bucket, options)
            .try_collect()
            .await
            .map_err(|source| ObjectStoreError::network(operation, bucket, &prefix, source))
    }

    /// Every object key below `prefix`, at any depth.
    #[instrument(level = "debug", skip_all, fields(bucket = %bucket, prefix = %prefix))]
    pub async fn list(
        &self,
        cx: &Context,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let options = ListOptions {
            prefix: prefix.to_string(),
            recursive: true,
        };
        let entries = self.entries(cx, Operation::List, bucket, options).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_prefix)
            .map(|entry| entry.key)
            .collect())
    }

    /// The distinct groups one `delimiter` below `prefix`, each ending in
    /// `delimiter`. An empty delimiter yields nothing.
    #[instrument(
        level = "debug",
        skip_all,
        fields(bucket = %bucket, prefix = %prefix, delimiter = %delimiter)
    )]
    pub async fn list_common_prefixes(
        &self,
        cx: &Context,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>, ObjectStoreError> {
        self.ready()?;
        if delimiter.is_empty() {
            return Ok(Vec::new());
        }

        // The network only groups on `/`; anything else is grouped here.
        let native = delimiter == "/";
        let options = ListOptions {
            prefix: prefix.to_string(),
            recursive: !native,
        };
        let entries = self
            .entries(cx, Operation::ListCommonPrefixes, bucket, options)
            .await?;

        if native {
            Ok(entries
                .into_iter()
                .filter(|entry| entry.is_prefix)
                .map(|entry| entry.key)
                .collect())
        } else {
            Ok(common_prefixes(
                entries.iter().map(|entry| entry.key.as_str()),
                prefix,
                delimiter,
            ))
        }
    }

    /// Deletes `key`. Deleting something that does not exist succeeds.
    #[instrument(level = "debug", skip_all, fields(bucket = %bucket, key = %key))]
    pub async fn delete(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<(), ObjectStoreError> {
        let session = self.lease(cx, Operation::Delete, bucket, key).await?;
        match session.delete_object(cx, bucket, key).await {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => {
                debug!(%error, "Nothing to delete");
                Ok(())
            }
            Err(source) => Err(ObjectStoreError::network(
                Operation::Delete,
                bucket,
                key,
                source,
            )),
        }
    }

    /// A link-sharing URL that downloads `key` until `ttl` from now.
    ///
    /// The embedded grant is derived from the root grant and can only reach
    /// `key` in `bucket`. No session is opened.
    #[instrument(level = "debug", skip_all, fields(bucket = %bucket, key = %key))]
    pub fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: TimeDelta,
    ) -> Result<String, ObjectStoreError> {
        let ready = self.ready()?;
        let derivation_error = |source| ObjectStoreError::Derivation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        };

        let derived =
            derive_shareable_access(&ready.root, bucket, key, ttl, self.settings.share_policy)
                .map_err(derivation_error)?;
        let token = derived
            .serialize()
            .map_err(|error| derivation_error(error.into()))?;

        debug!(not_after = %derived.not_after(), "Signed URL created");
        Ok(build_share_url(
            &ready.linksharing_base_url,
            &token,
            bucket,
            key,
        ))
    }
}
