use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Cursor;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use stash_credentials::{Action, ApiKey, Grant, Op, Secret};
use tracing::debug;

use crate::{
    Context, Download, ListOptions, Network, NetworkError, ObjectEntry, ObjectInfo, ObjectStream,
    Session, Upload,
};

/// Default number of entries per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    created: DateTime<Utc>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            created: self.created,
        }
    }
}

#[derive(Default)]
struct Project {
    heads: HashSet<Vec<u8>>,
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
}

struct Inner {
    address: String,
    secret: Secret,
    project: RwLock<Project>,
    sessions: AtomicUsize,
    faults: Mutex<VecDeque<NetworkError>>,
    page_size: AtomicUsize,
}

/// An in-memory satellite with a single project.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Satellite {
    inner: Arc<Inner>,
}

impl Default for Satellite {
    fn default() -> Self {
        Self::new("satellite.local:7777")
    }
}

impl Satellite {
    /// A satellite reachable at `address` with an empty project.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                address: address.into(),
                secret: Secret::generate(),
                project: RwLock::new(Project::default()),
                sessions: AtomicUsize::new(0),
                faults: Mutex::new(VecDeque::new()),
                page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
            }),
        }
    }

    /// Sets how many entries a listing page holds.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.inner
            .page_size
            .store(page_size.max(1), Ordering::Relaxed);
        self
    }

    /// The address embedded in grants issued by this satellite.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Issues an unrestricted grant for the project.
    pub fn issue_grant(&self) -> Grant {
        let api_key = ApiKey::generate(&self.inner.secret);
        self.inner
            .project
            .write()
            .heads
            .insert(api_key.head().to_vec());
        Grant::new(self.inner.address.clone(), api_key)
    }

    /// Creates a bucket.
    pub fn create_bucket(&self, bucket: &str) -> Result<(), NetworkError> {
        let mut project = self.inner.project.write();
        if project.buckets.contains_key(bucket) {
            return Err(NetworkError::BucketExists(bucket.to_string()));
        }
        project.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    /// Stores an object directly, bypassing authorization.
    pub fn insert_object(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
    ) -> Result<(), NetworkError> {
        self.store(bucket, key, data.into()).map(|_| ())
    }

    /// Reads an object directly, bypassing authorization.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .project
            .read()
            .buckets
            .get(bucket)?
            .get(key)
            .map(|object| object.data.clone())
    }

    /// Number of sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.inner.sessions.load(Ordering::SeqCst)
    }

    /// Makes the next request fail with `error`.
    ///
    /// Queued errors are consumed one per request, in order.
    pub fn fail_next(&self, error: NetworkError) {
        self.inner.faults.lock().push_back(error);
    }

    fn fault(&self) -> Result<(), NetworkError> {
        match self.inner.faults.lock().pop_front() {
            Some(error) => {
                debug!(%error, "Injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn authenticate(&self, grant: &Grant) -> Result<(), NetworkError> {
        if grant.satellite() != self.inner.address {
            return Err(NetworkError::InvalidAccess(format!(
                "grant is for satellite {}",
                grant.satellite()
            )));
        }
        let api_key = grant.api_key();
        let known = self.inner.project.read().heads.contains(api_key.head());
        if !known || !api_key.verify(&self.inner.secret) {
            return Err(NetworkError::InvalidAccess("API key rejected".into()));
        }
        Ok(())
    }

    fn store(&self, bucket: &str, key: &str, data: Bytes) -> Result<ObjectInfo, NetworkError> {
        if key.is_empty() {
            return Err(NetworkError::InvalidArgument("object key is empty".into()));
        }
        let mut project = self.inner.project.write();
        let objects = project
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| NetworkError::BucketNotFound(bucket.to_string()))?;
        let object = StoredObject {
            data,
            created: Utc::now(),
        };
        let info = object.info(key);
        objects.insert(key.to_string(), object);
        Ok(info)
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<StoredObject, NetworkError> {
        let project = self.inner.project.read();
        let objects = project
            .buckets
            .get(bucket)
            .ok_or_else(|| NetworkError::BucketNotFound(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| NetworkError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn remove(&self, bucket: &str, key: &str) -> Result<ObjectInfo, NetworkError> {
        let mut project = self.inner.project.write();
        let objects = project
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| NetworkError::BucketNotFound(bucket.to_string()))?;
        objects
            .remove(key)
            .map(|object| object.info(key))
            .ok_or_else(|| NetworkError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    /// Returns the entries after `cursor`, at most one page, and whether more
    /// remain.
    ///
    /// Entries whose key fails `visible` are skipped and do not count towards
    /// the page.
    fn list_page(
        &self,
        bucket: &str,
        options: &ListOptions,
        cursor: Option<&str>,
        visible: impl Fn(&str) -> bool,
    ) -> Result<(Vec<ObjectEntry>, bool), NetworkError> {
        let project = self.inner.project.read();
        let objects = project
            .buckets
            .get(bucket)
            .ok_or_else(|| NetworkError::BucketNotFound(bucket.to_string()))?;

        let prefix = options.prefix.as_str();
        let page_size = self.inner.page_size.load(Ordering::Relaxed);
        let mut entries: Vec<ObjectEntry> = Vec::with_capacity(page_size + 1);

        let keys = objects
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(key, _)| key);
        for key in keys {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };

            let entry = match rest.find('/') {
                Some(index) if !options.recursive => ObjectEntry {
                    key: format!("{prefix}{}", &rest[..=index]),
                    is_prefix: true,
                },
                _ => ObjectEntry {
                    key: key.clone(),
                    is_prefix: false,
                },
            };

            if cursor.is_some_and(|cursor| entry.key.as_str() <= cursor) {
                continue;
            }
            if !visible(&entry.key) {
                continue;
            }
            if entries.last().is_some_and(|last| last.key == entry.key) {
                continue;
            }

            entries.push(entry);
            if entries.len() > page_size {
                break;
            }
        }

        let more = entries.len() > page_size;
        entries.truncate(page_size);
        Ok((entries, more))
    }
}

#[async_trait]
impl Network for Satellite {
    async fn open_session(
        &self,
        cx: &Context,
        grant: &Grant,
    ) -> Result<Box<dyn Session>, NetworkError> {
        cx.run(async {
            self.fault()?;
            self.authenticate(grant)?;
            self.inner.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EmulatedSession {
                satellite: self.clone(),
                grant: grant.clone(),
                closed: Arc::new(AtomicBool::new(false)),
            }) as Box<dyn Session>)
        })
        .await
    }
}

struct EmulatedSession {
    satellite: Satellite,
    grant: Grant,
    closed: Arc<AtomicBool>,
}

impl EmulatedSession {
    fn admit(&self, op: Op, bucket: &str, key: &str) -> Result<(), NetworkError> {
        admit(&self.satellite, &self.grant, &self.closed, op, bucket, key)
    }
}

fn admit(
    satellite: &Satellite,
    grant: &Grant,
    closed: &AtomicBool,
    op: Op,
    bucket: &str,
    key: &str,
) -> Result<(), NetworkError> {
    if closed.load(Ordering::SeqCst) {
        return Err(NetworkError::SessionClosed);
    }
    satellite.fault()?;

    let action = Action {
        op,
        bucket,
        key,
        time: Utc::now(),
    };
    grant.authorize(&action).map_err(|denial| {
        debug!(%op, bucket, key, %denial, "Request refused");
        NetworkError::PermissionDenied(denial.to_string())
    })
}

#[async_trait]
impl Session for EmulatedSession {
    async fn stat_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectInfo, NetworkError> {
        cx.run(async {
            self.admit(Op::Read, bucket, key)?;
            self.satellite
                .lookup(bucket, key)
                .map(|object| object.info(key))
        })
        .await
    }

    async fn upload_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<Box<dyn Upload>, NetworkError> {
        cx.run(async {
            self.admit(Op::Write, bucket, key)?;
            if key.is_empty() {
                return Err(NetworkError::InvalidArgument("object key is empty".into()));
            }
            if !self
                .satellite
                .inner
                .project
                .read()
                .buckets
                .contains_key(bucket)
            {
                return Err(NetworkError::BucketNotFound(bucket.to_string()));
            }
            Ok(Box::new(EmulatedUpload {
                satellite: self.satellite.clone(),
                closed: self.closed.clone(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                buffer: Vec::new(),
            }) as Box<dyn Upload>)
        })
        .await
    }

    async fn download_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<Download, NetworkError> {
        cx.run(async {
            self.admit(Op::Read, bucket, key)?;
            let object = self.satellite.lookup(bucket, key)?;
            Ok(Box::pin(Cursor::new(object.data)) as Download)
        })
        .await
    }

    fn list_objects(&self, cx: &Context, bucket: &str, options: ListOptions) -> ObjectStream {
        let satellite = self.satellite.clone();
        let grant = self.grant.clone();
        let closed = self.closed.clone();
        let cx = cx.clone();
        let bucket = bucket.to_string();

        Box::pin(async_stream::stream! {
            let mut cursor: Option<String> = None;
            loop {
                let page: Result<(Vec<ObjectEntry>, bool), NetworkError> = cx
                    .run(async {
                        admit(&satellite, &grant, &closed, Op::List, &bucket, &options.prefix)?;
                        // A listing prefix can be covered while some keys below
                        // it are not, e.g. `backups/a` and `backups/ab/x`.
                        let time = Utc::now();
                        let visible = |key: &str| {
                            grant
                                .authorize(&Action { op: Op::List, bucket: &bucket, key, time })
                                .is_ok()
                        };
                        satellite.list_page(&bucket, &options, cursor.as_deref(), visible)
                    })
                    .await;

                match page {
                    Ok((entries, more)) => {
                        cursor = entries.last().map(|entry| entry.key.clone());
                        for entry in entries {
                            yield Ok(entry);
                        }
                        if !more {
                            break;
                        }
                    }
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        })
    }

    async fn delete_object(
        &self,
        cx: &Context,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectInfo, NetworkError> {
        cx.run(async {
            self.admit(Op::Delete, bucket, key)?;
            self.satellite.remove(bucket, key)
        })
        .await
    }

    fn close(&self) -> Result<(), NetworkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(NetworkError::SessionClosed);
        }
        self.satellite.inner.sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct EmulatedUpload {
    satellite: Satellite,
    closed: Arc<AtomicBool>,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
}

impl EmulatedUpload {
    fn check(&self) -> Result<(), NetworkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::SessionClosed);
        }
        self.satellite.fault()
    }
}

#[async_trait]
impl Upload for EmulatedUpload {
    async fn write(&mut self, cx: &Context, data: &[u8]) -> Result<(), NetworkError> {
        cx.check()?;
        self.check()?;
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn commit(self: Box<Self>, cx: &Context) -> Result<ObjectInfo, NetworkError> {
        cx.check()?;
        self.check()?;
        let EmulatedUpload {
            satellite,
            bucket,
            key,
            buffer,
            ..
        } = *self;
        satellite.store(&bucket, &key, Bytes::from(buffer))
    }

    async fn abort(self: Box<Self>) -> Result<(), NetworkError> {
        debug!(bucket = %self.bucket, key = %self.key, "Upload aborted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use pretty_assertions::assert_eq;
    use stash_credentials::{Permission, SharePrefix};
    use testresult::TestResult;
    use tokio::io::AsyncReadExt;

    fn keys(entries: &[ObjectEntry]) -> Vec<(&str, bool)> {
        entries
            .iter()
            .map(|entry| (entry.key.as_str(), entry.is_prefix))
            .collect()
    }

    async fn open(satellite: &Satellite, grant: &Grant) -> Result<Box<dyn Session>, NetworkError> {
        satellite.open_session(&Context::background(), grant).await
    }

    #[test_log::test(tokio::test)]
    async fn it_uploads_and_downloads() -> TestResult {
        let satellite = Satellite::default();
        satellite.create_bucket("velero")?;
        let session = open(&satellite, &satellite.issue_grant()).await?;
        let cx = Context::background();

        let mut upload = session.upload_object(&cx, "velero", "a/b").await?;
        upload.write(&cx, b"hello ").await?;
        upload.write(&cx, b"world").await?;

        // Invisible until committed.
        assert_eq!(satellite.object("velero", "a/b"), None);
        let info = upload.commit(&cx).await?;
        assert_eq!(info.size, 11);

        let mut body = Vec::new();
        session
            .download_object(&cx, "velero", "a/b")
            .await?
            .read_to_end(&mut body)
            .await?;
        assert_eq!(body, b"hello world");

        session.close()?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_discards_aborted_uploads() -> TestResult {
        let satellite = Satellite::default();
        satellite.create_bucket("velero")?;
        let session = open(&satellite, &satellite.issue_grant()).await?;
        let cx = Context::background();

        let mut upload = session.upload_object(&cx, "velero", "k").await?;
        upload.write(&cx, b"partial").await?;
        upload.abort().await?;

        assert_eq!(satellite.object("velero", "k"), None);
        session.close()?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_distinguishes_missing_buckets_from_missing_objects() -> TestResult {
        let satellite = Satellite::default();
        satellite.create_bucket("velero")?;
        let session = open(&satellite, &satellite.issue_grant()).await?;
        let cx = Context::background();

        assert_eq!(
            session.stat_object(&cx, "nope", "k").await,
            Err(NetworkError::BucketNotFound("nope".into()))
        );
        assert_eq!(
            session.stat_object(&cx, "velero", "k").await,
            Err(NetworkError::ObjectNotFound {
                bucket: "velero".into(),
                key: "k".into()
            })
        );
        session.close()?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_groups_non_recursive_listings() -> TestResult {
        let satellite = Satellite::default().with_page_size(2);
        satellite.create_bucket("b")?;
        for key in ["p/x/1", "p/x/2", "p/y/1", "p/z", "p-sibling", "q/1"] {
            satellite.insert_object("b", key, "data")?;
        }
        let session = open(&satellite, &satellite.issue_grant()).await?;
        let cx = Context::background();

        let options = ListOptions {
            prefix: "p/".into(),
            recursive: false,
        };
        let entries: Vec<ObjectEntry> = session.list_objects(&cx, "b", options).try_collect().await?;
        assert_eq!(
            keys(&entries),
            vec![("p/x/", true), ("p/y/", true), ("p/z", false)]
        );

        let options = ListOptions {
            prefix: "p/".into(),
            recursive: true,
        };
        let entries: Vec<ObjectEntry> = session.list_objects(&cx, "b", options).try_collect().await?;
        assert_eq!(
            keys(&entries),
            vec![
                ("p/x/1", false),
                ("p/x/2", false),
                ("p/y/1", false),
                ("p/z", false)
            ]
        );

        session.close()?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_rejects_grants_it_did_not_issue() -> TestResult {
        let satellite = Satellite::default();
        let other = Satellite::default();

        let result = open(&satellite, &other.issue_grant()).await;
        assert!(matches!(result, Err(NetworkError::InvalidAccess(_))));
        assert_eq!(satellite.open_sessions(), 0);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_enforces_caveats_per_request() -> TestResult {
        let satellite = Satellite::default();
        satellite.create_bucket("velero")?;
        satellite.create_bucket("restic")?;
        satellite.insert_object("velero", "x/1", "one")?;
        satellite.insert_object("velero", "y/1", "two")?;
        satellite.insert_object("restic", "x/1", "three")?;

        let grant = satellite
            .issue_grant()
            .share(&Permission::download_only(), &[SharePrefix::new("velero", "x/")?])?;
        let session = open(&satellite, &grant).await?;
        let cx = Context::background();

        assert!(session.stat_object(&cx, "velero", "x/1").await.is_ok());
        for (bucket, key) in [("velero", "y/1"), ("restic", "x/1")] {
            assert!(matches!(
                session.stat_object(&cx, bucket, key).await,
                Err(NetworkError::PermissionDenied(_))
            ));
        }
        assert!(matches!(
            session.delete_object(&cx, "velero", "x/1").await,
            Err(NetworkError::PermissionDenied(_))
        ));

        session.close()?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_hides_listed_keys_outside_the_grant() -> TestResult {
        let satellite = Satellite::default().with_page_size(1);
        satellite.create_bucket("velero")?;
        for key in ["backups/a", "backups/a/x", "backups/ab/secret", "backups/ab/z"] {
            satellite.insert_object("velero", key, "data")?;
        }

        let grant = satellite
            .issue_grant()
            .share(&Permission::read_only(), &[SharePrefix::new("velero", "backups/a")?])?;
        let session = open(&satellite, &grant).await?;
        let cx = Context::background();

        let options = ListOptions {
            prefix: "backups/a".into(),
            recursive: true,
        };
        let entries: Vec<ObjectEntry> = session.list_objects(&cx, "velero", options).try_collect().await?;
        assert_eq!(
            keys(&entries),
            vec![("backups/a", false), ("backups/a/x", false)]
        );

        let options = ListOptions {
            prefix: "backups/a".into(),
            recursive: false,
        };
        let entries: Vec<ObjectEntry> = session.list_objects(&cx, "velero", options).try_collect().await?;
        assert_eq!(
            keys(&entries),
            vec![("backups/a", false), ("backups/a/", true)]
        );

        session.close()?;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_counts_sessions_and_closes_once() -> TestResult {
        let satellite = Satellite::default();
        let grant = satellite.issue_grant();

        let first = open(&satellite, &grant).await?;
        let second = open(&satellite, &grant).await?;
        assert_eq!(satellite.open_sessions(), 2);

        first.close()?;
        assert_eq!(first.close(), Err(NetworkError::SessionClosed));
        assert_eq!(satellite.open_sessions(), 1);

        second.close()?;
        assert_eq!(satellite.open_sessions(), 0);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn it_fails_injected_requests_in_order() -> TestResult {
        let satellite = Satellite::default();
        satellite.create_bucket("b")?;
        let grant = satellite.issue_grant();
        satellite.fail_next(NetworkError::Transport("connection reset".into()));

        assert_eq!(
            open(&satellite, &grant).await.err(),
            Some(NetworkError::Transport("connection reset".into()))
        );

        let session = open(&satellite, &grant).await?;
        session.close()?;
        Ok(())
    }
}
