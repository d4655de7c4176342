use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use stash_network::{Context, Download};
use tokio::io::{AsyncRead, ReadBuf};

use crate::lease::Lease;

/// The bytes of an object, read lazily.
///
/// The session the download came from stays open until the reader is closed
/// or dropped, whether or not it was read to the end. Reads fail once the
/// [`Context`] the object was opened with is cancelled.
pub struct ObjectReader {
    download: Download,
    cx: Context,
    _lease: Lease,
}

impl ObjectReader {
    pub(crate) fn new(download: Download, cx: Context, lease: Lease) -> Self {
        Self {
            download,
            cx,
            _lease: lease,
        }
    }

    /// Stops reading and releases the session.
    pub fn close(self) {}
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        self: Pin<&mut Self>,
        task: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(error) = this.cx.check() {
            return Poll::Ready(Err(io::Error::other(error)));
        }
        this.download.as_mut().poll_read(task, buf)
    }
}
