//! Link-sharing HTTP test server (native-only).

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::debug;

use super::Linksharing;
use crate::Context;

/// A running link-sharing server.
pub struct LinksharingServer {
    base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl LinksharingServer {
    /// Serves `linksharing` on an ephemeral local port.
    pub async fn start(linksharing: Linksharing) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{}", addr);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = listener.accept() => {
                        if let Ok((stream, _)) = result {
                            let linksharing = linksharing.clone();
                            tokio::spawn(async move {
                                let service = hyper::service::service_fn(move |req| {
                                    let linksharing = linksharing.clone();
                                    async move { handle_request(req, linksharing).await }
                                });
                                let _ = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await;
                            });
                        }
                    }
                }
            }
        });

        Ok(Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// The URL links should be rooted at.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stops the server.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

impl Drop for LinksharingServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<Incoming>,
    linksharing: Linksharing,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    }

    match linksharing.resolve(&Context::background(), req.uri().path()).await {
        Ok(body) => Ok(respond(StatusCode::OK, body)),
        Err(error) => {
            debug!(path = req.uri().path(), %error, "Link refused");
            let status = StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok(respond(status, error.to_string()))
        }
    }
}
