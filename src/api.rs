//! REST binding for the reconciler
//!
//! Routes:
//!   GET            /api/{identifier}   fetch the stored record
//!   POST|PUT       /api/               create (identifier taken from the body)
//!   POST|PUT       /api/{identifier}   replace
//!   DELETE         /api/{identifier}   delete
//!   GET            /health, /version
//!
//! A 500 with code RELOAD_FAILED means the change is stored but the proxy
//! containers could not all be signaled.

use crate::error::{json_error_response, ErrorCode, ReconcileError};
use crate::reconciler::Reconciler;
use crate::record::ChangeRecord;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Largest request body accepted
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const API_PREFIX: &str = "/api";

/// Plain response with no content type; used for `/health`
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Response carrying an already-encoded JSON body
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Map a reconciler failure to its HTTP response. Server-side failures
/// log at error level, caller mistakes at warn.
fn error_response(err: &ReconcileError) -> Response<Full<Bytes>> {
    let code = err.code();
    if code.status_code().is_server_error() {
        error!(error = %err, committed = err.change_committed(), "Request failed");
    } else {
        warn!(error = %err, "Request rejected");
    }
    json_error_response(code, err.to_string())
}

pub struct ApiServer {
    bind_addr: SocketAddr,
    reconciler: Arc<Reconciler>,
    shutdown_rx: watch::Receiver<bool>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl ApiServer {
    pub fn new(
        bind_addr: SocketAddr,
        reconciler: Arc<Reconciler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            reconciler,
            shutdown_rx,
            tls_acceptor: None,
        }
    }

    /// Serve over TLS with the given acceptor
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let protocol = if self.tls_enabled() { "HTTPS" } else { "HTTP" };
        info!(%addr, protocol, "API server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let reconciler = Arc::clone(&self.reconciler);
                            let tls_acceptor = self.tls_acceptor.clone();

                            tokio::spawn(async move {
                                if let Some(acceptor) = tls_acceptor {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            if let Err(e) = serve_connection(tls_stream, reconciler).await {
                                                debug!(addr = %addr, error = %e, "TLS connection error");
                                            }
                                        }
                                        Err(e) => {
                                            debug!(addr = %addr, error = %e, "TLS handshake failed");
                                        }
                                    }
                                } else if let Err(e) = serve_connection(stream, reconciler).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("API server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(stream: S, reconciler: Arc<Reconciler>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let reconciler = Arc::clone(&reconciler);
        async move { handle_request(req, reconciler).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Where a request path points
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Health,
    Version,
    Collection,
    Entry(String),
    Unknown,
}

fn route(path: &str) -> Route {
    match path {
        "/health" => return Route::Health,
        "/version" => return Route::Version,
        _ => {}
    }

    let Some(rest) = path.strip_prefix(API_PREFIX) else {
        return Route::Unknown;
    };
    match rest {
        "" | "/" => Route::Collection,
        _ => match rest.strip_prefix('/') {
            Some(segment) if !segment.contains('/') => match urlencoding::decode(segment) {
                Ok(identifier) => Route::Entry(identifier.into_owned()),
                Err(_) => Route::Unknown,
            },
            _ => Route::Unknown,
        },
    }
}

pub async fn handle_request(
    req: Request<Incoming>,
    reconciler: Arc<Reconciler>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = uuid::Uuid::new_v4();
    let span = info_span!("request", %request_id, %method, %path);

    async move {
        debug!("API request");

        let response = match (route(&path), &method) {
            (Route::Health, &Method::GET) => response(StatusCode::OK, "ok"),

            (Route::Version, &Method::GET) => {
                let version_info = serde_json::json!({
                    "name": PKG_NAME,
                    "version": VERSION,
                });
                json_response(StatusCode::OK, version_info.to_string())
            }

            (Route::Collection, &Method::POST | &Method::PUT) => match read_record(req).await {
                Ok(record) => match reconciler.create(record).await {
                    Ok(record) => record_response(&record),
                    Err(e) => error_response(&e),
                },
                Err(resp) => resp,
            },

            (Route::Entry(identifier), &Method::GET) => match reconciler.fetch(&identifier).await {
                Ok(bytes) => json_response(StatusCode::OK, bytes),
                Err(e) => error_response(&e),
            },

            (Route::Entry(identifier), &Method::POST | &Method::PUT) => match read_record(req).await {
                Ok(record) => match reconciler.replace(&identifier, record).await {
                    Ok(record) => record_response(&record),
                    Err(e) => error_response(&e),
                },
                Err(resp) => resp,
            },

            (Route::Entry(identifier), &Method::DELETE) => match reconciler.delete(&identifier).await {
                Ok(removed) => {
                    let body = serde_json::json!({
                        "identifier": identifier,
                        "removed": removed,
                    });
                    json_response(StatusCode::OK, body.to_string())
                }
                Err(e) => error_response(&e),
            },

            (Route::Unknown, _) => json_error_response(ErrorCode::RouteNotFound, "not found"),

            (_, method) => json_error_response(
                ErrorCode::MethodNotAllowed,
                format!("method {} not allowed on {}", method, path),
            ),
        };

        debug!(status = response.status().as_u16(), "API response");
        Ok(response)
    }
    .instrument(span)
    .await
}

async fn read_record(req: Request<Incoming>) -> Result<ChangeRecord, Response<Full<Bytes>>> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to read request body");
            json_error_response(
                ErrorCode::InvalidRequest,
                format!("error reading request body: {}", e),
            )
        })?
        .to_bytes();

    serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Malformed request body");
        json_error_response(
            ErrorCode::InvalidRequest,
            format!("error unmarshalling request body: {}", e),
        )
    })
}

fn record_response(record: &ChangeRecord) -> Response<Full<Bytes>> {
    match serde_json::to_vec(record) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => json_error_response(ErrorCode::StorageFailed, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route() {
        assert_eq!(route("/health"), Route::Health);
        assert_eq!(route("/version"), Route::Version);
        assert_eq!(route("/api"), Route::Collection);
        assert_eq!(route("/api/"), Route::Collection);
        assert_eq!(route("/api/app1"), Route::Entry("app1".to_string()));
        assert_eq!(route("/api/app1/extra"), Route::Unknown);
        assert_eq!(route("/apis/app1"), Route::Unknown);
        assert_eq!(route("/"), Route::Unknown);
    }

    #[test]
    fn test_route_decodes_identifier() {
        assert_eq!(route("/api/my%20site"), Route::Entry("my site".to_string()));
        assert_eq!(route("/api/a%2Fb"), Route::Entry("a/b".to_string()));
    }

    #[test]
    fn test_record_response_body() {
        let record = ChangeRecord::with_host("app1", "svc", Some(80));
        let response = record_response(&record);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "application/json");
    }
}
