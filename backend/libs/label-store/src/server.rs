//! HTTP listener for the label store
//!
//! Serves `com.atproto.label.queryLabels` plus `/health` and `/ready`.

use crate::error::LabelStoreError;
use crate::models::{Label, LabelQuery};
use crate::store::LabelStore;
use actix_web::dev::ServerHandle;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const QUERY_LABELS_PATH: &str = "/xrpc/com.atproto.label.queryLabels";

#[derive(Debug, Serialize)]
struct QueryLabelsOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
    labels: Vec<Label>,
}

#[derive(Debug, Serialize)]
struct XrpcError<'a> {
    error: &'a str,
    message: String,
}

pub struct LabelerServer {
    store: Arc<LabelStore>,
}

/// A running listener
pub struct RunningServer {
    handle: ServerHandle,
    task: JoinHandle<std::io::Result<()>>,
    addrs: Vec<SocketAddr>,
}

impl LabelerServer {
    pub fn new(store: Arc<LabelStore>) -> Self {
        Self { store }
    }

    /// Route table, shared with tests
    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.route(QUERY_LABELS_PATH, web::get().to(query_labels))
            .route(
                "/health",
                web::get().to(|| async { HttpResponse::Ok().body("OK") }),
            )
            .route(
                "/ready",
                web::get().to(|| async { HttpResponse::Ok().body("READY") }),
            );
    }

    /// Bind `host:port` and start serving
    ///
    /// Binding happens before this returns, so an address in use or a bad
    /// host is reported to the caller instead of inside the server task.
    pub fn listen(&self, host: &str, port: u16) -> std::io::Result<RunningServer> {
        let store = web::Data::from(self.store.clone());

        let server = HttpServer::new(move || {
            App::new()
                .app_data(store.clone())
                .configure(Self::configure)
        })
        .workers(2)
        .disable_signals()
        .bind((host, port))?;

        let addrs = server.addrs();
        let server = server.run();
        let handle = server.handle();
        let task = tokio::spawn(server);

        for addr in &addrs {
            info!("Labeler listening on http://{}", addr);
        }

        Ok(RunningServer {
            handle,
            task,
            addrs,
        })
    }
}

impl RunningServer {
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn stop(self) {
        self.handle.stop(true).await;
        match self.task.await {
            Ok(Ok(())) => info!("Labeler listener stopped"),
            Ok(Err(e)) => error!("Labeler listener exited with error: {}", e),
            Err(e) => error!("Labeler listener task failed: {}", e),
        }
    }
}

async fn query_labels(req: HttpRequest, store: web::Data<LabelStore>) -> HttpResponse {
    let query = match parse_label_query(req.query_string()) {
        Ok(query) => query,
        Err(e) => return xrpc_error(StatusCode::BAD_REQUEST, "InvalidRequest", e.to_string()),
    };

    match store.query_labels(&query).await {
        Ok(page) => HttpResponse::Ok().json(QueryLabelsOutput {
            cursor: page.cursor.map(|seq| seq.to_string()),
            labels: page.labels,
        }),
        Err(LabelStoreError::InvalidRequest(message)) => {
            xrpc_error(StatusCode::BAD_REQUEST, "InvalidRequest", message)
        }
        Err(e) => {
            error!("queryLabels failed: {}", e);
            xrpc_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "failed to query labels".to_string(),
            )
        }
    }
}

/// Parse a queryLabels query string; array parameters may repeat
pub fn parse_label_query(query_string: &str) -> Result<LabelQuery, LabelStoreError> {
    let mut query = LabelQuery::default();

    for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
        match key.as_ref() {
            "uriPatterns" | "uriPatterns[]" => query.uri_patterns.push(value.into_owned()),
            "sources" | "sources[]" => query.sources.push(value.into_owned()),
            "limit" => {
                let limit = value.parse::<i64>().map_err(|_| {
                    LabelStoreError::InvalidRequest(format!(
                        "limit must be an integer, got '{}'",
                        value
                    ))
                })?;
                query.limit = Some(limit);
            }
            "cursor" => {
                let cursor = value.parse::<i64>().map_err(|_| {
                    LabelStoreError::InvalidRequest(format!(
                        "cursor must be an integer, got '{}'",
                        value
                    ))
                })?;
                query.cursor = Some(cursor);
            }
            other => warn!(param = %other, "Ignoring unknown queryLabels parameter"),
        }
    }

    Ok(query)
}

fn xrpc_error(status: StatusCode, error: &str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(XrpcError { error, message })
}
