//! HTTP entry point for the silt engine.
//!
//! Exposes the key/value surface over a tiny REST API:
//!
//! - `PUT /v1/<key>` stores the request body under the key (201)
//! - `GET /v1/<key>` returns the stored value (200, or 404 when unknown)
//! - `DELETE /v1/<key>` tombstones the key (200)
//!
//! The engine itself is single-writer, so requests take it through a mutex;
//! the network layer is what serializes access.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use silt_common::config::{Config, StorageConfig};
use silt_core::sstable::Backend;
use silt_core::{ByteCodec, Engine, Error, FileLog, OsVfs, SegmentStore, Tree};

const SEGMENT_LOG_FILE: &str = "segments.wal";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().context("loading configuration")?;
    let addr = config
        .server
        .listen_addr()
        .context("resolving listen address")?;

    let engine = build_engine(&config.storage).context("opening storage engine")?;
    let engine = Arc::new(Mutex::new(engine));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("silt-server")
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        let make_service = make_service_fn(move |_conn| {
            let engine = engine.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(engine.clone(), req)))
            }
        });

        let server = Server::bind(&addr).serve(make_service);
        info!(%addr, "silt server listening");

        server
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutting down");
            })
            .await
    })?;

    Ok(())
}

/// Opens the durable state described by the storage config and recovers the
/// segment store from its log.
fn build_engine(storage: &StorageConfig) -> silt_core::Result<Engine> {
    let backend = Box::new(Backend::new(
        storage.data_dir.clone(),
        Arc::new(OsVfs),
        Arc::new(ByteCodec),
        storage.index_factor,
        || Box::new(Tree::new()),
    ));
    let log = Box::new(FileLog::open(storage.data_dir.join(SEGMENT_LOG_FILE))?);
    let segments = SegmentStore::recover(backend, log)?;

    Ok(Engine::new(
        segments,
        || Box::new(Tree::new()),
        storage.flush_threshold,
    ))
}

async fn handle(
    engine: Arc<Mutex<Engine>>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    Ok(route(engine, req).await)
}

async fn route(engine: Arc<Mutex<Engine>>, req: Request<Body>) -> Response<Body> {
    let Some(key) = key_from_path(req.uri().path()) else {
        return status(StatusCode::NOT_FOUND, "unknown route");
    };
    let key = key.to_string();

    match *req.method() {
        Method::GET => {
            let result = match engine.lock() {
                Ok(mut engine) => engine.get(&key),
                Err(_) => return status(StatusCode::INTERNAL_SERVER_ERROR, "engine poisoned"),
            };

            match result {
                Ok(value) => Response::new(Body::from(value)),
                Err(Error::NoSuchKey) => status(StatusCode::NOT_FOUND, "no such key"),
                Err(e) => internal_error("get", &key, e),
            }
        }
        Method::PUT => {
            let value = match hyper::body::to_bytes(req.into_body()).await {
                Ok(value) => value,
                Err(_) => return status(StatusCode::BAD_REQUEST, "unreadable body"),
            };

            let result = match engine.lock() {
                Ok(mut engine) => engine.put(&key, value),
                Err(_) => return status(StatusCode::INTERNAL_SERVER_ERROR, "engine poisoned"),
            };

            match result {
                Ok(()) => status(StatusCode::CREATED, ""),
                Err(e) => internal_error("put", &key, e),
            }
        }
        Method::DELETE => {
            let result = match engine.lock() {
                Ok(mut engine) => engine.delete(&key),
                Err(_) => return status(StatusCode::INTERNAL_SERVER_ERROR, "engine poisoned"),
            };

            match result {
                Ok(()) => status(StatusCode::OK, ""),
                Err(e) => internal_error("delete", &key, e),
            }
        }
        _ => status(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
    }
}

/// Extracts the key from a `/v1/<key>` path.
fn key_from_path(path: &str) -> Option<&str> {
    let key = path.strip_prefix("/v1/")?;
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key)
}

fn status(code: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(code)
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

fn internal_error(op: &str, key: &str, e: Error) -> Response<Body> {
    error!(op, key, error = %e, "request failed");
    status(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
}
