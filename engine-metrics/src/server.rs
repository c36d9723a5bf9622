// Copyright (c) 2023 MASSA LABS <info@massa.net>

use std::net::SocketAddr;
use std::thread::JoinHandle;

use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Request, Response, StatusCode,
};
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info, warn};

/// Stops the diagnostics server when asked to, or when dropped.
pub struct MetricsStopper {
    stopper: Option<tokio::sync::oneshot::Sender<()>>,
    stop_handle: Option<JoinHandle<()>>,
}

impl MetricsStopper {
    /// Triggers the graceful shutdown and joins the server thread.
    pub fn stop(&mut self) {
        if let Some(stopper) = self.stopper.take() {
            let _ = stopper.send(());
        }
        if let Some(handle) = self.stop_handle.take() {
            if handle.join().is_err() {
                warn!("METRICS | server thread panicked");
            }
        }
    }
}

impl Drop for MetricsStopper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serves `/metrics` on `addr` from a dedicated thread and runtime.
pub fn bind_metrics(addr: SocketAddr) -> MetricsStopper {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("METRICS | could not build runtime: {}", e);
                return;
            }
        };

        rt.block_on(async {
            let server = match hyper::Server::try_bind(&addr) {
                Ok(builder) => builder.serve(make_service_fn(|_| async {
                    Ok::<_, hyper::Error>(service_fn(serve_req))
                })),
                Err(e) => {
                    error!("METRICS | could not bind {}: {}", addr, e);
                    return;
                }
            };

            let graceful_server = server.with_graceful_shutdown(async {
                rx.await.ok();
            });
            info!("METRICS | listening on http://{}", addr);
            if let Err(e) = graceful_server.await {
                error!("metrics server error: {}", e);
            }
            info!("METRICS | server stopped");
        });
    });
    MetricsStopper {
        stopper: Some(tx),
        stop_handle: Some(handle),
    }
}

pub(crate) async fn serve_req(req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let mut response = Response::new(Body::empty());
    if req.uri().path() != "/metrics" {
        *response.status_mut() = StatusCode::NOT_FOUND;
        *response.body_mut() = Body::from("Not Found");
        return Ok(response);
    }
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("METRICS | could not encode metrics: {}", e);
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }
    if let Ok(content_type) = encoder.format_type().parse() {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    *response.body_mut() = Body::from(buffer);
    Ok(response)
}
