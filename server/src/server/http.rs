//! Admin HTTP server for health checks and metrics

use crate::audit;
use crate::dump::DumpService;
use crate::metrics;
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serve /healthz, /readyz, and /metrics on `incoming` until `shutdown` fires.
pub async fn serve_admin(
    incoming: AddrIncoming,
    service: Arc<DumpService>,
    shutdown: CancellationToken,
) -> Result<(), hyper::Error> {
    let addr = incoming.local_addr();
    let make_svc = make_service_fn(move |_| {
        let service = service.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let service = service.clone();
                async move { Ok::<_, hyper::Error>(handle(req, service).await) }
            }))
        }
    });

    tracing::info!("Admin HTTP server listening on {}", addr);
    Server::builder(incoming)
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

async fn handle(req: Request<Body>, service: Arc<DumpService>) -> Response<Body> {
    let path = req.uri().path();
    let response = match path {
        "/healthz" => text_response(StatusCode::OK, "ok\n"),

        // Ready once the runtime's metadata decodes; the first decode blocks
        "/readyz" => match tokio::task::spawn_blocking(move || service.metadata().map(|_| ())).await {
            Ok(Ok(())) => text_response(StatusCode::OK, "ready\n"),
            Ok(Err(e)) => {
                tracing::debug!("Readiness check failed: {}", e);
                text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
            }
            Err(e) => {
                tracing::warn!("Readiness task failed: {}", e);
                text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
            }
        },

        "/metrics" => {
            let mut response = Response::new(Body::from(metrics::encode_metrics()));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }

        _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
    };

    if path == "/metrics" || path == "/readyz" || path == "/healthz" {
        audit::admin_http_request(path, response.status().as_u16());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CoverageRuntime, InProcessRuntime, PackageSpec};
    use covpull_shared::{CounterMode, CoverableUnit, FuncDesc};
    use std::io::{self, Write};

    struct NoMeta;

    impl CoverageRuntime for NoMeta {
        fn write_counters(&self, _sink: &mut dyn Write) -> io::Result<()> {
            Ok(())
        }

        fn write_meta(&self, sink: &mut dyn Write) -> io::Result<()> {
            sink.write_all(b"junk")
        }

        fn clear_counters(&self) -> io::Result<()> {
            Ok(())
        }
    }

    fn get(path: &str) -> Request<Body> {
        Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_readyz_decodes_metadata() {
        let rt = InProcessRuntime::builder(CounterMode::Set)
            .args(["http-test"])
            .package(
                PackageSpec::new("p", "p", "p")
                    .func(FuncDesc::new("p/a.go", "A").with_unit(CoverableUnit::new(1, 1, 1, 2, 1))),
            )
            .build();
        let service = Arc::new(DumpService::new(Arc::new(rt)));
        assert!(!service.is_ready());

        let response = handle(get("/readyz"), service.clone()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(service.is_ready());
    }

    #[tokio::test]
    async fn test_readyz_reports_bad_metadata() {
        let service = Arc::new(DumpService::new(Arc::new(NoMeta)));
        let response = handle(get("/readyz"), service.clone()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!service.is_ready());

        let response = handle(get("/nope"), service).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
