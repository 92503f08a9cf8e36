use super::http_router::{Handlable, ProbeContext, RouteData, Router};
use super::http_routes::{HealthzRoute, Route404, StatusRoute};
use crate::supervisor::pid_record::PidRecord;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::{convert::Infallible, net::SocketAddr};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub fn probe_router() -> Router {
    Router::new(
        vec![
            Box::new(HealthzRoute {
                data: RouteData {
                    method: Method::GET,
                    path: "/healthz".to_string(),
                },
            }) as Box<dyn Handlable>,
            Box::new(StatusRoute {
                data: RouteData {
                    method: Method::GET,
                    path: "/status".to_string(),
                },
            }) as Box<dyn Handlable>,
        ],
        Box::new(Route404 {
            data: RouteData {
                method: Method::GET,
                path: "/404".to_string(),
            },
        }) as Box<dyn Handlable>,
    )
}

pub async fn start_http_server(
    addr: SocketAddr,
    pid_record: PidRecord,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, pid_record, cancel).await
}

/// Accepts probe connections until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    pid_record: PidRecord,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let http_service = HttpService {
        router: Arc::new(probe_router()),
        ctx: Arc::new(ProbeContext::new(pid_record)),
    };
    info!(addr = ?listener.local_addr()?, "probe server listening");

    loop {
        let (tcp, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("probe server stopped");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(tcp);

        let http_service_cloned = http_service.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, http_service_cloned)
                .await
            {
                warn!(?peer, error = %err, "error serving probe connection");
            }
        });
    }
}

#[derive(Debug, Clone)]
struct HttpService {
    router: Arc<Router>,
    ctx: Arc<ProbeContext>,
}

impl Service<Request<Incoming>> for HttpService {
    type Response = Response<Full<Bytes>>;

    type Error = Infallible;

    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let response = self
            .router
            .respond(request.method(), request.uri().path(), &self.ctx);
        debug!(path = request.uri().path(), status = %response.status(), "probe request");
        Box::pin(async move { Ok(response) })
    }
}
