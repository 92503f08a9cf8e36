use crate::supervisor::pid_record::PidRecord;
use bytes::Bytes;
use http_body_util::Full;
use hyper::http::Error;
use hyper::{Method, Response};
use std::fmt::Debug;
use tracing::error;

/// Read-only view the probe routes answer from.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pid_record: PidRecord,
}

impl ProbeContext {
    pub fn new(pid_record: PidRecord) -> Self {
        Self { pid_record }
    }

    pub fn pid_record(&self) -> &PidRecord {
        &self.pid_record
    }
}

pub trait Handlable: Send + Sync + Debug {
    fn method(&self) -> &Method;
    fn path(&self) -> &str;
    fn handle(&self, ctx: &ProbeContext) -> Result<Response<Full<Bytes>>, Error>;

    fn prepare_response(
        &self,
        message: String,
        http_status_code: u16,
    ) -> Result<Response<Full<Bytes>>, Error> {
        Response::builder()
            .status(http_status_code)
            .body(Full::new(Bytes::from(message)))
    }
}

#[derive(Debug, Clone)]
pub struct RouteData {
    pub method: Method,
    pub path: String,
}

#[derive(Debug)]
pub struct Router {
    routes: Vec<Box<dyn Handlable>>,
    not_found_route: Box<dyn Handlable>,
}

impl Router {
    pub fn new(routes: Vec<Box<dyn Handlable>>, not_found_route: Box<dyn Handlable>) -> Self {
        Self {
            routes,
            not_found_route,
        }
    }

    pub fn respond(&self, method: &Method, path: &str, ctx: &ProbeContext) -> Response<Full<Bytes>> {
        let route = self.route(method, path);
        match route.handle(ctx) {
            Ok(response) => response,
            Err(err) => {
                error!(path, error = %err, "unable to build probe response");
                let mut response = Response::new(Full::new(Bytes::from(err.to_string())));
                *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }

    fn route(&self, method: &Method, path: &str) -> &dyn Handlable {
        let path = path.trim_end_matches('/');
        self.routes
            .iter()
            .find(|route| route.method() == method && route.path() == path)
            .unwrap_or(&self.not_found_route)
            .as_ref()
    }
}
