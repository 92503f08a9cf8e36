use super::http_router::{Handlable, ProbeContext, RouteData};
use crate::supervisor::is_alive;
use bytes::Bytes;
use http_body_util::Full;
use hyper::http::Error;
use hyper::{Method, Response};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ProbeStatus {
    pub pid: Option<u32>,
    pub alive: bool,
}

impl ProbeStatus {
    pub fn read(ctx: &ProbeContext) -> Self {
        let pid = ctx.pid_record().read();
        Self {
            pid,
            alive: pid.map(is_alive).unwrap_or(false),
        }
    }
}

/// 200 while the recorded process is alive, 503 otherwise.
#[derive(Debug)]
pub struct HealthzRoute {
    pub data: RouteData,
}

impl Handlable for HealthzRoute {
    fn method(&self) -> &Method {
        &self.data.method
    }
    fn path(&self) -> &str {
        self.data.path.as_str()
    }
    fn handle(&self, ctx: &ProbeContext) -> Result<Response<Full<Bytes>>, Error> {
        match ProbeStatus::read(ctx) {
            ProbeStatus { alive: true, .. } => self.prepare_response("ok".to_string(), 200),
            ProbeStatus { pid: Some(pid), .. } => {
                self.prepare_response(format!("process {} is not running", pid), 503)
            }
            ProbeStatus { pid: None, .. } => {
                self.prepare_response("no process recorded".to_string(), 503)
            }
        }
    }
}

#[derive(Debug)]
pub struct StatusRoute {
    pub data: RouteData,
}

impl Handlable for StatusRoute {
    fn method(&self) -> &Method {
        &self.data.method
    }
    fn path(&self) -> &str {
        self.data.path.as_str()
    }
    fn handle(&self, ctx: &ProbeContext) -> Result<Response<Full<Bytes>>, Error> {
        let status = ProbeStatus::read(ctx);
        match serde_json::to_string(&status) {
            Ok(json) => Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(json))),
            Err(e) => self.prepare_response(e.to_string(), 500),
        }
    }
}

//"404" route
#[derive(Debug)]
pub struct Route404 {
    pub data: RouteData,
}

impl Handlable for Route404 {
    fn method(&self) -> &Method {
        &self.data.method
    }
    fn path(&self) -> &str {
        self.data.path.as_str()
    }
    fn handle(&self, _ctx: &ProbeContext) -> Result<Response<Full<Bytes>>, Error> {
        self.prepare_response("404".to_string(), 404)
    }
}
