//! Local hyper server for exercising the API client in tests.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request as seen by the server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
  pub method: String,
  /// Path plus query string, as sent
  pub target: String,
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl RecordedRequest {
  pub fn header(&self, name: &str) -> Option<String> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.clone())
  }
}

#[derive(Debug, Clone)]
pub struct Reply {
  status: u16,
  content_type: &'static str,
  body: String,
  delay: Option<Duration>,
}

impl Reply {
  pub fn json(status: u16, body: &str) -> Self {
    Self {
      status,
      content_type: "application/json",
      body: body.to_string(),
      delay: None,
    }
  }

  pub fn text(status: u16, body: &str) -> Self {
    Self {
      content_type: "text/html",
      ..Self::json(status, body)
    }
  }

  pub fn empty(status: u16) -> Self {
    Self::json(status, "")
  }

  pub fn delayed(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>;
type Recorded = Arc<Mutex<Vec<RecordedRequest>>>;

pub struct TestServer {
  addr: SocketAddr,
  requests: Recorded,
  handle: JoinHandle<()>,
}

impl TestServer {
  pub async fn start<F>(handler: F) -> Self
  where
    F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
  {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Recorded = Arc::new(Mutex::new(Vec::new()));
    let handler: Handler = Arc::new(handler);

    let recorded = Arc::clone(&requests);
    let handle = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let io = TokioIo::new(stream);
        let recorded = Arc::clone(&recorded);
        let handler = Arc::clone(&handler);
        let service = service_fn(move |req| {
          let recorded = Arc::clone(&recorded);
          let handler = Arc::clone(&handler);
          async move { handle(req, recorded, handler).await }
        });
        tokio::spawn(async move {
          // Clients that time out hang up mid-response
          let _ = http1::Builder::new().serve_connection(io, service).await;
        });
      }
    });

    Self {
      addr,
      requests,
      handle,
    }
  }

  /// Base URL of a port nothing listens on
  pub async fn unused_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/api/v1/", addr)
  }

  pub fn base_url(&self) -> String {
    format!("http://{}/api/v1/", self.addr)
  }

  pub fn requests(&self) -> Vec<RecordedRequest> {
    self.requests.lock().unwrap().clone()
  }
}

impl Drop for TestServer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

async fn handle(
  req: Request<Incoming>,
  recorded: Recorded,
  handler: Handler,
) -> Result<Response<Full<Bytes>>, Infallible> {
  let method = req.method().to_string();
  let target = req
    .uri()
    .path_and_query()
    .map(|pq| pq.as_str().to_string())
    .unwrap_or_default();
  let headers = req
    .headers()
    .iter()
    .map(|(name, value)| {
      (
        name.as_str().to_string(),
        String::from_utf8_lossy(value.as_bytes()).to_string(),
      )
    })
    .collect();
  let body = match req.into_body().collect().await {
    Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).to_string(),
    Err(_) => String::new(),
  };

  let request = RecordedRequest {
    method,
    target,
    headers,
    body,
  };
  let reply = handler(&request);
  recorded.lock().unwrap().push(request);

  if let Some(delay) = reply.delay {
    tokio::time::sleep(delay).await;
  }

  let response = Response::builder()
    .status(reply.status)
    .header("content-type", reply.content_type)
    .body(Full::new(Bytes::from(reply.body)))
    .unwrap();
  Ok(response)
}
