use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::{Instant, timeout_at};

use crate::errors::ProxyError;
use crate::registry::Target;

/// Outbound call seam of the engine.
///
/// Workers reach their upstream through this trait so tests can substitute a
/// canned transport without opening sockets. The production implementation
/// collects the entire response body into memory; aggregation relays
/// materialized responses, never live streams.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn round_trip(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, ProxyError>;
}

/// Shared plain-HTTP client used for all clones.
///
/// Redirects are not followed; the first upstream response is relayed
/// verbatim.
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, ProxyError> {
        let host = request
            .uri()
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default();

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ProxyError::UpstreamRequestFailed(host.clone(), e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| ProxyError::ResponseBodyError(host, e.to_string()))?;

        Ok(Response::from_parts(parts, body_bytes))
    }
}

/// Builds the clone of an inbound request for one target.
///
/// The clone carries the inbound method, all inbound headers and the inbound
/// query string; the URL is rewritten to `http://{address}:{port}{path}` and
/// the body is a fresh reader over the captured buffer.
pub fn build_clone(
    parts: &http::request::Parts,
    target: &Target,
    body: Bytes,
) -> Result<Request<Full<Bytes>>, ProxyError> {
    let host = target.host();

    let mut url = url::Url::parse(&format!("http://{host}/"))
        .map_err(|e| ProxyError::CloneBuildError(host.clone(), e.to_string()))?;
    url.set_path(&target.path);
    url.set_query(parts.uri.query());

    let mut builder = Request::builder()
        .method(parts.method.clone())
        .uri(url.as_str());

    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }

    builder
        .body(Full::new(body))
        .map_err(|e| ProxyError::CloneBuildError(host, e.to_string()))
}

/// Performs one clone call, bounded by the request deadline when present.
pub async fn send_to_target(
    transport: &dyn Transport,
    request: Request<Full<Bytes>>,
    deadline: Option<Instant>,
) -> Result<Response<Bytes>, ProxyError> {
    let host = request
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default();

    match deadline {
        Some(deadline) => timeout_at(deadline, transport.round_trip(request))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(host))?,
        None => transport.round_trip(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::service_fn;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn test_target(address: &str, port: u16, path: &str) -> Target {
        Target {
            path: path.to_string(),
            address: address.to_string(),
            port,
            service_name: "svc".to_string(),
            service_namespace: "default".to_string(),
        }
    }

    fn test_parts(uri: &str) -> http::request::Parts {
        let (parts, _) = Request::builder()
            .method(hyper::Method::POST)
            .uri(uri)
            .header("x-custom", "test-value")
            .body(Full::new(Bytes::new()))
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn clone_rewrites_url_and_keeps_headers() {
        let parts = test_parts("http://example.com/hooks/abc?foo=bar");
        let target = test_target("10.0.0.1", 8080, "/notify");

        let clone = build_clone(&parts, &target, Bytes::from_static(b"body")).unwrap();

        assert_eq!(clone.uri().scheme_str(), Some("http"));
        assert_eq!(clone.uri().authority().unwrap().as_str(), "10.0.0.1:8080");
        assert_eq!(clone.uri().path(), "/notify");
        assert_eq!(clone.uri().query(), Some("foo=bar"));
        assert_eq!(clone.method(), hyper::Method::POST);
        assert_eq!(clone.headers().get("x-custom").unwrap(), "test-value");
    }

    // Echo server that returns the request body with the request headers.
    async fn echo_handler(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();

        let body_bytes = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_else(|_| Bytes::new());

        let mut response = Response::new(Full::new(body_bytes));
        *response.headers_mut() = parts.headers;

        Ok(response)
    }

    async fn start_test_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");

        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = hyper_util::rt::TokioIo::new(stream);

                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(echo_handler))
                        .await;
                });
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        port
    }

    #[tokio::test]
    async fn send_to_target_round_trips() {
        let port = start_test_server().await;
        let transport = HttpTransport::new();

        let parts = test_parts("http://example.com/hooks/abc");
        let target = test_target("127.0.0.1", port, "/notify");
        let content = Bytes::from_static(b"hello world");

        let clone = build_clone(&parts, &target, content.clone()).unwrap();
        let response = send_to_target(&transport, clone, None).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), &content);
        assert_eq!(response.headers().get("x-custom").unwrap(), "test-value");
    }

    #[tokio::test]
    async fn send_to_target_honors_deadline() {
        let transport = HttpTransport::new();

        // Non-routable address; the deadline fires first.
        let parts = test_parts("http://example.com/hooks/abc");
        let target = test_target("192.0.2.1", 9999, "/");

        let clone = build_clone(&parts, &target, Bytes::new()).unwrap();
        let deadline = Instant::now() + Duration::from_millis(50);
        let result = send_to_target(&transport, clone, Some(deadline)).await;

        assert!(matches!(result, Err(ProxyError::UpstreamTimeout(_))));
    }
}
