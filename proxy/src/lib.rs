pub mod config;
pub mod engine;
pub mod errors;
mod fanout;
pub mod http;
pub mod metrics_defs;
pub mod registry;
pub mod report;

#[cfg(test)]
mod testutils;

use crate::engine::FanoutProxy;
use crate::errors::ProxyError;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response};
use std::pin::Pin;
use std::sync::Arc;

/// Runs the fan-out engine as an HTTP service on the configured listener.
///
/// The engine handle stays with the caller so the control plane can keep
/// registering receivers and so shutdown can await `close` after the
/// listener task is stopped.
pub async fn run(config: config::Config, engine: Arc<FanoutProxy>) -> Result<(), ProxyError> {
    shared::http::run_http_service(
        &config.listener.host,
        config.listener.port,
        ProxyService::new(engine),
    )
    .await
}

/// hyper service adapter over the engine.
pub struct ProxyService {
    engine: Arc<FanoutProxy>,
}

impl ProxyService {
    pub fn new(engine: Arc<FanoutProxy>) -> Self {
        Self { engine }
    }
}

impl<B> Service<Request<B>> for ProxyService
where
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let engine = Arc::clone(&self.engine);
        Box::pin(async move { engine.serve(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Options;
    use crate::registry::{Receiver, ResponseType, Target};
    use crate::testutils::{MockReply, MockTransport};
    use hyper::StatusCode;

    #[tokio::test]
    async fn service_dispatches_to_engine() {
        let transport = Arc::new(MockTransport::new(vec![MockReply::status(200)]));
        let engine = Arc::new(FanoutProxy::new(Options {
            transport: transport.clone(),
        }));

        engine
            .register_or_update(Receiver {
                path: "/hooks/abc".to_string(),
                response_type: ResponseType::Async,
                targets: vec![Target {
                    path: "/".to_string(),
                    address: "target0".to_string(),
                    port: 8080,
                    service_name: "svc".to_string(),
                    service_namespace: "default".to_string(),
                }],
                ..Receiver::default()
            })
            .unwrap();

        let service = ProxyService::new(engine.clone());

        let request = Request::builder()
            .uri("http://example.com/hooks/abc")
            .body(Full::new(Bytes::from_static(b"body")))
            .unwrap();
        let response = service.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let request = Request::builder()
            .uri("http://example.com/other")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        engine.close().await;
        assert_eq!(transport.requests().len(), 1);
    }
}
