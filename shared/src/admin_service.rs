use crate::http::{make_error_response, make_status_response};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Liveness/readiness endpoints served on the admin listener.
///
/// `/health` always answers 200; `/ready` consults the injected readiness
/// probe so the host can hold traffic until its components are up.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Clone + Send + 'static,
    E: Send + 'static,
{
    type Response = Response<Full<Bytes>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let is_ready = (self.is_ready)();

        Box::pin(async move {
            let ok = || Response::new(Full::new(Bytes::from("ok\n")));

            let res = match req.uri().path() {
                "/health" => ok(),
                "/ready" => match is_ready {
                    true => ok(),
                    false => make_status_response(StatusCode::SERVICE_UNAVAILABLE).map(Full::new),
                },
                _ => make_error_response(StatusCode::NOT_FOUND).map(Full::new),
            };
            Ok(res)
        })
    }
}
