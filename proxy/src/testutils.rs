use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, StatusCode, Uri};
use parking_lot::Mutex;
use std::time::Duration;

use crate::errors::ProxyError;
use crate::http::Transport;

/// One clone request as seen by the mock transport.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub uri: Uri,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Canned reply of the mock transport for one target.
pub enum MockReply {
    Respond {
        status: u16,
        body: &'static str,
        headers: Vec<(&'static str, &'static str)>,
        delay: Duration,
    },
    /// Never answers; only meaningful together with a receiver timeout.
    Hang,
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        Self::with_body(status, "")
    }

    pub fn with_body(status: u16, body: &'static str) -> Self {
        MockReply::Respond {
            status,
            body,
            headers: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn header(self, name: &'static str, value: &'static str) -> Self {
        match self {
            MockReply::Respond {
                status,
                body,
                mut headers,
                delay,
            } => {
                headers.push((name, value));
                MockReply::Respond {
                    status,
                    body,
                    headers,
                    delay,
                }
            }
            hang => hang,
        }
    }

    pub fn after(self, delay: Duration) -> Self {
        match self {
            MockReply::Respond {
                status,
                body,
                headers,
                ..
            } => MockReply::Respond {
                status,
                body,
                headers,
                delay,
            },
            hang => hang,
        }
    }
}

/// Transport double replaying canned replies without opening sockets.
///
/// Replies are matched to targets by address: an address of the form
/// `target{i}` selects `replies[i]`, anything else falls back to arrival
/// order. Every request is recorded on entry, before any delay.
pub struct MockTransport {
    replies: Vec<MockReply>,
    requests: Mutex<Vec<RecordedRequest>>,
    arrivals: Mutex<usize>,
}

impl MockTransport {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            requests: Mutex::new(Vec::new()),
            arrivals: Mutex::new(0),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn reply_index(&self, uri: &Uri) -> usize {
        let by_address = uri
            .authority()
            .and_then(|a| a.host().strip_prefix("target"))
            .and_then(|suffix| suffix.parse::<usize>().ok());

        match by_address {
            Some(index) => index,
            None => {
                let mut arrivals = self.arrivals.lock();
                let index = *arrivals;
                *arrivals += 1;
                index
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn round_trip(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Bytes>, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();

        let index = self.reply_index(&parts.uri);
        self.requests.lock().push(RecordedRequest {
            uri: parts.uri.clone(),
            method: parts.method,
            headers: parts.headers,
            body,
        });

        match self.replies.get(index) {
            Some(MockReply::Respond {
                status,
                body,
                headers,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }

                let mut response = Response::new(Bytes::from_static(body.as_bytes()));
                *response.status_mut() =
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                for (name, value) in headers {
                    response.headers_mut().insert(
                        hyper::header::HeaderName::from_static(name),
                        hyper::header::HeaderValue::from_static(value),
                    );
                }
                Ok(response)
            }
            Some(MockReply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(ProxyError::UpstreamRequestFailed(
                parts.uri.to_string(),
                "no canned reply".to_string(),
            )),
        }
    }
}
