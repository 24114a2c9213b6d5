use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use parking_lot::Mutex;
use shared::http::make_status_response;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::errors::ProxyError;
use crate::fanout::{Preference, await_preferred, await_report};
use crate::http::{HttpTransport, Transport, build_clone, send_to_target};
use crate::metrics_defs::{CLONE_REQUESTS, IN_FLIGHT_FANOUTS, REQUEST_DURATION};
use crate::registry::{Receiver, ReceiverTable, RegistryError, ResponseType, Target};

pub struct Options {
    /// Outbound call seam shared by all clone workers.
    pub transport: Arc<dyn Transport>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            transport: Arc::new(HttpTransport::new()),
        }
    }
}

/// The fan-out engine: a registration table plus the request handler that
/// clones matched requests to every registered target.
pub struct FanoutProxy {
    receivers: ReceiverTable,
    transport: Arc<dyn Transport>,
    inflight: Inflight,
}

impl FanoutProxy {
    pub fn new(options: Options) -> Self {
        Self {
            receivers: ReceiverTable::new(),
            transport: options.transport,
            inflight: Inflight::new(),
        }
    }

    /// Upsert keyed by the receiver's webhook path. Registering the same
    /// receiver twice is equivalent to registering it once; updates take
    /// effect for requests dispatched after this returns.
    pub fn register_or_update(&self, receiver: Receiver) -> Result<(), RegistryError> {
        self.receivers.insert(receiver)
    }

    /// Removes a registration. Ok whether or not the path was present.
    pub fn unregister(&self, path: &str) -> Result<(), RegistryError> {
        self.receivers.remove(path);
        Ok(())
    }

    /// Waits for every in-flight clone worker of already-accepted requests.
    ///
    /// Close does not reject new requests by itself; the host stops the
    /// listener first. Workers spawned after close are not tracked.
    pub async fn close(&self) {
        self.inflight.wait().await;
    }

    /// The handler contract: dispatch by path, capture the body, fan out,
    /// aggregate per the receiver's response type.
    ///
    /// An unmatched path answers 503; a receiver without targets answers 500.
    /// A body read failure returns `Err`, dropping the connection without a
    /// status: the caller cannot be answered when there is nothing to clone.
    pub async fn serve<B>(&self, request: Request<B>) -> Result<Response<Full<Bytes>>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let path = request.uri().path().to_string();

        // Snapshot the entry; a table update mid-request does not affect us.
        let Some(receiver) = self.receivers.get(&path) else {
            tracing::info!(request = %path, "no matching http backend for request");
            return Ok(make_status_response(StatusCode::SERVICE_UNAVAILABLE).map(Full::new));
        };

        let (parts, body) = request.into_parts();
        let captured = match capture_body(body, receiver.body_size_limit).await {
            Ok(captured) => captured,
            Err(err) => {
                tracing::error!(error = %err, request = %path, "failed to read incoming body from request");
                return Err(err);
            }
        };

        if receiver.targets.is_empty() {
            tracing::info!(request = %path, "no targets found");
            return Ok(make_status_response(StatusCode::INTERNAL_SERVER_ERROR).map(Full::new));
        }

        tracing::info!(
            targets = receiver.targets.len(),
            request = %path,
            "clone request to upstreams"
        );

        let started = std::time::Instant::now();
        let expected = receiver.targets.len();

        // Async workers run to completion or transport deadline; the caller
        // already has its 202, so the request deadline only binds await modes.
        let deadline = (receiver.response_type != ResponseType::Async
            && receiver.timeout > Duration::ZERO)
            .then(|| Instant::now() + receiver.timeout);

        let (resp_tx, resp_rx) = mpsc::channel::<(usize, Response<Bytes>)>(expected);

        for (index, target) in receiver.targets.iter().enumerate() {
            let clone = build_clone(&parts, target, captured.clone());
            let transport = Arc::clone(&self.transport);
            let target = target.clone();
            let guard = self.inflight.guard();
            let publish =
                (receiver.response_type != ResponseType::Async).then(|| resp_tx.clone());

            tokio::spawn(async move {
                let _guard = guard;
                metrics::gauge!(IN_FLIGHT_FANOUTS.name).increment(1.0);

                let response = dispatch_clone(transport.as_ref(), clone, deadline, &target).await;
                if let Some(tx) = publish {
                    let _ = tx.send((index, response)).await;
                }

                metrics::gauge!(IN_FLIGHT_FANOUTS.name).decrement(1.0);
            });
        }
        drop(resp_tx);

        let response = match receiver.response_type {
            ResponseType::Async => {
                tracing::info!(request = %path, status = 202u16, "return response");
                make_status_response(StatusCode::ACCEPTED).map(Full::new)
            }
            ResponseType::AwaitAllPreferSuccessful => {
                relay(await_preferred(resp_rx, expected, Preference::Successful).await, &path)
            }
            ResponseType::AwaitAllPreferFailed => {
                relay(await_preferred(resp_rx, expected, Preference::Failed).await, &path)
            }
            ResponseType::AwaitAllReport => {
                let report = await_report(resp_rx, expected).await;
                relay(report.into_response()?, &path)
            }
        };

        metrics::histogram!(
            REQUEST_DURATION.name,
            "response_type" => receiver.response_type.as_str(),
            "status" => response.status().as_u16().to_string(),
        )
        .record(started.elapsed().as_secs_f64());

        Ok(response)
    }
}

/// Performs one clone call. Transport errors and deadline hits are local to
/// the worker: they synthesize a 504 with no body and never abort the fan-out.
async fn dispatch_clone(
    transport: &dyn Transport,
    clone: Result<Request<Full<Bytes>>, ProxyError>,
    deadline: Option<Instant>,
    target: &Target,
) -> Response<Bytes> {
    let result = match clone {
        Ok(request) => send_to_target(transport, request, deadline).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(response) => {
            tracing::info!(
                status = response.status().as_u16(),
                target = %target.host(),
                service = %target.service_name,
                namespace = %target.service_namespace,
                "forwarding request to clone backend finished"
            );
            metrics::counter!(CLONE_REQUESTS.name, "outcome" => "forwarded").increment(1);
            response
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                target = %target.host(),
                service = %target.service_name,
                namespace = %target.service_namespace,
                "forwarding request to clone backend failed"
            );
            metrics::counter!(CLONE_REQUESTS.name, "outcome" => "error").increment(1);
            make_status_response(StatusCode::GATEWAY_TIMEOUT)
        }
    }
}

/// Relays the chosen response to the caller: its status, all of its headers,
/// its materialized body.
fn relay(response: Response<Bytes>, path: &str) -> Response<Full<Bytes>> {
    tracing::info!(request = %path, status = response.status().as_u16(), "return response");
    response.map(Full::new)
}

/// Reads the inbound body into memory, honoring the size limit: with a
/// non-zero limit the buffer is truncated at the limit and reading stops;
/// the request itself never fails because of the limit.
async fn capture_body<B>(mut body: B, limit: u64) -> Result<Bytes, ProxyError>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let mut buf: Vec<u8> = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| ProxyError::RequestBodyError(e.to_string()))?;
        if let Ok(data) = frame.into_data() {
            buf.extend_from_slice(&data);
            if limit > 0 && buf.len() as u64 >= limit {
                buf.truncate(limit as usize);
                break;
            }
        }
    }

    Ok(Bytes::from(buf))
}

/// Tracks live fan-out workers so `close` can wait for them.
///
/// Each worker holds a clone of the sender as a guard and never sends;
/// `wait` drops the engine's own sender and blocks until the receiver
/// reports that every guard is gone. Waiting is terminal: afterwards new
/// workers are spawned untracked.
struct Inflight {
    guard_tx: Mutex<Option<mpsc::Sender<()>>>,
    guard_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl Inflight {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            guard_tx: Mutex::new(Some(tx)),
            guard_rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn guard(&self) -> Option<mpsc::Sender<()>> {
        self.guard_tx.lock().clone()
    }

    async fn wait(&self) {
        drop(self.guard_tx.lock().take());
        let mut rx = self.guard_rx.lock().await;
        while rx.recv().await.is_some() {}
    }
}
