//! Response aggregation for one fan-out.
//!
//! Workers publish exactly one `(target index, response)` pair each; the
//! aggregator receives exactly as many as there are targets. Arrival order is
//! non-deterministic: "first preferred" means first-arriving, so a slow
//! target never gates a fast good answer.

use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use shared::http::make_status_response;
use tokio::sync::mpsc;

use crate::report::{ReportResponse, ReportTargetResponse};

#[derive(Clone, Copy, Debug)]
pub(crate) enum Preference {
    Successful,
    Failed,
}

impl Preference {
    fn matches(self, status: StatusCode) -> bool {
        match self {
            Preference::Successful => status.is_success(),
            Preference::Failed => status.as_u16() >= 400,
        }
    }
}

/// Consumes `expected` responses and picks the reply: the first-arriving
/// response matching the preference, or the last received one if none does.
pub(crate) async fn await_preferred(
    mut responses: mpsc::Receiver<(usize, Response<Bytes>)>,
    expected: usize,
    preference: Preference,
) -> Response<Bytes> {
    let mut chosen: Option<Response<Bytes>> = None;
    let mut last: Option<Response<Bytes>> = None;

    for _ in 0..expected {
        let Some((_, response)) = responses.recv().await else {
            // A worker died without reporting; settle with what arrived.
            break;
        };

        if chosen.is_none() && preference.matches(response.status()) {
            chosen = Some(response);
        } else {
            last = Some(response);
        }
    }

    chosen.or(last).unwrap_or_else(|| {
        tracing::error!("fan-out finished without any response");
        make_status_response(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

/// Consumes `expected` responses and slots each into the report by target
/// index, so the report order matches the registered target order no matter
/// in which order the upstreams answered.
pub(crate) async fn await_report(
    mut responses: mpsc::Receiver<(usize, Response<Bytes>)>,
    expected: usize,
) -> ReportResponse {
    let mut slots: Vec<Option<ReportTargetResponse>> = (0..expected).map(|_| None).collect();

    for _ in 0..expected {
        let Some((index, response)) = responses.recv().await else {
            break;
        };

        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(ReportTargetResponse::from_response(&response));
        }
    }

    ReportResponse {
        targets: slots.into_iter().flatten().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from_static(body.as_bytes()));
        *response.status_mut() = StatusCode::from_u16(status).unwrap();
        response
    }

    async fn feed(
        responses: Vec<Response<Bytes>>,
    ) -> (mpsc::Receiver<(usize, Response<Bytes>)>, usize) {
        let expected = responses.len();
        let (tx, rx) = mpsc::channel(expected);
        for (index, r) in responses.into_iter().enumerate() {
            tx.send((index, r)).await.unwrap();
        }
        (rx, expected)
    }

    #[tokio::test]
    async fn prefer_successful_picks_first_2xx() {
        let (rx, expected) = feed(vec![
            response(500, "error"),
            response(200, "success"),
            response(201, "created"),
        ])
        .await;

        let reply = await_preferred(rx, expected, Preference::Successful).await;
        assert_eq!(reply.status(), 200);
        assert_eq!(reply.body().as_ref(), b"success");
    }

    #[tokio::test]
    async fn prefer_successful_falls_back_to_last_received() {
        let (rx, expected) = feed(vec![response(501, "first"), response(500, "second")]).await;

        let reply = await_preferred(rx, expected, Preference::Successful).await;
        assert_eq!(reply.status(), 500);
        assert_eq!(reply.body().as_ref(), b"second");
    }

    #[tokio::test]
    async fn prefer_failed_picks_first_error() {
        let (rx, expected) = feed(vec![
            response(500, "error"),
            response(200, "success"),
            response(201, "created"),
        ])
        .await;

        let reply = await_preferred(rx, expected, Preference::Failed).await;
        assert_eq!(reply.status(), 500);
        assert_eq!(reply.body().as_ref(), b"error");
    }

    #[tokio::test]
    async fn prefer_failed_falls_back_to_last_received() {
        let (rx, expected) = feed(vec![response(201, "first"), response(200, "second")]).await;

        let reply = await_preferred(rx, expected, Preference::Failed).await;
        assert_eq!(reply.status(), 200);
        assert_eq!(reply.body().as_ref(), b"second");
    }

    #[tokio::test]
    async fn report_orders_by_target_index() {
        let expected = 2;
        let (tx, rx) = mpsc::channel(expected);

        // Arrival order reversed against target order.
        tx.send((1, response(500, "b"))).await.unwrap();
        tx.send((0, response(200, "a"))).await.unwrap();

        let report = await_report(rx, expected).await;
        assert_eq!(report.targets.len(), 2);
        assert_eq!(report.targets[0].status_code, 200);
        assert_eq!(report.targets[0].body, "a");
        assert_eq!(report.targets[1].status_code, 500);
        assert_eq!(report.targets[1].body, "b");
    }
}
