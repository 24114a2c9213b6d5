//! Wire format of the AwaitAllReport aggregation mode.
//!
//! Every target's materialized response is projected into one array entry;
//! the array order follows the registration's target order, which the
//! control plane keeps deterministically sorted.

use hyper::HeaderMap;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ProxyError;

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub targets: Vec<ReportTargetResponse>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTargetResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    /// Omitted when the target answered with an empty body. Bodies are
    /// decoded lossily; webhook payloads are assumed to be textual.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
}

impl ReportTargetResponse {
    pub fn from_response(response: &Response<Bytes>) -> Self {
        Self {
            status_code: response.status().as_u16(),
            body: String::from_utf8_lossy(response.body()).into_owned(),
            headers: header_multimap(response.headers()),
        }
    }
}

fn header_multimap(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers.iter() {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

impl ReportResponse {
    /// Marshals the report into the aggregated 200 response.
    pub fn into_response(self) -> Result<Response<Bytes>, ProxyError> {
        let body = serde_json::to_vec(&self)
            .map_err(|e| ProxyError::ReportSerializationError(e.to_string()))?;

        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_and_headers_are_omitted() {
        let report = ReportResponse {
            targets: vec![ReportTargetResponse {
                status_code: 504,
                body: String::new(),
                headers: BTreeMap::new(),
            }],
        };

        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"targets":[{"statusCode":504}]}"#);
    }

    #[test]
    fn report_round_trips() {
        let report = ReportResponse {
            targets: vec![
                ReportTargetResponse {
                    status_code: 200,
                    body: "a".to_string(),
                    headers: BTreeMap::from([(
                        "x-test".to_string(),
                        vec!["value".to_string(), "value2".to_string()],
                    )]),
                },
                ReportTargetResponse {
                    status_code: 500,
                    body: "b".to_string(),
                    headers: BTreeMap::new(),
                },
            ],
        };

        let json = serde_json::to_vec(&report).unwrap();
        let parsed: ReportResponse = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn from_response_projects_status_body_and_headers() {
        let mut response = Response::new(Bytes::from_static(b"payload"));
        *response.status_mut() = StatusCode::CREATED;
        response
            .headers_mut()
            .insert("x-test", "value".parse().unwrap());

        let entry = ReportTargetResponse::from_response(&response);
        assert_eq!(entry.status_code, 201);
        assert_eq!(entry.body, "payload");
        assert_eq!(entry.headers["x-test"], vec!["value"]);
    }

    #[test]
    fn into_response_sets_content_type() {
        let response = ReportResponse::default().into_response().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.body().as_ref(), br#"{"targets":[]}"#);
    }
}
