use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::FetchError;
use crate::http_client::{RawResponse, Transport};

/// Ways the provider may accept the API key, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPlacement {
    QueryParam,
    Header(&'static str),
}

pub const CREDENTIAL_PLACEMENTS: &[CredentialPlacement] = &[
    CredentialPlacement::QueryParam,
    CredentialPlacement::Header("X-Api-Key"),
    CredentialPlacement::Header("apiKey"),
];

pub const ENVELOPE_KEYS: &[&str] = &["payLoad", "data", "items", "result"];

const API_KEY_PARAM: &str = "apiKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Csv,
}

impl PayloadFormat {
    fn accept(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

impl CredentialPlacement {
    fn apply(
        self,
        api_key: &str,
        params: &[(&str, String)],
        format: PayloadFormat,
    ) -> (Vec<(String, String)>, Vec<(&'static str, String)>) {
        let mut query: Vec<(String, String)> = Vec::with_capacity(params.len() + 1);
        let mut headers = vec![("accept", format.accept().to_string())];
        match self {
            Self::QueryParam => query.push((API_KEY_PARAM.to_string(), api_key.to_string())),
            Self::Header(name) => headers.push((name, api_key.to_string())),
        }
        query.extend(params.iter().map(|(k, v)| ((*k).to_string(), v.clone())));
        (query, headers)
    }
}

#[derive(Debug, PartialEq)]
enum Decoded {
    Rows(Vec<Value>),
    /// The body is an error envelope; the next placement should be tried.
    Rejected(String),
}

/// Tries credential placements in order until one is accepted.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    api_key: String,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
        }
    }

    pub fn fetch_json(&self, url: &str, params: &[(&str, String)]) -> Result<Vec<Value>, FetchError> {
        self.fetch(url, params, PayloadFormat::Json)
    }

    pub fn fetch_csv(&self, url: &str, params: &[(&str, String)]) -> Result<Vec<Value>, FetchError> {
        self.fetch(url, params, PayloadFormat::Csv)
    }

    pub fn fetch(
        &self,
        url: &str,
        params: &[(&str, String)],
        format: PayloadFormat,
    ) -> Result<Vec<Value>, FetchError> {
        let mut last_err = String::from("no credential placement attempted");
        for placement in CREDENTIAL_PLACEMENTS {
            let (query, headers) = placement.apply(&self.api_key, params, format);
            let resp = self
                .transport
                .get(url, &query, &headers)
                .map_err(|err| FetchError::Unavailable(format!("{url}: {err:#}")))?;

            if resp.is_auth_rejection() {
                last_err = format!("{} {}", resp.status, resp.snippet());
                debug!(url, ?placement, status = resp.status, "credential placement rejected");
                continue;
            }
            if !resp.is_success() {
                return Err(FetchError::Unavailable(format!(
                    "{url}: http {} {}",
                    resp.status,
                    resp.snippet()
                )));
            }

            match decode(&resp, format) {
                Decoded::Rows(rows) => return Ok(rows),
                Decoded::Rejected(msg) => {
                    debug!(url, ?placement, %msg, "error envelope in success response");
                    last_err = msg;
                }
            }
        }
        Err(FetchError::Auth(format!("{url}: {last_err}")))
    }
}

fn decode(resp: &RawResponse, format: PayloadFormat) -> Decoded {
    match format {
        PayloadFormat::Json => decode_json(&resp.body),
        PayloadFormat::Csv => Decoded::Rows(parse_csv_rows(&resp.body)),
    }
}

fn decode_json(body: &str) -> Decoded {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Decoded::Rows(Vec::new());
    }
    let payload: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(err) => {
            debug!(%err, "unparsable json body treated as empty");
            return Decoded::Rows(Vec::new());
        }
    };
    match payload {
        Value::Array(rows) => Decoded::Rows(rows),
        Value::Object(mut obj) => {
            if let Some(code) = envelope_status(&obj)
                && code != 200
                && code != 201
            {
                let detail = obj
                    .get("error")
                    .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                    .unwrap_or_default();
                return Decoded::Rejected(format!("{code} {detail}").trim().to_string());
            }
            for key in ENVELOPE_KEYS {
                if matches!(obj.get(*key), Some(Value::Array(_)))
                    && let Some(Value::Array(rows)) = obj.remove(*key)
                {
                    return Decoded::Rows(rows);
                }
            }
            Decoded::Rows(vec![Value::Object(obj)])
        }
        _ => Decoded::Rows(Vec::new()),
    }
}

fn envelope_status(obj: &Map<String, Value>) -> Option<i64> {
    match obj.get("statusCode")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Malformed text yields no rows.
pub fn parse_csv_rows(body: &str) -> Vec<Value> {
    let text = body.trim_matches(|c: char| c == '\u{feff}' || c.is_whitespace());
    if text.is_empty() {
        return Vec::new();
    }
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(err) => {
            debug!(%err, "unparsable csv header treated as empty");
            return Vec::new();
        }
    };

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                debug!(%err, "unparsable csv body treated as empty");
                return Vec::new();
            }
        };
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        rows.push(Value::Object(row));
    }
    rows
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use serde_json::json;

    use super::{Fetcher, parse_csv_rows};
    use crate::error::FetchError;
    use crate::http_client::{RawResponse, Transport};

    /// Replays canned responses in order and records what was sent.
    struct Replay {
        responses: Mutex<Vec<Result<RawResponse, String>>>,
        seen: Mutex<Vec<(Vec<(String, String)>, Vec<(&'static str, String)>)>>,
    }

    impl Replay {
        fn new(mut responses: Vec<Result<RawResponse, String>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Replay {
        fn get(
            &self,
            _url: &str,
            query: &[(String, String)],
            headers: &[(&'static str, String)],
        ) -> Result<RawResponse> {
            self.seen
                .lock()
                .expect("seen lock")
                .push((query.to_vec(), headers.to_vec()));
            match self.responses.lock().expect("responses lock").pop() {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Err(anyhow::anyhow!("no more responses")),
            }
        }
    }

    fn ok(status: u16, body: &str) -> Result<RawResponse, String> {
        Ok(RawResponse {
            status,
            body: body.to_string(),
        })
    }

    #[test]
    fn auth_rejection_falls_through_to_header_placement() {
        let replay = Replay::new(vec![ok(401, "nope"), ok(200, r#"[{"a":1}]"#)]);
        let fetcher = Fetcher::new(replay.clone(), "k");
        let rows = fetcher
            .fetch_json("http://pf.test/x", &[("date", "2024-05-01".to_string())])
            .expect("second placement succeeds");
        assert_eq!(rows, vec![json!({"a": 1})]);

        let seen = replay.seen.lock().expect("seen lock");
        assert_eq!(seen.len(), 2);
        assert!(seen[0].0.contains(&("apiKey".to_string(), "k".to_string())));
        assert!(seen[1].1.contains(&("X-Api-Key", "k".to_string())));
        assert!(seen[1].0.contains(&("date".to_string(), "2024-05-01".to_string())));
    }

    #[test]
    fn every_placement_rejected_is_auth_failure() {
        let replay = Replay::new(vec![ok(401, ""), ok(403, ""), ok(403, "last")]);
        let err = Fetcher::new(replay, "k")
            .fetch_json("http://pf.test/x", &[])
            .expect_err("all rejected");
        assert!(matches!(err, FetchError::Auth(msg) if msg.contains("403 last")));
    }

    #[test]
    fn server_error_stops_the_call() {
        let replay = Replay::new(vec![ok(500, "boom"), ok(200, "[]")]);
        let err = Fetcher::new(replay.clone(), "k")
            .fetch_json("http://pf.test/x", &[])
            .expect_err("500 is fatal");
        assert!(matches!(err, FetchError::Unavailable(_)));
        assert_eq!(replay.seen.lock().expect("seen lock").len(), 1);
    }

    #[test]
    fn network_error_is_unavailable() {
        let replay = Replay::new(vec![Err("connection refused".to_string())]);
        let err = Fetcher::new(replay, "k")
            .fetch_csv("http://pf.test/x", &[])
            .expect_err("no response");
        assert!(matches!(err, FetchError::Unavailable(msg) if msg.contains("refused")));
    }

    #[test]
    fn envelopes_unwrap_in_priority_order() {
        let replay = Replay::new(vec![ok(
            200,
            r#"{"statusCode":200,"data":[{"b":2}],"payLoad":[{"a":1}]}"#,
        )]);
        let rows = Fetcher::new(replay, "k").fetch_json("u", &[]).expect("rows");
        assert_eq!(rows, vec![json!({"a": 1})]);
    }

    #[test]
    fn plain_object_is_single_row() {
        let replay = Replay::new(vec![ok(200, r#"{"meetingId": 5}"#)]);
        let rows = Fetcher::new(replay, "k").fetch_json("u", &[]).expect("rows");
        assert_eq!(rows, vec![json!({"meetingId": 5})]);
    }

    #[test]
    fn error_envelope_tries_next_placement() {
        let replay = Replay::new(vec![
            ok(200, r#"{"statusCode":401,"error":"bad key"}"#),
            ok(200, r#"{"payLoad":[]}"#),
        ]);
        let rows = Fetcher::new(replay, "k").fetch_json("u", &[]).expect("rows");
        assert!(rows.is_empty());
    }

    #[test]
    fn malformed_json_is_empty_not_error() {
        let replay = Replay::new(vec![ok(200, "<html>oops")]);
        let rows = Fetcher::new(replay, "k").fetch_json("u", &[]).expect("rows");
        assert!(rows.is_empty());
    }

    #[test]
    fn csv_strips_bom_and_whitespace() {
        let rows = parse_csv_rows("\u{feff}RunnerId,Horse\r\n55,Fast Lad\r\n\r\n");
        assert_eq!(rows, vec![json!({"RunnerId": "55", "Horse": "Fast Lad"})]);
        assert!(parse_csv_rows("  \r\n").is_empty());
    }
}
