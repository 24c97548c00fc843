use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Process-wide client; the timeout of the first caller sticks.
pub fn http_client(timeout: Duration) -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    pub fn snippet(&self) -> String {
        self.body
            .trim()
            .replace(['\n', '\r'], " ")
            .chars()
            .take(200)
            .collect()
    }
}

/// An `Err` means no HTTP response at all.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(&'static str, String)],
    ) -> Result<RawResponse>;
}

pub struct HttpTransport {
    client: &'static Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        headers: &[(&'static str, String)],
    ) -> Result<RawResponse> {
        let mut req = self
            .client
            .get(url)
            .query(query)
            .header(USER_AGENT, "raceday-updates/0.1");
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        let resp = req.send().context("request failed")?;
        let status = resp.status().as_u16();
        let body = resp.text().context("failed reading body")?;
        Ok(RawResponse { status, body })
    }
}
