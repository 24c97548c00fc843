use std::env;
use std::time::Duration;

use crate::error::{Result, UpdatesError};

const DEFAULT_BASE_URL: &str = "https://api.puntingform.com.au/v2";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_FETCH_PARALLELISM: usize = 6;

#[derive(Debug, Clone)]
pub struct UpdatesConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub fetch_parallelism: usize,
    pub broad_scratch_scan: bool,
}

impl UpdatesConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("PF_API_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| UpdatesError::Config("PF_API_KEY not set".to_string()))?;
        let base_url = env::var("PF_BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = env::var("PF_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(2, 120);
        let fetch_parallelism = env::var("FETCH_PARALLELISM")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_FETCH_PARALLELISM)
            .clamp(2, 32);

        Ok(Self {
            api_key,
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            fetch_parallelism,
            broad_scratch_scan: env_bool("PF_BROAD_SCRATCH_SCAN", true),
        })
    }

    pub fn with_api_key(api_key: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(UpdatesError::Config("api key is empty".to_string()));
        }
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            fetch_parallelism: DEFAULT_FETCH_PARALLELISM,
            broad_scratch_scan: true,
        })
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::under(&self.base_url)
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub scratchings: String,
    pub conditions: String,
    pub fields_json: String,
    pub fields_csv: String,
    pub meeting_csv: String,
    pub form: String,
}

impl Endpoints {
    pub fn under(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            scratchings: format!("{base}/Updates/Scratchings"),
            conditions: format!("{base}/Updates/Conditions"),
            fields_json: format!("{base}/form/fields"),
            fields_csv: format!("{base}/form/fields/csv"),
            meeting_csv: format!("{base}/form/meeting/csv"),
            form: format!("{base}/form/form"),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            !(t.is_empty() || t == "0" || t == "false" || t == "off" || t == "no")
        })
        .unwrap_or(default)
}
