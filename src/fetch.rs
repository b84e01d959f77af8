use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::redirect::Policy;
use tracing::debug;
use url::Url;

use crate::domain::ResponseHeaders;
use crate::error::FetchwiseError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REDIRECTS: usize = 5;
/// Upper bound for any per-call timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_RETRIES: usize = 2;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// URL after redirects.
    pub url: String,
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Vec<u8>,
}

/// Issues one GET per call. Implementations must fail on connection errors,
/// timeouts and non-2xx statuses, and must read the whole body before
/// returning.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedResponse, FetchwiseError>;
}

/// Caps caller-supplied timeouts at [`MAX_TIMEOUT`].
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.min(MAX_TIMEOUT)
}

pub fn default_user_agent() -> String {
    format!("fetchwise/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchwiseError> {
        Self::with_user_agent(&default_user_agent())
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, FetchwiseError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|err| FetchwiseError::HttpClient(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| FetchwiseError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        url: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, FetchwiseError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .status()
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        Err(FetchwiseError::HttpStatus {
            url: url.to_string(),
            status,
            message,
        })
    }

    /// Retries share one deadline: every attempt gets only the time left,
    /// and no retry starts unless its backoff ends before the deadline.
    fn send_with_retries<F>(
        &self,
        url: &str,
        deadline: Instant,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, FetchwiseError>
    where
        F: FnMut(Duration) -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = make_req(remaining).send();
            let delay = BASE_RETRY_DELAY * (attempt as u32 + 1);
            let can_retry =
                attempt < MAX_RETRIES && retry_fits(Instant::now(), deadline, delay);
            match outcome {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if can_retry && is_retryable_status(status) {
                        debug!(url, status, attempt, "retrying after server error");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if can_retry && is_retryable_error(&err) {
                        debug!(url, attempt, error = %err, "retrying after connection error");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchwiseError::Unreachable {
                        url: url.to_string(),
                        reason: describe_error(&err),
                    });
                }
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedResponse, FetchwiseError> {
        let parsed =
            Url::parse(url).map_err(|err| FetchwiseError::InvalidUrl(format!("{url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchwiseError::InvalidUrl(format!(
                "{url}: unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let timeout = clamp_timeout(timeout);
        let deadline = Instant::now() + timeout;
        debug!(url, timeout_ms = timeout.as_millis() as u64, "GET");
        let response = self.send_with_retries(url, deadline, |remaining| {
            self.client.get(parsed.clone()).timeout(remaining)
        })?;
        let response = Self::handle_status(url, response)?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect::<ResponseHeaders>();
        let body = response
            .bytes()
            .map_err(|err| FetchwiseError::Unreachable {
                url: url.to_string(),
                reason: describe_error(&err),
            })?
            .to_vec();

        debug!(url, final_url = %final_url, status, bytes = body.len(), "response read");
        Ok(FetchedResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

fn describe_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_redirect() {
        format!("too many redirects: {err}")
    } else {
        err.to_string()
    }
}

fn retry_fits(now: Instant, deadline: Instant, delay: Duration) -> bool {
    now.checked_add(delay).is_some_and(|resume| resume < deadline)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

// Timeouts are not retried: the per-call timeout is the whole deadline.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() && !err.is_timeout()
}
