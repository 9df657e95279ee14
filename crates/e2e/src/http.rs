//! Plain HTTP access to the server under test (no JavaScript execution)

use std::time::Duration;

use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

const MAX_REDIRECTS: usize = 10;

/// Whether redirects are followed or handed back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Manual,
    Follow,
}

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client bound to the server URL
#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> E2eResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| E2eError::Config(format!("invalid server URL '{}': {}", base_url, e)))?;

        // Redirects are resolved by hand so `Manual` can observe them, and the
        // HTTPS dev server runs on a self-signed certificate.
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path (or absolute URL) against the server URL
    pub fn url(&self, path: &str) -> E2eResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| E2eError::Config(format!("invalid path '{}': {}", path, e)))
    }

    /// Server URL without a trailing slash, e.g. `http://127.0.0.1:3000`
    pub fn origin(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_string()
    }

    pub async fn fetch(&self, path: &str, redirect: RedirectMode) -> E2eResult<FetchResponse> {
        self.fetch_with(path, redirect, &[]).await
    }

    /// Like [`fetch`](Self::fetch) with extra request headers
    pub async fn fetch_with(
        &self,
        path: &str,
        redirect: RedirectMode,
        headers: &[(&str, &str)],
    ) -> E2eResult<FetchResponse> {
        let mut url = self.url(path)?;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(url.clone());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let response = request.send().await?;
            let status = response.status();
            debug!("GET {} -> {}", url, status);

            if redirect == RedirectMode::Follow && status.is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    let location = location.to_str().map_err(|e| {
                        E2eError::AssertionFailed(format!("non-ASCII location header: {}", e))
                    })?;
                    url = url.join(location).map_err(|e| {
                        E2eError::AssertionFailed(format!("bad location '{}': {}", location, e))
                    })?;
                    continue;
                }
            }

            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();
            return Ok(FetchResponse {
                url,
                status,
                headers,
                body,
            });
        }

        Err(E2eError::AssertionFailed(format!(
            "more than {} redirects fetching {}",
            MAX_REDIRECTS, path
        )))
    }

    /// Server-rendered HTML of `path`
    pub async fn fetch_html(&self, path: &str) -> E2eResult<String> {
        let response = self.fetch(path, RedirectMode::Follow).await?;
        if !response.status.is_success() {
            return Err(E2eError::AssertionFailed(format!(
                "GET {} returned {}",
                path, response.status
            )));
        }
        Ok(response.text())
    }

    /// True once the server answers anything at all
    pub async fn is_up(&self) -> bool {
        match self.client.get(self.base_url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                if !e.is_connect() && !e.is_timeout() {
                    debug!("Readiness probe error: {}", e);
                }
                false
            }
        }
    }
}
