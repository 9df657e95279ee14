//! The context every test case runs against

use std::future::Future;
use std::sync::Arc;

use crate::config::RetryPolicy;
use crate::edit::FileEditor;
use crate::error::E2eResult;
use crate::http::HttpClient;
use crate::logs::{ExpectLogOptions, LogBuffer};
use crate::page::PageDriver;
use crate::retry::auto_retry;

/// Server, page, logs and file editor of one scenario run.
///
/// Owned by the runner for the whole scenario and lent to each test case in
/// turn.
pub struct Session {
    pub http: HttpClient,
    pub page: Arc<dyn PageDriver>,
    pub logs: LogBuffer,
    pub editor: FileEditor,
    pub retry: RetryPolicy,
}

impl Session {
    pub fn new(
        http: HttpClient,
        page: Arc<dyn PageDriver>,
        logs: LogBuffer,
        editor: FileEditor,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            page,
            logs,
            editor,
            retry,
        }
    }

    /// Server URL without trailing slash
    pub fn server_url(&self) -> String {
        self.http.origin()
    }

    /// Absolute URL of `path` on the server
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url(), path)
    }

    pub async fn auto_retry<T, F, Fut>(&self, what: &str, op: F) -> E2eResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = E2eResult<T>>,
    {
        auto_retry(self.retry, what, op).await
    }

    pub fn expect_log(&self, message: &str, opts: ExpectLogOptions) -> E2eResult<()> {
        self.logs.expect_log(message, opts)
    }

    /// Accept whatever the current test case logged
    pub fn ignore_logs(&self) -> E2eResult<()> {
        self.logs.expect_log("", ExpectLogOptions::default())
    }
}
