//! The to-do app scenario: what a compliant server integration must do
//!
//! A [`Scenario`] is a launch mode plus options. It produces a startup
//! directive for the process runner and the ordered list of test cases that
//! apply; the runner executes them one after another against a [`Session`].

use std::io::Read;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::config::{Adapter, LaunchMode, ScenarioOptions};
use crate::error::{expect_contains, expect_eq, expect_not_contains, E2eError, E2eResult};
use crate::http::RedirectMode;
use crate::logs::ExpectLogOptions;
use crate::retry::settle;
use crate::server::StartupDirective;
use crate::session::Session;

const DUMMY_MIDDLEWARE: &str = "./pages/middlewareDummy.ts";
const EXTERNAL_REDIRECT_TARGET: &str = "https://vike.dev/";

const COUNTER_BUTTON: &str = r#"button[type="button"]"#;
const SUBMIT_BUTTON: &str = r#"button[type="submit"]"#;
const TEXT_INPUT: &str = r#"input[type="text"]"#;

/// Every check the scenario knows, in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestCase {
    Html,
    AddTodoItem,
    TodoPersisted,
    RedirectThrow,
    RedirectConfig,
    Argon2RejectsWrongPassword,
    Argon2,
    Sharp,
    XTestHeader,
    ViteHmrWebsocket,
    ServerEntryHmr,
    MiddlewareHmr,
    ProdCompression,
    ProdGzipBody,
}

impl TestCase {
    pub const ALL: [TestCase; 14] = [
        TestCase::Html,
        TestCase::AddTodoItem,
        TestCase::TodoPersisted,
        TestCase::RedirectThrow,
        TestCase::RedirectConfig,
        TestCase::Argon2RejectsWrongPassword,
        TestCase::Argon2,
        TestCase::Sharp,
        TestCase::XTestHeader,
        TestCase::ViteHmrWebsocket,
        TestCase::ServerEntryHmr,
        TestCase::MiddlewareHmr,
        TestCase::ProdCompression,
        TestCase::ProdGzipBody,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestCase::Html => "HTML",
            TestCase::AddTodoItem => "Add to-do item",
            TestCase::TodoPersisted => "New to-do item is persisted & rendered to HTML",
            TestCase::RedirectThrow => "redirect throw",
            TestCase::RedirectConfig => "redirect config",
            TestCase::Argon2RejectsWrongPassword => "argon2 rejects wrong password",
            TestCase::Argon2 => "argon2",
            TestCase::Sharp => "sharp",
            TestCase::XTestHeader => "x-test header is present",
            TestCase::ViteHmrWebsocket => "vite hmr websocket",
            TestCase::ServerEntryHmr => "server-side HMR (server-entry)",
            TestCase::MiddlewareHmr => "server-side HMR (+middleware)",
            TestCase::ProdCompression => "Compression and headers in production",
            TestCase::ProdGzipBody => "gzip body decodes",
        }
    }
}

/// Server stdout markers printed by the app's hooks
#[derive(Debug, Clone, Copy)]
pub enum ServerType {
    Server,
}

impl ServerType {
    fn as_str(&self) -> &'static str {
        match self {
            ServerType::Server => "Server",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub mode: LaunchMode,
    pub options: ScenarioOptions,
    pub adapter: Adapter,
}

impl Scenario {
    pub fn new(mode: LaunchMode, options: ScenarioOptions, adapter: Adapter) -> Self {
        Self {
            mode,
            options,
            adapter,
        }
    }

    /// Short label, e.g. `prod+https (hono)`
    pub fn label(&self) -> String {
        let mut label = self.mode.to_string();
        let flags = [
            (self.options.https, "https"),
            (self.options.skip_server_hmr, "skip-server-hmr"),
            (self.options.is_flaky, "flaky"),
            (self.options.no_server_hook, "no-server-hook"),
        ];
        for (set, name) in flags {
            if set {
                label.push('+');
                label.push_str(name);
            }
        }
        format!("{} ({})", label, self.adapter)
    }

    pub fn startup(&self, package_manager: &str) -> StartupDirective {
        StartupDirective {
            command: self.mode.command(package_manager),
            server_url: self.options.server_url().to_string(),
            is_flaky: self.options.is_flaky,
        }
    }

    fn is_prod(&self) -> bool {
        self.mode.is_prod()
    }

    fn server_hmr(&self) -> bool {
        !self.is_prod() && !self.options.skip_server_hmr
    }

    /// Dev runs without server HMR tolerate whatever the mutations log
    fn tolerates_mutation_logs(&self) -> bool {
        !self.is_prod() && self.options.skip_server_hmr
    }

    pub fn applies(&self, case: TestCase) -> bool {
        match case {
            TestCase::ViteHmrWebsocket | TestCase::ServerEntryHmr | TestCase::MiddlewareHmr => {
                self.server_hmr()
            }
            TestCase::ProdCompression | TestCase::ProdGzipBody => self.is_prod(),
            _ => true,
        }
    }

    /// Test cases registered for this scenario, in execution order
    pub fn test_cases(&self) -> Vec<TestCase> {
        TestCase::ALL
            .into_iter()
            .filter(|c| self.applies(*c))
            .collect()
    }

    pub async fn run(&self, case: TestCase, s: &Session) -> E2eResult<()> {
        match case {
            TestCase::Html => self.html(s).await,
            TestCase::AddTodoItem => self.add_todo_item(s).await,
            TestCase::TodoPersisted => self.todo_persisted(s).await,
            TestCase::RedirectThrow => self.redirect_throw(s).await,
            TestCase::RedirectConfig => self.redirect_config(s).await,
            TestCase::Argon2RejectsWrongPassword => self.argon2_rejects(s).await,
            TestCase::Argon2 => self.argon2(s).await,
            TestCase::Sharp => self.sharp(s).await,
            TestCase::XTestHeader => self.x_test_header(s).await,
            TestCase::ViteHmrWebsocket => self.vite_hmr_websocket(s).await,
            TestCase::ServerEntryHmr => self.server_entry_hmr(s).await,
            TestCase::MiddlewareHmr => self.middleware_hmr(s).await,
            TestCase::ProdCompression => self.prod_compression(s).await,
            TestCase::ProdGzipBody => self.prod_gzip_body(s).await,
        }
    }

    async fn html(&self, s: &Session) -> E2eResult<()> {
        let html = s.http.fetch_html("/").await?;
        expect_contains(&html, "<h1>To-do List</h1>")?;
        expect_contains(&html, "<li>Buy milk</li>")?;
        expect_contains(&html, "<li>Buy strawberries</li>")?;
        // provided through a pageContext function
        expect_contains(&html, "x-runtime")?;

        expect_on_ready_log(s)?;
        if !self.options.no_server_hook {
            expect_node_server_log(s, ServerType::Server)?;
        }
        Ok(())
    }

    async fn add_todo_item(&self, s: &Session) -> E2eResult<()> {
        if self.adapter.needs_stream_preload(self.mode) {
            s.page.goto_detached(&s.url("/")).await?;
            settle().await;
        }

        s.page.goto(&s.url("/")).await?;
        {
            let text = body_text(s).await?;
            expect_contains(&text, "To-do List")?;
            expect_contains(&text, "Buy milk")?;
            expect_contains(&text, "Buy strawberries")?;
        }

        // hydration
        expect_eq(
            s.page.text_content(COUNTER_BUTTON).await?.as_deref(),
            Some("Counter 0"),
        )?;
        s.auto_retry("counter click", move || async move {
            s.page.click(COUNTER_BUTTON).await?;
            let text = s.page.text_content(COUNTER_BUTTON).await?.unwrap_or_default();
            expect_contains(&text, "Counter 1")
        })
        .await?;

        // suspense boundary
        s.auto_retry("streamed list", move || async move {
            expect_contains(&body_text(s).await?, "Buy milk")
        })
        .await?;

        s.page.fill(TEXT_INPUT, "Buy bananas").await?;
        s.page.click(SUBMIT_BUTTON).await?;
        s.auto_retry("item count", move || async move {
            expect_eq(number_of_items(s).await?, 4)
        })
        .await?;
        expect_contains(&body_text(s).await?, "Buy bananas")?;

        if self.tolerates_mutation_logs() {
            s.ignore_logs()?;
        }
        Ok(())
    }

    async fn todo_persisted(&self, s: &Session) -> E2eResult<()> {
        let html = s.http.fetch_html("/").await?;
        expect_contains(&html, "<li>Buy bananas</li>")
    }

    async fn redirect_throw(&self, s: &Session) -> E2eResult<()> {
        let response = s.http.fetch("/guarded", RedirectMode::Manual).await?;
        expect_eq(response.status.as_u16(), 302)?;
        expect_eq(response.header("location"), Some(s.url("/").as_str()))
    }

    async fn redirect_config(&self, s: &Session) -> E2eResult<()> {
        {
            let response = s.http.fetch("/about-redirect", RedirectMode::Manual).await?;
            expect_eq(response.status.as_u16(), 301)?;
            expect_eq(response.header("location"), Some(s.url("/about").as_str()))?;
        }
        {
            let response = s
                .http
                .fetch("/external-redirect", RedirectMode::Manual)
                .await?;
            expect_eq(response.status.as_u16(), 301)?;
            expect_eq(response.header("location"), Some(EXTERNAL_REDIRECT_TARGET))?;
        }
        Ok(())
    }

    async fn argon2_rejects(&self, s: &Session) -> E2eResult<()> {
        s.page.goto(&s.url("/argon2")).await?;
        s.auto_retry("wrong password rejected", move || async move {
            submit_password(s, "wrong-password").await?;
            let text = body_text(s).await?;
            expect_contains(&text, "Invalid password")?;
            expect_not_contains(&text, "Valid password")
        })
        .await?;

        if self.tolerates_mutation_logs() {
            s.ignore_logs()?;
        }
        Ok(())
    }

    async fn argon2(&self, s: &Session) -> E2eResult<()> {
        s.page.goto(&s.url("/argon2")).await?;
        expect_eq(
            s.page.text_content(SUBMIT_BUTTON).await?.as_deref(),
            Some("Sign in"),
        )?;
        s.auto_retry("password verified", move || async move {
            submit_password(s, "correct-password").await?;
            expect_contains(&body_text(s).await?, "Valid password")
        })
        .await?;

        if self.tolerates_mutation_logs() {
            s.ignore_logs()?;
        }
        Ok(())
    }

    async fn sharp(&self, s: &Session) -> E2eResult<()> {
        s.page.goto(&s.url("/sharp")).await?;
        expect_eq(
            s.page.text_content(COUNTER_BUTTON).await?.as_deref(),
            Some("Run sharp"),
        )?;
        s.auto_retry("sharp output", move || async move {
            s.page.click(COUNTER_BUTTON).await?;
            expect_contains(&body_text(s).await?, "240000 bytes")
        })
        .await?;

        if self.tolerates_mutation_logs() {
            s.ignore_logs()?;
        }
        Ok(())
    }

    async fn x_test_header(&self, s: &Session) -> E2eResult<()> {
        let response = s.page.goto(&s.url("/")).await?;
        expect_eq(response.header_value("x-test"), Some("test"))
    }

    async fn vite_hmr_websocket(&self, s: &Session) -> E2eResult<()> {
        s.page.goto(&s.url("/")).await?;
        s.auto_retry("vite connected", move || async move {
            s.expect_log("[vite] connected.", ExpectLogOptions::default())
        })
        .await
    }

    async fn server_entry_hmr(&self, s: &Session) -> E2eResult<()> {
        s.page.goto(&s.url("/")).await?;
        expect_eq(s.page.text_content("h3").await?.as_deref(), Some("x-runtime"))?;

        s.editor.edit_file(self.adapter.server_entry(), |content| {
            content.replace("x-runtime", "x-runtime-edited")
        })?;
        s.auto_retry("edited server entry", move || async move {
            expect_eq(
                s.page.text_content("h3").await?.as_deref(),
                Some("x-runtime-edited"),
            )
        })
        .await?;

        settle().await;
        s.editor.edit_file_revert()?;
        s.auto_retry("reverted server entry", move || async move {
            expect_eq(s.page.text_content("h3").await?.as_deref(), Some("x-runtime"))
        })
        .await?;

        s.ignore_logs()
    }

    async fn middleware_hmr(&self, s: &Session) -> E2eResult<()> {
        let dummy_body = move || async move {
            let response = s.http.fetch("/dummy", RedirectMode::Follow).await?;
            Ok::<_, E2eError>(response.text())
        };

        expect_eq(dummy_body().await?, "OK".to_string())?;

        s.editor.edit_file(DUMMY_MIDDLEWARE, |content| {
            content.replace("OK", "OK-edited")
        })?;
        s.auto_retry("edited middleware", move || async move {
            expect_eq(dummy_body().await?, "OK-edited".to_string())
        })
        .await?;

        settle().await;
        s.editor.edit_file_revert()?;
        s.auto_retry("reverted middleware", move || async move {
            expect_eq(dummy_body().await?, "OK".to_string())
        })
        .await?;

        s.ignore_logs()
    }

    async fn prod_compression(&self, s: &Session) -> E2eResult<()> {
        let response = s.page.goto(&s.url("/")).await?;
        expect_eq(response.header_value("content-encoding"), Some("gzip"))?;
        let vary = response.header_value("vary").unwrap_or_default();
        expect_contains(vary, "Accept-Encoding")
    }

    async fn prod_gzip_body(&self, s: &Session) -> E2eResult<()> {
        let response = s
            .http
            .fetch_with("/", RedirectMode::Follow, &[("accept-encoding", "gzip")])
            .await?;
        expect_eq(response.header("content-encoding"), Some("gzip"))?;

        let mut html = String::new();
        GzDecoder::new(response.body.as_slice())
            .read_to_string(&mut html)
            .map_err(|e| E2eError::AssertionFailed(format!("body is not valid gzip: {}", e)))?;
        expect_contains(&html, "To-do List")
    }
}

async fn body_text(s: &Session) -> E2eResult<String> {
    Ok(s.page.text_content("body").await?.unwrap_or_default())
}

async fn number_of_items(s: &Session) -> E2eResult<u64> {
    let count = s
        .page
        .evaluate("document.querySelectorAll('li').length")
        .await?;
    count.as_u64().ok_or_else(|| {
        E2eError::AssertionFailed(format!("item count is not a number: {}", count))
    })
}

async fn submit_password(s: &Session, password: &str) -> E2eResult<()> {
    s.page.fill(TEXT_INPUT, "").await?;
    s.page.fill(TEXT_INPUT, password).await?;
    s.page.click(SUBMIT_BUTTON).await
}

fn expect_on_ready_log(s: &Session) -> E2eResult<()> {
    s.expect_log("HOOK CALLED: onReady", ExpectLogOptions::stdout_history())
}

fn expect_node_server_log(s: &Session, server_type: ServerType) -> E2eResult<()> {
    let message = format!("HOOK CALLED: onCreate: {}", server_type.as_str());
    s.expect_log(&message, ExpectLogOptions::stdout_history())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn scenario(mode: LaunchMode, options: ScenarioOptions) -> Scenario {
        Scenario::new(mode, options, Adapter::Hono)
    }

    #[test_case(LaunchMode::Dev, false => 14 - 2 ; "dev registers hmr checks")]
    #[test_case(LaunchMode::Dev, true => 14 - 5 ; "dev without server hmr")]
    #[test_case(LaunchMode::Prod, false => 14 - 3 ; "prod registers compression checks")]
    #[test_case(LaunchMode::Prod, true => 14 - 3 ; "prod ignores skip flag")]
    fn test_registered_case_count(mode: LaunchMode, skip_server_hmr: bool) -> usize {
        let options = ScenarioOptions {
            skip_server_hmr,
            ..Default::default()
        };
        scenario(mode, options).test_cases().len()
    }

    #[test]
    fn test_dev_only_and_prod_only_cases() {
        let dev = scenario(LaunchMode::Dev, ScenarioOptions::default()).test_cases();
        assert!(dev.contains(&TestCase::ServerEntryHmr));
        assert!(dev.contains(&TestCase::MiddlewareHmr));
        assert!(!dev.contains(&TestCase::ProdCompression));

        let prod = scenario(LaunchMode::Prod, ScenarioOptions::default()).test_cases();
        assert!(prod.contains(&TestCase::ProdCompression));
        assert!(!prod.contains(&TestCase::ViteHmrWebsocket));
    }

    #[test]
    fn test_order_puts_mutation_before_persistence() {
        let cases = scenario(LaunchMode::Prod, ScenarioOptions::default()).test_cases();
        let add = cases.iter().position(|c| *c == TestCase::AddTodoItem).unwrap();
        let persisted = cases.iter().position(|c| *c == TestCase::TodoPersisted).unwrap();
        let wrong = cases
            .iter()
            .position(|c| *c == TestCase::Argon2RejectsWrongPassword)
            .unwrap();
        let right = cases.iter().position(|c| *c == TestCase::Argon2).unwrap();
        assert!(add < persisted);
        assert!(wrong < right);
    }

    #[test]
    fn test_startup_directive() {
        let options = ScenarioOptions {
            https: true,
            is_flaky: true,
            ..Default::default()
        };
        let directive = scenario(LaunchMode::Prod, options).startup("pnpm");
        assert_eq!(directive.command, "pnpm run prod");
        assert_eq!(directive.server_url, "https://localhost:3000");
        assert!(directive.is_flaky);
    }

    #[test]
    fn test_label() {
        let options = ScenarioOptions {
            https: true,
            ..Default::default()
        };
        let s = Scenario::new(LaunchMode::Dev, options, Adapter::H3);
        assert_eq!(s.label(), "dev+https (h3)");
    }
}
