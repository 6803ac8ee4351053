//! HTTP-backed page session: fetches portal pages with a cookie-carrying client and
//! answers selector waits by re-fetching the current page until the node shows up.

use std::time::{Duration, Instant};

use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::error::IngestError;
use crate::portal::{FieldSelector, PageSession};
use crate::settings::PortalSettings;

const LOGIN_NAME: &str = "#loginname";
const LOGIN_SECRET: &str = "#login";
const ACCOUNT_SELECT: &str = "select[name=accountOptions]";

pub struct HttpPageSession {
    client: Client,
    poll_interval: Duration,
    current: Option<Url>,
    html: String,
}

impl HttpPageSession {
    pub fn new(portal: &PortalSettings) -> Result<Self, IngestError> {
        let client = Client::builder()
            .user_agent(portal.user_agent.as_str())
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| IngestError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpPageSession {
            client,
            poll_interval: portal.poll_interval(),
            current: None,
            html: String::new(),
        })
    }

    async fn load(&mut self, request: reqwest::RequestBuilder, what: &str) -> Result<(), IngestError> {
        let response = request
            .send()
            .await
            .map_err(|e| IngestError::source_unavailable(what, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::source_unavailable(what, format!("HTTP {status}")));
        }
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::source_unavailable(what, format!("body read failed: {e}")))?;
        debug!(%url, bytes = body.len(), "page loaded");
        self.current = Some(url);
        self.html = body;
        Ok(())
    }

    async fn refresh(&mut self) {
        let Some(url) = self.current.clone() else {
            return;
        };
        if let Err(e) = self.load(self.client.get(url.clone()), url.as_str()).await {
            debug!(%url, error = %e, "refresh failed while polling");
        }
    }

    /// Poll the current page until `found` returns a value or `timeout` passes.
    async fn poll<T>(&mut self, timeout: Duration, found: impl Fn(&str) -> Option<T>) -> Option<T> {
        let start = Instant::now();
        loop {
            if let Some(v) = found(&self.html) {
                return Some(v);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
            self.refresh().await;
        }
    }

    /// Submit the form that contains `anchor`, with `overrides` replacing field values.
    async fn submit_form(
        &mut self,
        anchor: &str,
        overrides: &[(&str, String)],
    ) -> Result<(), IngestError> {
        let base = self
            .current
            .clone()
            .ok_or_else(|| IngestError::source_unavailable("login", "no page loaded"))?;
        let form = find_form(&self.html, anchor)
            .ok_or_else(|| IngestError::source_unavailable(base.as_str(), format!("no form around '{anchor}'")))?;
        let action = base
            .join(&form.action)
            .map_err(|e| IngestError::source_unavailable(base.as_str(), e))?;

        let mut fields = form.fields;
        for (name, value) in overrides {
            match fields.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => fields.push((name.to_string(), value.clone())),
            }
        }

        let request = if form.method.eq_ignore_ascii_case("get") {
            self.client.get(action.clone()).query(&fields)
        } else {
            self.client.post(action.clone()).form(&fields)
        };
        self.load(request, action.as_str()).await
    }
}

impl PageSession for HttpPageSession {
    async fn navigate(&mut self, url: &str) -> Result<(), IngestError> {
        let parsed = Url::parse(url).map_err(|e| IngestError::source_unavailable(url, e))?;
        self.load(self.client.get(parsed), url).await
    }

    async fn await_node(&mut self, css: &str, timeout: Duration) -> bool {
        let Ok(selector) = Selector::parse(css) else {
            warn!(css, "invalid selector");
            return false;
        };
        self.poll(timeout, |html| {
            Html::parse_document(html).select(&selector).next().map(|_| ())
        })
        .await
        .is_some()
    }

    async fn await_field(
        &mut self,
        selector: &FieldSelector,
        timeout: Duration,
    ) -> Result<String, IngestError> {
        let presence = parse_selector(selector.presence)?;
        let content = parse_selector(selector.content)?;
        let text = self
            .poll(timeout, |html| {
                let doc = Html::parse_document(html);
                doc.select(&presence).next()?;
                let text = doc
                    .select(&content)
                    .nth(selector.nth)
                    .map(|el| element_text(el, selector.separator));
                text
            })
            .await;
        text.ok_or_else(|| IngestError::FieldTimeout {
            field: selector.field,
            selector: selector.presence.to_string(),
            waited: timeout,
        })
    }

    async fn login(
        &mut self,
        credentials: &Credentials,
        portal: &PortalSettings,
    ) -> Result<(), IngestError> {
        if self.await_node(LOGIN_NAME, portal.login_timeout()).await {
            let names = input_names(&self.html, &[LOGIN_NAME, LOGIN_SECRET]);
            let [Some(user_field), Some(pass_field)] = names.as_slice() else {
                return Err(IngestError::source_unavailable(
                    "login",
                    "login inputs have no name attribute",
                ));
            };
            let overrides = [
                (user_field.as_str(), credentials.identity.clone()),
                (pass_field.as_str(), credentials.secret.clone()),
            ];
            self.submit_form(LOGIN_NAME, &overrides).await?;
            if has_node(&self.html, LOGIN_NAME) {
                return Err(IngestError::source_unavailable("login", "credentials rejected"));
            }
            debug!(identity = %credentials.identity, "login form accepted");
        } else {
            debug!("no login form, session may already be authenticated");
        }

        if self.await_node(ACCOUNT_SELECT, portal.account_timeout()).await {
            let value = account_option(&self.html, &portal.account_name).ok_or_else(|| {
                IngestError::source_unavailable(
                    "login",
                    format!("account '{}' not offered", portal.account_name),
                )
            })?;
            self.submit_form(ACCOUNT_SELECT, &[("accountOptions", value)]).await?;
            debug!(account = %portal.account_name, "account selected");
        } else {
            debug!("no account selection offered");
        }
        Ok(())
    }
}

fn parse_selector(css: &str) -> Result<Selector, IngestError> {
    Selector::parse(css).map_err(|e| IngestError::Configuration(format!("bad selector '{css}': {e:?}")))
}

fn element_text(el: ElementRef<'_>, separator: &str) -> String {
    el.text().collect::<Vec<_>>().join(separator)
}

fn has_node(html: &str, css: &str) -> bool {
    let Ok(sel) = Selector::parse(css) else {
        return false;
    };
    let doc = Html::parse_document(html);
    let found = doc.select(&sel).next().is_some();
    found
}

struct PortalForm {
    action: String,
    method: String,
    fields: Vec<(String, String)>,
}

fn find_form(html: &str, anchor: &str) -> Option<PortalForm> {
    let doc = Html::parse_document(html);
    let form_sel = Selector::parse("form").ok()?;
    let anchor_sel = Selector::parse(anchor).ok()?;
    let input_sel = Selector::parse("input[name]").ok()?;

    let form = doc
        .select(&form_sel)
        .find(|f| f.select(&anchor_sel).next().is_some())?;
    let fields = form
        .select(&input_sel)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect();
    Some(PortalForm {
        action: form.value().attr("action").unwrap_or("").to_string(),
        method: form.value().attr("method").unwrap_or("post").to_string(),
        fields,
    })
}

fn input_names(html: &str, css: &[&str]) -> Vec<Option<String>> {
    let doc = Html::parse_document(html);
    css.iter()
        .map(|c| {
            let sel = Selector::parse(c).ok()?;
            let name = doc.select(&sel).next()?.value().attr("name").map(str::to_string);
            name
        })
        .collect()
}

fn account_option(html: &str, account: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("select[name=accountOptions] option").ok()?;
    let value = doc
        .select(&sel)
        .find(|opt| opt.text().collect::<String>().trim() == account)
        .map(|opt| {
            opt.value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| opt.text().collect::<String>().trim().to_string())
        });
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FieldKind;
    use crate::portal::PORTAL_FIELDS;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC_PAGE: &str = r#"<html><body><div class="docsPageSpecific">
        <div class="docsContentRow"><div><span class="segColR">Farm Bill Oversight</span></div></div>
        <div class="docSegGrid">
          <div><span class="segColR">Hearing</span></div>
          <div><span class="segColL">Mar. 4, 1999</span></div>
          <div><span class="segColR">Committee on Agriculture</span></div>
          <div><span class="segColR">Y4.AG8/1:106-3</span></div>
        </div>
        <div class="segFull fulltext"><fulltext><p>Opening statement</p><p>of the chair.</p></fulltext></div>
        </div></body></html>"#;

    fn portal() -> PortalSettings {
        PortalSettings {
            login_timeout_secs: 0,
            account_timeout_secs: 0,
            page_timeout_secs: 0,
            field_timeout_secs: 0,
            poll_interval_ms: 1,
            login_attempts: 1,
            account_name: "WASHINGTON STATE UNIVERSITY".into(),
            user_agent: "test".into(),
        }
    }

    async fn session_on(server: &MockServer, page: &str) -> HttpPageSession {
        let mut s = HttpPageSession::new(&portal()).unwrap();
        s.navigate(&format!("{}{}", server.uri(), page)).await.unwrap();
        s
    }

    #[tokio::test]
    async fn reads_every_portal_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DOC_PAGE))
            .mount(&server)
            .await;

        let mut s = session_on(&server, "/doc/1").await;
        assert!(s.await_node(crate::portal::PAGE_READY, Duration::ZERO).await);
        let mut got = Vec::new();
        for sel in &PORTAL_FIELDS {
            got.push(s.await_field(sel, Duration::ZERO).await.unwrap());
        }
        assert_eq!(
            got,
            vec![
                "Farm Bill Oversight",
                "Committee on Agriculture",
                "Y4.AG8/1:106-3",
                "Opening statement of the chair.",
            ]
        );
    }

    #[tokio::test]
    async fn waits_for_node_that_renders_late() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>Loading</body></html>"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/doc/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DOC_PAGE))
            .mount(&server)
            .await;

        let mut s = HttpPageSession::new(&PortalSettings {
            poll_interval_ms: 5,
            ..portal()
        })
        .unwrap();
        s.navigate(&format!("{}/doc/slow", server.uri())).await.unwrap();
        assert!(!has_node(&s.html, ".docsContentRow"));

        let title = s
            .await_field(&PORTAL_FIELDS[0], Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(title, "Farm Bill Oversight");
        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 3, "expected refreshes, saw {}", requests.len());
    }

    #[tokio::test]
    async fn missing_node_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&server)
            .await;

        let mut s = session_on(&server, "/doc/empty").await;
        let err = s
            .await_field(&PORTAL_FIELDS[0], Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::FieldTimeout { field: FieldKind::Title, .. }));
    }

    #[tokio::test]
    async fn navigation_error_is_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let mut s = HttpPageSession::new(&portal()).unwrap();
        let err = s.navigate(&format!("{}/doc/2", server.uri())).await.unwrap_err();
        assert!(matches!(err, IngestError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn login_submits_credentials_and_account() {
        let server = MockServer::start().await;
        let login_page = r#"<html><body><form action="/login" method="post">
            <input type="hidden" name="token" value="abc">
            <input id="loginname" name="user">
            <input id="login" name="pass" type="password">
            <button class="psloginbutton">Log in</button></form></body></html>"#;
        let account_page = r#"<html><body><form action="/account" method="post">
            <select name="accountOptions">
              <option value="1">OTHER COLLEGE</option>
              <option value="77">WASHINGTON STATE UNIVERSITY</option>
            </select><input id="submit" type="submit"></form></body></html>"#;

        Mock::given(method("GET"))
            .and(path("/doc/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("token=abc"))
            .and(body_string_contains("user=jdoe"))
            .and(body_string_contains("pass=pw"))
            .respond_with(ResponseTemplate::new(200).set_body_string(account_page))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/account"))
            .and(body_string_contains("accountOptions=77"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DOC_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let mut s = session_on(&server, "/doc/1").await;
        let creds = Credentials::parse("jdoe|pw").unwrap();
        s.login(&creds, &portal()).await.unwrap();
        assert!(has_node(&s.html, ".docsPageSpecific"));
        assert_eq!(s.current.as_ref().map(|u| u.path()), Some("/account"));
    }

    #[tokio::test]
    async fn rejected_credentials_fail_attempt() {
        let server = MockServer::start().await;
        let login_page = r#"<html><body><form action="/login">
            <input id="loginname" name="user"><input id="login" name="pass"></form></body></html>"#;
        Mock::given(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page))
            .mount(&server)
            .await;

        let mut s = session_on(&server, "/login").await;
        let creds = Credentials::parse("jdoe|wrong").unwrap();
        let err = s.login(&creds, &portal()).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn form_fields_and_account_lookup() {
        let html = r#"<form action="/a"><input name="x" value="1"><select name="accountOptions"><option>PLAIN</option></select></form>"#;
        let form = find_form(html, ACCOUNT_SELECT).unwrap();
        assert_eq!(form.action, "/a");
        assert_eq!(form.fields, vec![("x".to_string(), "1".to_string())]);
        assert_eq!(account_option(html, "PLAIN").as_deref(), Some("PLAIN"));
        assert!(account_option(html, "NONE").is_none());
    }
}
