//! Page-pass field extraction: the same assembler contract as the file scans, but
//! field values come from waiting on selector-addressed nodes of a rendered page.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::db::SinkFactory;
use crate::error::IngestError;
use crate::ingest::{deliver, note_leftover, IngestReport};
use crate::parser::assembler::{Record, RecordAssembler, RecordShape};
use crate::parser::patterns;
use crate::parser::{FieldEvent, FieldKind, SourcePosition};
use crate::settings::PortalSettings;

/// Element whose presence marks a fully rendered document page.
pub const PAGE_READY: &str = ".docsPageSpecific";

/// Where one field lives on a document page.
///
/// `presence` is waited on; the value is then read from the `nth` match of
/// `content`, its text nodes joined with `separator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSelector {
    pub field: FieldKind,
    pub presence: &'static str,
    pub content: &'static str,
    pub nth: usize,
    pub separator: &'static str,
}

pub const PORTAL_FIELDS: [FieldSelector; 4] = [
    FieldSelector {
        field: FieldKind::Title,
        presence: ".docsContentRow > div:nth-child(1)",
        content: ".segColR",
        nth: 0,
        separator: "",
    },
    FieldSelector {
        field: FieldKind::Committee,
        presence: ".docSegGrid > div:nth-child(3)",
        content: ".segColR",
        nth: 2,
        separator: "",
    },
    FieldSelector {
        field: FieldKind::Meta,
        presence: ".docSegGrid > div:nth-child(4)",
        content: ".segColR",
        nth: 3,
        separator: "",
    },
    FieldSelector {
        field: FieldKind::FullText,
        presence: ".segFull",
        content: "fulltext",
        nth: 0,
        separator: " ",
    },
];

/// Browser-side capability the adapter drives. Implementations own navigation,
/// polling and the portal's login forms; the adapter owns retries and assembly.
#[allow(async_fn_in_trait)]
pub trait PageSession {
    /// Load `url` as the current page.
    async fn navigate(&mut self, url: &str) -> Result<(), IngestError>;

    /// Wait up to `timeout` for a node matching `css` on the current page.
    async fn await_node(&mut self, css: &str, timeout: Duration) -> bool;

    /// Wait for `selector.presence`, then read the text of its content node.
    /// Not appearing in time is `IngestError::FieldTimeout`.
    async fn await_field(
        &mut self,
        selector: &FieldSelector,
        timeout: Duration,
    ) -> Result<String, IngestError>;

    /// One interactive login attempt against the current page.
    async fn login(
        &mut self,
        credentials: &Credentials,
        portal: &PortalSettings,
    ) -> Result<(), IngestError>;
}

/// Reads one record per document page through a [`PageSession`].
pub struct FieldExtractionAdapter<'a, S> {
    session: S,
    credentials: &'a Credentials,
    portal: &'a PortalSettings,
    authenticated: bool,
}

impl<'a, S: PageSession> FieldExtractionAdapter<'a, S> {
    pub fn new(session: S, credentials: &'a Credentials, portal: &'a PortalSettings) -> Self {
        FieldExtractionAdapter {
            session,
            credentials,
            portal,
            authenticated: false,
        }
    }

    /// Bounded login loop, run once before the first page is read.
    async fn ensure_login(&mut self) -> Result<(), IngestError> {
        if self.authenticated {
            return Ok(());
        }
        let attempts = self.portal.login_attempts;
        for attempt in 1..=attempts {
            match self.session.login(self.credentials, self.portal).await {
                Ok(()) => {
                    info!(attempt, identity = %self.credentials.identity, "portal login complete");
                    self.authenticated = true;
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let backoff = login_backoff(self.portal, attempt);
                    warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "login attempt failed, backing off {:.1}s",
                        backoff.as_secs_f64()
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(IngestError::AuthenticationFailed { attempts })
    }

    /// Visit `permalink` and assemble its record.
    ///
    /// Each field is looked up independently; a timeout leaves that field absent.
    /// Returns `Ok(None)` when the record stays incomplete (logged and counted).
    pub async fn extract(
        &mut self,
        permalink: &str,
        report: &mut IngestReport,
    ) -> Result<Option<Record>, IngestError> {
        self.session.navigate(permalink).await?;
        if !self.authenticated {
            self.ensure_login().await?;
            self.session.navigate(permalink).await?;
        }

        if !self
            .session
            .await_node(PAGE_READY, self.portal.page_timeout())
            .await
        {
            warn!(source = %permalink, selector = PAGE_READY, "page not ready, reading fields anyway");
        }

        let mut assembler = RecordAssembler::new(RecordShape::Congress);
        let mut record =
            assembler.feed(FieldEvent::new(FieldKind::Permalink, permalink, SourcePosition::Row));

        for selector in &PORTAL_FIELDS {
            let value = match self
                .session
                .await_field(selector, self.portal.field_timeout())
                .await
            {
                Ok(text) => patterns::match_node(selector.field, &text),
                Err(e @ IngestError::FieldTimeout { .. }) => {
                    report.field_timeouts += 1;
                    warn!(source = %permalink, error = %e, "field absent");
                    None
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(source = %permalink, field = %selector.field, error = %e, "field lookup failed");
                    None
                }
            };
            let Some(value) = value else {
                debug!(source = %permalink, field = %selector.field, "no value");
                continue;
            };
            let event = FieldEvent::new(
                selector.field,
                value,
                SourcePosition::Node(selector.content.to_string()),
            );
            if let Some(done) = assembler.feed(event) {
                record = Some(done);
            }
        }

        report.fields_overwritten += assembler.overwritten();
        if record.is_none() {
            note_leftover(assembler.finish(), permalink, report);
        }
        Ok(record)
    }
}

/// Pause after failed login `attempt` (1-based): the poll interval doubled per
/// attempt, never longer than the account-selection timeout.
fn login_backoff(portal: &PortalSettings, attempt: u32) -> Duration {
    let ceiling = portal.account_timeout().max(portal.poll_interval());
    let exponent = attempt.saturating_sub(1).min(16);
    portal
        .poll_interval()
        .checked_mul(1u32 << exponent)
        .map_or(ceiling, |d| d.min(ceiling))
}

/// Visit each permalink in order, persisting every complete page record.
///
/// Navigation failures skip the page. Login exhaustion and a lost sink end the pass.
pub async fn scrape_permalinks<S, F>(
    adapter: &mut FieldExtractionAdapter<'_, S>,
    permalinks: &[String],
    factory: &F,
    report: &mut IngestReport,
) -> Result<(), IngestError>
where
    S: PageSession,
    F: SinkFactory,
{
    let pb = ProgressBar::new(permalinks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for permalink in permalinks {
        report.sources_total += 1;
        let result = scrape_one(adapter, permalink, factory, report).await;
        pb.inc(1);
        if let Err(e) = result {
            pb.abandon();
            return Err(e);
        }
    }
    pb.finish_and_clear();
    Ok(())
}

async fn scrape_one<S, F>(
    adapter: &mut FieldExtractionAdapter<'_, S>,
    permalink: &str,
    factory: &F,
    report: &mut IngestReport,
) -> Result<(), IngestError>
where
    S: PageSession,
    F: SinkFactory,
{
    let record = match adapter.extract(permalink, report).await {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(()),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(source = %permalink, error = %e, "skipping page");
            report.sources_failed += 1;
            return Ok(());
        }
    };
    let mut sink = factory.open()?;
    deliver(&mut sink, &record, permalink, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordSink;
    use crate::parser::assembler::CongressRecord;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::rc::Rc;

    #[derive(Default)]
    struct SessionLog {
        login_calls: u32,
        visits: Vec<String>,
    }

    /// Scripted page: which URLs load, and which field kinds are present on them.
    /// `log` stays shared with the test after the session moves into the adapter.
    #[derive(Default)]
    struct FakeSession {
        broken: HashSet<String>,
        fields: HashMap<FieldKind, String>,
        login_failures: u32,
        log: Rc<RefCell<SessionLog>>,
    }

    impl PageSession for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<(), IngestError> {
            self.log.borrow_mut().visits.push(url.to_string());
            if self.broken.contains(url) {
                return Err(IngestError::source_unavailable(url, "HTTP 502"));
            }
            Ok(())
        }

        async fn await_node(&mut self, _css: &str, _timeout: Duration) -> bool {
            true
        }

        async fn await_field(
            &mut self,
            selector: &FieldSelector,
            timeout: Duration,
        ) -> Result<String, IngestError> {
            self.fields
                .get(&selector.field)
                .cloned()
                .ok_or(IngestError::FieldTimeout {
                    field: selector.field,
                    selector: selector.presence.to_string(),
                    waited: timeout,
                })
        }

        async fn login(
            &mut self,
            _credentials: &Credentials,
            _portal: &PortalSettings,
        ) -> Result<(), IngestError> {
            let mut log = self.log.borrow_mut();
            log.login_calls += 1;
            if log.login_calls <= self.login_failures {
                return Err(IngestError::source_unavailable("login", "form missing"));
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Rc<RefCell<Vec<Record>>>);

    impl SinkFactory for Collect {
        type Sink = Collect;
        fn open(&self) -> Result<Collect, IngestError> {
            Ok(self.clone())
        }
    }

    impl RecordSink for Collect {
        fn persist(&mut self, record: &Record) -> Result<(), IngestError> {
            self.0.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    fn portal() -> PortalSettings {
        PortalSettings {
            login_timeout_secs: 0,
            account_timeout_secs: 0,
            page_timeout_secs: 0,
            field_timeout_secs: 0,
            poll_interval_ms: 1,
            login_attempts: 3,
            account_name: "TEST UNIVERSITY".into(),
            user_agent: "test".into(),
        }
    }

    fn creds() -> Credentials {
        Credentials::parse("jdoe|pw").unwrap()
    }

    fn full_page() -> FakeSession {
        let mut s = FakeSession::default();
        s.fields.insert(FieldKind::Title, " Farm Bill\n Hearing ".into());
        s.fields.insert(FieldKind::Committee, "Committee on Agriculture".into());
        s.fields.insert(FieldKind::Meta, "Y4.AG8/1:107-12".into());
        s.fields.insert(FieldKind::FullText, "Testimony  of the Secretary".into());
        s
    }

    #[tokio::test]
    async fn full_page_yields_record() {
        let (portal, creds) = (portal(), creds());
        let session = full_page();
        let log = Rc::clone(&session.log);
        let mut adapter = FieldExtractionAdapter::new(session, &creds, &portal);
        let mut report = IngestReport::default();
        let rec = adapter.extract("https://p/1", &mut report).await.unwrap().unwrap();
        assert_eq!(
            rec,
            Record::Congress(CongressRecord {
                title: "Farm Bill Hearing".into(),
                committee: "Committee on Agriculture".into(),
                meta: "Y4.AG8/1:107-12".into(),
                full_text: "Testimony of the Secretary".into(),
                permalink: "https://p/1".into(),
            })
        );
        // Navigate, log in, navigate back.
        assert_eq!(log.borrow().visits, vec!["https://p/1", "https://p/1"]);

        // Already logged in: one visit, no second login.
        adapter.extract("https://p/3", &mut report).await.unwrap().unwrap();
        assert_eq!(log.borrow().visits.len(), 3);
        assert_eq!(log.borrow().login_calls, 1);
    }

    #[tokio::test]
    async fn timed_out_field_drops_record() {
        let (portal, creds) = (portal(), creds());
        let mut session = full_page();
        session.fields.remove(&FieldKind::Committee);
        let mut adapter = FieldExtractionAdapter::new(session, &creds, &portal);
        let mut report = IngestReport::default();
        assert!(adapter.extract("https://p/2", &mut report).await.unwrap().is_none());
        assert_eq!(report.field_timeouts, 1);
        assert_eq!(report.incomplete_records, 1);
    }

    #[tokio::test]
    async fn timed_out_field_persists_nothing() {
        let (portal, creds) = (portal(), creds());
        let mut session = full_page();
        session.fields.remove(&FieldKind::FullText);
        let mut adapter = FieldExtractionAdapter::new(session, &creds, &portal);
        let links = vec!["https://p/4".to_string(), "https://p/5".to_string()];
        let sink = Collect::default();
        let mut report = IngestReport::default();
        scrape_permalinks(&mut adapter, &links, &sink, &mut report).await.unwrap();
        assert!(sink.0.borrow().is_empty());
        assert_eq!(report.records_persisted, 0);
        assert_eq!(report.field_timeouts, 2);
        assert_eq!(report.incomplete_records, 2);
        assert_eq!(report.sources_failed, 0);
    }

    #[tokio::test]
    async fn login_retries_then_succeeds_once() {
        let (portal, creds) = (portal(), creds());
        let mut session = full_page();
        session.login_failures = 2;
        let log = Rc::clone(&session.log);
        let mut adapter = FieldExtractionAdapter::new(session, &creds, &portal);
        let links = vec!["https://p/1".to_string(), "https://p/2".to_string()];
        let sink = Collect::default();
        let mut report = IngestReport::default();
        scrape_permalinks(&mut adapter, &links, &sink, &mut report).await.unwrap();
        assert_eq!(sink.0.borrow().len(), 2);
        assert_eq!(log.borrow().login_calls, 3);
    }

    #[tokio::test]
    async fn login_exhaustion_is_fatal() {
        let (portal, creds) = (portal(), creds());
        let mut session = full_page();
        session.login_failures = 10;
        let mut adapter = FieldExtractionAdapter::new(session, &creds, &portal);
        let sink = Collect::default();
        let mut report = IngestReport::default();
        let err = scrape_permalinks(&mut adapter, &["https://p/1".to_string()], &sink, &mut report)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AuthenticationFailed { attempts: 3 }));
        assert!(sink.0.borrow().is_empty());
    }

    #[tokio::test]
    async fn broken_page_skipped() {
        let (portal, creds) = (portal(), creds());
        let mut session = full_page();
        session.broken.insert("https://p/bad".into());
        let mut adapter = FieldExtractionAdapter::new(session, &creds, &portal);
        let links = vec!["https://p/bad".to_string(), "https://p/ok".to_string()];
        let sink = Collect::default();
        let mut report = IngestReport::default();
        scrape_permalinks(&mut adapter, &links, &sink, &mut report).await.unwrap();
        assert_eq!(report.sources_failed, 1);
        assert_eq!(report.records_persisted, 1);
        assert_eq!(sink.0.borrow()[0].key(), "https://p/ok");
    }

    #[test]
    fn login_backoff_doubles_then_caps() {
        let mut portal = portal();
        portal.poll_interval_ms = 100;
        portal.account_timeout_secs = 1;
        assert_eq!(login_backoff(&portal, 1), Duration::from_millis(100));
        assert_eq!(login_backoff(&portal, 2), Duration::from_millis(200));
        assert_eq!(login_backoff(&portal, 4), Duration::from_millis(800));
        assert_eq!(login_backoff(&portal, 5), Duration::from_secs(1));
        assert_eq!(login_backoff(&portal, 40), Duration::from_secs(1));

        portal.poll_interval_ms = u64::MAX;
        assert_eq!(login_backoff(&portal, 30), Duration::from_millis(u64::MAX));
    }
}
