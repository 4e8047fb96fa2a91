//! Crawl controller: one sequential pipeline per source, sources in parallel.
//!
//! Each page is a [`CrawlTask`] driven through
//! `Pending → Fetching → {Parsed | FetchFailed}`, `Parsed → {Extracted(n) | Empty}`,
//! with retries until `max_retries` attempts and a randomized politeness delay
//! between consecutive fetches of the same source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{DelayRange, SourceConfig};
use crate::document::SourceDocument;
use crate::error::{ConfigError, CrawlError, FetchError};
use crate::parser::{Extractor, PageExtraction};
use crate::sink::JobSink;
use crate::transport::{PageRequest, RawDocument, Session, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fetching,
    Parsed,
    FetchFailed,
    Extracted(usize),
    Empty,
    Failed,
}

/// One page of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    pub query: String,
    pub page: u32,
    pub attempt: u32,
    pub state: TaskState,
}

impl CrawlTask {
    pub fn new(query: &str, page: u32) -> Self {
        Self {
            query: query.to_string(),
            page,
            attempt: 0,
            state: TaskState::Pending,
        }
    }

    fn transition(&mut self, next: TaskState) {
        debug!(query = %self.query, page = self.page, attempt = self.attempt, from = ?self.state, to = ?next, "task");
        self.state = next;
    }

    fn status(&self) -> PageStatus {
        PageStatus {
            query: self.query.clone(),
            page: self.page,
            attempts: self.attempt,
            state: self.state,
        }
    }
}

/// Terminal outcome of one page, kept for the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStatus {
    pub query: String,
    pub page: u32,
    pub attempts: u32,
    pub state: TaskState,
}

#[derive(Debug)]
pub struct SourceReport {
    pub source: String,
    pub pages: Vec<PageStatus>,
    pub records: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub output: Option<PathBuf>,
    /// Set when the source's pipeline ended early.
    pub fatal: Option<CrawlError>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            pages: Vec::new(),
            records: 0,
            duplicates: 0,
            rejected: 0,
            output: None,
            fatal: None,
        }
    }

    fn count(&self, pred: impl Fn(TaskState) -> bool) -> usize {
        self.pages.iter().filter(|p| pred(p.state)).count()
    }

    pub fn pages_ok(&self) -> usize {
        self.count(|s| matches!(s, TaskState::Extracted(_)))
    }

    pub fn pages_empty(&self) -> usize {
        self.count(|s| s == TaskState::Empty)
    }

    pub fn pages_failed(&self) -> usize {
        self.count(|s| s == TaskState::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }
}

enum TaskEnd {
    /// Retries exhausted; the crawl moves on.
    Failed(FetchError),
    /// The session is unusable; the source's pipeline ends.
    Fatal(FetchError),
}

/// Sequential crawler for one source. Owns the compiled extraction profile and the
/// politeness clock.
pub struct SourceCrawler<'a> {
    config: &'a SourceConfig,
    extractor: Extractor,
    today: NaiveDate,
    last_fetch: Option<Instant>,
    /// Fragments seen so far; numbers synthesised job ids across pages.
    next_index: usize,
}

impl<'a> SourceCrawler<'a> {
    pub fn new(config: &'a SourceConfig, today: NaiveDate) -> Result<Self, ConfigError> {
        Ok(Self {
            config,
            extractor: Extractor::new(config)?,
            today,
            last_fetch: None,
            next_index: 0,
        })
    }

    /// Crawl every query and page. The session is opened here and always closed
    /// before returning.
    pub async fn crawl(
        &mut self,
        transport: &dyn Transport,
        cancel: &CancellationToken,
    ) -> (JobSink, SourceReport) {
        let name = self.config.name.clone();
        let mut sink = JobSink::new();
        let mut report = SourceReport::new(&name);

        let mut session = match transport.open().await {
            Ok(session) => session,
            Err(error) => {
                error!(source = %name, "failed to open session: {error}");
                report.fatal = Some(CrawlError::Session {
                    source_name: name,
                    error,
                });
                return (sink, report);
            }
        };

        'queries: for query in self.config.effective_queries() {
            let mut page = 1;
            loop {
                if cancel.is_cancelled() {
                    info!(source = %name, "cancelled, not enqueueing further pages");
                    break 'queries;
                }
                let mut task = CrawlTask::new(&query, page);
                let more = match self.run_task(session.as_mut(), &mut task).await {
                    Ok(extraction) => {
                        report.rejected += extraction.rejected;
                        // without a marker, a page that yielded nothing ends the query
                        let more = extraction.has_next.unwrap_or(!extraction.records.is_empty());
                        for record in extraction.records {
                            sink.push(record);
                        }
                        more
                    }
                    Err(TaskEnd::Failed(error)) => {
                        warn!(source = %name, query = %query, page, "page failed: {error}");
                        true
                    }
                    Err(TaskEnd::Fatal(error)) => {
                        error!(source = %name, query = %query, page, "session failed: {error}");
                        report.pages.push(task.status());
                        report.fatal = Some(CrawlError::Session {
                            source_name: name.clone(),
                            error,
                        });
                        break 'queries;
                    }
                };
                report.pages.push(task.status());
                if !more || page >= self.config.max_pages {
                    debug!(source = %name, query = %query, pages = page, "query done");
                    break;
                }
                page += 1;
            }
        }

        session.close().await;
        report.records = sink.len();
        report.duplicates = sink.duplicates();
        (sink, report)
    }

    async fn run_task(
        &mut self,
        session: &mut dyn Session,
        task: &mut CrawlTask,
    ) -> Result<PageExtraction, TaskEnd> {
        let request = PageRequest {
            url: self.config.page_url(&task.query, task.page),
            query: task.query.clone(),
            page: task.page,
        };
        let limit = Duration::from_secs(self.config.timeout_secs);

        loop {
            task.attempt += 1;
            task.transition(TaskState::Fetching);
            self.wait_politely().await;

            let fetched = match timeout(limit, session.fetch(&request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout),
            };
            self.last_fetch = Some(Instant::now());

            match fetched.and_then(|raw| self.extract(raw)) {
                Ok(extraction) => {
                    task.transition(TaskState::Parsed);
                    self.next_index += extraction.fragments;
                    let n = extraction.records.len();
                    task.transition(if n == 0 {
                        TaskState::Empty
                    } else {
                        TaskState::Extracted(n)
                    });
                    info!(
                        source = %self.config.name,
                        query = %task.query,
                        page = task.page,
                        "{} records ({} fragments, {} rejected)",
                        n,
                        extraction.fragments,
                        extraction.rejected
                    );
                    return Ok(extraction);
                }
                Err(error) if error.is_fatal() => {
                    task.transition(TaskState::Failed);
                    return Err(TaskEnd::Fatal(error));
                }
                Err(error) => {
                    task.transition(TaskState::FetchFailed);
                    if task.attempt >= self.config.max_retries {
                        task.transition(TaskState::Failed);
                        return Err(TaskEnd::Failed(error));
                    }
                    let backoff = backoff_delay(self.config.backoff_ms, task.attempt);
                    warn!(
                        "{} on {} (attempt {}/{}), backing off {:.1}s",
                        error,
                        request.url,
                        task.attempt,
                        self.config.max_retries,
                        backoff.as_secs_f64()
                    );
                    sleep(backoff).await;
                    task.transition(TaskState::Pending);
                }
            }
        }
    }

    /// Parse and extract synchronously; the document never outlives this call.
    fn extract(&self, raw: RawDocument) -> Result<PageExtraction, FetchError> {
        let url = Url::parse(&raw.url)
            .map_err(|e| FetchError::Malformed(format!("bad document url '{}': {e}", raw.url)))?;
        let doc = SourceDocument::parse(self.config.format, url, &raw.body)?;
        Ok(self.extractor.extract(&doc, self.next_index, self.today))
    }

    async fn wait_politely(&self) {
        let Some(last) = self.last_fetch else {
            return;
        };
        let delay = random_delay(&self.config.delay_ms);
        let elapsed = last.elapsed();
        if delay > elapsed {
            sleep(delay - elapsed).await;
        }
    }
}

fn random_delay(range: &DelayRange) -> Duration {
    Duration::from_millis(rand::rng().random_range(range.min_ms..=range.max_ms))
}

/// `base * 2^(attempt-1)` plus up to half of `base` of jitter.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter = rand::rng().random_range(0..=base_ms / 2);
    Duration::from_millis(exp.saturating_add(jitter))
}

/// Crawl one source and write its output file.
///
/// The file is only written when at least one page was fetched, so a source that
/// never got a session does not clobber an earlier run's output.
pub async fn run_source(
    config: &SourceConfig,
    transport: &dyn Transport,
    output_dir: &Path,
    today: NaiveDate,
    cancel: &CancellationToken,
) -> SourceReport {
    let mut crawler = match SourceCrawler::new(config, today) {
        Ok(crawler) => crawler,
        Err(e) => {
            error!(source = %config.name, "{e}");
            let mut report = SourceReport::new(&config.name);
            report.fatal = Some(e.into());
            return report;
        }
    };
    let (sink, mut report) = crawler.crawl(transport, cancel).await;

    if report.pages_ok() + report.pages_empty() > 0 {
        if sink.is_empty() {
            warn!(source = %config.name, "pages fetched but no records extracted");
        }
        match sink.write_json(output_dir, &config.name) {
            Ok(path) => report.output = Some(path),
            Err(e) => {
                error!(source = %config.name, "{e}");
                if report.fatal.is_none() {
                    report.fatal = Some(e.into());
                }
            }
        }
    }
    info!(
        source = %report.source,
        "{} records, pages ok/empty/failed {}/{}/{}, {} duplicates, {} rejected",
        report.records,
        report.pages_ok(),
        report.pages_empty(),
        report.pages_failed(),
        report.duplicates,
        report.rejected
    );
    report
}

/// Run independent pipelines for every source concurrently. Reports come back in
/// input order; `on_done` fires as each source finishes.
pub async fn run_sources<F>(
    jobs: Vec<(SourceConfig, Box<dyn Transport>)>,
    output_dir: &Path,
    today: NaiveDate,
    cancel: &CancellationToken,
    mut on_done: F,
) -> Vec<SourceReport>
where
    F: FnMut(&SourceReport),
{
    let mut set = JoinSet::new();
    for (i, (config, transport)) in jobs.into_iter().enumerate() {
        let dir = output_dir.to_path_buf();
        let cancel = cancel.clone();
        set.spawn(async move {
            let report = run_source(&config, transport.as_ref(), &dir, today, &cancel).await;
            (i, report)
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, report)) => {
                on_done(&report);
                reports.push((i, report));
            }
            Err(e) => error!("source task panicked: {e}"),
        }
    }
    reports.sort_by_key(|(i, _)| *i);
    reports.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Reply {
        Body(String),
        Fail(FetchError),
        Hang,
    }

    /// Replies scripted per page number; unscripted pages are empty listings.
    #[derive(Clone, Default)]
    struct Scripted {
        replies: Arc<Mutex<HashMap<u32, VecDeque<Reply>>>>,
        fetches: Arc<Mutex<Vec<(u32, Instant)>>>,
        closed: Arc<AtomicBool>,
        refuse_open: bool,
    }

    impl Scripted {
        fn reply(self, page: u32, reply: Reply) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(page)
                .or_default()
                .push_back(reply);
            self
        }

        fn fetched_pages(&self) -> Vec<u32> {
            self.fetches.lock().unwrap().iter().map(|(p, _)| *p).collect()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn open(&self) -> Result<Box<dyn Session>, FetchError> {
            if self.refuse_open {
                return Err(FetchError::Session("browser did not start".into()));
            }
            Ok(Box::new(self.clone()))
        }
    }

    #[async_trait]
    impl Session for Scripted {
        async fn fetch(&mut self, request: &PageRequest) -> Result<RawDocument, FetchError> {
            self.fetches
                .lock()
                .unwrap()
                .push((request.page, Instant::now()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get_mut(&request.page)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Reply::Body(listing(&[], false)));
            match reply {
                Reply::Body(body) => Ok(RawDocument {
                    url: request.url.clone(),
                    body,
                }),
                Reply::Fail(e) => Err(e),
                Reply::Hang => {
                    sleep(Duration::from_secs(3600)).await;
                    Err(FetchError::Transport("hung".into()))
                }
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Job cards; an empty id leaves the card without a native identifier.
    fn listing(ids: &[&str], next: bool) -> String {
        let mut html = String::from("<html><body>");
        for id in ids {
            let attr = if id.is_empty() {
                String::new()
            } else {
                format!(r#" data-id="{id}""#)
            };
            html.push_str(&format!(
                r#"<div class="job"{attr}><h2>Rust Developer</h2><span class="company">Acme Labs</span></div>"#
            ));
        }
        if next {
            html.push_str(r#"<a class="next" href="?page=next">Next</a>"#);
        }
        html.push_str("</body></html>");
        html
    }

    fn source(extra: &str) -> SourceConfig {
        let toml = format!(
            r#"
[[sources]]
name = "mock"
url_template = "https://jobs.test/search?q={{query}}&page={{page}}"
queries = ["rust"]
max_pages = 3
max_retries = 3
delay_ms = {{ min_ms = 1000, max_ms = 1000 }}
backoff_ms = 500
timeout_secs = 5
fragments = [{{ kind = "css", selector = "div.job" }}]
next_page = [{{ kind = "css", selector = "a.next" }}]
{extra}

[sources.chains]
id = [{{ kind = "attr", attribute = "data-id" }}]
title = [{{ kind = "css", selector = "h2" }}]
company = [{{ kind = "css", selector = ".company" }}]
"#
        );
        Settings::from_toml_str(&toml).unwrap().sources.remove(0)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    async fn crawl(config: &SourceConfig, transport: &Scripted) -> (JobSink, SourceReport) {
        let mut crawler = SourceCrawler::new(config, today()).unwrap();
        crawler.crawl(transport, &CancellationToken::new()).await
    }

    #[tokio::test(start_paused = true)]
    async fn three_timeouts_fail_the_page_and_the_crawl_moves_on() {
        let config = source("");
        let transport = Scripted::default()
            .reply(1, Reply::Hang)
            .reply(1, Reply::Fail(FetchError::Timeout))
            .reply(1, Reply::Hang)
            .reply(2, Reply::Body(listing(&["a", "b"], false)));

        let (sink, report) = crawl(&config, &transport).await;

        assert_eq!(transport.fetched_pages(), vec![1, 1, 1, 2]);
        assert_eq!(report.pages[0].state, TaskState::Failed);
        assert_eq!(report.pages[0].attempts, 3);
        assert_eq!(report.pages[1].state, TaskState::Extracted(2));
        assert_eq!(report.pages_failed(), 1);
        assert!(report.is_success());
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_a_transient_failure() {
        let config = source("");
        let transport = Scripted::default()
            .reply(1, Reply::Fail(FetchError::Status(503)))
            .reply(1, Reply::Body(listing(&["a"], false)));

        let (sink, report) = crawl(&config, &transport).await;
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].attempts, 2);
        assert_eq!(report.pages[0].state, TaskState::Extracted(1));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_retried() {
        let config = source("format = \"json\"");
        let transport = Scripted::default()
            .reply(1, Reply::Body("<html>".into()))
            .reply(1, Reply::Body(r#"[{"title": "x"}]"#.into()));
        let (_, report) = crawl(&config, &transport).await;
        assert_eq!(report.pages[0].attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pagination_stops_at_max_pages_even_if_next_always_exists() {
        let config = source("");
        let mut transport = Scripted::default();
        for page in 1..=10 {
            let id = format!("p{page}");
            transport = transport.reply(page, Reply::Body(listing(&[id.as_str()], true)));
        }
        let (sink, report) = crawl(&config, &transport).await;
        assert_eq!(transport.fetched_pages(), vec![1, 2, 3]);
        assert_eq!(report.pages_ok(), 3);
        assert_eq!(sink.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_next_marker_ends_the_query() {
        let config = source("");
        let transport = Scripted::default().reply(1, Reply::Body(listing(&["a"], false)));
        let (_, report) = crawl(&config, &transport).await;
        assert_eq!(transport.fetched_pages(), vec![1]);
        assert_eq!(report.pages_ok(), 1);
        // the last page keeps its own outcome
        assert_eq!(
            report.pages.last().map(|p| p.state),
            Some(TaskState::Extracted(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn same_job_on_two_pages_is_kept_once() {
        let config = source("");
        let transport = Scripted::default()
            .reply(1, Reply::Body(listing(&["42", "43"], true)))
            .reply(2, Reply::Body(listing(&["42"], false)));
        let (sink, report) = crawl(&config, &transport).await;
        assert_eq!(sink.len(), 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.records, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesised_ids_keep_counting_across_pages() {
        let config = source("");
        let transport = Scripted::default()
            .reply(1, Reply::Body(listing(&["", ""], true)))
            .reply(2, Reply::Body(listing(&[""], false)));
        let (sink, _) = crawl(&config, &transport).await;
        let ids: Vec<&str> = sink.records().iter().map(|r| r.jobid.as_str()).collect();
        assert_eq!(ids, vec!["mock-0", "mock-1", "mock-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_fetches_are_spaced_by_the_politeness_delay() {
        let config = source("");
        let transport = Scripted::default()
            .reply(1, Reply::Fail(FetchError::Transport("reset".into())))
            .reply(1, Reply::Body(listing(&["a"], true)))
            .reply(2, Reply::Body(listing(&["b"], false)));
        crawl(&config, &transport).await;

        let fetches = transport.fetches.lock().unwrap().clone();
        assert_eq!(fetches.len(), 3);
        for pair in fetches.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_failure_ends_the_source_and_closes_the_session() {
        let config = source("");
        let transport = Scripted::default()
            .reply(1, Reply::Body(listing(&["a"], true)))
            .reply(2, Reply::Fail(FetchError::Session("browser crashed".into())));
        let (sink, report) = crawl(&config, &transport).await;

        assert_eq!(transport.fetched_pages(), vec![1, 2]);
        assert!(matches!(report.fatal, Some(CrawlError::Session { .. })));
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_crawl_enqueues_nothing() {
        let config = source("");
        let transport = Scripted::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut crawler = SourceCrawler::new(&config, today()).unwrap();
        let (_, report) = crawler.crawl(&transport, &cancel).await;
        assert!(transport.fetched_pages().is_empty());
        assert!(report.pages.is_empty());
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_source_does_not_stop_another() {
        let dir = tempfile::tempdir().unwrap();
        let good = source("");
        let mut bad = source("");
        bad.name = "broken".into();

        let ok_transport = Scripted::default().reply(1, Reply::Body(listing(&["a"], false)));
        let bad_transport = Scripted {
            refuse_open: true,
            ..Default::default()
        };
        let jobs: Vec<(SourceConfig, Box<dyn Transport>)> = vec![
            (bad, Box::new(bad_transport)),
            (good, Box::new(ok_transport)),
        ];

        let mut finished = 0;
        let reports = run_sources(jobs, dir.path(), today(), &CancellationToken::new(), |_| {
            finished += 1
        })
        .await;

        assert_eq!(finished, 2);
        assert_eq!(reports[0].source, "broken");
        assert!(!reports[0].is_success());
        assert!(reports[0].output.is_none());
        assert!(reports[1].is_success());
        assert_eq!(reports[1].records, 1);
        assert_eq!(reports[1].output, Some(dir.path().join("mock_jobs.json")));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let first = backoff_delay(1000, 1);
        let third = backoff_delay(1000, 3);
        assert!(first >= Duration::from_millis(1000) && first <= Duration::from_millis(1500));
        assert!(third >= Duration::from_millis(4000) && third <= Duration::from_millis(4500));
        assert_eq!(backoff_delay(0, 5), Duration::ZERO);
    }
}
