pub mod assemble;
pub mod fallback;
pub mod normalize;
pub mod resolve;
pub mod schema;
pub mod strategy;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::{EssentialPolicy, RuleSpec, SourceConfig};
use crate::document::{Fragment, Locator, SourceDocument};
use crate::error::ConfigError;
use crate::record::{CandidateRecord, CanonicalJobRecord, Field, Provenance};
use fallback::FallbackRules;
use normalize::NormalizeRules;
use schema::RecordContext;
use strategy::CompiledChains;

/// Result of extracting one fetched document.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    pub records: Vec<CanonicalJobRecord>,
    /// Fragments considered, including rejected ones.
    pub fragments: usize,
    pub rejected: usize,
    /// Structural next-page marker; `None` when the source declares none.
    pub has_next: Option<bool>,
}

/// A source's compiled extraction profile.
///
/// Pipeline per fragment: resolve chains → clean → fallback (if an essential field
/// is missing) → clean → assemble.
#[derive(Debug, Clone)]
pub struct Extractor {
    source: String,
    essential: EssentialPolicy,
    containers: Vec<Locator>,
    skip_fragments: usize,
    min_fragments: usize,
    max_fragments: Option<usize>,
    document_fallback: bool,
    next_page: Vec<Locator>,
    chains: CompiledChains,
    fallback: FallbackRules,
    normalize: NormalizeRules,
}

impl Extractor {
    pub fn new(config: &SourceConfig) -> Result<Self, ConfigError> {
        let name = config.name.as_str();
        let locators = |rules: &[RuleSpec]| {
            Locator::compile_all(rules).map_err(|reason| ConfigError::Selector {
                source_name: name.to_string(),
                selector: format!("{rules:?}"),
                reason,
            })
        };
        Ok(Self {
            source: config.name.clone(),
            essential: config.essential,
            containers: locators(config.fragments.as_slice())?,
            skip_fragments: config.skip_fragments,
            min_fragments: config.min_fragments,
            max_fragments: config.max_fragments,
            document_fallback: config.document_fallback,
            next_page: locators(config.next_page.as_slice())?,
            chains: CompiledChains::compile(name, &config.chains)?,
            fallback: FallbackRules::compile(name, &config.fallback)?,
            normalize: NormalizeRules::compile(name, &config.normalize)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Extract every job fragment of `doc`. `first_index` numbers synthesised ids.
    pub fn extract(&self, doc: &SourceDocument, first_index: usize, today: NaiveDate) -> PageExtraction {
        let mut fragments = doc.fragments(&self.containers, self.min_fragments);
        if fragments.is_empty() && self.document_fallback {
            debug!(source = %self.source, "no fragments located, falling back to whole document");
            fragments.push(doc.root());
        }
        let take = self.max_fragments.unwrap_or(usize::MAX);
        let fragments: Vec<Fragment<'_>> =
            fragments.into_iter().skip(self.skip_fragments).take(take).collect();

        let mut page = PageExtraction {
            fragments: fragments.len(),
            has_next: doc.has_next(&self.next_page),
            ..Default::default()
        };
        for (offset, fragment) in fragments.iter().enumerate() {
            let ctx = RecordContext {
                source: &self.source,
                index: first_index + offset,
                today,
            };
            match self.extract_fragment(doc, fragment, &ctx) {
                Ok(record) => page.records.push(record),
                Err(reason) => {
                    debug!(source = %self.source, index = ctx.index, %reason, "fragment rejected");
                    page.rejected += 1;
                }
            }
        }
        page
    }

    fn extract_fragment(
        &self,
        doc: &SourceDocument,
        fragment: &Fragment<'_>,
        ctx: &RecordContext<'_>,
    ) -> Result<CanonicalJobRecord, assemble::Rejection> {
        let mut candidate = CandidateRecord::new();
        for field in Field::ALL {
            let resolution = resolve::resolve(fragment, self.chains.chain(field));
            if let (Some(value), Some(strategy)) = (resolution.value, resolution.strategy) {
                candidate.set(field, value, Provenance::Strategy(strategy.to_string()));
            }
        }
        self.normalize.clean_candidate(&mut candidate);

        if !candidate.has(Field::Title) || !candidate.has(Field::Company) {
            let filled = fallback::fill(&mut candidate, &fragment.lines(), &self.fallback);
            if !filled.is_empty() {
                debug!(source = %self.source, index = ctx.index, ?filled, "fallback filled fields");
                self.normalize.clean_candidate(&mut candidate);
            }
        }

        if let Some(href) = candidate.get(Field::Link).map(str::to_string) {
            match doc.resolve_link(&href) {
                Some(absolute) => candidate.set(
                    Field::Link,
                    absolute,
                    candidate
                        .provenance(Field::Link)
                        .cloned()
                        .unwrap_or(Provenance::Fallback),
                ),
                None => {
                    candidate.remove(Field::Link);
                }
            }
        }

        assemble::assemble(&candidate, self.essential, &self.fallback, &self.normalize, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DocumentFormat, Settings};
    use url::Url;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn extractor(toml: &str) -> Extractor {
        let settings = Settings::from_toml_str(toml).unwrap();
        Extractor::new(&settings.sources[0]).unwrap()
    }

    const CARDS: &str = r#"
[[sources]]
name = "timesjobs"
url_template = "https://www.timesjobs.com/candidate/job-search.html?txtKeywords={query}&sequence={page}"
essential = "both"
fragments = [{ kind = "css", selector = "li.clearfix.job-bx" }]
next_page = [{ kind = "css", selector = "a.next" }]

[sources.chains]
id = [{ kind = "attr", attribute = "data-id" }]
title = [{ kind = "css", selector = "h2 a" }]
company = [{ kind = "css", selector = "h3.joblist-comp-name" }]
location = [{ kind = "css", selector = "ul.top-jd-dtl li span" }]
link = [{ kind = "css", selector = "h2 a", attr = "href" }]
tags = [{ kind = "css", selector = "span.srp-skills", all = true }]
posted_date = [{ kind = "css", selector = "span.sim-posted span" }]
"#;

    const PAGE: &str = r#"<html><body><ul>
<li class="clearfix job-bx" data-id="tj-1">
  <h2><a href="/job-detail/1">Senior Backend Developer</a></h2>
  <h3 class="joblist-comp-name"> Acme   Technologies </h3>
  <ul class="top-jd-dtl"><li><span>Pune</span></li></ul>
  <span class="srp-skills">rust, postgres</span>
  <span class="sim-posted"><span>Posted 2 days ago</span></span>
</li>
<li class="clearfix job-bx">
  <h2><a href="/job-detail/2">N/A</a></h2>
  <h3 class="joblist-comp-name">Globex</h3>
</li>
<li class="clearfix job-bx">
  <h2><a href="javascript:void(0)">QA Engineer</a></h2>
  <h3 class="joblist-comp-name">Initech Pvt Ltd</h3>
</li>
</ul></body></html>"#;

    fn doc(format: DocumentFormat, url: &str, body: &str) -> SourceDocument {
        SourceDocument::parse(format, Url::parse(url).unwrap(), body).unwrap()
    }

    #[test]
    fn structured_cards() {
        let ex = extractor(CARDS);
        let page = ex.extract(
            &doc(DocumentFormat::Html, "https://www.timesjobs.com/search", PAGE),
            10,
            today(),
        );
        assert_eq!(page.fragments, 3);
        assert_eq!(page.has_next, Some(false));
        // second card: title is a sentinel and the fallback finds nothing better
        assert_eq!(page.rejected, 1);
        assert_eq!(page.records.len(), 2);

        let first = &page.records[0];
        assert_eq!(first.jobid, "tj-1");
        assert_eq!(first.title, "Senior Backend Developer");
        assert_eq!(first.company, "Acme Technologies");
        assert_eq!(first.location, "Pune");
        assert_eq!(first.link, "https://www.timesjobs.com/job-detail/1");
        assert_eq!(first.tags, vec!["rust", "postgres"]);
        assert_eq!(first.posted_date, NaiveDate::from_ymd_opt(2026, 10, 14));
        assert_eq!(first.source, "timesjobs");

        let third = &page.records[1];
        assert_eq!(third.jobid, "timesjobs-12");
        assert_eq!(third.link, "unavailable");
    }

    #[test]
    fn unstructured_fragment_uses_fallback() {
        let toml = r#"
[[sources]]
name = "freshersworld"
url_template = "https://www.freshersworld.com/jobs"
fragments = [{ kind = "css", selector = "div.job-container" }]
"#;
        let html = r#"<div class="job-container">
<p>Senior Backend Developer</p><p>Acme Technologies</p><p>Bangalore</p>
<p>3-5 years</p><p>₹12-18 LPA</p><p>2 days ago</p></div>"#;
        let page = extractor(toml).extract(
            &doc(DocumentFormat::Html, "https://www.freshersworld.com/jobs", html),
            0,
            today(),
        );
        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.jobid, "freshersworld-0");
        assert_eq!(record.title, "Senior Backend Developer");
        assert_eq!(record.company, "Acme Technologies");
        assert_eq!(record.location, "Bangalore");
        assert_eq!(record.salary.as_deref(), Some("₹12-18 LPA"));
        assert_eq!(record.qualification.as_deref(), Some("3-5 years"));
        assert_eq!(record.posted_date, NaiveDate::from_ymd_opt(2026, 10, 14));
    }

    #[test]
    fn fallback_reads_inline_markup_as_one_line() {
        let toml = r#"
[[sources]]
name = "shine"
url_template = "https://www.shine.com"
fragments = [{ kind = "css", selector = "div.job" }]
"#;
        let html = r#"<div class="job"><h2>Senior <b>Backend</b> Developer</h2>
<p>Acme Technologies</p><p>Posted <span>2</span> days ago</p></div>"#;
        let page = extractor(toml).extract(
            &doc(DocumentFormat::Html, "https://www.shine.com", html),
            0,
            today(),
        );
        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.title, "Senior Backend Developer");
        assert_eq!(record.company, "Acme Technologies");
        assert_eq!(record.posted_date, NaiveDate::from_ymd_opt(2026, 10, 14));
    }

    #[test]
    fn label_only_fragment_is_rejected() {
        let toml = r#"
[[sources]]
name = "shine"
url_template = "https://www.shine.com"
fragments = [{ kind = "css", selector = "div.card" }]
"#;
        let html = r#"<div class="card"><div>Location</div><div>Salary</div></div>"#;
        let page = extractor(toml).extract(
            &doc(DocumentFormat::Html, "https://www.shine.com", html),
            0,
            today(),
        );
        assert_eq!(page.fragments, 1);
        assert_eq!(page.rejected, 1);
        assert!(page.records.is_empty());
    }

    #[test]
    fn json_api_skips_metadata_element() {
        let toml = r#"
[[sources]]
name = "remoteok"
format = "json"
url_template = "https://remoteok.com/api"
skip_fragments = 1

[sources.chains]
id = [{ kind = "field", path = "id" }]
title = [{ kind = "field", path = "position" }]
company = [{ kind = "field", path = "company" }]
location = [{ kind = "field", path = "location" }]
tags = [{ kind = "field", path = "tags" }]
link = [{ kind = "field", path = "url" }]
posted_date = [{ kind = "field", path = "date" }]
description = [{ kind = "field", path = "description" }]
"#;
        let body = r#"[
 {"legal": "API terms of service"},
 {"id": "1234", "position": "Site Reliability Engineer", "company": "Globex",
  "location": "", "tags": ["remote", "k8s"], "url": "https://remoteok.com/l/1234",
  "date": "2026-10-01T08:00:00+00:00", "description": "Keep things running."}
]"#;
        let page = extractor(toml).extract(
            &doc(DocumentFormat::Json, "https://remoteok.com/api", body),
            0,
            today(),
        );
        assert_eq!(page.fragments, 1);
        assert_eq!(page.has_next, None);
        let record = &page.records[0];
        assert_eq!(record.jobid, "1234");
        assert_eq!(record.location, crate::record::PLACEHOLDER);
        assert!(record.remote);
        assert_eq!(record.tags, vec!["remote", "k8s"]);
        assert_eq!(record.posted_date, NaiveDate::from_ymd_opt(2026, 10, 1));
        assert_eq!(record.description.as_deref(), Some("Keep things running."));
    }
}
