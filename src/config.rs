//! Settings file, per-source profiles and the calibrated keyword tables.
//!
//! Every threshold and keyword list has a default taken from the tuned values of the
//! site scrapers this crate replaces; a source profile only declares what differs.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use url::{form_urlencoded, Url};

use crate::error::ConfigError;

pub const DEFAULT_SETTINGS_PATH: &str = "config/sources.toml";
const ENV_PREFIX: &str = "JOBS";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Settings {
    /// Load a settings file layered with `JOBS_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let raw = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let settings: Settings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn source(&self, name: &str) -> Result<&SourceConfig, ConfigError> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for source in &self.sources {
            source.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Html,
    Json,
    Feed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Spider,
}

/// Which essential fields a candidate must carry to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EssentialPolicy {
    /// Title or company.
    #[default]
    AnyOf,
    /// Title and company.
    Both,
    /// Title alone.
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_ms: 2000,
            max_ms: 4000,
        }
    }
}

/// One extraction rule as written in the settings file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    /// CSS selector within the fragment; text by default, or an attribute.
    /// With `all`, every match is joined by newlines.
    Css {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
        #[serde(default)]
        all: bool,
    },
    /// Attribute of the fragment element itself.
    Attr { attribute: String },
    /// Dotted key path into a JSON or feed fragment.
    Field { path: String },
    /// Regex over the flattened fragment text; first capture group, else whole match.
    Regex { pattern: String },
    /// First flattened line containing any keyword, up to `max_len` chars.
    Keyword {
        keywords: Vec<String>,
        #[serde(default = "default_keyword_max_len")]
        max_len: usize,
    },
}

fn default_keyword_max_len() -> usize {
    80
}

impl RuleSpec {
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RuleSpec::Css { .. } | RuleSpec::Attr { .. } | RuleSpec::Field { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategySpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub rule: RuleSpec,
}

/// StrategyChain table: one ordered rule list per logical field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldChains {
    pub id: Vec<StrategySpec>,
    pub title: Vec<StrategySpec>,
    pub company: Vec<StrategySpec>,
    pub location: Vec<StrategySpec>,
    pub employment_type: Vec<StrategySpec>,
    pub salary: Vec<StrategySpec>,
    pub experience: Vec<StrategySpec>,
    pub qualification: Vec<StrategySpec>,
    pub posted_date: Vec<StrategySpec>,
    pub description: Vec<StrategySpec>,
    pub link: Vec<StrategySpec>,
    pub tags: Vec<StrategySpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub format: DocumentFormat,
    #[serde(default)]
    pub transport: TransportKind,
    /// Supports `{query}`, `{query_slug}` and `{page}` placeholders.
    pub url_template: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub delay_ms: DelayRange,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub essential: EssentialPolicy,
    #[serde(default)]
    pub fragments: Vec<RuleSpec>,
    #[serde(default)]
    pub skip_fragments: usize,
    #[serde(default = "default_min_fragments")]
    pub min_fragments: usize,
    #[serde(default)]
    pub max_fragments: Option<usize>,
    #[serde(default = "default_true")]
    pub document_fallback: bool,
    #[serde(default)]
    pub next_page: Vec<RuleSpec>,
    #[serde(default)]
    pub chains: FieldChains,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
}

fn default_max_pages() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_min_fragments() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Queries to crawl; a source without queries crawls its template once.
    pub fn effective_queries(&self) -> Vec<String> {
        if self.queries.is_empty() {
            vec![String::new()]
        } else {
            self.queries.clone()
        }
    }

    /// Render the URL of one result page.
    ///
    /// `{query}` is form-encoded, `{query_slug}` is the lowercase hyphenated form
    /// (`"Data Analyst"` → `data-analyst`) and `{page}` is 1-based.
    pub fn page_url(&self, query: &str, page: u32) -> String {
        let encoded: String = form_urlencoded::byte_serialize(query.trim().as_bytes()).collect();
        self.url_template
            .replace("{query_slug}", &slug(query))
            .replace("{query}", &encoded)
            .replace("{page}", &page.to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            source_name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.max_pages == 0 {
            return Err(invalid("max_pages must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries must be at least 1"));
        }
        if self.delay_ms.min_ms > self.delay_ms.max_ms {
            return Err(invalid("delay_ms.min_ms exceeds delay_ms.max_ms"));
        }
        if let Err(e) = Url::parse(&self.page_url("jobs", 1)) {
            return Err(invalid(&format!("url_template does not render a valid URL: {e}")));
        }
        if self.fragments.iter().chain(&self.next_page).any(|r| !r.is_structural()) {
            return Err(invalid(
                "fragment and next-page locators must be css, attr or field rules",
            ));
        }
        Ok(())
    }
}

/// Keyword sets and thresholds for the line-scanning fallback.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub title_keywords: Vec<String>,
    pub title_disqualifiers: Vec<String>,
    pub company_suffixes: Vec<String>,
    pub company_disqualifiers: Vec<String>,
    pub gazetteer: Vec<String>,
    pub experience_keywords: Vec<String>,
    pub salary_keywords: Vec<String>,
    pub date_keywords: Vec<String>,
    /// Lines scanned for a title.
    pub title_window: usize,
    pub title_min_len: usize,
    pub title_max_len: usize,
    /// Lines scanned for a company after the title line.
    pub company_window: usize,
    pub company_min_len: usize,
    pub company_max_len: usize,
    pub company_max_words: usize,
    pub location_max_len: usize,
    pub experience_max_len: usize,
    pub salary_max_len: usize,
    pub date_max_len: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            title_keywords: words(&[
                "developer", "engineer", "analyst", "manager", "specialist", "associate",
                "consultant", "executive", "lead", "senior", "junior", "intern", "trainee",
                "designer", "architect", "administrator", "programmer", "tester", "scientist",
                "officer",
            ]),
            title_disqualifiers: words(&[
                "company", "location", "salary", "experience", "ago", "posted", "apply",
                "years", "lpa", "view", "details",
            ]),
            company_suffixes: words(&[
                "ltd", "pvt", "inc", "corp", "llp", "llc", "limited", "technologies",
                "solutions", "systems", "services", "consultancy", "consulting", "software",
                "infotech", "labs",
            ]),
            company_disqualifiers: words(&[
                "years", "experience", "salary", "lpa", "ago", "posted", "apply", "location",
                "today", "yesterday",
            ]),
            gazetteer: words(&[
                "bangalore", "bengaluru", "mumbai", "navi mumbai", "delhi", "new delhi",
                "hyderabad", "chennai", "pune", "kolkata", "gurgaon", "gurugram", "noida",
                "ahmedabad", "surat", "jaipur", "lucknow", "kanpur", "nagpur", "indore", "thane",
                "bhopal", "visakhapatnam", "pimpri", "patna", "vadodara", "ludhiana", "agra",
                "nashik", "kochi", "coimbatore", "kozhikode", "remote", "work from home",
            ]),
            experience_keywords: words(&[
                "year", "years", "yr", "yrs", "exp", "experience",
            ]),
            salary_keywords: words(&[
                "lpa", "salary", "ctc", "₹", "rs", "inr", "lakh", "lakhs", "stipend", "$",
                "per annum", "/month",
            ]),
            date_keywords: words(&[
                "ago", "posted", "today", "yesterday", "just now",
            ]),
            title_window: 3,
            title_min_len: 5,
            title_max_len: 100,
            company_window: 4,
            company_min_len: 2,
            company_max_len: 80,
            company_max_words: 4,
            location_max_len: 60,
            experience_max_len: 50,
            salary_max_len: 50,
            date_max_len: 40,
        }
    }
}

/// Cleaning rules and derivation keyword sets.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Values equal to one of these (case-insensitive) are treated as absent.
    pub sentinels: Vec<String>,
    pub min_len: usize,
    /// Maximum description length in characters, ellipsis included.
    pub description_budget: usize,
    pub remote_keywords: Vec<String>,
    pub internship_keywords: Vec<String>,
    pub contract_keywords: Vec<String>,
    pub part_time_keywords: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            sentinels: words(&[
                "n/a", "na", "nil", "none", "null", "-", "not specified", "not disclosed",
                "not available", "unavailable", "recently posted", "no description available",
            ]),
            min_len: 2,
            description_budget: 250,
            remote_keywords: words(&["remote", "work from home", "wfh", "anywhere"]),
            internship_keywords: words(&["intern", "internship", "trainee"]),
            contract_keywords: words(&["contract", "contractor", "freelance"]),
            part_time_keywords: words(&["part time", "part-time"]),
        }
    }
}

fn slug(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_unspecified_fields() {
        let toml = r#"
[[sources]]
name = "remoteok"
format = "json"
url_template = "https://remoteok.io/api"
"#;
        let settings = Settings::from_toml_str(toml).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("outputs"));
        let source = &settings.sources[0];
        assert_eq!(source.format, DocumentFormat::Json);
        assert_eq!(source.transport, TransportKind::Http);
        assert_eq!(source.max_pages, 3);
        assert_eq!(source.max_retries, 3);
        assert_eq!(source.delay_ms, DelayRange::default());
        assert_eq!(source.essential, EssentialPolicy::AnyOf);
        assert!(source.document_fallback);
        assert_eq!(source.fallback.title_window, 3);
        assert_eq!(source.normalize.description_budget, 250);
        assert_eq!(source.effective_queries(), vec![String::new()]);
    }

    #[test]
    fn css_and_regex_rules() {
        let toml = r#"
[[sources]]
name = "timesjobs"
url_template = "https://example.com/search?q={query}&page={page}"
essential = "both"

[sources.chains]
title = [
  { name = "heading", kind = "css", selector = "h2 a" },
  { kind = "attr", attribute = "title" },
]
link = [{ kind = "css", selector = "h2 a", attr = "href" }]
salary = [{ kind = "regex", pattern = "(\\d+ LPA)" }]
"#;
        let settings = Settings::from_toml_str(toml).unwrap();
        let source = settings.source("TimesJobs").unwrap();
        assert_eq!(source.essential, EssentialPolicy::Both);
        assert_eq!(source.chains.title[0].name.as_deref(), Some("heading"));
        assert_eq!(source.chains.title[1].name, None);
        assert_eq!(
            source.chains.title[1].rule,
            RuleSpec::Attr {
                attribute: "title".into()
            }
        );
        assert_eq!(
            source.chains.link[0].rule,
            RuleSpec::Css {
                selector: "h2 a".into(),
                attr: Some("href".into()),
                all: false
            }
        );
        assert!(matches!(source.chains.salary[0].rule, RuleSpec::Regex { .. }));
    }

    #[test]
    fn rejects_inverted_delay_range() {
        let toml = r#"
[[sources]]
name = "shine"
url_template = "https://example.com"
delay_ms = { min_ms = 5000, max_ms = 1000 }
"#;
        assert!(matches!(
            Settings::from_toml_str(toml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_pattern_rules_as_fragment_locators() {
        let toml = r#"
[[sources]]
name = "shine"
url_template = "https://example.com"
fragments = [{ kind = "regex", pattern = "job" }]
"#;
        assert!(matches!(
            Settings::from_toml_str(toml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn renders_page_urls() {
        let toml = r#"
[[sources]]
name = "shine"
url_template = "https://www.shine.com/job-search/{query_slug}-jobs-{page}?q={query}"
queries = ["Software Developer"]
"#;
        let settings = Settings::from_toml_str(toml).unwrap();
        assert_eq!(
            settings.sources[0].page_url("Software Developer", 2),
            "https://www.shine.com/job-search/software-developer-jobs-2?q=Software+Developer"
        );
        assert_eq!(slug("  C++ / Rust  dev "), "c-rust-dev");
    }

    #[test]
    fn rejects_templates_that_are_not_urls() {
        let toml = r#"
[[sources]]
name = "broken"
url_template = "jobs/{query}"
"#;
        assert!(matches!(
            Settings::from_toml_str(toml),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn unknown_source_lookup() {
        let settings = Settings::from_toml_str("").unwrap();
        assert!(matches!(
            settings.source("nope"),
            Err(ConfigError::UnknownSource(_))
        ));
    }
}
