use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

use jobs_scraper::config::{Settings, SourceConfig, DEFAULT_SETTINGS_PATH};
use jobs_scraper::crawl::{self, SourceReport};
use jobs_scraper::document::SourceDocument;
use jobs_scraper::parser::Extractor;
use jobs_scraper::transport::{self, Transport};

#[derive(Parser)]
#[command(name = "jobs_scraper", about = "Job-posting scraper with per-source extraction profiles")]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl sources and write one JSON file per source
    Run {
        /// Only these sources (default: all configured)
        #[arg(short, long)]
        source: Vec<String>,
        /// Output directory (default: from settings)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Run one source's extraction over a saved document and print the records
    Extract {
        #[arg(short, long)]
        source: String,
        /// Saved HTML, JSON or feed file
        #[arg(short, long)]
        file: PathBuf,
        /// URL the document was served from, for resolving relative links
        #[arg(short, long)]
        base_url: Option<String>,
    },
    /// List configured sources
    Sources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;

    let result = match cli.command {
        Commands::Run { source, out } => run(&settings, &source, out).await,
        Commands::Extract {
            source,
            file,
            base_url,
        } => extract(&settings, &source, &file, base_url.as_deref()),
        Commands::Sources => {
            println!(
                "{:<16} | {:<6} | {:<6} | {:>5} | {:>7} | {}",
                "Source", "Format", "Fetch", "Pages", "Queries", "URL template"
            );
            println!("{}", "-".repeat(90));
            for s in &settings.sources {
                println!(
                    "{:<16} | {:<6} | {:<6} | {:>5} | {:>7} | {}",
                    s.name,
                    format!("{:?}", s.format).to_lowercase(),
                    format!("{:?}", s.transport).to_lowercase(),
                    s.max_pages,
                    s.queries.len(),
                    s.url_template
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(settings: &Settings, only: &[String], out: Option<PathBuf>) -> anyhow::Result<()> {
    let selected: Vec<SourceConfig> = if only.is_empty() {
        settings.sources.clone()
    } else {
        only.iter()
            .map(|name| settings.source(name).cloned())
            .collect::<Result<_, _>>()?
    };
    if selected.is_empty() {
        bail!("No sources configured in settings");
    }
    let output_dir = out.unwrap_or_else(|| settings.output_dir.clone());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, finishing in-flight pages");
            on_ctrl_c.cancel();
        }
    });

    let pb = ProgressBar::new(selected.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} sources {msg}")?
            .progress_chars("=> "),
    );

    println!("Crawling {} sources...", selected.len());
    let jobs: Vec<(SourceConfig, Box<dyn Transport>)> = selected
        .into_iter()
        .map(|s| {
            let t = transport::for_source(&s);
            (s, t)
        })
        .collect();
    let today = chrono::Local::now().date_naive();
    let reports = crawl::run_sources(jobs, &output_dir, today, &cancel, |report| {
        pb.set_message(report.source.clone());
        pb.inc(1);
    })
    .await;
    pb.finish_and_clear();

    print_summary(&reports);
    Ok(())
}

fn print_summary(reports: &[SourceReport]) {
    println!(
        "{:<16} | {:>7} | {:>4} | {:>5} | {:>6} | {:>5} | {:>8} | {}",
        "Source", "Records", "Ok", "Empty", "Failed", "Dupes", "Rejected", "Status"
    );
    println!("{}", "-".repeat(90));
    let mut total = 0;
    for r in reports {
        total += r.records;
        let status = match (&r.fatal, &r.output) {
            (Some(e), _) => format!("FAILED: {e}"),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "no output".to_string(),
        };
        println!(
            "{:<16} | {:>7} | {:>4} | {:>5} | {:>6} | {:>5} | {:>8} | {}",
            r.source,
            r.records,
            r.pages_ok(),
            r.pages_empty(),
            r.pages_failed(),
            r.duplicates,
            r.rejected,
            status
        );
    }
    let failed = reports.iter().filter(|r| !r.is_success()).count();
    println!(
        "\n{} records from {} sources ({} succeeded, {} failed).",
        total,
        reports.len(),
        reports.len() - failed,
        failed
    );
}

fn extract(
    settings: &Settings,
    source: &str,
    file: &Path,
    base_url: Option<&str>,
) -> anyhow::Result<()> {
    let config = settings.source(source)?;
    let extractor = Extractor::new(config)?;
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let url = match base_url {
        Some(u) => Url::parse(u).with_context(|| format!("Invalid base URL {u}"))?,
        None => Url::parse(&config.page_url("", 1))?,
    };

    let doc = SourceDocument::parse(config.format, url, &body)?;
    let today = chrono::Local::now().date_naive();
    let page = extractor.extract(&doc, 0, today);
    println!("{}", serde_json::to_string_pretty(&page.records)?);
    eprintln!(
        "{} records from {} fragments ({} rejected), next page: {}",
        page.records.len(),
        page.fragments,
        page.rejected,
        match page.has_next {
            Some(true) => "yes",
            Some(false) => "no",
            None => "not declared",
        }
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
