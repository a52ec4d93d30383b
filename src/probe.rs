//! URL-hint discovery: probe common pricing/schedule paths on each site,
//! falling back to scanning homepage links.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use rusqlite::Connection;
use scraper::{Html, Selector};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Settings;
use crate::db::{self, Scope};
use crate::error::FetchError;
use crate::fetcher::build_client;

// Ordered by how often they show up on Polish studio sites.
pub const PRICING_PATHS: &[&str] = &[
    "/cennik", "/cennik/", "/ceny", "/ceny/", "/oferta", "/oferta/", "/prices", "/pricing",
    "/price", "/karnety", "/karnety/", "/pakiety", "/pakiety/", "/en/prices", "/pl/cennik",
];

pub const SCHEDULE_PATHS: &[&str] = &[
    "/grafik", "/grafik/", "/harmonogram", "/harmonogram/", "/plan-zajec", "/plan-zajec/",
    "/rozklad-zajec", "/rozklad-zajec/", "/schedule", "/timetable", "/zajecia", "/zajecia/",
    "/classes", "/en/schedule", "/pl/grafik", "/kalendarz", "/kalendarz/",
];

/// Hosted profiles and booking platforms have no subpages of their own.
const SKIP_DOMAINS: &[&str] = &[
    "facebook.com", "instagram.com", "booksy.com", "fitssey.com", "fresha.com",
    "calendly.com", "linktr.ee", "linktree.com", "google.com", "youtube.com", "tiktok.com",
];

const LINK_SKIP: &[&str] = &[
    "login", "logowanie", "rejestr", "register", "kontakt", "contact", "blog", "galeria",
    "gallery", "faq", "regulamin", "polityka", "cookie", "privacy", ".pdf", ".jpg", ".png",
];

static PRICING_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"cennik|ceny|price|pricing|karnet|oferta|offer|pakiet|opłat").unwrap()
});
static SCHEDULE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"grafik|harmonogram|rozk[łl]ad|plan.?zaj[ęe][ćc]|schedule|timetable|calendar|kalend|zaj[ęe]cia|klasy|class",
    )
    .unwrap()
});
static LINKS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Existence checks and homepage retrieval for discovery.
#[async_trait]
pub trait UrlProbe: Send + Sync {
    async fn exists(&self, url: &str) -> bool;
    async fn homepage(&self, url: &str) -> Option<String>;
}

pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let timeout = settings.probe_timeout();
        let client = build_client(settings.connect_timeout().min(timeout), timeout)?;
        Ok(Self { client })
    }

    /// Present unless the server redirected us back to the site root.
    fn landed_on_page(url: &str, response: &reqwest::Response) -> bool {
        let Ok(requested) = Url::parse(url) else {
            return false;
        };
        let root = requested.origin().ascii_serialization();
        response.url().as_str().trim_end_matches('/') != root
    }
}

#[async_trait]
impl UrlProbe for HttpProber {
    async fn exists(&self, url: &str) -> bool {
        let response = match self.client.head(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(url, error = %e, "probe failed");
                return false;
            }
        };
        let response = if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            match self.client.get(url).send().await {
                Ok(r) => r,
                Err(_) => return false,
            }
        } else {
            response
        };
        response.status().as_u16() < 400 && Self::landed_on_page(url, &response)
    }

    async fn homepage(&self, url: &str) -> Option<String> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }
}

/// Scheme and host of the website, or `None` for unparseable URLs and
/// hosted platforms.
pub fn base_url(website: &str) -> Option<String> {
    let url = Url::parse(website.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let domain = host.strip_prefix("www.").unwrap_or(host);
    if SKIP_DOMAINS.iter().any(|d| domain.contains(d)) {
        return None;
    }
    Some(url.origin().ascii_serialization())
}

fn same_domain(a: &Url, b: &Url) -> bool {
    let strip = |u: &Url| u.host_str().map(|h| h.trim_start_matches("www.").to_lowercase());
    strip(a).is_some() && strip(a) == strip(b)
}

/// Best-scoring same-site link per category: +3 for a keyword in the path,
/// +2 in the link text. Earlier links win ties.
pub fn scan_links(html: &str, base: &str) -> (Option<String>, Option<String>) {
    let Ok(base) = Url::parse(base) else {
        return (None, None);
    };
    let mut pricing: Option<(String, u32)> = None;
    let mut schedule: Option<(String, u32)> = None;

    let document = Html::parse_document(html);
    for link in document.select(&LINKS) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            continue;
        };
        if !same_domain(&base, &url) {
            continue;
        }
        let path = url.path().to_lowercase();
        if LINK_SKIP.iter().any(|s| path.contains(s)) {
            continue;
        }
        let text = link.text().collect::<String>().to_lowercase();

        for (re, best) in [(&*PRICING_LINK_RE, &mut pricing), (&*SCHEDULE_LINK_RE, &mut schedule)] {
            let score = 3 * u32::from(re.is_match(&path)) + 2 * u32::from(re.is_match(&text));
            if score > 0 && best.as_ref().map_or(true, |(_, s)| score > *s) {
                *best = Some((url.to_string(), score));
            }
        }
    }
    (pricing.map(|(u, _)| u), schedule.map(|(u, _)| u))
}

// ── Worker pool ──

#[derive(Debug, Clone)]
struct ProbeJob {
    id: String,
    base: String,
    want_pricing: bool,
    want_schedule: bool,
}

#[derive(Debug, Clone, Default)]
struct Discovered {
    id: String,
    pricing_url: Option<String>,
    schedule_url: Option<String>,
}

async fn probe_record(prober: &dyn UrlProbe, job: &ProbeJob, link_scan: bool) -> Discovered {
    let mut found = Discovered {
        id: job.id.clone(),
        ..Default::default()
    };

    if job.want_pricing {
        found.pricing_url = first_existing(prober, &job.base, PRICING_PATHS).await;
    }
    if job.want_schedule {
        found.schedule_url = first_existing(prober, &job.base, SCHEDULE_PATHS).await;
    }

    let missing_pricing = job.want_pricing && found.pricing_url.is_none();
    let missing_schedule = job.want_schedule && found.schedule_url.is_none();
    if link_scan && (missing_pricing || missing_schedule) {
        if let Some(html) = prober.homepage(&job.base).await {
            let (pricing, schedule) = scan_links(&html, &job.base);
            if missing_pricing {
                found.pricing_url = pricing;
            }
            if missing_schedule {
                found.schedule_url = schedule;
            }
        }
    }
    found
}

async fn first_existing(prober: &dyn UrlProbe, base: &str, paths: &[&str]) -> Option<String> {
    for path in paths {
        let url = format!("{}{}", base, path);
        if prober.exists(&url).await {
            return Some(url);
        }
    }
    None
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub scope: Scope,
    pub force: bool,
    pub dry_run: bool,
    pub link_scan: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSummary {
    pub probed: usize,
    pub pricing_found: usize,
    pub schedule_found: usize,
    pub updated: usize,
    /// Records whose website can't be probed (missing, unparseable, hosted platform).
    pub skipped: usize,
    pub errors: usize,
}

/// Probe every record in scope that lacks a hint, `concurrency` sites at a
/// time. Results arrive in completion order and are written as they come.
pub async fn run_probe(
    conn: &Connection,
    prober: Arc<dyn UrlProbe>,
    opts: &ProbeOptions,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<ProbeSummary> {
    let mut summary = ProbeSummary::default();
    let mut jobs = VecDeque::new();

    for record in db::fetch_records(conn, &opts.scope)? {
        let want_pricing = opts.force || record.pricing_hint().is_none();
        let want_schedule = opts.force || record.schedule_hint().is_none();
        if !want_pricing && !want_schedule {
            continue;
        }
        let Some(base) = record.website().and_then(base_url) else {
            debug!(record = %record.id, website = ?record.website, "not probeable");
            summary.skipped += 1;
            continue;
        };
        jobs.push_back(ProbeJob {
            id: record.id,
            base,
            want_pricing,
            want_schedule,
        });
    }

    let total = jobs.len();
    if total == 0 {
        info!("nothing to probe");
        return Ok(summary);
    }
    info!(count = total, concurrency, "probing sites");

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let queue = Arc::new(Mutex::new(jobs));
    let (tx, mut rx) = mpsc::unbounded_channel::<Discovered>();
    let mut workers = JoinSet::new();

    for _ in 0..concurrency.clamp(1, total) {
        let queue = Arc::clone(&queue);
        let prober = Arc::clone(&prober);
        let tx = tx.clone();
        let cancel = cancel.clone();
        let link_scan = opts.link_scan;

        workers.spawn(async move {
            while !cancel.is_cancelled() {
                let job = queue.lock().ok().and_then(|mut q| q.pop_front());
                let Some(job) = job else { break };
                let found = tokio::select! {
                    found = probe_record(prober.as_ref(), &job, link_scan) => found,
                    _ = cancel.cancelled() => {
                        debug!(record = %job.id, "cancelled mid-probe");
                        break;
                    }
                };
                if tx.send(found).is_err() {
                    break;
                }
            }
        });
    }

    // Workers hold the remaining senders; the channel closes once they're done.
    drop(tx);

    while let Some(found) = rx.recv().await {
        summary.probed += 1;
        pb.inc(1);
        summary.pricing_found += usize::from(found.pricing_url.is_some());
        summary.schedule_found += usize::from(found.schedule_url.is_some());

        if found.pricing_url.is_none() && found.schedule_url.is_none() {
            debug!(record = %found.id, "no hints found");
            continue;
        }
        info!(
            record = %found.id,
            pricing = ?found.pricing_url,
            schedule = ?found.schedule_url,
            "discovered"
        );
        if opts.dry_run {
            continue;
        }
        match db::update_hints(
            conn,
            &found.id,
            found.pricing_url.as_deref(),
            found.schedule_url.as_deref(),
            opts.force,
        ) {
            Ok(n) => summary.updated += n,
            Err(e) => {
                error!(record = %found.id, error = %e, "failed to save hints");
                summary.errors += 1;
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "probe worker failed");
            summary.errors += 1;
        }
    }
    pb.finish_and_clear();

    if summary.probed < total {
        warn!(unprobed = total - summary.probed, "probing stopped early");
    }
    info!(
        probed = summary.probed,
        pricing = summary.pricing_found,
        schedule = summary.schedule_found,
        updated = summary.updated,
        "probing finished"
    );
    Ok(summary)
}
