use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cascade::{Attempt, Cascade};
use crate::db::{self, Record, Scope};
use crate::extract::Category;
use crate::merge;
use crate::planner::{self, Flags, Plan};

/// One enrichment batch invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scope: Scope,
    pub flags: Flags,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

/// Batch totals reported after a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub processed: usize,
    /// Records with at least one stored field changed.
    pub updated: usize,
    /// Records that needed work but have no website.
    pub skipped: usize,
    pub errors: usize,
    /// Records with at least one failed merge.
    pub failed: usize,
    pub cancelled: bool,
}

impl Summary {
    pub fn succeeded(&self) -> usize {
        self.processed - self.failed
    }
}

#[derive(Default)]
struct RecordOutcome {
    changed: bool,
    errors: usize,
}

impl RecordOutcome {
    fn absorb(&mut self, record: &Record, category: Category, result: Result<bool>) {
        match result {
            Ok(changed) => self.changed |= changed,
            Err(e) => {
                error!(record = %record.id, %category, error = %e, "merge failed");
                self.errors += 1;
            }
        }
    }
}

/// Enrich every record in scope that still needs work, strictly one record
/// at a time. Cancellation stops before the next record and abandons the
/// one in flight between merges.
pub async fn run(
    conn: &Connection,
    cascade: &Cascade<'_>,
    opts: &RunOptions,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<Summary> {
    let mut summary = Summary::default();
    let mut queue: Vec<(Record, Plan)> = Vec::new();

    for record in db::fetch_records(conn, &opts.scope)? {
        let plan = planner::plan(&record, &opts.flags);
        if !plan.any() {
            continue;
        }
        if record.website().is_none() {
            info!(record = %record.id, "no website, skipping");
            summary.skipped += 1;
            continue;
        }
        queue.push((record, plan));
    }
    if let Some(limit) = opts.limit {
        queue.truncate(limit);
    }

    if queue.is_empty() {
        info!("nothing to enrich");
        return Ok(summary);
    }
    info!(count = queue.len(), dry_run = opts.dry_run, "enriching records");

    let pb = ProgressBar::new(queue.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();

    for (i, (record, plan)) in queue.iter().enumerate() {
        if i > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            warn!(remaining = queue.len() - i, "cancelled, not starting further records");
            summary.cancelled = true;
            break;
        }

        pb.set_message(record.name.clone());
        let outcome = tokio::select! {
            outcome = enrich_record(conn, cascade, record, plan, opts.dry_run, &today) => outcome,
            _ = cancel.cancelled() => {
                warn!(record = %record.id, "cancelled mid-record, abandoning");
                summary.cancelled = true;
                break;
            }
        };

        summary.processed += 1;
        if outcome.changed {
            summary.updated += 1;
        }
        if outcome.errors > 0 {
            summary.errors += outcome.errors;
            summary.failed += 1;
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        processed = summary.processed,
        updated = summary.updated,
        skipped = summary.skipped,
        errors = summary.errors,
        "enrichment finished"
    );
    Ok(summary)
}

async fn enrich_record(
    conn: &Connection,
    cascade: &Cascade<'_>,
    record: &Record,
    plan: &Plan,
    dry_run: bool,
    today: &str,
) -> RecordOutcome {
    info!(
        record = %record.id,
        name = %record.name,
        pricing = plan.pricing,
        schedule = plan.schedule,
        about = plan.about,
        "enriching"
    );
    let mut outcome = RecordOutcome::default();

    let pricing = if plan.pricing {
        cascade.pricing(record).await
    } else {
        Attempt::NotAttempted
    };
    outcome.absorb(
        record,
        Category::Pricing,
        persist(record, Category::Pricing, &pricing, dry_run, |a| {
            merge::apply_pricing(conn, &record.id, a, today)
        }),
    );

    let schedule = if plan.schedule {
        cascade.schedule(record).await
    } else {
        Attempt::NotAttempted
    };
    outcome.absorb(
        record,
        Category::Schedule,
        persist(record, Category::Schedule, &schedule, dry_run, |a| {
            merge::apply_schedule(conn, &record.id, a, today)
        }),
    );

    let about = if plan.about {
        cascade.about(record).await
    } else {
        Attempt::NotAttempted
    };
    outcome.absorb(
        record,
        Category::About,
        persist(record, Category::About, &about, dry_run, |a| {
            merge::apply_about(conn, &record.id, a, today)
        }),
    );

    outcome
}

fn persist<T: std::fmt::Debug>(
    record: &Record,
    category: Category,
    attempt: &Attempt<T>,
    dry_run: bool,
    merge: impl FnOnce(&Attempt<T>) -> Result<bool>,
) -> Result<bool> {
    if !attempt.is_attempted() {
        return Ok(false);
    }
    if dry_run {
        info!(record = %record.id, %category, outcome = attempt.label(), data = ?attempt.found(), "dry run, not saving");
        return Ok(attempt.found().is_some());
    }
    info!(record = %record.id, %category, outcome = attempt.label(), "saving");
    merge(attempt)
}
