mod cascade;
mod config;
mod db;
mod error;
mod extract;
mod fetcher;
mod merge;
mod normalize;
mod planner;
mod probe;
mod run;
mod seed;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cascade::Cascade;
use crate::config::Settings;
use crate::db::Scope;
use crate::extract::openai::OpenAiExtractor;
use crate::extract::RetryPolicy;
use crate::fetcher::HttpFetcher;
use crate::planner::Flags;
use crate::probe::{HttpProber, ProbeOptions};
use crate::run::RunOptions;

#[derive(Parser)]
#[command(name = "studio_enricher", about = "Enrich studio listings with pricing, schedules and descriptions from their websites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScopeArgs {
    /// Only this record id
    #[arg(long, conflicts_with = "city")]
    record: Option<String>,
    /// Only records in this city
    #[arg(long)]
    city: Option<String>,
}

impl ScopeArgs {
    fn scope(self) -> Scope {
        match (self.record, self.city) {
            (Some(id), _) => Scope::One(id),
            (None, Some(city)) => Scope::City(city),
            (None, None) => Scope::All,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Import seed records from the discovery step
    Seed {
        /// JSON file with seed records
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Discover pricing/schedule URLs by probing common paths
    Probe {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Re-probe and overwrite existing hints
        #[arg(long)]
        force: bool,
        /// Log discovered URLs without saving them
        #[arg(long)]
        dry_run: bool,
        /// Skip the homepage link scan
        #[arg(long)]
        probe_only: bool,
    },
    /// Scrape and extract pricing, schedule and about data
    Enrich {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Only the pricing category
        #[arg(long)]
        prices_only: bool,
        /// Redo categories that were already attempted
        #[arg(long)]
        force: bool,
        /// Fetch and extract, but don't save
        #[arg(long)]
        dry_run: bool,
        /// Max records to process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show catalog coverage
    Stats,
    /// Print one record with its tags and schedule
    Show {
        id: String,
    },
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
    let settings = Settings::load()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("interrupt received, stopping (press Ctrl-C again to quit now)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("second interrupt, exiting");
                std::process::exit(130);
            }
        });
    }

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", settings.database_path.display());
            Ok(())
        }
        Commands::Seed { file } => {
            let seeds = seed::load_seeds(&file)?;
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let (inserted, updated) = db::insert_seeds(&conn, &seeds)?;
            println!(
                "Imported {} seeds: {} new, {} gained URL hints.",
                seeds.len(),
                inserted,
                updated
            );
            Ok(())
        }
        Commands::Probe { scope, force, dry_run, probe_only } => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let prober = Arc::new(HttpProber::new(&settings)?);
            let opts = ProbeOptions {
                scope: scope.scope(),
                force,
                dry_run,
                link_scan: !probe_only,
            };
            let s = probe::run_probe(&conn, prober, &opts, settings.probe_concurrency, &cancel).await?;
            println!(
                "Probed {} sites ({} skipped): {} pricing, {} schedule URLs found, {} records updated{}.",
                s.probed,
                s.skipped,
                s.pricing_found,
                s.schedule_found,
                s.updated,
                if dry_run { " (dry run)" } else { "" }
            );
            Ok(())
        }
        Commands::Enrich { scope, prices_only, force, dry_run, limit } => {
            let api_key = config::openai_api_key()?;
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;

            let fetcher = HttpFetcher::new(&settings);
            let extractor = OpenAiExtractor::new(api_key, &settings)?;
            let cascade = Cascade::new(
                &fetcher,
                &extractor,
                RetryPolicy {
                    retries: settings.extraction_retries,
                    base_delay: settings.retry_base_delay(),
                },
                settings.max_text_chars,
            );
            let opts = RunOptions {
                scope: scope.scope(),
                flags: Flags { force, prices_only },
                dry_run,
                limit,
            };

            let s = run::run(&conn, &cascade, &opts, settings.inter_record_delay(), &cancel).await?;
            println!(
                "Done: {} processed, {} updated, {} skipped (no website), {} errors{}{}.",
                s.processed,
                s.updated,
                s.skipped,
                s.errors,
                if dry_run { " (dry run)" } else { "" },
                if s.cancelled { ", interrupted" } else { "" }
            );
            if s.processed > 0 && s.succeeded() == 0 {
                anyhow::bail!("no record was enriched successfully");
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Records:        {}", s.total);
            println!("With website:   {}", s.with_website);
            println!("Price checked:  {}", s.price_checked);
            println!("With prices:    {}", s.priced);
            println!("With schedule:  {}", s.with_schedule);
            println!("With about:     {}", s.with_description);
            println!("Tags in use:    {}", s.tags);
            Ok(())
        }
        Commands::Show { id } => {
            let conn = db::connect(&settings.database_path)?;
            db::init_schema(&conn)?;
            let Some(r) = db::fetch_record(&conn, &id)? else {
                anyhow::bail!("no record with id '{}'", id);
            };
            let tags = db::record_tags(&conn, &id)?;
            let schedule = db::schedule_entries(&conn, &id)?;
            print_record(&r, &tags, &schedule);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_record(r: &db::Record, tags: &[String], schedule: &[db::ScheduleRow]) {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    let price = |v: Option<f64>| v.map(|p| format!("{:.2} zł", p)).unwrap_or_else(|| "-".into());

    println!("{} ({})", r.name, r.id);
    println!("  City:      {}", r.city);
    println!("  Address:   {}", opt(&r.address));
    println!("  Website:   {}", opt(&r.website));
    println!("  Pricing:   {}", opt(&r.pricing_url));
    println!("  Schedule:  {}", opt(&r.schedule_url));
    println!("  Source:    {}", r.source);
    println!(
        "  Prices:    monthly {} | trial {} | single {}",
        price(r.price),
        price(r.trial_price),
        price(r.single_class_price)
    );
    if let Some(notes) = &r.pricing_notes {
        println!("  Notes:     {}", notes);
    }
    println!("  Phone:     {}", opt(&r.phone));
    println!("  Email:     {}", opt(&r.email));
    println!("  Styles:    {}", if tags.is_empty() { "-".into() } else { tags.join(", ") });
    println!(
        "  Checked:   pricing {} | schedule {} | about {}",
        opt(&r.last_price_check),
        opt(&r.schedule_checked_at),
        opt(&r.about_checked_at)
    );
    if let Some(d) = &r.description_raw {
        println!("\n{}", d);
    }
    if !schedule.is_empty() {
        println!("\n--- Schedule ({} classes) ---", schedule.len());
        for e in schedule {
            let extra: Vec<&str> = [e.instructor.as_deref(), e.level.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if extra.is_empty() {
                println!("  {:<14} {:<13} {}", e.day, e.time, e.class_name);
            } else {
                println!("  {:<14} {:<13} {} ({})", e.day, e.time, e.class_name, extra.join(", "));
            }
        }
    }
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
