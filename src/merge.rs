//! Applies cascade results to the store. Each category commits in its own
//! transaction so one failing merge leaves the others intact.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::cascade::Attempt;
use crate::db::{DISCOVERY_SOURCE, ENRICHED_SOURCE};
use crate::extract::{AboutData, PricingData, ScheduleData};

/// Overwrite all four pricing fields, nulls included, and stamp the price
/// check. Returns whether any stored pricing value changed.
pub fn apply_pricing(
    conn: &Connection,
    id: &str,
    attempt: &Attempt<PricingData>,
    today: &str,
) -> Result<bool> {
    let empty = PricingData::default();
    let new = match attempt {
        Attempt::NotAttempted => return Ok(false),
        Attempt::Empty => &empty,
        Attempt::Found(p) => p,
    };

    let tx = conn.unchecked_transaction()?;
    let old: (Option<f64>, Option<f64>, Option<f64>, Option<String>) = tx.query_row(
        "SELECT price, trial_price, single_class_price, pricing_notes FROM records WHERE id = ?1",
        params![id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;
    let notes = non_empty(new.pricing_notes.as_deref());

    tx.execute(
        "UPDATE records SET
            price = ?2,
            trial_price = ?3,
            single_class_price = ?4,
            pricing_notes = ?5,
            last_price_check = ?6,
            last_updated = ?6,
            source = CASE WHEN source = ?7 THEN ?8 ELSE source END
         WHERE id = ?1",
        params![
            id,
            new.monthly_pass_pln,
            new.trial_price_pln,
            new.single_class_pln,
            notes,
            today,
            DISCOVERY_SOURCE,
            ENRICHED_SOURCE,
        ],
    )?;
    tx.commit()?;

    Ok(old
        != (
            new.monthly_pass_pln,
            new.trial_price_pln,
            new.single_class_pln,
            notes.map(String::from),
        ))
}

/// Fill description and contact fields only with non-empty values, add tags
/// idempotently, and stamp the about check.
pub fn apply_about(
    conn: &Connection,
    id: &str,
    attempt: &Attempt<AboutData>,
    today: &str,
) -> Result<bool> {
    let about = match attempt {
        Attempt::NotAttempted => return Ok(false),
        Attempt::Empty => {
            conn.execute(
                "UPDATE records SET about_checked_at = ?2 WHERE id = ?1",
                params![id, today],
            )?;
            return Ok(false);
        }
        Attempt::Found(a) => a,
    };

    let description = non_empty(Some(about.description_raw.as_str()));
    let phone = non_empty(about.phone.as_deref());
    let email = non_empty(about.email.as_deref());

    let tx = conn.unchecked_transaction()?;
    let (old_description, old_phone, old_email): (Option<String>, Option<String>, Option<String>) =
        tx.query_row(
            "SELECT description_raw, phone, email FROM records WHERE id = ?1",
            params![id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
    let mut changed = [
        (description, old_description),
        (phone, old_phone),
        (email, old_email),
    ]
    .into_iter()
    .any(|(new, old)| new.is_some_and(|n| old.as_deref() != Some(n)));

    tx.execute(
        "UPDATE records SET
            description_raw = COALESCE(?2, description_raw),
            phone = COALESCE(?3, phone),
            email = COALESCE(?4, email),
            about_checked_at = ?5,
            last_updated = ?5,
            source = CASE WHEN source = ?6 THEN ?7 ELSE source END
         WHERE id = ?1",
        params![id, description, phone, email, today, DISCOVERY_SOURCE, ENRICHED_SOURCE],
    )?;

    {
        let mut insert_tag = tx.prepare("INSERT OR IGNORE INTO tags (name) VALUES (?1)")?;
        let mut tag_id = tx.prepare("SELECT id FROM tags WHERE name = ?1")?;
        let mut link = tx.prepare(
            "INSERT OR IGNORE INTO record_tags (record_id, tag_id) VALUES (?1, ?2)",
        )?;
        for style in &about.styles {
            insert_tag.execute(params![style])?;
            let tid: i64 = tag_id.query_row(params![style], |r| r.get(0))?;
            if link.execute(params![id, tid])? > 0 {
                changed = true;
            }
        }
    }
    tx.commit()?;
    Ok(changed)
}

/// Replace the whole schedule with a fresh non-empty set. An empty attempt
/// only stamps the schedule check.
pub fn apply_schedule(
    conn: &Connection,
    id: &str,
    attempt: &Attempt<ScheduleData>,
    today: &str,
) -> Result<bool> {
    let schedule = match attempt {
        Attempt::NotAttempted => return Ok(false),
        Attempt::Empty => {
            conn.execute(
                "UPDATE records SET schedule_checked_at = ?2 WHERE id = ?1",
                params![id, today],
            )?;
            return Ok(false);
        }
        Attempt::Found(s) => s,
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM schedule_entries WHERE record_id = ?1", params![id])?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO schedule_entries (record_id, day, time, class_name, instructor, level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for entry in &schedule.classes {
            insert.execute(params![
                id,
                entry.day,
                entry.time,
                entry.class_name,
                non_empty(entry.instructor.as_deref()),
                non_empty(entry.level.as_deref()),
            ])?;
        }
    }
    tx.execute(
        "UPDATE records SET
            schedule_checked_at = ?2,
            last_updated = ?2,
            source = CASE WHEN source = ?3 THEN ?4 ELSE source END
         WHERE id = ?1",
        params![id, today, DISCOVERY_SOURCE, ENRICHED_SOURCE],
    )?;
    tx.commit()?;
    Ok(true)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
