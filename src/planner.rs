use crate::db::Record;

/// Batch-level switches that shape the plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub force: bool,
    pub prices_only: bool,
}

/// Which categories a record still needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plan {
    pub pricing: bool,
    pub schedule: bool,
    pub about: bool,
}

impl Plan {
    pub fn any(&self) -> bool {
        self.pricing || self.schedule || self.about
    }
}

/// Decide from stored state alone. A category counts as done once it has an
/// attempt marker, whether or not the attempt found anything.
pub fn plan(record: &Record, flags: &Flags) -> Plan {
    if flags.force {
        return Plan {
            pricing: true,
            schedule: !flags.prices_only,
            about: !flags.prices_only,
        };
    }

    Plan {
        pricing: record.last_price_check.is_none(),
        schedule: !flags.prices_only
            && record.schedule_len == 0
            && record.schedule_checked_at.is_none(),
        about: !flags.prices_only
            && !record.has_description()
            && record.about_checked_at.is_none(),
    }
}
