use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::warn;

use crate::model::*;

use super::conflict::group_conflicts;

// ── Range Matching Algorithm ──────────────────────────────────────

/// Dates inside `window` consumed by bookings that still occupy the calendar.
/// A booking occupies every date from its start through its last day.
pub fn occupied_dates<'a>(
    bookings: impl IntoIterator<Item = &'a CommittedBooking>,
    window: &DateWindow,
) -> BTreeSet<NaiveDate> {
    let mut occupied = BTreeSet::new();
    for booking in bookings.into_iter().filter(|b| b.occupies()) {
        let first = booking.first_day().max(window.from());
        let last = booking.last_day().min(window.to());
        occupied.extend(first.iter_days().take_while(|d| *d <= last));
    }
    occupied
}

/// Dates in `window` the entry could take: its rule's dates, capped at its
/// expiration, minus occupied dates. `None` when nothing is left.
pub fn match_entry(
    entry: &WaitingListEntry,
    window: &DateWindow,
    occupied: &BTreeSet<NaiveDate>,
) -> Option<MatchResult> {
    let matching_dates: Vec<NaiveDate> = entry
        .rule
        .dates_within(window, entry.expires_on())
        .filter(|d| !occupied.contains(d))
        .collect();
    let earliest_match = *matching_dates.first()?;
    Some(MatchResult {
        entry: entry.clone(),
        match_count: matching_dates.len(),
        earliest_match,
        matching_dates,
    })
}

/// Stored entries can predate a validation rule; those are skipped and reported.
pub(crate) fn has_valid_rule(entry: &WaitingListEntry) -> bool {
    match entry.rule.validate() {
        Ok(()) => true,
        Err(err) => {
            warn!("skipping entry {} with invalid rule: {err}", entry.id);
            metrics::counter!(crate::observability::INVALID_RULES_SKIPPED_TOTAL).increment(1);
            false
        }
    }
}

/// Match every pending entry against the free dates of `window`.
///
/// `matches` come back oldest request first; `conflicts` ascending by date.
/// Entries that are not pending or carry an invalid rule never match.
pub fn match_entries(
    entries: &[WaitingListEntry],
    window: &DateWindow,
    occupied: &BTreeSet<NaiveDate>,
) -> (Vec<MatchResult>, Vec<DateConflict>, MatchSummary) {
    let mut matches: Vec<MatchResult> = entries
        .iter()
        .filter(|e| e.is_pending())
        .filter(|e| has_valid_rule(e))
        .filter_map(|e| match_entry(e, window, occupied))
        .collect();
    matches.sort_by_key(|m| m.entry.priority_key());

    let conflicts = group_conflicts(
        matches
            .iter()
            .flat_map(|m| m.matching_dates.iter().map(move |d| (*d, &m.entry))),
    );

    let summary = MatchSummary {
        total_pending_entries: entries.iter().filter(|e| e.is_pending()).count(),
        entries_with_matches: matches.len(),
        total_available_dates: matches.iter().map(|m| m.match_count).sum(),
        dates_with_conflicts: conflicts.len(),
    };

    (matches, conflicts, summary)
}
