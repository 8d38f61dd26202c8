use chrono::{Days, NaiveDate};
use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;

use super::matching::{has_valid_rule, match_entries, occupied_dates};
use super::{Engine, EngineError};

/// Resolve caller bounds into the window actually scanned.
///
/// `from` defaults to `today`, `to` to `today + DEFAULT_WINDOW_DAYS`. Windows
/// wider than `MAX_WINDOW_DAYS` are cut to `[from, from + MAX_WINDOW_DAYS]`;
/// the flag reports whether that happened. `from > to` is rejected.
pub fn effective_window(
    today: NaiveDate,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<(DateWindow, bool), EngineError> {
    let from = from.unwrap_or(today);
    let to = match to {
        Some(to) => to,
        None => today
            .checked_add_days(Days::new(DEFAULT_WINDOW_DAYS as u64))
            .ok_or_else(|| EngineError::invalid("to", "default window runs past the calendar"))?,
    };
    let window = DateWindow::new(from, to)
        .ok_or_else(|| EngineError::invalid("to", format!("{to} is before from {from}")))?;
    if window.span_days() <= MAX_WINDOW_DAYS {
        return Ok((window, false));
    }
    // to > from + MAX_WINDOW_DAYS, so the sum exists.
    let clamped = from
        .checked_add_days(Days::new(MAX_WINDOW_DAYS as u64))
        .and_then(|clamped_to| DateWindow::new(from, clamped_to))
        .unwrap_or(window);
    Ok((clamped, true))
}

impl Engine {
    pub async fn get_entry(
        &self,
        site_id: SiteId,
        id: EntryId,
    ) -> Result<WaitingListEntry, EngineError> {
        self.store
            .get_entry(id)
            .await?
            .filter(|e| e.site_id == site_id)
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn list_entries(
        &self,
        site_id: SiteId,
        status: Option<EntryStatus>,
    ) -> Result<Vec<WaitingListEntry>, EngineError> {
        Ok(self.store.list_entries(site_id, status).await?)
    }

    /// Pending entries whose rule includes `date` and that have not expired
    /// by then, oldest request first.
    pub async fn match_single_date(
        &self,
        site_id: SiteId,
        date: NaiveDate,
    ) -> Result<Vec<WaitingListEntry>, EngineError> {
        self.sweep_expired(site_id).await?;
        let entries = self
            .store
            .find_pending_entries(site_id, Some(start_of_day(date)))
            .await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.is_pending() && e.expires_on() >= date)
            .filter(|e| has_valid_rule(e) && e.rule.includes(date))
            .collect())
    }

    /// Every open date per pending entry over the window, plus the dates more
    /// than one entry is waiting for.
    ///
    /// Sweeps the site first. The result is a snapshot: a date reported here
    /// can be booked by someone else before the caller acts on it.
    pub async fn match_range(
        &self,
        site_id: SiteId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<RangeMatch, EngineError> {
        let started = std::time::Instant::now();
        let (window, clamped) = effective_window(self.clock.today(), from, to)?;
        if clamped {
            warn!(
                "match window for site {site_id} clamped to {}..{} ({MAX_WINDOW_DAYS} days)",
                window.from(), window.to()
            );
            metrics::counter!(crate::observability::WINDOW_CLAMPS_TOTAL).increment(1);
        }

        self.sweep_expired(site_id).await?;
        let entries = self
            .store
            .find_pending_entries(site_id, Some(window.start()))
            .await?;
        let bookings = self.store.find_bookings(site_id, window, true).await?;
        let occupied = occupied_dates(&bookings, &window);

        let (matches, conflicts, summary) = match_entries(&entries, &window, &occupied);

        metrics::counter!(crate::observability::RANGE_MATCHES_TOTAL).increment(1);
        metrics::histogram!(crate::observability::MATCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(
            "site {site_id}: {} of {} pending entries match over {}..{}, {} contested dates",
            summary.entries_with_matches,
            summary.total_pending_entries,
            window.from(),
            window.to(),
            summary.dates_with_conflicts
        );

        Ok(RangeMatch {
            window,
            clamped,
            matches,
            conflicts,
            summary,
        })
    }
}
