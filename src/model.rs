use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type SiteId = Ulid;
pub type ClientId = Ulid;
pub type EntryId = Ulid;
pub type BookingId = Ulid;

/// Timestamps are UTC; calendar dates are their UTC date.
pub type Timestamp = DateTime<Utc>;

/// Midnight UTC at the start of `date`.
pub fn start_of_day(date: NaiveDate) -> Timestamp {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Closed calendar-date window `[from, to]`, never inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateWindow {
    /// `None` when `from` is after `to`.
    pub fn new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    /// Number of days between the bounds (`0` for a single-day window).
    pub fn span_days(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// First instant of the window.
    pub fn start(&self) -> Timestamp {
        start_of_day(self.from)
    }

    /// First instant after the window.
    pub fn end(&self) -> Timestamp {
        start_of_day(self.to) + Duration::days(1)
    }
}

/// Applicability pattern of a waiting-list entry. The enum makes a payload of
/// the wrong variant unrepresentable; `Rule::validate` rejects empty ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    SpecificDates(BTreeSet<NaiveDate>),
    /// Weekday numbers, 0 = Sunday through 6 = Saturday.
    DayOfWeek(BTreeSet<u8>),
    DateRange { start: NaiveDate, end: NaiveDate },
}

/// Transport shape of a rule: a string tag plus one optional field per
/// variant. Converted into [`Rule`] with `TryFrom`, which rejects any payload
/// that disagrees with the tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    pub rule_type: String,
    pub specific_dates: Option<Vec<NaiveDate>>,
    pub days_of_week: Option<Vec<i64>>,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryStatus {
    Pending,
    Fulfilled,
    Expired,
    Cancelled,
}

impl EntryStatus {
    /// Everything but `Pending` is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EntryStatus::Pending)
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Fulfilled => "fulfilled",
            EntryStatus::Expired => "expired",
            EntryStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A client's standing request for a not-yet-available date at a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingListEntry {
    pub id: EntryId,
    pub site_id: SiteId,
    pub client_id: ClientId,
    pub rule: Rule,
    pub expiration_date: Timestamp,
    pub status: EntryStatus,
    pub linked_event_id: Option<Ulid>,
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

impl WaitingListEntry {
    /// Last calendar date this entry can still be matched on.
    pub fn expires_on(&self) -> NaiveDate {
        self.expiration_date.date_naive()
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    /// First-come-first-served ordering key; `id` breaks timestamp ties.
    pub fn priority_key(&self) -> (Timestamp, EntryId) {
        (self.created_at, self.id)
    }
}

/// Input to `create_entry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub site_id: SiteId,
    pub client_id: ClientId,
    pub rule: Rule,
    pub expiration_date: Timestamp,
    pub notes: Option<String>,
}

/// Partial update of an entry. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    pub status: Option<EntryStatus>,
    pub expiration_date: Option<Timestamp>,
    pub notes: Option<String>,
    pub linked_event_id: Option<Ulid>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.expiration_date.is_none()
            && self.notes.is_none()
            && self.linked_event_id.is_none()
    }

    pub fn apply_to(&self, entry: &mut WaitingListEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(expiration) = self.expiration_date {
            entry.expiration_date = expiration;
        }
        if let Some(ref notes) = self.notes {
            entry.notes = Some(notes.clone());
        }
        if let Some(event_id) = self.linked_event_id {
            entry.linked_event_id = Some(event_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Tentative,
    Confirmed,
    Completed,
    Cancelled,
}

/// A calendar event already committed at a site. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedBooking {
    pub id: BookingId,
    pub site_id: SiteId,
    pub start: Timestamp,
    /// Exclusive end instant.
    pub end: Option<Timestamp>,
    pub status: BookingStatus,
}

impl CommittedBooking {
    pub fn occupies(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Last occupied calendar date. An end at exactly midnight does not
    /// occupy the day it lands on.
    pub fn last_day(&self) -> NaiveDate {
        match self.end {
            Some(end) if end > self.start => {
                (end - Duration::nanoseconds(1)).date_naive().max(self.first_day())
            }
            _ => self.first_day(),
        }
    }

    pub fn overlaps(&self, window: &DateWindow) -> bool {
        self.first_day() <= window.to() && self.last_day() >= window.from()
    }
}

// ── Derived match results ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub entry: WaitingListEntry,
    /// Ascending.
    pub matching_dates: Vec<NaiveDate>,
    pub earliest_match: NaiveDate,
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contender {
    pub entry: WaitingListEntry,
    /// 1 = first in line.
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateConflict {
    pub date: NaiveDate,
    pub contenders: Vec<Contender>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub total_pending_entries: usize,
    pub entries_with_matches: usize,
    pub total_available_dates: usize,
    pub dates_with_conflicts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeMatch {
    /// Effective window after defaults and clamping.
    pub window: DateWindow,
    pub clamped: bool,
    pub matches: Vec<MatchResult>,
    pub conflicts: Vec<DateConflict>,
    pub summary: MatchSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired_count: usize,
}

// ── Per-site storage partition ───────────────────────────────────

#[derive(Debug, Clone)]
pub struct SiteState {
    pub id: SiteId,
    /// Sorted by `(created_at, id)`.
    pub entries: Vec<WaitingListEntry>,
    /// Sorted by `start`.
    pub bookings: Vec<CommittedBooking>,
}

impl SiteState {
    pub fn new(id: SiteId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert entry maintaining priority order.
    pub fn insert_entry(&mut self, entry: WaitingListEntry) {
        let key = entry.priority_key();
        let pos = self
            .entries
            .binary_search_by_key(&key, |e| e.priority_key())
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn entry(&self, id: &EntryId) -> Option<&WaitingListEntry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    pub fn entry_mut(&mut self, id: &EntryId) -> Option<&mut WaitingListEntry> {
        self.entries.iter_mut().find(|e| e.id == *id)
    }

    /// Insert booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: CommittedBooking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: &BookingId) -> Option<&mut CommittedBooking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings touching any date of the window.
    /// Everything at index >= right_bound starts after the window → can't overlap.
    pub fn bookings_overlapping(
        &self,
        window: &DateWindow,
    ) -> impl Iterator<Item = &CommittedBooking> {
        let window_end = window.end();
        let right_bound = self.bookings.partition_point(|b| b.start < window_end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.last_day() >= window.from())
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EntryCreated {
        entry: WaitingListEntry,
    },
    /// Full state after a patch.
    EntryUpdated {
        entry: WaitingListEntry,
    },
    EntryStatusChanged {
        id: EntryId,
        site_id: SiteId,
        status: EntryStatus,
    },
    BookingRecorded {
        booking: CommittedBooking,
    },
    BookingStatusChanged {
        id: BookingId,
        site_id: SiteId,
        status: BookingStatus,
    },
}

impl Event {
    pub fn site_id(&self) -> SiteId {
        match self {
            Event::EntryCreated { entry } | Event::EntryUpdated { entry } => entry.site_id,
            Event::BookingRecorded { booking } => booking.site_id,
            Event::EntryStatusChanged { site_id, .. }
            | Event::BookingStatusChanged { site_id, .. } => *site_id,
        }
    }
}
