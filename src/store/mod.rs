//! Storage collaborator of the engine.
//!
//! [`Store`] is the seam the engine talks to; [`LocalStore`] is the bundled
//! adapter, partitioned by site and optionally backed by a write-ahead log.

mod local;
pub mod wal;

pub use local::LocalStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    Missing(Ulid),
    AlreadyExists(Ulid),
    /// The site already holds as many entries as the caller allows.
    SiteFull(SiteId),
    Wal(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Missing(id) => write!(f, "no record with id {id}"),
            StoreError::AlreadyExists(id) => write!(f, "record already exists: {id}"),
            StoreError::SiteFull(id) => write!(f, "site {id} is full"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::Unavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait Store: Send + Sync {
    /// Pending entries of a site, oldest first. With `expiring_from`, only
    /// entries whose expiration is at or after that instant.
    async fn find_pending_entries(
        &self,
        site_id: SiteId,
        expiring_from: Option<Timestamp>,
    ) -> Result<Vec<WaitingListEntry>, StoreError>;

    /// Bookings of a site touching any date of `window`.
    async fn find_bookings(
        &self,
        site_id: SiteId,
        window: DateWindow,
        exclude_cancelled: bool,
    ) -> Result<Vec<CommittedBooking>, StoreError>;

    /// Compare-and-set: move the entry to `status` only while it is still in
    /// `expected`. Returns whether the transition applied.
    async fn update_entry_status(
        &self,
        id: EntryId,
        expected: EntryStatus,
        status: EntryStatus,
    ) -> Result<bool, StoreError>;

    /// Insert unless the site already holds `max_per_site` entries. The count
    /// and the insert happen under one site lock.
    async fn insert_entry(
        &self,
        entry: WaitingListEntry,
        max_per_site: usize,
    ) -> Result<WaitingListEntry, StoreError>;

    /// Apply `patch` as a single write. With `expected`, only while the entry
    /// is still in that status; `Ok(None)` when it no longer is.
    async fn update_entry(
        &self,
        id: EntryId,
        expected: Option<EntryStatus>,
        patch: EntryPatch,
    ) -> Result<Option<WaitingListEntry>, StoreError>;

    async fn get_entry(&self, id: EntryId) -> Result<Option<WaitingListEntry>, StoreError>;

    /// Entries of a site, oldest first, optionally filtered by status.
    async fn list_entries(
        &self,
        site_id: SiteId,
        status: Option<EntryStatus>,
    ) -> Result<Vec<WaitingListEntry>, StoreError>;

    /// Every site with at least one stored record.
    async fn site_ids(&self) -> Result<Vec<SiteId>, StoreError>;
}
