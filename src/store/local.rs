use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::model::*;

use super::wal::Wal;
use super::{Store, StoreError};

pub type SharedSite = Arc<RwLock<SiteState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for one append, drain whatever else is already queued, fsync once,
/// then answer every sender in the batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride
    // along with the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => {}
    }
}

/// Site-partitioned store. Each site's entries and bookings live behind
/// their own lock, so sites never contend with each other.
pub struct LocalStore {
    sites: DashMap<SiteId, SharedSite>,
    entry_to_site: DashMap<EntryId, SiteId>,
    booking_to_site: DashMap<BookingId, SiteId>,
    /// Writers hold it shared from before their site lock until their WAL
    /// append is acknowledged; compaction holds it exclusively.
    commit_gate: RwLock<()>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalStore {
    /// Volatile store; nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            sites: DashMap::new(),
            entry_to_site: DashMap::new(),
            booking_to_site: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx: None,
        }
    }

    /// Replay the log at `path` and keep appending to it.
    /// Spawns the WAL writer, so it must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut store = Self::in_memory();
        store.wal_tx = Some(wal_tx);

        let mut partitions: HashMap<SiteId, SiteState> = HashMap::new();
        for event in &events {
            let site_id = event.site_id();
            let site = partitions
                .entry(site_id)
                .or_insert_with(|| SiteState::new(site_id));
            store.apply_event(site, event);
        }
        for (id, site) in partitions {
            store.sites.insert(id, Arc::new(RwLock::new(site)));
        }
        tracing::debug!("replayed {} WAL events from {}", events.len(), path.display());
        Ok(store)
    }

    fn get_site(&self, site_id: &SiteId) -> Option<SharedSite> {
        self.sites.get(site_id).map(|e| e.value().clone())
    }

    /// Write lock on a site, creating its partition on first use.
    async fn site_write(&self, site_id: SiteId) -> OwnedRwLockWriteGuard<SiteState> {
        let site = self
            .sites
            .entry(site_id)
            .or_insert_with(|| Arc::new(RwLock::new(SiteState::new(site_id))))
            .clone();
        site.write_owned().await
    }

    /// Lookup entry → site, acquire that site's write lock.
    async fn resolve_entry_write(
        &self,
        id: &EntryId,
    ) -> Result<OwnedRwLockWriteGuard<SiteState>, StoreError> {
        let site_id = self
            .entry_to_site
            .get(id)
            .map(|e| *e.value())
            .ok_or(StoreError::Missing(*id))?;
        let site = self.get_site(&site_id).ok_or(StoreError::Missing(*id))?;
        Ok(site.write_owned().await)
    }

    /// Apply an event to a partition (no locking; caller holds the lock).
    fn apply_event(&self, site: &mut SiteState, event: &Event) {
        match event {
            Event::EntryCreated { entry } => {
                self.entry_to_site.insert(entry.id, entry.site_id);
                site.insert_entry(entry.clone());
            }
            Event::EntryUpdated { entry } => {
                if let Some(current) = site.entry_mut(&entry.id) {
                    *current = entry.clone();
                }
            }
            Event::EntryStatusChanged { id, status, .. } => {
                if let Some(current) = site.entry_mut(id) {
                    current.status = *status;
                }
            }
            Event::BookingRecorded { booking } => {
                self.booking_to_site.insert(booking.id, booking.site_id);
                site.insert_booking(booking.clone());
            }
            Event::BookingStatusChanged { id, status, .. } => {
                if let Some(current) = site.booking_mut(id) {
                    current.status = *status;
                }
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append then apply. The caller holds the commit gate and the site's
    /// write lock, taken in that order.
    async fn commit(&self, site: &mut SiteState, event: Event) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply_event(site, &event);
        Ok(())
    }

    // ── Booking collaborator ─────────────────────────────────

    /// Record a booking committed by the calendar side.
    pub async fn record_booking(&self, booking: CommittedBooking) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.site_write(booking.site_id).await;
        if self.booking_to_site.contains_key(&booking.id) {
            return Err(StoreError::AlreadyExists(booking.id));
        }
        self.commit(&mut guard, Event::BookingRecorded { booking }).await
    }

    pub async fn set_booking_status(
        &self,
        id: BookingId,
        status: BookingStatus,
    ) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let site_id = self
            .booking_to_site
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::Missing(id))?;
        let mut guard = self.site_write(site_id).await;
        self.commit(&mut guard, Event::BookingStatusChanged { id, site_id, status })
            .await
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with one record per live entry and booking.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        // No commit may land in the old log between the snapshot and the swap.
        let _gate = self.commit_gate.write().await;
        let sites: Vec<SharedSite> = self.sites.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for site in sites {
            let guard = site.read().await;
            events.extend(
                guard
                    .entries
                    .iter()
                    .map(|entry| Event::EntryCreated { entry: entry.clone() }),
            );
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|booking| Event::BookingRecorded { booking: booking.clone() }),
            );
        }

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn find_pending_entries(
        &self,
        site_id: SiteId,
        expiring_from: Option<Timestamp>,
    ) -> Result<Vec<WaitingListEntry>, StoreError> {
        let Some(site) = self.get_site(&site_id) else {
            return Ok(vec![]);
        };
        let guard = site.read().await;
        Ok(guard
            .entries
            .iter()
            .filter(|e| e.is_pending())
            .filter(|e| expiring_from.is_none_or(|bound| e.expiration_date >= bound))
            .cloned()
            .collect())
    }

    async fn find_bookings(
        &self,
        site_id: SiteId,
        window: DateWindow,
        exclude_cancelled: bool,
    ) -> Result<Vec<CommittedBooking>, StoreError> {
        let Some(site) = self.get_site(&site_id) else {
            return Ok(vec![]);
        };
        let guard = site.read().await;
        Ok(guard
            .bookings_overlapping(&window)
            .filter(|b| !exclude_cancelled || b.occupies())
            .cloned()
            .collect())
    }

    async fn update_entry_status(
        &self,
        id: EntryId,
        expected: EntryStatus,
        status: EntryStatus,
    ) -> Result<bool, StoreError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_entry_write(&id).await?;
        let site_id = guard.id;
        match guard.entry(&id) {
            None => return Err(StoreError::Missing(id)),
            Some(entry) if entry.status != expected => return Ok(false),
            Some(_) => {}
        }
        self.commit(&mut guard, Event::EntryStatusChanged { id, site_id, status })
            .await?;
        Ok(true)
    }

    async fn insert_entry(
        &self,
        entry: WaitingListEntry,
        max_per_site: usize,
    ) -> Result<WaitingListEntry, StoreError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.site_write(entry.site_id).await;
        if self.entry_to_site.contains_key(&entry.id) {
            return Err(StoreError::AlreadyExists(entry.id));
        }
        if guard.entries.len() >= max_per_site {
            return Err(StoreError::SiteFull(entry.site_id));
        }
        self.commit(&mut guard, Event::EntryCreated { entry: entry.clone() })
            .await?;
        Ok(entry)
    }

    async fn update_entry(
        &self,
        id: EntryId,
        expected: Option<EntryStatus>,
        patch: EntryPatch,
    ) -> Result<Option<WaitingListEntry>, StoreError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = self.resolve_entry_write(&id).await?;
        let mut entry = guard.entry(&id).cloned().ok_or(StoreError::Missing(id))?;
        if expected.is_some_and(|status| status != entry.status) {
            return Ok(None);
        }
        patch.apply_to(&mut entry);
        self.commit(&mut guard, Event::EntryUpdated { entry: entry.clone() })
            .await?;
        Ok(Some(entry))
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<WaitingListEntry>, StoreError> {
        let Some(site_id) = self.entry_to_site.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(site) = self.get_site(&site_id) else {
            return Ok(None);
        };
        let guard = site.read().await;
        Ok(guard.entry(&id).cloned())
    }

    async fn list_entries(
        &self,
        site_id: SiteId,
        status: Option<EntryStatus>,
    ) -> Result<Vec<WaitingListEntry>, StoreError> {
        let Some(site) = self.get_site(&site_id) else {
            return Ok(vec![]);
        };
        let guard = site.read().await;
        Ok(guard
            .entries
            .iter()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect())
    }

    async fn site_ids(&self) -> Result<Vec<SiteId>, StoreError> {
        Ok(self.sites.iter().map(|e| *e.key()).collect())
    }
}
