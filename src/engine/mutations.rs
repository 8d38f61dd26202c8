use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::StoreError;

use super::{Engine, EngineError};

fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::invalid(
            "notes",
            format!("longer than {MAX_NOTES_LEN} bytes"),
        ));
    }
    Ok(())
}

fn validate_expiration(expiration: Timestamp, now: Timestamp) -> Result<(), EngineError> {
    if expiration <= now {
        return Err(EngineError::invalid(
            "expirationDate",
            format!("{expiration} is not in the future"),
        ));
    }
    Ok(())
}

/// Status changes a caller may request on a pending entry.
fn validate_status_change(current: EntryStatus, requested: EntryStatus) -> Result<(), EngineError> {
    if current.is_terminal() {
        return Err(EngineError::invalid(
            "status",
            format!("entry is already {current}"),
        ));
    }
    match requested {
        EntryStatus::Fulfilled | EntryStatus::Cancelled => Ok(()),
        EntryStatus::Expired => Err(EngineError::invalid(
            "status",
            "entries only expire through the sweep",
        )),
        EntryStatus::Pending => Err(EngineError::invalid("status", "entry is already pending")),
    }
}

impl Engine {
    pub async fn create_entry(&self, input: NewEntry) -> Result<WaitingListEntry, EngineError> {
        input.rule.validate()?;
        let now = self.clock.now();
        validate_expiration(input.expiration_date, now)?;
        validate_notes(input.notes.as_deref())?;

        let entry = WaitingListEntry {
            id: Ulid::new(),
            site_id: input.site_id,
            client_id: input.client_id,
            rule: input.rule,
            expiration_date: input.expiration_date,
            status: EntryStatus::Pending,
            linked_event_id: None,
            notes: input.notes,
            created_at: now,
        };
        let entry = match self.store.insert_entry(entry, MAX_ENTRIES_PER_SITE).await {
            Err(StoreError::SiteFull(_)) => {
                return Err(EngineError::LimitExceeded("too many entries for site"));
            }
            other => other?,
        };
        metrics::counter!(crate::observability::ENTRIES_CREATED_TOTAL).increment(1);
        debug!("created waiting-list entry {} for site {}", entry.id, entry.site_id);
        Ok(entry)
    }

    /// Apply a caller patch. Status may only move from `Pending` to
    /// `Fulfilled` or `Cancelled`; re-stating the current status is a no-op.
    pub async fn update_entry(
        &self,
        site_id: SiteId,
        id: EntryId,
        mut patch: EntryPatch,
    ) -> Result<WaitingListEntry, EngineError> {
        let current = self.get_entry(site_id, id).await?;
        if patch.status == Some(current.status) {
            patch.status = None;
        }
        if let Some(status) = patch.status {
            validate_status_change(current.status, status)?;
        }
        if let Some(expiration) = patch.expiration_date {
            validate_expiration(expiration, self.clock.now())?;
        }
        validate_notes(patch.notes.as_deref())?;
        if patch.is_empty() {
            return Ok(current);
        }

        // One guarded write: status, event link and notes land together.
        let expected = patch.status.map(|_| current.status);
        let status = patch.status;
        match self.store.update_entry(id, expected, patch).await? {
            Some(updated) => {
                if let Some(status) = status {
                    debug!("entry {id} moved to {status}");
                }
                Ok(updated)
            }
            None => {
                let now_status = self.get_entry(site_id, id).await?.status;
                Err(EngineError::invalid(
                    "status",
                    format!("entry changed concurrently and is now {now_status}"),
                ))
            }
        }
    }

    /// Flip every pending entry of the site whose expiration has passed to
    /// `Expired`. Each flip is a guarded compare-and-set, so repeated or
    /// concurrent sweeps converge without double counting.
    pub async fn sweep_expired(&self, site_id: SiteId) -> Result<SweepReport, EngineError> {
        let now = self.clock.now();
        let stale: Vec<EntryId> = self
            .store
            .find_pending_entries(site_id, None)
            .await?
            .into_iter()
            .filter(|e| e.expiration_date < now)
            .map(|e| e.id)
            .collect();

        let mut expired_count = 0;
        for id in stale {
            if self
                .store
                .update_entry_status(id, EntryStatus::Pending, EntryStatus::Expired)
                .await?
            {
                expired_count += 1;
            }
        }

        if expired_count > 0 {
            info!("expired {expired_count} waiting-list entries for site {site_id}");
            metrics::counter!(crate::observability::ENTRIES_EXPIRED_TOTAL)
                .increment(expired_count as u64);
        }
        Ok(SweepReport { expired_count })
    }
}
