mod conflict;
mod error;
mod matching;
mod mutations;
mod queries;
mod rule;

pub use conflict::{group_conflicts, rank};
pub use error::EngineError;
pub use matching::{match_entries, match_entry, occupied_dates};
pub use queries::effective_window;
pub use rule::{RuleDates, weekday_number};

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::store::Store;

/// Waiting-list engine. Holds no state of its own between calls: every
/// operation reads from and writes to the store, with time taken from the
/// injected clock.
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_system_clock(store: Arc<dyn Store>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
