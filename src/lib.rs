//! Waiting-list matching and expiration engine.
//!
//! Tracks client requests for calendar dates that are not yet free at a
//! site, retires requests whose expiration has passed, and computes which
//! pending requests could take which free dates, ranked first come first
//! served where they contend.

pub mod clock;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{Engine, EngineError};
pub use store::{LocalStore, Store, StoreError};
