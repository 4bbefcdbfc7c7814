//! Persistent account state
//!
//! One JSON file maps account ids to their identity, profile reference and
//! last-known proxy assignment. The Campaign Controller is the only writer.

mod accounts;

pub use accounts::{Account, AccountStatus, AccountStore, StoreError};
