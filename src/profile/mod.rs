//! Session profile management
//!
//! Each account owns an isolated on-disk browser profile (cookies, local
//! state). Profiles are checked out exclusively for the duration of a task.

mod manager;

pub use manager::{ProfileError, ProfileGuard, ProfileManager};
