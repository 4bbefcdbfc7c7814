//! Campaign control
//!
//! Top-level entry point: selects accounts for a target URL, binds proxies,
//! dispatches the workers, and persists the aggregate effects.

mod controller;

pub use controller::{
    AccountFilter, CampaignController, CampaignError, CampaignRequest, CampaignResult,
};
