//! Herald campaign service and HTTP API.
//!
//! A campaign is one API-submitted send request. The service validates it
//! against the template registry, persists the lifecycle record, fans it
//! out into notification events on the delayed exchange and records the
//! terminal state.

pub mod api;
pub mod service;

pub use api::{create_router, AppState};
pub use service::{CampaignService, SendCampaignRequest};
