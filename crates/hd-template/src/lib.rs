//! Herald template registry and renderer.
//!
//! Every notification type registers a code-defined template contract at
//! startup (slug, supported channels, default title/body per channel and
//! locale). An optional persisted override replaces the defaults per
//! (slug, channel, locale); rendering merges the two and executes the
//! placeholder templates against the campaign's data map.

pub mod engine;
pub mod registry;
pub mod renderer;

pub use engine::{Template, TemplateError};
pub use registry::{EventTemplate, EventTemplateBuilder, TemplateContent, TemplateRegistry};
pub use renderer::{RenderedContent, Renderer};
