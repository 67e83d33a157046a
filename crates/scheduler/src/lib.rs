//! Scheduled summary delivery.
//!
//! [`SchedulerLoop`] polls the store for due subscriptions and hands each one to the
//! [`DeliveryPipeline`], which resolves channels, collects the window's messages, asks the
//! summarizer for a digest and records exactly one delivery-log row per run.

pub mod delivery;
pub mod engine;

pub use delivery::{DeliveryError, DeliveryOutcome, DeliveryPipeline};
pub use engine::{SchedulerLoop, SchedulerStatus, SharedSchedulerStatus, TickReport};
