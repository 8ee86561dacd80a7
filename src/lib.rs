//! Pollen and air-quality monitoring service.
//!
//! Polls a forecast API per configured location, resolves localized
//! allergen labels to canonical identities, and reconciles each poll into a
//! stable set of tracked quantities for a host framework to display.
//!
//! Cycle: `poller` → `analysis` (with `resolve`, `levels`, `tables`) →
//! `reconcile` → `tracker` view, driven by `scheduler`.

pub mod analysis;
pub mod config;
pub mod host;
pub mod ingest;
pub mod levels;
pub mod logging;
pub mod model;
pub mod poller;
pub mod reconcile;
pub mod resolve;
pub mod scheduler;
pub mod slug;
pub mod staleness;
pub mod tables;
pub mod tracker;
pub mod verify;
