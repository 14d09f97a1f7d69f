//! # shield-engine
//!
//! The moderation loop: harvest groups into the pending set, ban or clear
//! candidates, flag groups dense with banned members, and cascade bans
//! through approved groups.

pub mod access;
pub mod cascade;
pub mod detector;
pub mod harvester;
pub mod service;

pub use cascade::{Cascade, CascadeReport};
pub use detector::Detector;
pub use harvester::{Harvest, Harvester};
pub use service::{Approval, ScanMode, ScanPolicy, ShieldService};
