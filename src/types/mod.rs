//! Core identifier types shared across the engine.

pub mod ids;

pub use ids::{DeliveryId, PrNumber, RepoId, Sha};
