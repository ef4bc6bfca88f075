//! Orb resolution
//!
//! Inline orbs are built together with the document. Registry orbs are
//! fetched through an [`OrbSourceFetcher`], built once and cached by the
//! [`OrbResolver`]. The builder only sees the outcome through [`OrbLookup`].

mod registry;
mod resolver;

use std::sync::Arc;

pub use crate::document::{OrbInfo, OrbKey, VersionInfo};
pub use registry::{version_info, FetchedOrb, OrbSourceFetcher, RegistryClient};
pub use resolver::OrbResolver;

use crate::error::OrbResolutionError;

/// What is currently known about a registry orb
#[derive(Debug, Clone)]
pub enum OrbState {
    Resolved(Arc<OrbInfo>),
    Failed(OrbResolutionError),
    /// Never requested, or still in flight
    Pending,
}

/// Synchronous view of resolved orbs used while building a document
pub trait OrbLookup: Send + Sync {
    fn lookup(&self, key: &OrbKey) -> OrbState;
}

/// Lookup that knows no orbs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOrbs;

impl OrbLookup for NoOrbs {
    fn lookup(&self, _key: &OrbKey) -> OrbState {
        OrbState::Pending
    }
}
