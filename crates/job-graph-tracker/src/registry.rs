//! Registry of asset links
//!
//! The registry exclusively owns every [`AssetLink`] tracked by a session.
//! Links are created and removed explicitly; nothing refers back to a link
//! except through its [`LinkId`].

use crate::link::{AssetLink, NodeLocation};
use crate::types::{LinkId, RemoteHandle};

/// Owned collection of asset links keyed by id
#[derive(Debug, Default)]
pub struct AssetLinkRegistry {
    links: Vec<AssetLink>,
}

/// Result of a reverse node lookup across all links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLocation {
    pub link: usize,
    pub node: NodeLocation,
}

impl AssetLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link, returning its id
    pub fn insert(&mut self, link: AssetLink) -> LinkId {
        let id = link.id.clone();
        self.links.push(link);
        id
    }

    pub fn remove(&mut self, id: &str) -> Option<AssetLink> {
        let index = self.links.iter().position(|l| l.id == id)?;
        Some(self.links.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&AssetLink> {
        self.links.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AssetLink> {
        self.links.iter_mut().find(|l| l.id == id)
    }

    pub fn link_at_mut(&mut self, index: usize) -> Option<&mut AssetLink> {
        self.links.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetLink> {
        self.links.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AssetLink> {
        self.links.iter_mut()
    }

    /// Find the link, network and node owning an engine node handle
    pub fn find_node_by_handle(&self, handle: RemoteHandle) -> Option<RegistryLocation> {
        self.links.iter().enumerate().find_map(|(link, l)| {
            l.find_node_by_handle(handle)
                .map(|node| RegistryLocation { link, node })
        })
    }
}
