//! Cluster node catalog collaborator (cluster builds).
//! Resolves node groups and node names for the distribution registrar, and
//! tracks per-group shard-map initialization state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::typesys::Oid;
use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub oid: Oid,
    pub name: String,
    pub is_data_node: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    pub oid: Oid,
    pub name: String,
    pub members: Vec<Oid>,
    /// A shard-based table cannot target the group before its shard map has
    /// been built.
    pub shard_map_initialized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeCatalog {
    nodes: BTreeMap<Oid, NodeEntry>,
    groups: BTreeMap<Oid, NodeGroup>,
    default_group: Option<Oid>,
}

impl NodeCatalog {
    pub fn add_node(&mut self, oid: Oid, name: &str, is_data_node: bool) {
        self.nodes.insert(oid, NodeEntry { oid, name: name.to_string(), is_data_node });
    }

    pub fn add_group(&mut self, oid: Oid, name: &str, members: Vec<Oid>, shard_map_initialized: bool) {
        self.groups.insert(oid, NodeGroup { oid, name: name.to_string(), members, shard_map_initialized });
    }

    pub fn set_default_group(&mut self, oid: Oid) {
        self.default_group = Some(oid);
    }

    pub fn default_group(&self) -> Option<&NodeGroup> {
        self.default_group.and_then(|oid| self.groups.get(&oid))
    }

    pub fn group(&self, oid: Oid) -> CatalogResult<&NodeGroup> {
        self.groups.get(&oid).ok_or_else(|| CatalogError::cache_lookup("node group", oid))
    }

    pub fn resolve_group_by_name(&self, name: &str) -> CatalogResult<&NodeGroup> {
        self.groups
            .values()
            .find(|g| g.name == name)
            .ok_or_else(|| CatalogError::not_found(
                "unknown_node_group".into(),
                format!("node group \"{}\" does not exist", name),
            ))
    }

    pub fn resolve_node_by_name(&self, name: &str) -> CatalogResult<Oid> {
        self.nodes
            .values()
            .find(|n| n.name == name)
            .map(|n| n.oid)
            .ok_or_else(|| CatalogError::not_found(
                "unknown_node".into(),
                format!("node \"{}\" does not exist", name),
            ))
    }

    /// Group members sorted by node name for deterministic placement.
    pub fn group_members_sorted(&self, group: &NodeGroup) -> Vec<Oid> {
        let mut named: Vec<(&str, Oid)> = group
            .members
            .iter()
            .filter_map(|oid| self.nodes.get(oid).map(|n| (n.name.as_str(), n.oid)))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        named.into_iter().map(|(_, oid)| oid).collect()
    }

    /// Every known data node, sorted by name.
    pub fn all_data_nodes_sorted(&self) -> Vec<Oid> {
        let mut named: Vec<(&str, Oid)> = self
            .nodes
            .values()
            .filter(|n| n.is_data_node)
            .map(|n| (n.name.as_str(), n.oid))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        named.into_iter().map(|(_, oid)| oid).collect()
    }

    /// Resolve an explicit node-name list: duplicates silently collapsed,
    /// result sorted by name.
    pub fn resolve_node_names(&self, names: &[String]) -> CatalogResult<Vec<Oid>> {
        let mut oids: Vec<Oid> = Vec::new();
        for name in names {
            let oid = self.resolve_node_by_name(name)?;
            if !oids.contains(&oid) {
                oids.push(oid);
            }
        }
        let mut named: Vec<(&str, Oid)> = oids
            .iter()
            .filter_map(|oid| self.nodes.get(oid).map(|n| (n.name.as_str(), n.oid)))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, oid)| oid).collect())
    }
}
