//! Read facade and narrow write interface over the node inventory.
//!
//! Implementors provide a snapshot and the single-step writes; lookups,
//! tenant filtering and display ordering are shared default methods.

pub mod file;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::NodeError;
use crate::node::{Node, Tags, sort_nodes};
use crate::tags::TagQuery;

pub use file::FileRegistry;
pub use memory::MemoryRegistry;

/// Field changes applied by [`Registry::update_node`]. `None` leaves a
/// field alone.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the tenant.
    pub tenant: Option<Option<String>>,
    pub tags: Option<Tags>,
    pub state: Option<String>,
    pub unique_keys: Option<BTreeSet<String>>,
    pub definition: Option<BTreeMap<String, String>>,
}

pub trait Registry {
    /// Every node, in storage order.
    fn snapshot(&self) -> Result<Vec<Node>, NodeError>;

    fn add_node(&mut self, node: Node) -> Result<(), NodeError>;

    fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<Node, NodeError>;

    /// Assign to `parent_id`, or unassign with `None`.
    fn set_parent(&mut self, node_id: &str, parent_id: Option<&str>) -> Result<(), NodeError>;

    /// Drop `delete_keys`, then merge `extra` into the node's metadata.
    fn update_metadata(
        &mut self,
        node_id: &str,
        extra: BTreeMap<String, String>,
        delete_keys: &[String],
    ) -> Result<(), NodeError>;

    fn delete_node(&mut self, node_id: &str) -> Result<(), NodeError>;

    /// Sorted snapshot, optionally restricted to one tenant.
    fn list_nodes(&self, tenant: Option<&str>) -> Result<Vec<Node>, NodeError> {
        let mut nodes = self.snapshot()?;
        if let Some(tenant) = tenant {
            nodes.retain(|n| n.tenant.as_deref() == Some(tenant));
        }
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    /// Exact-name lookup; the first node in display order wins on duplicates.
    fn get_by_name(&self, name: &str) -> Result<Node, NodeError> {
        self.list_nodes(None)?
            .into_iter()
            .find(|n| n.name == name)
            .ok_or_else(|| NodeError::NodeNotFound {
                name: name.to_string(),
            })
    }

    fn get_by_id(&self, node_id: &str) -> Result<Node, NodeError> {
        self.snapshot()?
            .into_iter()
            .find(|n| n.id() == node_id)
            .ok_or_else(|| NodeError::NodeNotFound {
                name: node_id.to_string(),
            })
    }

    fn get_by_key(&self, key: &str) -> Result<Node, NodeError> {
        self.snapshot()?
            .into_iter()
            .find(|n| n.unique_keys.contains(key))
            .ok_or_else(|| NodeError::NodeNotFound {
                name: key.to_string(),
            })
    }
}

/// Criteria for `list`; all given criteria must hold.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub name_prefix: Option<String>,
    pub tenant: Option<String>,
    pub tags: TagQuery,
    pub node_type: Option<String>,
    pub unique_key: Option<String>,
    pub state: Option<String>,
    /// Parent by name.
    pub parent: Option<String>,
}

impl NodeFilter {
    /// Filter a sorted snapshot, keeping its order.
    pub fn apply(&self, nodes: Vec<Node>) -> Vec<Node> {
        let parent_ids: Option<BTreeSet<String>> = self.parent.as_ref().map(|parent| {
            nodes
                .iter()
                .filter(|n| n.name == *parent)
                .map(|n| n.id().to_string())
                .collect()
        });

        nodes
            .into_iter()
            .filter(|n| {
                self.name_prefix
                    .as_ref()
                    .is_none_or(|p| n.name.starts_with(p.as_str()))
                    && self
                        .tenant
                        .as_ref()
                        .is_none_or(|t| n.tenant.as_ref() == Some(t))
                    && self.node_type.as_ref().is_none_or(|t| n.node_type == *t)
                    && self
                        .unique_key
                        .as_ref()
                        .is_none_or(|k| n.unique_keys.contains(k))
                    && self.state.as_ref().is_none_or(|s| n.state == *s)
                    && parent_ids.as_ref().is_none_or(|ids| {
                        n.parent_id.as_ref().is_some_and(|p| ids.contains(p))
                    })
                    && self.tags.matches(&n.tags)
            })
            .collect()
    }
}
