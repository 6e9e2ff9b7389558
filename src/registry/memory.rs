use std::collections::BTreeMap;

use crate::error::NodeError;
use crate::node::Node;
use crate::registry::{NodeUpdate, Registry};

/// In-process registry. Enforces id and unique-key uniqueness; names may
/// repeat.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    nodes: Vec<Node>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn index_of(&self, node_id: &str) -> Result<usize, NodeError> {
        self.nodes
            .iter()
            .position(|n| n.id() == node_id)
            .ok_or_else(|| NodeError::NodeNotFound {
                name: node_id.to_string(),
            })
    }

    /// Fail if any of `keys` belongs to a node other than `owner`.
    fn check_keys<'k>(
        &self,
        owner: &str,
        name: &str,
        keys: impl IntoIterator<Item = &'k String>,
    ) -> Result<(), NodeError> {
        for key in keys {
            if self
                .nodes
                .iter()
                .any(|n| n.id() != owner && n.unique_keys.contains(key))
            {
                return Err(NodeError::UniqueKeyTaken {
                    key: key.clone(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Registry for MemoryRegistry {
    fn snapshot(&self) -> Result<Vec<Node>, NodeError> {
        Ok(self.nodes.clone())
    }

    fn add_node(&mut self, node: Node) -> Result<(), NodeError> {
        if self.nodes.iter().any(|n| n.id() == node.id()) {
            return Err(NodeError::NodeAlreadyExists {
                node_id: node.id().to_string(),
            });
        }
        self.check_keys(node.id(), &node.name, &node.unique_keys)?;
        tracing::debug!(node_id = node.id(), name = %node.name, "adding node");
        self.nodes.push(node);
        Ok(())
    }

    fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<Node, NodeError> {
        let idx = self.index_of(node_id)?;
        if let Some(keys) = &update.unique_keys {
            self.check_keys(node_id, &self.nodes[idx].name, keys)?;
        }

        let node = &mut self.nodes[idx];
        if let Some(name) = update.name {
            node.name = name;
        }
        if let Some(tenant) = update.tenant {
            node.tenant = tenant;
        }
        if let Some(tags) = update.tags {
            node.tags = tags;
        }
        if let Some(state) = update.state {
            node.state = state;
        }
        if let Some(keys) = update.unique_keys {
            node.unique_keys = keys;
        }
        if let Some(definition) = update.definition {
            node.definition = definition;
        }
        tracing::debug!(node_id, name = %node.name, "updated node");
        Ok(node.clone())
    }

    fn set_parent(&mut self, node_id: &str, parent_id: Option<&str>) -> Result<(), NodeError> {
        let idx = self.index_of(node_id)?;
        let Some(parent_id) = parent_id else {
            self.nodes[idx].parent_id = None;
            return Ok(());
        };

        if self.nodes[idx].parent_id.is_some() {
            return Err(NodeError::AlreadyAssigned {
                name: self.nodes[idx].name.clone(),
            });
        }
        self.index_of(parent_id)?;
        tracing::debug!(node_id, parent_id, "assigning parent");
        self.nodes[idx].parent_id = Some(parent_id.to_string());
        Ok(())
    }

    fn update_metadata(
        &mut self,
        node_id: &str,
        extra: BTreeMap<String, String>,
        delete_keys: &[String],
    ) -> Result<(), NodeError> {
        let idx = self.index_of(node_id)?;
        let metadata = &mut self.nodes[idx].metadata;
        for key in delete_keys {
            metadata.remove(key);
        }
        metadata.extend(extra);
        Ok(())
    }

    fn delete_node(&mut self, node_id: &str) -> Result<(), NodeError> {
        let idx = self.index_of(node_id)?;
        let node = &self.nodes[idx];
        if node.parent_id.is_some() {
            return Err(NodeError::NodeInUse {
                name: node.name.clone(),
                reason: "a parent".into(),
            });
        }
        if self
            .nodes
            .iter()
            .any(|n| n.parent_id.as_deref() == Some(node_id))
        {
            return Err(NodeError::NodeInUse {
                name: node.name.clone(),
                reason: "children".into(),
            });
        }
        tracing::debug!(node_id, "deleting node");
        self.nodes.remove(idx);
        Ok(())
    }
}
