//! Creating and removing nodes.
//!
//! The cluster service never adds or deletes registry entries itself; it
//! asks a [`Provisioner`]. Failures surface as
//! [`NodeError::Provisioning`] with the underlying message.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::NodeError;
use crate::node::{Node, Tags};
use crate::registry::Registry;

/// Everything `new` knows about the node to create.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub node_id: String,
    /// Defaults to the id.
    pub name: Option<String>,
    pub node_type: String,
    pub tenant: Option<String>,
    pub tags: Tags,
    pub unique_keys: BTreeSet<String>,
    pub definition: BTreeMap<String, String>,
}

pub trait Provisioner {
    fn create(&self, registry: &mut dyn Registry, request: NodeRequest) -> Result<Node, NodeError>;

    fn remove(&self, registry: &mut dyn Registry, node: &Node) -> Result<(), NodeError>;
}

/// Provisioner that only records the node in the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryProvisioner;

impl Provisioner for RegistryProvisioner {
    fn create(&self, registry: &mut dyn Registry, request: NodeRequest) -> Result<Node, NodeError> {
        let name = request.name.unwrap_or_else(|| request.node_id.clone());
        let failed = |message: String| NodeError::Provisioning {
            name: name.clone(),
            message,
        };

        if request.node_id.trim().is_empty() {
            return Err(failed("node id must not be empty".into()));
        }
        if name.trim().is_empty() {
            return Err(failed("node name must not be empty".into()));
        }

        let mut node = Node::new(request.node_id, name.clone(), request.node_type);
        node.tenant = request.tenant;
        node.tags = request.tags;
        node.unique_keys = request.unique_keys;
        node.definition = request.definition;

        registry
            .add_node(node.clone())
            .map_err(|e| failed(e.to_string()))?;
        tracing::info!(node_id = node.id(), name = %node.name, "provisioned node record");
        Ok(node)
    }

    fn remove(&self, registry: &mut dyn Registry, node: &Node) -> Result<(), NodeError> {
        registry
            .delete_node(node.id())
            .map_err(|e| NodeError::Provisioning {
                name: node.name.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(node_id = node.id(), name = %node.name, "removed node record");
        Ok(())
    }
}
