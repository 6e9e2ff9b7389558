//! The service object command handlers run against.
//!
//! `Cluster` owns the registry, driver and provisioner chosen at startup;
//! `main` builds one per invocation and hands it to the matched command.

use std::collections::BTreeMap;

use crate::driver::{self, Capability, Driver};
use crate::error::NodeError;
use crate::hierarchy::{Forest, Placement};
use crate::node::{Node, STATE_UNASSIGNED};
use crate::provisioner::{NodeRequest, Provisioner};
use crate::registry::{NodeFilter, NodeUpdate, Registry};
use crate::tags::TagDelta;

pub const STATE_RUNNING: &str = "running";
pub const STATE_STOPPED: &str = "stopped";

/// Metadata key set by `provision` and removed by `deprovision`.
pub const PROVISIONED_KEY: &str = "provisioned";

/// Owned counterpart of [`crate::hierarchy::TreeEntry`].
#[derive(Debug, Clone)]
pub struct TreeLine {
    pub depth: usize,
    pub placement: Placement,
    pub node: Node,
}

/// A node plus the names of its neighbours, for `info`.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node: Node,
    pub parent: Option<String>,
    pub children: Vec<String>,
}

/// Field changes requested by `set`.
#[derive(Debug, Clone, Default)]
pub struct SetRequest {
    pub name: Option<String>,
    /// Empty string clears the tenant.
    pub tenant: Option<String>,
    pub tags: TagDelta,
    pub state: Option<String>,
}

#[derive(Debug, Default)]
pub struct PollReport {
    pub polled: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Cluster {
    registry: Box<dyn Registry>,
    driver: Box<dyn Driver>,
    provisioner: Box<dyn Provisioner>,
    hypervisor_types: Vec<String>,
}

impl Cluster {
    pub fn new(
        registry: Box<dyn Registry>,
        driver: Box<dyn Driver>,
        provisioner: Box<dyn Provisioner>,
        hypervisor_types: Vec<String>,
    ) -> Self {
        Self {
            registry,
            driver,
            provisioner,
            hypervisor_types,
        }
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    // ── reads ───────────────────────────────────────────────

    pub fn list(&self, filter: &NodeFilter) -> Result<Vec<Node>, NodeError> {
        // A unique key names at most one node. Parent names resolve against
        // the full listing, so that filter keeps the wide read.
        let nodes = match &filter.unique_key {
            Some(key) if filter.parent.is_none() => match self.registry.get_by_key(key) {
                Ok(node) => vec![node],
                Err(NodeError::NodeNotFound { .. }) => Vec::new(),
                Err(e) => return Err(e),
            },
            _ => self.registry.list_nodes(filter.tenant.as_deref())?,
        };
        Ok(filter.apply(nodes))
    }

    pub fn tree(&self) -> Result<Vec<TreeLine>, NodeError> {
        let nodes = self.registry.list_nodes(None)?;
        let forest = Forest::build(&nodes, &self.hypervisor_types)?;
        Ok(forest
            .walk()?
            .into_iter()
            .map(|e| TreeLine {
                depth: e.depth,
                placement: e.placement,
                node: e.node.clone(),
            })
            .collect())
    }

    pub fn info(&self, name: &str) -> Result<NodeInfo, NodeError> {
        let nodes = self.registry.list_nodes(None)?;
        let node = nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| NodeError::NodeNotFound {
                name: name.to_string(),
            })?;
        let parent = node.parent_id.as_deref().map(|pid| {
            nodes
                .iter()
                .find(|n| n.id() == pid)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("{pid} (missing)"))
        });
        let children = nodes
            .iter()
            .filter(|n| n.parent_id.as_deref() == Some(node.id()))
            .map(|n| n.name.clone())
            .collect();
        Ok(NodeInfo {
            node,
            parent,
            children,
        })
    }

    // ── lifecycle through the driver ────────────────────────

    /// `start`, `stop` or `shutdown`, then record the resulting state.
    pub fn power(&mut self, name: &str, action: Capability) -> Result<Node, NodeError> {
        let state = match action {
            Capability::Start => STATE_RUNNING,
            Capability::Stop | Capability::Shutdown => STATE_STOPPED,
            other => {
                return Err(NodeError::Validation {
                    message: format!("{other} is not a power action"),
                });
            }
        };
        let node = self.registry.get_by_name(name)?;
        driver::dispatch(self.driver.as_ref(), &node, action)?;
        self.write_state(&node, state)
    }

    /// Place a node on a hypervisor (`target`, or the least loaded one),
    /// then run the `define` hook.
    pub fn define(&mut self, name: &str, target: Option<&str>) -> Result<Node, NodeError> {
        let node = self.registry.get_by_name(name)?;
        if !self.driver.supports(&node, Capability::Define) {
            return Err(NodeError::UnsupportedAction {
                action: Capability::Define,
                name: node.name,
            });
        }
        if node.parent_id.is_some() {
            return Err(NodeError::AlreadyAssigned { name: node.name });
        }

        let host = match target {
            Some(target) => {
                let host = self.registry.get_by_name(target)?;
                if !host.is_hypervisor(&self.hypervisor_types) {
                    return Err(NodeError::NotAHypervisor { name: host.name });
                }
                host
            }
            None => self.least_loaded_hypervisor(&node)?,
        };

        self.registry.set_parent(node.id(), Some(host.id()))?;
        let placed = self.registry.get_by_id(node.id())?;
        if let Err(e) = self.driver.invoke(&placed, Capability::Define) {
            // Roll back the placement so a failed define leaves no assignment.
            self.registry.set_parent(node.id(), None)?;
            return Err(e);
        }
        tracing::info!(node = %node.name, host = %host.name, "defined node");
        self.write_state(&placed, STATE_STOPPED)
    }

    pub fn undefine(&mut self, name: &str) -> Result<Node, NodeError> {
        let node = self.registry.get_by_name(name)?;
        if !self.driver.supports(&node, Capability::Undefine) {
            return Err(NodeError::UnsupportedAction {
                action: Capability::Undefine,
                name: node.name,
            });
        }
        if node.parent_id.is_none() {
            return Err(NodeError::NoParent { name: node.name });
        }
        self.driver.invoke(&node, Capability::Undefine)?;
        self.registry.set_parent(node.id(), None)?;
        tracing::info!(node = %node.name, "undefined node");
        self.write_state(&node, STATE_UNASSIGNED)
    }

    pub fn provision(&mut self, name: &str) -> Result<Node, NodeError> {
        let node = self.registry.get_by_name(name)?;
        driver::dispatch(self.driver.as_ref(), &node, Capability::Provision)?;
        let extra = BTreeMap::from([(PROVISIONED_KEY.to_string(), "true".to_string())]);
        self.registry.update_metadata(node.id(), extra, &[])?;
        self.registry.get_by_id(node.id())
    }

    pub fn deprovision(&mut self, name: &str) -> Result<Node, NodeError> {
        let node = self.registry.get_by_name(name)?;
        driver::dispatch(self.driver.as_ref(), &node, Capability::Deprovision)?;
        self.registry
            .update_metadata(node.id(), BTreeMap::new(), &[PROVISIONED_KEY.to_string()])?;
        self.registry.get_by_id(node.id())
    }

    /// Run `poll` on every hypervisor that supports it. Individual failures
    /// are collected, not propagated.
    pub fn poll(&mut self) -> Result<PollReport, NodeError> {
        let mut report = PollReport::default();
        for node in self.registry.list_nodes(None)? {
            if !node.is_hypervisor(&self.hypervisor_types)
                || !self.driver.supports(&node, Capability::Poll)
            {
                continue;
            }
            match self.driver.invoke(&node, Capability::Poll) {
                Ok(()) => report.polled.push(node.name),
                Err(e) => {
                    tracing::warn!(node = %node.name, error = %e, "poll failed");
                    report.failed.push((node.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    // ── provisioner ─────────────────────────────────────────

    pub fn create(&mut self, request: NodeRequest) -> Result<Node, NodeError> {
        self.provisioner.create(self.registry.as_mut(), request)
    }

    pub fn delete(&mut self, name: &str) -> Result<(), NodeError> {
        let node = self.registry.get_by_name(name)?;
        self.provisioner.remove(self.registry.as_mut(), &node)
    }

    // ── direct registry writes ──────────────────────────────

    pub fn set(&mut self, name: &str, request: SetRequest) -> Result<Node, NodeError> {
        let node = self.registry.get_by_name(name)?;
        let update = NodeUpdate {
            name: request.name,
            tenant: request
                .tenant
                .map(|t| if t.is_empty() { None } else { Some(t) }),
            tags: (!request.tags.is_empty()).then(|| request.tags.apply(&node.tags)),
            state: request.state,
            ..Default::default()
        };
        self.registry.update_node(node.id(), update)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<Node, NodeError> {
        let node = self.registry.get_by_name(old)?;
        let update = NodeUpdate {
            name: Some(new.to_string()),
            ..Default::default()
        };
        self.registry.update_node(node.id(), update)
    }

    // ── helpers ─────────────────────────────────────────────

    fn write_state(&mut self, node: &Node, state: &str) -> Result<Node, NodeError> {
        let update = NodeUpdate {
            state: Some(state.to_string()),
            ..Default::default()
        };
        self.registry.update_node(node.id(), update)
    }

    /// Hypervisor with the fewest assigned nodes; ties go to the first name.
    fn least_loaded_hypervisor(&self, node: &Node) -> Result<Node, NodeError> {
        let nodes = self.registry.list_nodes(None)?;
        nodes
            .iter()
            .filter(|n| n.id() != node.id() && n.is_hypervisor(&self.hypervisor_types))
            .min_by_key(|hv| {
                nodes
                    .iter()
                    .filter(|n| n.parent_id.as_deref() == Some(hv.id()))
                    .count()
            })
            .cloned()
            .ok_or(NodeError::NoHypervisor)
    }
}
