//! Lifecycle capabilities and the drivers that carry them out.
//!
//! Whether a node supports an action is asked up front through
//! [`Driver::supports`]; callers turn a `false` into
//! [`NodeError::UnsupportedAction`] before anything runs.

use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use std::str::FromStr;

use crate::error::NodeError;
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Start,
    Stop,
    Shutdown,
    Define,
    Undefine,
    Provision,
    Deprovision,
    Poll,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Start,
        Capability::Stop,
        Capability::Shutdown,
        Capability::Define,
        Capability::Undefine,
        Capability::Provision,
        Capability::Deprovision,
        Capability::Poll,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Start => "start",
            Capability::Stop => "stop",
            Capability::Shutdown => "shutdown",
            Capability::Define => "define",
            Capability::Undefine => "undefine",
            Capability::Provision => "provision",
            Capability::Deprovision => "deprovision",
            Capability::Poll => "poll",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| NodeError::Validation {
                message: format!("unknown capability '{s}'"),
            })
    }
}

pub trait Driver {
    fn supports(&self, node: &Node, action: Capability) -> bool;

    /// Carry out `action` on `node`. Only called after `supports` said yes.
    fn invoke(&self, node: &Node, action: Capability) -> Result<(), NodeError>;
}

/// Check `supports`, then invoke.
pub fn dispatch(driver: &dyn Driver, node: &Node, action: Capability) -> Result<(), NodeError> {
    if !driver.supports(node, action) {
        return Err(NodeError::UnsupportedAction {
            action,
            name: node.name.clone(),
        });
    }
    tracing::debug!(node = %node.name, %action, "invoking driver");
    driver.invoke(node, action)
}

/// Runs operator-configured shell commands, keyed by node type then
/// capability. Node data reaches the command only through `NODECTL_*`
/// environment variables.
#[derive(Debug, Clone, Default)]
pub struct HookDriver {
    hooks: BTreeMap<String, BTreeMap<Capability, String>>,
}

impl HookDriver {
    pub fn new(hooks: BTreeMap<String, BTreeMap<Capability, String>>) -> Self {
        Self { hooks }
    }

    fn hook(&self, node: &Node, action: Capability) -> Option<&str> {
        self.hooks
            .get(&node.node_type)
            .and_then(|by_cap| by_cap.get(&action))
            .map(String::as_str)
    }
}

impl Driver for HookDriver {
    fn supports(&self, node: &Node, action: Capability) -> bool {
        self.hook(node, action).is_some()
    }

    fn invoke(&self, node: &Node, action: Capability) -> Result<(), NodeError> {
        let Some(script) = self.hook(node, action) else {
            return Err(NodeError::UnsupportedAction {
                action,
                name: node.name.clone(),
            });
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(script)
            .env("NODECTL_ACTION", action.as_str())
            .env("NODECTL_NODE_ID", node.id())
            .env("NODECTL_NAME", &node.name)
            .env("NODECTL_TYPE", &node.node_type)
            .env("NODECTL_PARENT_ID", node.parent_id.as_deref().unwrap_or(""))
            .env("NODECTL_TENANT", node.tenant.as_deref().unwrap_or(""))
            .output()
            .map_err(|e| NodeError::Io {
                context: format!("running {action} hook for {}", node.name),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("hook exited with {}", output.status)
            } else {
                stderr
            };
            let name = node.name.clone();
            return Err(match action {
                Capability::Provision | Capability::Deprovision => {
                    NodeError::Provisioning { name, message }
                }
                _ => NodeError::ActionFailed {
                    action,
                    name,
                    message,
                },
            });
        }

        tracing::info!(node = %node.name, %action, "hook completed");
        Ok(())
    }
}
