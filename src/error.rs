use miette::Diagnostic;
use thiserror::Error;

use crate::driver::Capability;

#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    #[error("node not found")]
    NodeNotFound { name: String },

    #[error("{action} is not supported by this node's driver")]
    UnsupportedAction { action: Capability, name: String },

    #[error("{message}")]
    Provisioning { name: String, message: String },

    #[error("{action} failed: {message}")]
    ActionFailed {
        action: Capability,
        name: String,
        message: String,
    },

    #[error("malformed token '{token}': {reason}")]
    MalformedToken { token: String, reason: String },

    #[error("parent chain loops back on itself")]
    CyclicHierarchy { name: String },

    #[error("no parent")]
    NoParent { name: String },

    #[error("node already has a parent, undefine it first")]
    AlreadyAssigned { name: String },

    #[error("node is not a hypervisor")]
    NotAHypervisor { name: String },

    #[error("no hypervisor available for placement")]
    NoHypervisor,

    #[error("node id already exists in registry")]
    NodeAlreadyExists { node_id: String },

    #[error("unique key '{key}' is already taken")]
    UniqueKeyTaken { key: String, name: String },

    #[error("node still has {reason}")]
    NodeInUse { name: String, reason: String },

    #[error("registry is locked by {holder}")]
    #[diagnostic(help("retry once the other invocation finishes, or drop --no-wait"))]
    LockBusy { holder: String },

    #[error("timed out after {waited_s}s waiting for lock held by {holder}")]
    LockTimeout { holder: String, waited_s: u64 },

    #[error("failed to load registry from {path}")]
    RegistryLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry {path}: {message}")]
    RegistryParse { path: String, message: String },

    #[error("failed to write registry {path}")]
    RegistryWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl NodeError {
    /// Name of the node this error concerns, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            NodeError::NodeNotFound { name }
            | NodeError::UnsupportedAction { name, .. }
            | NodeError::Provisioning { name, .. }
            | NodeError::ActionFailed { name, .. }
            | NodeError::CyclicHierarchy { name }
            | NodeError::NoParent { name }
            | NodeError::AlreadyAssigned { name }
            | NodeError::NotAHypervisor { name }
            | NodeError::UniqueKeyTaken { name, .. }
            | NodeError::NodeInUse { name, .. } => Some(name),
            NodeError::NodeAlreadyExists { node_id } => Some(node_id),
            _ => None,
        }
    }

    /// One-line report in the `<command>: <message> (<node>)` form.
    pub fn report(&self, command: &str) -> String {
        match self.subject() {
            Some(node) => format!("{command}: {self} ({node})"),
            None => format!("{command}: {self}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_includes_command_and_node() {
        let err = NodeError::NodeNotFound {
            name: "web01".into(),
        };
        assert_eq!(err.report("info"), "info: node not found (web01)");
    }

    #[test]
    fn report_without_subject() {
        let err = NodeError::LockBusy {
            holder: "alice (pid 42)".into(),
        };
        assert_eq!(err.report("set"), "set: registry is locked by alice (pid 42)");
    }

    #[test]
    fn provisioning_message_is_verbatim() {
        let err = NodeError::Provisioning {
            name: "vm1".into(),
            message: "disk quota exceeded".into(),
        };
        assert_eq!(err.to_string(), "disk quota exceeded");
        assert_eq!(err.subject(), Some("vm1"));
    }
}
