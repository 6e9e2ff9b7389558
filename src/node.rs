//! The node entity shared by every other module.
//!
//! A node is either a hypervisor-class host or a workload assigned to one
//! through `parent_id`. The core only reads nodes and requests writes; it
//! never invents them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use facet::Facet;

use crate::error::NodeError;
use crate::tags;

/// Node type of hypervisor-class nodes unless the config says otherwise.
pub const DEFAULT_HYPERVISOR_TYPE: &str = "hv";

/// State given to freshly created nodes.
pub const STATE_UNASSIGNED: &str = "unassigned";

/// Value of a single tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// Boolean presence marker.
    Present,
    Valued(String),
}

/// Tag set of one node, keyed and iterated in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, TagValue>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: TagValue) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<TagValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Storage tokens: `key` for presence, `key=value` otherwise.
    pub fn to_tokens(&self) -> Vec<String> {
        self.iter()
            .map(|(k, v)| match v {
                TagValue::Present => k.to_string(),
                TagValue::Valued(s) => format!("{k}={s}"),
            })
            .collect()
    }

    /// Parse user input; each argument may hold several whitespace
    /// separated tokens. `key=` stores an empty value here; it only means
    /// "delete" in a mutation.
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Self, NodeError> {
        Ok(Self::from_pairs(tags::parse_tokens(tokens)?))
    }

    /// Inverse of [`Tags::to_tokens`]: one tag per element, so stored
    /// values keep their whitespace.
    pub fn from_stored(tokens: &[String]) -> Result<Self, NodeError> {
        let pairs = tokens
            .iter()
            .map(|t| tags::parse_token(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_pairs(pairs))
    }

    fn from_pairs(pairs: Vec<(String, Option<String>)>) -> Self {
        pairs
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Some(v) => TagValue::Valued(v),
                    None => TagValue::Present,
                };
                (key, value)
            })
            .collect()
    }
}

impl<K: Into<String>> FromIterator<(K, TagValue)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, TagValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&tags::format_tags(self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    node_id: String,
    pub name: String,
    pub node_type: String,
    pub tenant: Option<String>,
    pub parent_id: Option<String>,
    pub state: String,
    pub tags: Tags,
    pub unique_keys: BTreeSet<String>,
    pub definition: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    pub fn new(
        node_id: impl Into<String>,
        name: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
            node_type: node_type.into(),
            tenant: None,
            parent_id: None,
            state: STATE_UNASSIGNED.to_string(),
            tags: Tags::new(),
            unique_keys: BTreeSet::new(),
            definition: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.node_id
    }

    pub fn is_hypervisor(&self, hypervisor_types: &[String]) -> bool {
        hypervisor_types.iter().any(|t| *t == self.node_type)
    }

    /// Display order: name first (byte-wise, so `A` < `b`), id to break ties.
    pub fn sort_key(&self) -> (&str, &str) {
        (&self.name, &self.node_id)
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            node_id: self.node_id.clone(),
            name: self.name.clone(),
            node_type: self.node_type.clone(),
            tenant: self.tenant.clone(),
            parent: self.parent_id.clone(),
            state: self.state.clone(),
            tags: self.tags.to_tokens(),
            keys: self.unique_keys.iter().cloned().collect(),
            definition: self.definition.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn from_record(record: NodeRecord) -> Result<Self, NodeError> {
        let tags = Tags::from_stored(&record.tags)?;
        Ok(Self {
            node_id: record.node_id,
            name: record.name,
            node_type: record.node_type,
            tenant: record.tenant,
            parent_id: record.parent,
            state: record.state,
            tags,
            unique_keys: record.keys.into_iter().collect(),
            definition: record.definition,
            metadata: record.metadata,
        })
    }
}

/// Sort a snapshot into display order.
pub fn sort_nodes(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Serialized form of a node, used by the registry file and JSON output.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct NodeRecord {
    pub node_id: String,
    pub name: String,
    pub node_type: String,
    #[facet(default)]
    pub tenant: Option<String>,
    #[facet(default)]
    pub parent: Option<String>,
    #[facet(default)]
    pub state: String,
    #[facet(default)]
    pub tags: Vec<String>,
    #[facet(default)]
    pub keys: Vec<String>,
    #[facet(default)]
    pub definition: BTreeMap<String, String>,
    #[facet(default)]
    pub metadata: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_case_sensitive_by_name() {
        let mut nodes = vec![
            Node::new("1", "b", "vm"),
            Node::new("2", "A", "vm"),
            Node::new("3", "c", "vm"),
        ];
        sort_nodes(&mut nodes);
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["A", "b", "c"]);
    }

    #[test]
    fn duplicate_names_ordered_by_id() {
        let mut nodes = vec![Node::new("vm-2", "web", "vm"), Node::new("vm-1", "web", "vm")];
        sort_nodes(&mut nodes);
        assert_eq!(nodes[0].id(), "vm-1");
    }

    #[test]
    fn hypervisor_class_follows_configured_types() {
        let types = vec!["hv".to_string(), "xen".to_string()];
        assert!(Node::new("a", "a", "hv").is_hypervisor(&types));
        assert!(Node::new("b", "b", "xen").is_hypervisor(&types));
        assert!(!Node::new("c", "c", "vm").is_hypervisor(&types));
    }

    #[test]
    fn record_keeps_tag_kinds() {
        let mut node = Node::new("vm-1", "web", "vm");
        node.tags.insert("ssd", TagValue::Present);
        node.tags.insert("rack", TagValue::Valued("r4".into()));
        node.unique_keys.insert("ip-10.0.0.5".into());
        node.parent_id = Some("hv-1".into());

        let record = node.to_record();
        assert_eq!(record.tags, ["rack=r4", "ssd"]);
        assert_eq!(record.parent.as_deref(), Some("hv-1"));

        let back = Node::from_record(record).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn record_with_bad_tag_token_rejected() {
        let record = NodeRecord {
            node_id: "x".into(),
            name: "x".into(),
            node_type: "vm".into(),
            tags: vec!["=oops".into()],
            ..Default::default()
        };
        assert!(matches!(
            Node::from_record(record),
            Err(NodeError::MalformedToken { .. })
        ));
    }

    #[test]
    fn stored_tag_value_keeps_whitespace() {
        let mut node = Node::new("vm-1", "web", "vm");
        node.tags
            .insert("note", TagValue::Valued("two words".into()));

        let back = Node::from_record(node.to_record()).unwrap();
        assert_eq!(
            back.tags.get("note"),
            Some(&TagValue::Valued("two words".into()))
        );
        assert!(back.tags.get("words").is_none());
    }
}
