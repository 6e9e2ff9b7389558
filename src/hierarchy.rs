//! Interpret a flat node snapshot as a forest.
//!
//! Parentless hypervisors are roots, other parentless nodes are orphans,
//! and nodes whose parent is missing from the snapshot are dangling. Every
//! group is rendered depth-first with its subtree, so on an acyclic graph
//! each node is visited exactly once.

use std::collections::{HashMap, HashSet};

use crate::error::NodeError;
use crate::node::Node;

/// How a top-level entry got into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Root,
    Orphan,
    Dangling,
}

impl Placement {
    pub fn as_str(self) -> &'static str {
        match self {
            Placement::Root => "root",
            Placement::Orphan => "orphan",
            Placement::Dangling => "dangling",
        }
    }
}

/// One line of a depth-first walk.
#[derive(Debug, Clone, Copy)]
pub struct TreeEntry<'a> {
    pub depth: usize,
    /// Placement of the top-level node this entry hangs under.
    pub placement: Placement,
    pub node: &'a Node,
}

#[derive(Debug)]
pub struct Forest<'a> {
    pub roots: Vec<&'a Node>,
    pub orphans: Vec<&'a Node>,
    pub dangling: Vec<&'a Node>,
    children: HashMap<&'a str, Vec<&'a Node>>,
}

impl<'a> Forest<'a> {
    pub fn build(nodes: &'a [Node], hypervisor_types: &[String]) -> Result<Self, NodeError> {
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id(), n)).collect();
        check_acyclic(nodes, &by_id)?;

        let mut roots = Vec::new();
        let mut orphans = Vec::new();
        let mut dangling = Vec::new();
        let mut children: HashMap<&str, Vec<&Node>> = HashMap::new();

        for node in nodes {
            match node.parent_id.as_deref() {
                None if node.is_hypervisor(hypervisor_types) => roots.push(node),
                None => orphans.push(node),
                Some(parent) if by_id.contains_key(parent) => {
                    children.entry(parent).or_default().push(node);
                }
                Some(parent) => {
                    tracing::warn!(node = %node.name, parent, "parent not in registry");
                    dangling.push(node);
                }
            }
        }

        roots.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        Ok(Self {
            roots,
            orphans,
            dangling,
            children,
        })
    }

    /// Direct children of `node_id` in the order they were encountered.
    pub fn children(&self, node_id: &str) -> &[&'a Node] {
        self.children.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Depth-first walk: roots, then orphans, then dangling nodes.
    pub fn walk(&self) -> Result<Vec<TreeEntry<'a>>, NodeError> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let groups = [
            (Placement::Root, &self.roots),
            (Placement::Orphan, &self.orphans),
            (Placement::Dangling, &self.dangling),
        ];
        for (placement, group) in groups {
            for node in group {
                self.visit(*node, 0, placement, &mut visited, &mut out)?;
            }
        }
        Ok(out)
    }

    fn visit(
        &self,
        node: &'a Node,
        depth: usize,
        placement: Placement,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<TreeEntry<'a>>,
    ) -> Result<(), NodeError> {
        if !visited.insert(node.id()) {
            return Err(NodeError::CyclicHierarchy {
                name: node.name.clone(),
            });
        }
        out.push(TreeEntry {
            depth,
            placement,
            node,
        });
        for child in self.children(node.id()) {
            self.visit(*child, depth + 1, placement, visited, out)?;
        }
        Ok(())
    }
}

/// Walk every parent chain; a revisit means the chain loops.
fn check_acyclic(nodes: &[Node], by_id: &HashMap<&str, &Node>) -> Result<(), NodeError> {
    let mut known_good: HashSet<&str> = HashSet::new();
    for node in nodes {
        let mut chain = HashSet::new();
        let mut current = Some(node);
        while let Some(n) = current {
            if known_good.contains(n.id()) {
                break;
            }
            if !chain.insert(n.id()) {
                return Err(NodeError::CyclicHierarchy {
                    name: n.name.clone(),
                });
            }
            current = n.parent_id.as_deref().and_then(|p| by_id.get(p).copied());
        }
        known_good.extend(chain);
    }
    Ok(())
}
