//! Human-readable and JSON rendering of command results.
//!
//! Everything here returns a `String`; `main` decides where it goes.
//! Colour comes from `console`, which turns itself off when stdout is not a
//! terminal.

use std::collections::HashMap;

use console::style;
use facet::Facet;

use crate::cluster::{NodeInfo, PollReport, TreeLine};
use crate::error::NodeError;
use crate::hierarchy::Placement;
use crate::node::{Node, NodeRecord};
use crate::tags::format_tags;

const NONE: &str = "-";

#[derive(Facet)]
struct InfoJson {
    node: NodeRecord,
    parent: Option<String>,
    children: Vec<String>,
}

#[derive(Facet)]
struct TreeRow {
    depth: u32,
    placement: String,
    node_id: String,
    name: String,
    node_type: String,
    state: String,
}

#[derive(Facet)]
struct DeletedJson {
    deleted: String,
}

#[derive(Facet)]
struct PollJson {
    polled: Vec<String>,
    failed: Vec<PollFailure>,
}

#[derive(Facet)]
struct PollFailure {
    name: String,
    error: String,
}

fn to_json<T: Facet<'static>>(value: &T) -> Result<String, NodeError> {
    facet_json::to_string(value).map_err(|e| NodeError::Validation {
        message: format!("JSON serialization: {e:?}"),
    })
}

// ── list ─────────────────────────────────────────────────

/// Aligned columns. `names` maps node ids to names for the parent column.
pub fn list_plain(nodes: &[Node], names: &HashMap<String, String>) -> String {
    if nodes.is_empty() {
        return "no nodes\n".to_string();
    }

    let header = ["NAME", "TYPE", "STATE", "TENANT", "PARENT", "TAGS"];
    let rows: Vec<[String; 6]> = nodes
        .iter()
        .map(|n| {
            let parent = n
                .parent_id
                .as_ref()
                .map(|id| names.get(id).cloned().unwrap_or_else(|| id.clone()))
                .unwrap_or_else(|| NONE.to_string());
            [
                n.name.clone(),
                n.node_type.clone(),
                n.state.clone(),
                n.tenant.clone().unwrap_or_else(|| NONE.to_string()),
                parent,
                format_tags(&n.tags),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(console::measure_text_width(cell));
        }
    }

    let mut out = String::new();
    let head: Vec<String> = header
        .iter()
        .zip(widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect();
    out.push_str(&style(head.join("  ").trim_end()).bold().to_string());
    out.push('\n');
    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(i, (cell, w))| {
                let padded = format!("{cell:<w$}");
                if i == 2 {
                    state_style(&row[2], &padded)
                } else {
                    padded
                }
            })
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }
    out
}

pub fn list_json(nodes: &[Node]) -> Result<String, NodeError> {
    let records: Vec<NodeRecord> = nodes.iter().map(Node::to_record).collect();
    to_json(&records)
}

fn state_style(state: &str, text: &str) -> String {
    match state {
        "running" => style(text).green().to_string(),
        "stopped" => style(text).yellow().to_string(),
        _ => text.to_string(),
    }
}

// ── info ─────────────────────────────────────────────────

pub fn info_plain(info: &NodeInfo) -> String {
    let node = &info.node;
    let mut out = String::new();
    out.push_str(&format!("{}\n", style(&node.name).bold()));
    let field = |out: &mut String, label: &str, value: &str| {
        out.push_str(&format!("  {:<10} {value}\n", format!("{label}:")));
    };
    field(&mut out, "id", node.id());
    field(&mut out, "type", &node.node_type);
    field(&mut out, "state", &state_style(&node.state, &node.state));
    field(&mut out, "tenant", node.tenant.as_deref().unwrap_or(NONE));
    field(&mut out, "parent", info.parent.as_deref().unwrap_or(NONE));
    if !info.children.is_empty() {
        field(&mut out, "children", &info.children.join(", "));
    }
    if !node.tags.is_empty() {
        field(&mut out, "tags", &format_tags(&node.tags));
    }
    if !node.unique_keys.is_empty() {
        let keys: Vec<&str> = node.unique_keys.iter().map(String::as_str).collect();
        field(&mut out, "keys", &keys.join(", "));
    }
    for (title, map) in [("definition", &node.definition), ("metadata", &node.metadata)] {
        if map.is_empty() {
            continue;
        }
        out.push_str(&format!("  {title}:\n"));
        for (k, v) in map {
            out.push_str(&format!("    {k} = {v}\n"));
        }
    }
    out
}

pub fn info_json(info: &NodeInfo) -> Result<String, NodeError> {
    to_json(&InfoJson {
        node: info.node.to_record(),
        parent: info.parent.clone(),
        children: info.children.clone(),
    })
}

// ── tree ─────────────────────────────────────────────────

pub fn tree_plain(lines: &[TreeLine]) -> String {
    let mut out = String::new();
    let mut section = Placement::Root;
    for line in lines {
        if line.depth == 0 && line.placement != section {
            section = line.placement;
            let title = match section {
                Placement::Root => "hypervisors",
                Placement::Orphan => "unassigned",
                Placement::Dangling => "missing parent",
            };
            out.push_str(&format!("{}\n", style(format!("[{title}]")).dim()));
        }
        let indent = "  ".repeat(line.depth);
        let name = if line.depth == 0 {
            style(&line.node.name).bold().to_string()
        } else {
            line.node.name.clone()
        };
        out.push_str(&format!(
            "{indent}{name} ({}, {})\n",
            line.node.node_type,
            state_style(&line.node.state, &line.node.state)
        ));
    }
    out
}

pub fn tree_json(lines: &[TreeLine]) -> Result<String, NodeError> {
    let rows: Vec<TreeRow> = lines
        .iter()
        .map(|l| TreeRow {
            depth: l.depth as u32,
            placement: l.placement.as_str().to_string(),
            node_id: l.node.id().to_string(),
            name: l.node.name.clone(),
            node_type: l.node.node_type.clone(),
            state: l.node.state.clone(),
        })
        .collect();
    to_json(&rows)
}

// ── mutations & poll ─────────────────────────────────────

/// One line confirming a write, e.g. `started vm1 (running)`.
pub fn changed_plain(verb: &str, node: &Node) -> String {
    format!("{verb} {} ({})\n", style(&node.name).bold(), node.state)
}

pub fn node_json(node: &Node) -> Result<String, NodeError> {
    to_json(&node.to_record())
}

pub fn deleted_plain(name: &str) -> String {
    format!("deleted {}\n", style(name).bold())
}

pub fn deleted_json(name: &str) -> Result<String, NodeError> {
    to_json(&DeletedJson {
        deleted: name.to_string(),
    })
}

pub fn poll_plain(report: &PollReport) -> String {
    let mut out = String::new();
    for name in &report.polled {
        out.push_str(&format!("{} {name}\n", style("ok").green()));
    }
    for (name, error) in &report.failed {
        out.push_str(&format!("{} {name}: {error}\n", style("failed").red()));
    }
    if out.is_empty() {
        out.push_str("no hypervisors to poll\n");
    }
    out
}

pub fn poll_json(report: &PollReport) -> Result<String, NodeError> {
    to_json(&PollJson {
        polled: report.polled.clone(),
        failed: report
            .failed
            .iter()
            .map(|(name, error)| PollFailure {
                name: name.clone(),
                error: error.clone(),
            })
            .collect(),
    })
}
