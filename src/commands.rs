//! Bridge from parsed arguments to [`Cluster`] calls.
//!
//! [`Op::from_command`] parses every user token up front so malformed input
//! fails before the session lock is taken or the registry is read.

use std::collections::{BTreeSet, HashMap};

use crate::cli::{Command, OutputFormat};
use crate::cluster::{Cluster, SetRequest};
use crate::driver::Capability;
use crate::error::NodeError;
use crate::node::{Node, Tags};
use crate::provisioner::NodeRequest;
use crate::registry::NodeFilter;
use crate::render;
use crate::tags::{self, TagDelta, TagQuery};

/// A fully parsed command, ready to run.
#[derive(Debug)]
pub enum Op {
    List(NodeFilter),
    Tree,
    Info(String),
    Power(String, Capability),
    Define { name: String, parent: Option<String> },
    Undefine(String),
    Provision(String),
    Deprovision(String),
    New(NodeRequest),
    Set(String, SetRequest),
    Delete(String),
    Rename { old: String, new: String },
    Poll,
}

fn tokens(values: &[String]) -> impl Iterator<Item = &str> {
    values.iter().map(String::as_str)
}

impl Op {
    pub fn from_command(command: Command) -> Result<Self, NodeError> {
        Ok(match command {
            Command::List {
                prefix,
                tenant,
                tags,
                node_type,
                unique_key,
                state,
                parent,
            } => Op::List(NodeFilter {
                name_prefix: prefix,
                tenant,
                tags: TagQuery::parse(tokens(&tags))?,
                node_type,
                unique_key,
                state,
                parent,
            }),
            Command::Tree => Op::Tree,
            Command::Info { name } => Op::Info(name),
            Command::Start { name } => Op::Power(name, Capability::Start),
            Command::Stop { name } => Op::Power(name, Capability::Stop),
            Command::Shutdown { name } => Op::Power(name, Capability::Shutdown),
            Command::Define { name, parent } => Op::Define { name, parent },
            Command::Undefine { name } => Op::Undefine(name),
            Command::Provision { name } => Op::Provision(name),
            Command::Deprovision { name } => Op::Deprovision(name),
            Command::New {
                id,
                name,
                tenant,
                node_type,
                tags,
                keys,
                definition,
            } => Op::New(NodeRequest {
                node_id: id,
                name,
                node_type,
                tenant,
                tags: Tags::from_tokens(tokens(&tags))?,
                unique_keys: keys.into_iter().collect::<BTreeSet<_>>(),
                definition: tags::parse_pairs(definition.iter().map(String::as_str))?,
            }),
            Command::Set {
                name,
                new_name,
                tenant,
                tags,
                state,
            } => Op::Set(
                name,
                SetRequest {
                    name: new_name,
                    tenant,
                    tags: TagDelta::parse(tokens(&tags))?,
                    state,
                },
            ),
            Command::Delete { name } => Op::Delete(name),
            Command::Rename { old, new } => Op::Rename { old, new },
            Command::Poll => Op::Poll,
        })
    }

    /// Run against `cluster` and return what should be printed.
    pub fn run(self, cluster: &mut Cluster, format: OutputFormat) -> Result<String, NodeError> {
        let json = format == OutputFormat::Json;
        let changed = |verb: &str, node: Node| -> Result<String, NodeError> {
            if json {
                render::node_json(&node)
            } else {
                Ok(render::changed_plain(verb, &node))
            }
        };

        match self {
            Op::List(filter) => {
                let nodes = cluster.list(&filter)?;
                if json {
                    return render::list_json(&nodes);
                }
                let names: HashMap<String, String> = cluster
                    .registry()
                    .snapshot()?
                    .into_iter()
                    .map(|n| (n.id().to_string(), n.name))
                    .collect();
                Ok(render::list_plain(&nodes, &names))
            }
            Op::Tree => {
                let lines = cluster.tree()?;
                if json {
                    render::tree_json(&lines)
                } else {
                    Ok(render::tree_plain(&lines))
                }
            }
            Op::Info(name) => {
                let info = cluster.info(&name)?;
                if json {
                    render::info_json(&info)
                } else {
                    Ok(render::info_plain(&info))
                }
            }
            Op::Power(name, action) => {
                let verb = match action {
                    Capability::Start => "started",
                    Capability::Shutdown => "shut down",
                    _ => "stopped",
                };
                changed(verb, cluster.power(&name, action)?)
            }
            Op::Define { name, parent } => {
                changed("defined", cluster.define(&name, parent.as_deref())?)
            }
            Op::Undefine(name) => changed("undefined", cluster.undefine(&name)?),
            Op::Provision(name) => changed("provisioned", cluster.provision(&name)?),
            Op::Deprovision(name) => changed("deprovisioned", cluster.deprovision(&name)?),
            Op::New(request) => changed("created", cluster.create(request)?),
            Op::Set(name, request) => changed("updated", cluster.set(&name, request)?),
            Op::Delete(name) => {
                cluster.delete(&name)?;
                if json {
                    render::deleted_json(&name)
                } else {
                    Ok(render::deleted_plain(&name))
                }
            }
            Op::Rename { old, new } => changed("renamed", cluster.rename(&old, &new)?),
            Op::Poll => {
                let report = cluster.poll()?;
                if json {
                    render::poll_json(&report)
                } else {
                    Ok(render::poll_plain(&report))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;
    use crate::driver::HookDriver;
    use crate::provisioner::RegistryProvisioner;
    use crate::registry::{MemoryRegistry, Registry};

    fn op(args: &[&str]) -> Result<Op, NodeError> {
        let cli = Cli::parse_from(std::iter::once("nodectl").chain(args.iter().copied()));
        Op::from_command(cli.command)
    }

    fn cluster() -> Cluster {
        let mut reg = MemoryRegistry::new();
        reg.add_node(Node::new("hv-001", "hv1", "hv")).unwrap();
        reg.add_node(Node::new("vm-001", "vm1", "vm")).unwrap();
        reg.add_node(Node::new("vm-002", "vm2", "vm")).unwrap();
        reg.set_parent("vm-001", Some("hv-001")).unwrap();
        Cluster::new(
            Box::new(reg),
            Box::new(HookDriver::default()),
            Box::new(RegistryProvisioner),
            vec!["hv".into()],
        )
    }

    fn run(cluster: &mut Cluster, args: &[&str]) -> Result<String, NodeError> {
        op(args)?.run(cluster, OutputFormat::Plain)
    }

    #[test]
    fn malformed_tokens_fail_during_parsing() {
        assert!(matches!(
            op(&["list", "--tag", "=x"]),
            Err(NodeError::MalformedToken { .. })
        ));
        assert!(matches!(
            op(&["set", "vm1", "--tags", "=x"]),
            Err(NodeError::MalformedToken { .. })
        ));
        assert!(matches!(
            op(&["new", "vm-9", "memory"]),
            Err(NodeError::MalformedToken { .. })
        ));
    }

    #[test]
    fn quoted_and_separate_tags_agree() {
        let Op::Set(_, a) = op(&["set", "vm1", "--tags", "a= b=2"]).unwrap() else {
            panic!("expected set");
        };
        let Op::Set(_, b) = op(&["set", "vm1", "--tags", "a=", "b=2"]).unwrap() else {
            panic!("expected set");
        };
        assert_eq!(a.tags, b.tags);
    }

    #[test]
    fn set_then_list_by_tag() {
        console::set_colors_enabled(false);
        let mut c = cluster();
        run(&mut c, &["set", "vm2", "--tags", "rack=r4", "ssd"]).unwrap();
        let out = run(&mut c, &["list", "--tag", "rack=r4"]).unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.lines().nth(1).unwrap().starts_with("vm2"));
    }

    #[test]
    fn list_resolves_parent_names() {
        console::set_colors_enabled(false);
        let mut c = cluster();
        let out = run(&mut c, &["list", "--parent", "hv1"]).unwrap();
        let row = out.lines().nth(1).unwrap();
        assert!(row.starts_with("vm1"));
        assert!(row.contains("hv1"));
    }

    #[test]
    fn start_without_hook_is_unsupported() {
        let mut c = cluster();
        let err = run(&mut c, &["start", "vm1"]).unwrap_err();
        assert_eq!(
            err.report("start"),
            "start: start is not supported by this node's driver (vm1)"
        );
    }

    #[test]
    fn new_rename_delete_cycle() {
        console::set_colors_enabled(false);
        let mut c = cluster();
        let out = run(&mut c, &["new", "vm-009", "--name", "cache", "memory=4G"]).unwrap();
        assert_eq!(out, "created cache (unassigned)\n");
        assert_eq!(
            c.registry().get_by_name("cache").unwrap().definition["memory"],
            "4G"
        );
        run(&mut c, &["rename", "cache", "redis"]).unwrap();
        assert_eq!(run(&mut c, &["delete", "redis"]).unwrap(), "deleted redis\n");
        assert!(c.registry().get_by_id("vm-009").is_err());
    }

    #[test]
    fn json_output_for_mutations() {
        let mut c = cluster();
        let out = op(&["set", "vm2", "--state", "broken"])
            .unwrap()
            .run(&mut c, OutputFormat::Json)
            .unwrap();
        assert!(out.contains("broken"));
        assert!(out.starts_with('{'));
    }
}
