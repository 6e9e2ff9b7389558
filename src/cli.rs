use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nodectl", about = "Manage a cluster of hypervisors and the nodes they host")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Registry file (overrides config)
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain, global = true)]
    pub output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Fail immediately if another invocation holds the registry lock
    #[arg(long, global = true)]
    pub no_wait: bool,

    /// Seconds to wait for the registry lock (overrides config)
    #[arg(long, value_name = "SECONDS", global = true)]
    pub lock_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List nodes, optionally filtered
    List {
        /// Only nodes whose name starts with this
        prefix: Option<String>,

        #[arg(long)]
        tenant: Option<String>,

        /// Tag query: `key` or `key=value`, all must match
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        #[arg(long = "type", value_name = "TYPE")]
        node_type: Option<String>,

        #[arg(long)]
        unique_key: Option<String>,

        #[arg(long)]
        state: Option<String>,

        /// Only nodes assigned to this hypervisor
        #[arg(long)]
        parent: Option<String>,
    },

    /// Show hypervisors and their nodes as a tree
    Tree,

    /// Show everything known about one node
    Info { name: String },

    /// Start a node
    Start { name: String },

    /// Force-stop a node
    Stop { name: String },

    /// Gracefully shut a node down
    Shutdown { name: String },

    /// Place a node on a hypervisor
    Define {
        name: String,

        /// Hypervisor to place on (least loaded when omitted)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Remove a node from its hypervisor
    Undefine { name: String },

    /// Run the provision hook and mark the node provisioned
    Provision { name: String },

    /// Run the deprovision hook and clear the provisioned mark
    Deprovision { name: String },

    /// Create a node
    New {
        /// Node id
        id: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        tenant: Option<String>,

        #[arg(long = "type", value_name = "TYPE", default_value = "vm")]
        node_type: String,

        /// Tags: `key` or `key=value`
        #[arg(long, num_args = 1..)]
        tags: Vec<String>,

        /// Unique key; may be repeated
        #[arg(long = "key", value_name = "KEY")]
        keys: Vec<String>,

        /// Definition pairs `key=value`
        definition: Vec<String>,
    },

    /// Change fields on a node
    Set {
        name: String,

        /// New name
        #[arg(long = "name", value_name = "NEW_NAME")]
        new_name: Option<String>,

        /// Tenant; empty string clears it
        #[arg(long)]
        tenant: Option<String>,

        /// Tag changes: `key`, `key=value`, or `key=` to delete
        #[arg(long, num_args = 1..)]
        tags: Vec<String>,

        #[arg(long)]
        state: Option<String>,
    },

    /// Delete a node
    Delete { name: String },

    /// Rename a node
    Rename { old: String, new: String },

    /// Poll every hypervisor
    Poll,
}

impl Command {
    /// Name used as the prefix of error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Command::List { .. } => "list",
            Command::Tree => "tree",
            Command::Info { .. } => "info",
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::Shutdown { .. } => "shutdown",
            Command::Define { .. } => "define",
            Command::Undefine { .. } => "undefine",
            Command::Provision { .. } => "provision",
            Command::Deprovision { .. } => "deprovision",
            Command::New { .. } => "new",
            Command::Set { .. } => "set",
            Command::Delete { .. } => "delete",
            Command::Rename { .. } => "rename",
            Command::Poll => "poll",
        }
    }

    /// Whether the command writes to the registry.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Command::List { .. } | Command::Tree | Command::Info { .. }
        )
    }
}
