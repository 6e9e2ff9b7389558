use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nodectl::cli::{Cli, OutputFormat};
use nodectl::cluster::Cluster;
use nodectl::commands::Op;
use nodectl::config::Config;
use nodectl::error::NodeError;
use nodectl::lock::{self, SessionLock, WaitPolicy};
use nodectl::logging::{AuditLog, AuditSwitch};
use nodectl::paths;
use nodectl::provisioner::RegistryProvisioner;
use nodectl::registry::FileRegistry;

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let terminal_filter = if cli.verbose {
        EnvFilter::new("nodectl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodectl=warn"))
    };
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // Audit layer: drops events until a mutating command opens the log
    let (audit_log, audit_switch) = AuditLog::new();
    let audit_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(audit_log)
        .with_filter(EnvFilter::new("nodectl=info"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(audit_layer)
        .init();

    // Setup failures (bad config, bad hooks) render as miette reports
    let config = nodectl::config::load_config(cli.config.as_deref())?;
    let registry_path = cli
        .registry
        .clone()
        .unwrap_or_else(|| config.registry_path());
    let policy = if cli.no_wait {
        WaitPolicy::NoWait
    } else if let Some(secs) = cli.lock_timeout {
        WaitPolicy::Bounded(Duration::from_secs(secs))
    } else {
        config.wait_policy()
    };

    let name = cli.command.name();
    let mutating = cli.command.is_mutating();
    let format = cli.output;
    let identity = lock::operator_identity(config.identity.as_deref());

    let result = Op::from_command(cli.command).and_then(|op| {
        if mutating {
            open_audit(&audit_switch, &registry_path, &identity, name);
        }
        run(op, &config, &registry_path, policy, format, name, &identity)
    });

    match result {
        Ok(out) => {
            print!("{out}");
            Ok(())
        }
        Err(e) => {
            tracing::debug!(command = name, error = ?e, "command failed");
            eprintln!("{}", e.report(name));
            std::process::exit(1);
        }
    }
}

/// Take the session lock, open the registry and run one command. The lock
/// is released when this returns, before `main` prints or exits.
fn run(
    op: Op,
    config: &Config,
    registry_path: &Path,
    policy: WaitPolicy,
    format: OutputFormat,
    command: &str,
    identity: &str,
) -> Result<String, NodeError> {
    let _lock = SessionLock::acquire(&paths::lock_path(registry_path), identity, policy)?;

    let registry = FileRegistry::open(registry_path)?;
    let mut cluster = Cluster::new(
        Box::new(registry),
        Box::new(config.hook_driver()?),
        Box::new(RegistryProvisioner),
        config.hypervisor_types(),
    );

    tracing::debug!(command, identity, ?op, "running command");
    let out = op.run(&mut cluster, format);
    match &out {
        Ok(_) => tracing::info!(command, identity, "command finished"),
        Err(e) => tracing::info!(command, identity, error = %e, "command failed"),
    }
    out
}

fn open_audit(switch: &AuditSwitch, registry_path: &Path, identity: &str, command: &str) {
    let path = paths::audit_log_path(registry_path);
    if let Err(e) = switch.open(&path, identity, command) {
        tracing::warn!(path = %path.display(), error = %e, "audit log unavailable");
    }
}
