use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn nodectl() -> assert_cmd::Command {
    cargo_bin_cmd!("nodectl").into()
}

/// A scratch directory with its own config and registry.
struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    /// Placement hooks that always succeed, so `define`/`undefine` work.
    fn new() -> Self {
        Self::with_config("[hooks.vm]\ndefine = \"true\"\nundefine = \"true\"\n")
    }

    fn with_config(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry.json");
        let mut f = std::fs::File::create(dir.path().join("config.toml")).unwrap();
        write!(
            f,
            r#"registry = "{}"
identity = "tester"
{extra}"#,
            registry.display()
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = nodectl();
        cmd.env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.path("config.toml"));
        cmd
    }

    fn run(&self, args: &[&str]) {
        self.cmd().args(args).assert().success();
    }

    /// hv1 hosting vm1, plus an unassigned vm2.
    fn seeded() -> Self {
        let ws = Self::new();
        ws.run(&["new", "hv-001", "--name", "hv1", "--type", "hv"]);
        ws.run(&["new", "vm-001", "--name", "vm1"]);
        ws.run(&["new", "vm-002", "--name", "vm2"]);
        ws.run(&["define", "vm1", "--parent", "hv1"]);
        ws
    }
}

#[test]
fn help_works() {
    nodectl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hypervisors"));
}

#[test]
fn missing_config_shows_error() {
    nodectl()
        .args(["--config", "/nonexistent/nodectl.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn invalid_config_is_rejected() {
    let ws = Workspace::with_config("[hooks.vm]\nreboot = \"true\"\n");
    ws.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown capability 'reboot'"));
}

#[test]
fn empty_registry_lists_nothing() {
    Workspace::new()
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout("no nodes\n");
}

#[test]
fn list_is_sorted_by_name() {
    let ws = Workspace::new();
    ws.run(&["new", "1", "--name", "b"]);
    ws.run(&["new", "2", "--name", "A"]);
    ws.run(&["new", "3", "--name", "c"]);

    let out = ws.cmd().arg("list").assert().success().get_output().stdout.clone();
    let names: Vec<String> = String::from_utf8(out)
        .unwrap()
        .lines()
        .skip(1)
        .map(|l| l.split_whitespace().next().unwrap().to_string())
        .collect();
    assert_eq!(names, ["A", "b", "c"]);
}

#[test]
fn unknown_node_reports_command_and_name() {
    Workspace::new()
        .cmd()
        .args(["info", "ghost"])
        .assert()
        .code(1)
        .stderr("info: node not found (ghost)\n");
}

#[test]
fn tree_shows_hierarchy() {
    let ws = Workspace::seeded();
    ws.cmd()
        .arg("tree")
        .assert()
        .success()
        .stdout("hv1 (hv, unassigned)\n  vm1 (vm, stopped)\n[unassigned]\nvm2 (vm, unassigned)\n");
}

#[test]
fn tree_json_lists_depths() {
    let ws = Workspace::seeded();
    ws.cmd()
        .args(["tree", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vm1").and(predicate::str::contains("orphan")));
}

#[test]
fn set_tags_delete_and_add() {
    let ws = Workspace::seeded();
    ws.run(&["set", "vm2", "--tags", "a"]);
    ws.run(&["set", "vm2", "--tags", "a=", "b=2"]);
    ws.cmd()
        .args(["info", "vm2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tags:      b=\"2\"\n"));
}

#[test]
fn list_filters_by_tag() {
    let ws = Workspace::seeded();
    ws.run(&["set", "vm1", "--tags", "rack=r4"]);
    ws.run(&["set", "vm2", "--tags", "rack=r5"]);
    ws.cmd()
        .args(["list", "--tag", "rack=r4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vm1").and(predicate::str::contains("vm2").not()));
}

#[test]
fn list_json_output() {
    let ws = Workspace::seeded();
    ws.cmd()
        .args(["list", "--type", "vm", "-o", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::starts_with("[")
                .and(predicate::str::contains("vm-001"))
                .and(predicate::str::contains("vm-002")),
        );
}

#[test]
fn malformed_token_fails_before_registry_access() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["list", "--tag", "=x"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("list: malformed token '=x'"));
    assert!(!ws.path("registry.lock").exists());
    assert!(!ws.path("registry.json").exists());
}

#[test]
fn busy_lock_with_no_wait() {
    let ws = Workspace::seeded();
    std::fs::write(
        ws.path("registry.lock"),
        format!("someone {}\n", std::process::id()),
    )
    .unwrap();
    ws.cmd()
        .args(["--no-wait", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("registry is locked by someone"));
    // Someone else's lock is left alone.
    assert!(ws.path("registry.lock").exists());
}

#[test]
fn second_invocation_waits_for_the_first() {
    let ws = Workspace::with_config("[hooks.vm]\nstart = \"sleep 2\"\n");
    ws.run(&["new", "vm-001", "--name", "vm1"]);

    let mut first = std::process::Command::new(env!("CARGO_BIN_EXE_nodectl"))
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(ws.path("config.toml"))
        .args(["start", "vm1"])
        .stdout(std::process::Stdio::null())
        .spawn()
        .unwrap();

    // Wait for the holder line, not just the file.
    let lock = ws.path("registry.lock");
    let deadline = Instant::now() + Duration::from_secs(10);
    while std::fs::read_to_string(&lock).map_or(true, |c| c.is_empty()) {
        assert!(Instant::now() < deadline, "first invocation never took the lock");
        std::thread::sleep(Duration::from_millis(20));
    }

    ws.cmd()
        .args(["--no-wait", "info", "vm1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("registry is locked by tester"));

    // Blocks until the hook finishes, then sees its state change.
    ws.cmd()
        .args(["--lock-timeout", "10", "info", "vm1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("running"));

    assert!(first.wait().unwrap().success());
    assert!(!lock.exists());
}

#[test]
fn lock_released_after_command() {
    let ws = Workspace::seeded();
    ws.cmd().args(["info", "nope"]).assert().code(1);
    assert!(!ws.path("registry.lock").exists());
}

#[test]
fn define_without_parent_picks_hypervisor() {
    let ws = Workspace::seeded();
    ws.run(&["new", "hv-002", "--name", "hv2", "--type", "hv"]);
    ws.cmd()
        .args(["define", "vm2"])
        .assert()
        .success()
        .stdout("defined vm2 (stopped)\n");
    ws.cmd()
        .args(["info", "vm2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("parent:    hv2"));
}

#[test]
fn undefine_unassigned_node_fails() {
    let ws = Workspace::seeded();
    ws.cmd()
        .args(["undefine", "vm2"])
        .assert()
        .code(1)
        .stderr("undefine: no parent (vm2)\n");
}

#[test]
fn start_without_hook_is_unsupported() {
    let ws = Workspace::seeded();
    ws.cmd()
        .args(["start", "vm1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not supported").and(predicate::str::contains("(vm1)")));
}

#[test]
fn hooks_receive_node_environment() {
    let ws = Workspace::with_config("");
    let out = ws.path("hook.out");
    let config = format!(
        "registry = \"{}\"\n[hooks.vm]\nstart = \"echo $NODECTL_ACTION $NODECTL_NAME $NODECTL_NODE_ID > {}\"\n",
        ws.path("registry.json").display(),
        out.display()
    );
    std::fs::write(ws.path("config.toml"), config).unwrap();

    ws.run(&["new", "vm-001", "--name", "vm1"]);
    ws.cmd()
        .args(["start", "vm1"])
        .assert()
        .success()
        .stdout("started vm1 (running)\n");
    assert_eq!(std::fs::read_to_string(out).unwrap(), "start vm1 vm-001\n");
}

#[test]
fn failing_hook_reports_stderr() {
    let ws = Workspace::with_config("[hooks.vm]\nstop = \"echo boom >&2; exit 3\"\n");
    ws.run(&["new", "vm-001", "--name", "vm1"]);
    ws.cmd()
        .args(["stop", "vm1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("boom").and(predicate::str::starts_with("stop: ")));
}

#[test]
fn duplicate_unique_key_is_provisioning_error() {
    let ws = Workspace::new();
    ws.run(&["new", "vm-001", "--key", "ip-10.0.0.5"]);
    ws.cmd()
        .args(["new", "vm-002", "--key", "ip-10.0.0.5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ip-10.0.0.5"));
}

#[test]
fn rename_and_delete() {
    let ws = Workspace::seeded();
    ws.run(&["rename", "vm2", "db"]);
    ws.cmd()
        .args(["delete", "db"])
        .assert()
        .success()
        .stdout("deleted db\n");
    ws.cmd()
        .args(["delete", "vm1"])
        .assert()
        .code(1)
        .stderr("delete: node still has a parent (vm1)\n");
}

#[test]
fn mutations_are_audited() {
    let ws = Workspace::seeded();
    let audit = std::fs::read_to_string(ws.path("audit.log")).unwrap();
    assert!(audit.contains("command finished"));
    assert!(audit.contains("# define by tester (pid "));
    assert_eq!(audit.lines().filter(|l| l.starts_with("# ")).count(), 4);

    // Read-only commands leave the audit log alone.
    ws.run(&["list"]);
    assert_eq!(std::fs::read_to_string(ws.path("audit.log")).unwrap(), audit);
}

#[test]
fn poll_without_hooks_reports_nothing() {
    Workspace::seeded()
        .cmd()
        .arg("poll")
        .assert()
        .success()
        .stdout("no hypervisors to poll\n");
}
