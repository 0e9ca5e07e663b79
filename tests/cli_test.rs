use std::process::Command;

fn hala(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_hala"))
        .args(args)
        .output()
        .expect("Failed to run hala binary")
}

#[test]
fn test_help_lists_subcommands() {
    let output = hala(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["serve", "migrate", "sync", "journey", "providers"] {
        assert!(stdout.contains(cmd), "missing subcommand {} in:\n{}", cmd, stdout);
    }
}

#[test]
fn test_sync_help_lists_modes() {
    let output = hala(&["sync", "--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for action in ["full", "incremental", "watch", "stats", "ref", "template"] {
        assert!(stdout.contains(action), "missing sync action {}", action);
    }
}

#[test]
fn test_version() {
    let output = hala(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_subcommand_fails() {
    let output = hala(&["teleport"]);
    assert!(!output.status.success());
}
