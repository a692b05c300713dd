use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const ENV_FALLBACKS: [&str; 7] = [
    "VMWARE_HOST",
    "VMWARE_SERVER",
    "VMWARE_USER",
    "VMWARE_USERNAME",
    "VMWARE_PASSWORD",
    "VMWARE_PORT",
    "VMWARE_VALIDATE_CERTS",
];

fn inventory_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vmware-vm-inventory");
    path
}

fn write_plugin(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn run_inventory(plugin: Option<&Path>, args: &[&str]) -> (String, String, bool) {
    let binary = inventory_binary();
    let mut cmd = Command::new(&binary);
    for var in ENV_FALLBACKS {
        cmd.env_remove(var);
    }
    cmd.env_remove("RUST_LOG");
    if let Some(plugin) = plugin {
        cmd.arg("-i").arg(plugin);
    }
    let output = cmd
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_help_lists_modes() {
    let (stdout, _, success) = run_inventory(None, &["--help"]);
    assert!(success);
    assert!(stdout.contains("--list"));
    assert!(stdout.contains("--host"));
    assert!(stdout.contains("--refresh-cache"));
}

#[test]
fn test_mode_is_required() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(&tmp, "lab.vmware.yml", "plugin: vmware_vm_inventory\n");
    let (_, stderr, success) = run_inventory(Some(&plugin), &[]);
    assert!(!success);
    assert!(stderr.contains("required"), "stderr: {}", stderr);
}

#[test]
fn test_list_and_host_conflict() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(&tmp, "lab.vmware.yml", "plugin: vmware_vm_inventory\n");
    let (_, _, success) = run_inventory(Some(&plugin), &["--list", "--host", "web1_u1"]);
    assert!(!success);
}

#[test]
fn test_verify_accepts_plugin_file() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(
        &tmp,
        "lab.vmware_vm_inventory.yaml",
        "plugin: community.vmware.vmware_vm_inventory\nhostname: vc.lab\n",
    );
    let (stdout, stderr, success) = run_inventory(Some(&plugin), &["--verify"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("is a valid VMware VM inventory source"));
}

#[test]
fn test_verify_rejects_other_file_names() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(&tmp, "hosts.yml", "plugin: vmware_vm_inventory\n");
    let (_, stderr, success) = run_inventory(Some(&plugin), &["--verify"]);
    assert!(!success);
    assert!(stderr.contains("not a VMware VM inventory source"), "stderr: {}", stderr);
}

#[test]
fn test_verify_rejects_unknown_plugin() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(&tmp, "lab.vmware.yml", "plugin: aws_ec2\n");
    let (_, stderr, success) = run_inventory(Some(&plugin), &["--verify"]);
    assert!(!success);
    assert!(stderr.contains("Unknown plugin"), "stderr: {}", stderr);
}

#[test]
fn test_list_without_credentials_fails_before_network() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(
        &tmp,
        "lab.vmware.yml",
        "plugin: vmware_vm_inventory\nhostname: vc.lab\n",
    );
    let (stdout, stderr, success) = run_inventory(Some(&plugin), &["--list"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(
        stderr.contains("missing one of the following: hostname, username, password"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_list_unreachable_server() {
    let tmp = TempDir::new().unwrap();
    let plugin = write_plugin(
        &tmp,
        "lab.vmware.yml",
        "plugin: vmware_vm_inventory\nhostname: 127.0.0.1\nport: 1\nusername: admin\npassword: secret\nvalidate_certs: false\n",
    );
    let (stdout, stderr, success) = run_inventory(Some(&plugin), &["--list"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("unable to connect"), "stderr: {}", stderr);
    assert!(stderr.contains("127.0.0.1:1"), "stderr: {}", stderr);
    // Disabling certificate validation is always announced.
    assert!(stderr.contains("TLS certificate validation is disabled"), "stderr: {}", stderr);
}
