//! # VMware VM inventory (`vmware-vm-inventory`)
//!
//! Dynamic inventory script for Ansible. Reads a plugin file, queries
//! vCenter/ESXi for virtual machines, and prints the inventory JSON on
//! stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! vmware-vm-inventory -i ./prod.vmware.yml --list
//! vmware-vm-inventory -i ./prod.vmware.yml --host web1_4206d1f2-...
//! vmware-vm-inventory -i ./prod.vmware.yml --verify
//! ```
//!
//! | Flag | Description |
//! |------|-------------|
//! | `--list` | Print every group and `_meta.hostvars` |
//! | `--host <name>` | Print one host's variables (`{}` when unknown) |
//! | `--verify` | Only check that the plugin file is recognised and valid |
//! | `-i, --inventory` | Plugin file (default `./vmware.yml`) |
//! | `--refresh-cache` | Ignore cached results; still update the cache |
//! | `--pretty` | Indent the JSON output |
//! | `-v` | More logging (`-v` info, `-vv` debug) |

use anyhow::Result;
use clap::{ArgAction, ArgGroup, Parser};
use serde_json::Value;
use std::path::PathBuf;

use vmware_vm_inventory::{config, logging, run};

/// VMware vCenter/ESXi virtual machines as an Ansible dynamic inventory.
#[derive(Parser)]
#[command(
    name = "vmware-vm-inventory",
    version,
    about = "VMware vCenter/ESXi virtual machines as an Ansible dynamic inventory",
    group(ArgGroup::new("mode").required(true).args(["list", "host", "verify"]))
)]
struct Cli {
    /// Print the full inventory.
    #[arg(long)]
    list: bool,

    /// Print the variables of one host.
    #[arg(long, value_name = "HOSTNAME")]
    host: Option<String>,

    /// Check the plugin file without contacting vCenter.
    #[arg(long)]
    verify: bool,

    /// Path to the plugin file (YAML).
    ///
    /// The file name must end with `vmware.yml`, `vmware.yaml`,
    /// `vmware_vm_inventory.yml` or `vmware_vm_inventory.yaml`.
    #[arg(short = 'i', long = "inventory", default_value = "./vmware.yml")]
    inventory: PathBuf,

    /// Skip reading the cache. A fresh result is still written to it.
    #[arg(long)]
    refresh_cache: bool,

    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,

    /// Increase log verbosity (repeatable). `RUST_LOG` overrides this.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn print_json(value: &Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.inventory)?;

    if cli.verify {
        println!("{} is a valid VMware VM inventory source", cli.inventory.display());
        return Ok(());
    }

    let inventory = run::run(&cfg, &cli.inventory, cli.refresh_cache)?;

    let output = match &cli.host {
        Some(host) => Value::Object(inventory.host_vars(host)),
        None => inventory.to_json(),
    };
    print_json(&output, cli.pretty)
}
