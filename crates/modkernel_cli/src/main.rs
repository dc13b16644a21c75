//! `modkernel` command-line entry point.
//!
//! # Responsibility
//! - Expose identifier checks, the demo lifecycle and journal replay.
//! - Keep stdout machine-readable: one JSON document or JSON line per result.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use modkernel_core::db::open_db;
use modkernel_core::identity::{
    ensure_valid_keycode, ensure_valid_sub_keycode, Address, Keycode, Selector, SubKeycode,
};
use modkernel_core::journal::{EventJournal, RegistryView, SqliteEventJournal};
use modkernel_core::{core_version, default_log_level, init_logging};
use serde::Serialize;
use std::path::{Path, PathBuf};

mod demo;

/// Inspect identifiers and kernel event journals.
#[derive(Parser)]
#[command(name = "modkernel", version, about)]
struct Cli {
    /// trace|debug|info|warn|error; defaults by build mode.
    #[arg(long, global = true, env = "MODKERNEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Absolute directory for rotated log files. Logging stays off without it.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the core crate version.
    Version,
    /// Derive the selector of a function signature such as `addAsset(address)`.
    Selector { signature: String },
    /// Validate a module keycode.
    CheckKeycode { keycode: String },
    /// Validate a submodule keycode against its parent keycode.
    CheckSubkeycode {
        sub_keycode: String,
        #[arg(long)]
        parent: String,
    },
    /// Run the install/activate/upgrade/migrate demo and print its events.
    Demo {
        /// Journal database to persist the events into.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Rebuild a kernel's registry view from a journal database.
    Replay {
        #[arg(long)]
        db: PathBuf,
        /// Kernel address (`0x` + 40 hex digits).
        #[arg(long)]
        kernel: String,
    },
}

#[derive(Serialize)]
struct SelectorReport<'a> {
    signature: &'a str,
    selector: Selector,
}

#[derive(Serialize)]
struct IdentifierReport<'a> {
    kind: &'static str,
    value: &'a str,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)
            .with_context(|| format!("failed to initialize logging in {}", log_dir.display()))?;
    }

    match cli.command {
        Command::Version => {
            println!("modkernel_core version={}", core_version());
            Ok(())
        }
        Command::Selector { signature } => handle_selector(&signature),
        Command::CheckKeycode { keycode } => handle_check_keycode(&keycode),
        Command::CheckSubkeycode {
            sub_keycode,
            parent,
        } => handle_check_subkeycode(&sub_keycode, &parent),
        Command::Demo { db } => handle_demo(db.as_deref()),
        Command::Replay { db, kernel } => handle_replay(&db, &kernel),
    }
}

fn handle_selector(signature: &str) -> anyhow::Result<()> {
    let selector = Selector::parse_signature(signature)?;
    print_json(&SelectorReport {
        signature: signature.trim(),
        selector,
    })
}

fn handle_check_keycode(text: &str) -> anyhow::Result<()> {
    let outcome = text
        .parse::<Keycode>()
        .and_then(ensure_valid_keycode);
    report_identifier("keycode", text, outcome.err().map(|err| err.to_string()))
}

fn handle_check_subkeycode(text: &str, parent: &str) -> anyhow::Result<()> {
    let parent = parent
        .parse::<Keycode>()
        .with_context(|| format!("invalid parent keycode `{parent}`"))?;
    let outcome = text
        .parse::<SubKeycode>()
        .and_then(|sub| ensure_valid_sub_keycode(sub, parent));
    report_identifier("subkeycode", text, outcome.err().map(|err| err.to_string()))
}

fn report_identifier(kind: &'static str, value: &str, error: Option<String>) -> anyhow::Result<()> {
    let valid = error.is_none();
    print_json(&IdentifierReport {
        kind,
        value,
        valid,
        error,
    })?;
    if !valid {
        bail!("{kind} `{value}` is invalid");
    }
    Ok(())
}

fn handle_demo(db: Option<&Path>) -> anyhow::Result<()> {
    let outcome = demo::run()?;
    for record in outcome.events() {
        println!("{}", serde_json::to_string(&record)?);
    }

    if let Some(path) = db {
        let conn = open_db(path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        let journal = SqliteEventJournal::new(&conn);
        let mut persisted = 0;
        for kernel in [&outcome.kernel, &outcome.successor] {
            persisted += journal
                .sync_from(kernel)
                .with_context(|| format!("failed to persist events of {}", kernel.address()))?;
        }
        info!(
            "event=demo_persist module=cli status=ok db={} persisted={}",
            path.display(),
            persisted
        );
        eprintln!(
            "persisted {persisted} events; replay with --kernel {} or --kernel {}",
            outcome.kernel.address(),
            outcome.successor.address()
        );
    }
    Ok(())
}

fn handle_replay(db: &Path, kernel: &str) -> anyhow::Result<()> {
    let kernel: Address = kernel
        .parse()
        .with_context(|| format!("invalid kernel address `{kernel}`"))?;
    let conn = open_db(db).with_context(|| format!("failed to open journal {}", db.display()))?;
    let records = SqliteEventJournal::new(&conn).load(kernel)?;
    if records.is_empty() {
        bail!("journal {} has no events for kernel {kernel}", db.display());
    }
    let view = RegistryView::replay(kernel, &records)?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
