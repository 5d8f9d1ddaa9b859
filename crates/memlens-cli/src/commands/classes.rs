//! Type table listing.

use anyhow::{Result, bail};
use owo_colors::OwoColorize;

use super::Context;

pub fn run(context: &Context, prefix: Option<&str>) -> Result<()> {
    let types = context.inspector.types();
    let Some(snapshot) = types.snapshot() else {
        bail!(
            "type table not found (module {})",
            types.config().module
        );
    };

    let handle = snapshot.handle();
    println!(
        "Type table at {:#x} ({} classes, {} slots read)",
        handle.table_base,
        snapshot.len(),
        snapshot.slots_read()
    );

    let entries = match prefix {
        Some(prefix) => snapshot.find_by_prefix(prefix),
        None => snapshot.classes().iter().collect(),
    };

    for entry in &entries {
        println!(
            "{:>6}  {}  {}",
            entry.index,
            format!("{:#014x}", entry.address).dimmed(),
            entry.full_name().bold()
        );
    }

    if prefix.is_some() {
        println!("{} matching", entries.len());
    }
    Ok(())
}
