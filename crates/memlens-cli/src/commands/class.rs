//! Single class lookup.

use anyhow::{Result, bail};
use owo_colors::OwoColorize;

use super::Context;

pub fn run(context: &Context, name: &str) -> Result<()> {
    let types = context.inspector.types();
    let Some(class) = types.find_by_name(name) else {
        bail!("class {} not found", name);
    };

    println!("{} {}", name.bold(), format!("{:#x}", class).green());
    match types.static_field_base(class) {
        Some(fields) => println!("  static fields: {:#x}", fields),
        None => println!("  static fields: {}", "none".yellow()),
    }
    Ok(())
}
