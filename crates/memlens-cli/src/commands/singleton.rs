//! Singleton resolution.

use anyhow::{Result, bail};
use memlens_core::{CancelSignal, ResolvedSingleton};
use owo_colors::OwoColorize;
use tracing::info;

use super::Context;

pub fn run(context: &Context, name: &str, wait: bool, json: bool) -> Result<()> {
    let singletons = context.inspector.singletons();
    if singletons.spec(name).is_none() {
        let known: Vec<&str> = singletons.names().collect();
        bail!(
            "singleton {} is not configured (known: {})",
            name,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        );
    }

    let resolved = if wait {
        let cancel = CancelSignal::new();
        let cancel_ctrlc = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, stopping...");
            cancel_ctrlc.trigger();
        })?;
        let strategy = context.config.retry.strategy();
        singletons.wait_for(name, &strategy, &cancel)?
    } else {
        match singletons.resolve(name) {
            Some(resolved) => resolved,
            None => bail!("singleton {} not resolved", name),
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        print_resolved(name, &resolved);
    }
    Ok(())
}

fn print_resolved(name: &str, resolved: &ResolvedSingleton) {
    println!(
        "{} {} (via {})",
        name.bold(),
        format!("{:#x}", resolved.address).green(),
        resolved.path
    );
    if let Some(class) = resolved.class_address {
        println!("  class: {:#x}", class);
    }
}
