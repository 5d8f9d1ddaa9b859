//! Object list search.

use anyhow::{Result, bail};
use owo_colors::OwoColorize;

use super::Context;

pub fn run(context: &Context, name: &str, max_depth: Option<usize>) -> Result<()> {
    let objects = context.inspector.objects();
    let max_depth = max_depth.unwrap_or(objects.config().max_depth);

    let Some(list) = objects.locate_list() else {
        bail!("object list not found (module {})", objects.config().module);
    };
    println!("Object list head {:#x}, tail {:#x}", list.head, list.tail);

    let Some(object) = objects.find_object_by_name(name, max_depth, None) else {
        bail!("no object named {} within {} nodes", name, max_depth);
    };
    println!("{} {}", name.bold(), format!("{:#x}", object).green());

    let types = context.inspector.types();
    let components = objects.component_classes(object);
    if components.is_empty() {
        println!("  {}", "no components".yellow());
    }
    for class in components {
        let class_name = types
            .class_name(class)
            .unwrap_or_else(|| "?".to_string());
        println!("  {}  {}", format!("{:#x}", class).dimmed(), class_name);
    }
    Ok(())
}
