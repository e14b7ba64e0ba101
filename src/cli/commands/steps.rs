//! Step listing command.

use console::style;

use crate::converters::CONVERTER_STEPS;
use crate::importer::{self, IMPORTER_STEPS};

/// Print the registered converter and importer steps.
pub async fn cmd_steps() -> anyhow::Result<()> {
    println!("{}", style("Converter steps").bold());
    for name in CONVERTER_STEPS {
        println!("  {}", name);
    }

    println!("\n{}", style("Importer steps").bold());
    for name in IMPORTER_STEPS {
        let descriptor = importer::create_step(name)?.descriptor();
        if descriptor.depends_on.is_empty() {
            println!("  {} → {}", name, descriptor.table);
        } else {
            println!(
                "  {} → {} {}",
                name,
                descriptor.table,
                style(format!("(after {})", descriptor.depends_on.join(", "))).dim()
            );
        }
    }
    Ok(())
}
