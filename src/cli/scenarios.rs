// src/cli/scenarios.rs - Scenario listing and pointer reset

use crate::remote::ScenarioFilter;
use crate::session::resolver::ScenarioResolver;
use crate::session::store::SessionStore;
use crate::util::truncate_str;

const DESCRIPTION_WIDTH: usize = 72;

/// Print scenarios matching `filter`.
pub async fn run_scenarios(resolver: &ScenarioResolver, filter: &ScenarioFilter) -> anyhow::Result<()> {
    let scenarios = resolver.list(filter).await?;
    if scenarios.is_empty() {
        println!("No scenarios found.");
        return Ok(());
    }

    for s in &scenarios {
        let featured = if s.is_featured { " *" } else { "" };
        println!(
            "{:<24} {:<13} {:<16} {}{}",
            s.id,
            s.difficulty.as_str(),
            s.category,
            s.title,
            featured
        );
        if !s.description.is_empty() {
            let desc = truncate_str(&s.description, DESCRIPTION_WIDTH);
            let ellipsis = if desc.len() < s.description.len() { "..." } else { "" };
            println!("{:<24} {desc}{ellipsis}", "");
        }
    }
    println!("\n{} scenario(s). Start one with `simcoach play <id>`.", scenarios.len());
    Ok(())
}

/// Clear one scenario's pointer, or all of them.
pub fn run_reset(store: &SessionStore, scenario: Option<&str>, yes: bool) -> anyhow::Result<()> {
    match scenario {
        Some(id) => {
            if store.clear(id)? {
                eprintln!("Cleared saved session for '{id}'.");
            } else {
                eprintln!("No saved session for '{id}'.");
            }
        }
        None => {
            let entries = store.entries();
            if entries.is_empty() {
                eprintln!("No saved sessions.");
                return Ok(());
            }
            for (scenario_id, pointer) in &entries {
                eprintln!(
                    "  {scenario_id} -> session {} (saved {})",
                    pointer.session_id,
                    pointer.saved_at.format("%Y-%m-%d %H:%M")
                );
            }
            let confirmed = yes
                || inquire::Confirm::new(&format!("Forget {} saved session(s)?", entries.len()))
                    .with_default(false)
                    .prompt()
                    .unwrap_or(false);
            if confirmed {
                let dropped = store.clear_all()?;
                eprintln!("Cleared {dropped} saved session(s).");
            }
        }
    }
    Ok(())
}
