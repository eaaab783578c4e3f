use super::{colorize_step_status, json_pretty, EXIT_SUCCESS};
use crate::config::{Config, PipelineSection};
use rigup_state::{Layout, StateStore};
use std::path::Path;

pub fn run(config: &Config, state_dir: &Path, json: bool) -> Result<u8, String> {
    let layout = Layout::new(state_dir);

    let pipelines = [
        ("provision", &config.provision),
        ("teardown", &config.teardown),
    ];

    let mut payload = Vec::new();
    for (name, section) in pipelines {
        payload.push(pipeline_status(&layout, name, section)?);
    }

    if json {
        println!("{}", json_pretty(&serde_json::json!({ "pipelines": payload }))?);
    } else {
        for entry in &payload {
            print_pipeline(entry);
        }
    }
    Ok(EXIT_SUCCESS)
}

fn pipeline_status(
    layout: &Layout,
    name: &str,
    section: &PipelineSection,
) -> Result<serde_json::Value, String> {
    let store = StateStore::new(layout, name);
    let state = store.load().map_err(|e| format!("state error: {e}"))?;

    let steps: Vec<serde_json::Value> = section
        .steps
        .iter()
        .map(|spec| {
            let completed_at = state
                .completed()
                .get(&spec.key)
                .map(|r| r.timestamp.clone());
            serde_json::json!({
                "key": spec.key,
                "label": spec.label,
                "done": completed_at.is_some(),
                "completed_at": completed_at,
            })
        })
        .collect();

    // Checkpoints with no matching manifest step, e.g. after steps were
    // renamed or removed from the manifest.
    let known: Vec<&str> = section.steps.iter().map(|s| s.key.as_str()).collect();
    let orphaned: Vec<&String> = state
        .completed()
        .keys()
        .filter(|k| !known.contains(&k.as_str()))
        .collect();

    Ok(serde_json::json!({
        "pipeline": name,
        "steps": steps,
        "orphaned_checkpoints": orphaned,
        "last_failure": state.last_failure(),
    }))
}

fn print_pipeline(entry: &serde_json::Value) {
    let name = entry["pipeline"].as_str().unwrap_or("?");
    let steps = entry["steps"].as_array().cloned().unwrap_or_default();
    if steps.is_empty() {
        return;
    }

    println!("{name}:");
    for step in &steps {
        let status = if step["done"].as_bool() == Some(true) {
            "done"
        } else {
            "pending"
        };
        print!(
            "  {:<10} {}",
            colorize_step_status(status),
            step["label"].as_str().unwrap_or("?")
        );
        if let Some(ts) = step["completed_at"].as_str() {
            print!("  ({ts})");
        }
        println!();
    }
    if let Some(failure) = entry["last_failure"].as_str() {
        println!("  last failure: {failure}");
    }
    if let Some(orphans) = entry["orphaned_checkpoints"].as_array() {
        if !orphans.is_empty() {
            println!("  {} checkpoint(s) no longer in the manifest", orphans.len());
        }
    }
}
