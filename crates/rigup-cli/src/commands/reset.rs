use super::{json_pretty, EXIT_SUCCESS};
use rigup_state::{Layout, RunLock, StateStore};
use std::path::Path;

pub fn run(state_dir: &Path, json: bool) -> Result<u8, String> {
    let layout = Layout::new(state_dir);
    layout.initialize().map_err(|e| format!("state error: {e}"))?;
    let _lock = RunLock::acquire(&layout.lock_file()).map_err(|e| format!("state lock: {e}"))?;

    for pipeline in ["provision", "teardown"] {
        StateStore::new(&layout, pipeline)
            .reset()
            .map_err(|e| format!("state error: {e}"))?;
    }

    if json {
        println!(
            "{}",
            json_pretty(&serde_json::json!({"reset": ["provision", "teardown"]}))?
        );
    } else {
        println!("reset: cleared all checkpoints; the next run re-executes every step");
    }
    Ok(EXIT_SUCCESS)
}
