use crate::action::Action;
use crate::EngineError;
use rigup_state::validate_step_key;

/// One named step of a pipeline.
///
/// Ordering is significant and total: pipelines are a fixed sequence, not
/// a DAG. The key is the stable checkpoint identity; the label is what the
/// operator sees.
pub struct Step {
    pub key: String,
    pub label: String,
    pub action: Box<dyn Action>,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Step {
    pub fn new(
        key: impl Into<String>,
        label: impl Into<String>,
        action: Box<dyn Action>,
    ) -> Result<Self, EngineError> {
        let key = key.into();
        validate_step_key(&key).map_err(|e| EngineError::InvalidStep(e.to_string()))?;
        Ok(Self {
            key,
            label: label.into(),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutput, CommandAction};

    #[test]
    fn step_new_validates_key() {
        let action: Box<dyn Action> = Box::new(CommandAction::new("true"));
        assert!(Step::new("Bad Key", "label", action).is_err());
    }

    #[test]
    fn step_carries_action() {
        let step = Step::new(
            "say-hello",
            "Say hello",
            Box::new(CommandAction::shell("echo hi")),
        )
        .unwrap();
        let out: ActionOutput = step.action.run().unwrap();
        assert!(out.success);
    }
}
