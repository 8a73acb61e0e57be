//! Prompt rendering for action synthesis.
//!
//! The action prompt states the full capability contract, the locator
//! conventions and the output constraints, then embeds one instruction block.
//! A retry prompt is the action prompt followed by the failed action and a
//! diagnostic suffix.

use minijinja::{Environment, context};

use crate::core::types::Instruction;
use crate::io::surface::{LocatorStrategy, NearDirection, ScrollDirection};

const ACTION_TEMPLATE: &str = include_str!("prompts/action.md");
const RETRY_TEMPLATE: &str = include_str!("prompts/retry.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("action", ACTION_TEMPLATE)
            .expect("action template should be valid");
        env.add_template("retry", RETRY_TEMPLATE)
            .expect("retry template should be valid");
        Self { env }
    }

    /// Render the first-attempt prompt for an instruction block.
    pub fn render_action(&self, instruction: &Instruction) -> Result<String, minijinja::Error> {
        let template = self.env.get_template("action")?;
        template.render(context! {
            instruction => instruction.as_str().trim(),
            strategies => quoted_list(LocatorStrategy::ALL.iter().map(|s| s.as_str())),
            nearest_directions => quoted_list(NearDirection::ALL.iter().map(|d| d.as_str())),
            scroll_directions => quoted_list(ScrollDirection::ALL.iter().map(|d| d.as_str())),
        })
    }

    /// Render the prompt asking for a replacement after `previous_action` failed.
    pub fn render_retry(
        &self,
        instruction: &Instruction,
        previous_action: &str,
        diagnostic: &str,
    ) -> Result<String, minijinja::Error> {
        let base = self.render_action(instruction)?;
        let suffix = self.env.get_template("retry")?.render(context! {
            previous_action => previous_action.trim(),
            diagnostic => diagnostic.trim(),
        })?;
        Ok(format!("{base}\n{suffix}"))
    }
}

fn quoted_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .map(|item| format!("\"{item}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_prompt_embeds_instruction_and_contract() {
        let engine = PromptEngine::new();
        let prompt = engine
            .render_action(&Instruction::new("Go to <b>example.com</b>\n"))
            .expect("render");
        assert!(prompt.contains("INSTRUCTIONS:\nGo to <b>example.com</b>\n\nOUTPUT: ```"));
        assert!(prompt.contains("`find_element_by_description(text)`"));
        assert!(prompt.contains("\"xpath\""));
        assert!(prompt.ends_with("OUTPUT: ```"));
    }

    #[test]
    fn retry_prompt_extends_action_prompt() {
        let engine = PromptEngine::new();
        let instruction = Instruction::new("Click login");
        let base = engine.render_action(&instruction).expect("render");
        let retry = engine
            .render_retry(&instruction, "click(login)", "Failed on line 1: click(login)")
            .expect("render");
        assert!(retry.starts_with(&base));
        assert!(retry.contains("click(login)\n\nThe action above failed. See diagnostic: Failed on line 1"));
        assert!(retry.ends_with("Only write the action.\n\nOUTPUT: ```"));
    }

    #[test]
    fn different_diagnostics_render_different_prompts() {
        let engine = PromptEngine::new();
        let instruction = Instruction::new("Click login");
        let a = engine.render_retry(&instruction, "click(x)", "a").expect("render");
        let b = engine.render_retry(&instruction, "click(x)", "b").expect("render");
        assert_ne!(a, b);
    }
}
