//! Tool-prompt synthesis for models without native function-calling.
//!
//! When a request declares tools and the conversation has no system message,
//! the orchestrator asks this collaborator for instruction text describing
//! the available tools. Depending on the model family the text either
//! becomes a new system message or replaces the final user turn.

use serde_json::Value;

use crate::protocol::FunctionTool;

pub trait ToolPromptSynthesizer: Send + Sync {
    /// Returns the synthesized prompt and whether it replaces the final user
    /// turn (true) or is inserted as a leading system message (false).
    fn synthesize(
        &self,
        model_name: &str,
        tools: &[FunctionTool],
        final_user_content: &str,
        tool_choice: Option<&Value>,
        parallel_tool_calls: bool,
    ) -> (String, bool);
}

/// Families whose chat template has no system role; tool instructions go
/// into the user turn instead.
const USER_TURN_FAMILIES: &[&str] = &["gemma"];

pub struct DefaultToolPrompt;

impl ToolPromptSynthesizer for DefaultToolPrompt {
    fn synthesize(
        &self,
        model_name: &str,
        tools: &[FunctionTool],
        final_user_content: &str,
        tool_choice: Option<&Value>,
        parallel_tool_calls: bool,
    ) -> (String, bool) {
        let catalog = tools
            .iter()
            .map(|tool| {
                serde_json::to_string(&tool.function).unwrap_or_else(|_| "{}".to_string())
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = String::from("You have access to the following functions:\n\n");
        prompt.push_str(&catalog);
        prompt.push_str(
            "\n\nTo call a function, respond with the marker `functools` followed \
             immediately by a JSON array of {\"name\": ..., \"arguments\": {...}} objects.",
        );
        if parallel_tool_calls {
            prompt.push_str(" You may include several calls in one array.");
        } else {
            prompt.push_str(" Include exactly one call in the array.");
        }
        if let Some(choice) = forced_function_name(tool_choice) {
            prompt.push_str(&format!(" You must call the function \"{}\".", choice));
        }

        let lower = model_name.to_lowercase();
        let replaces_user_turn = USER_TURN_FAMILIES.iter().any(|f| lower.contains(f));
        if replaces_user_turn {
            (format!("{}\n\n{}", prompt, final_user_content), true)
        } else {
            (prompt, false)
        }
    }
}

fn forced_function_name(tool_choice: Option<&Value>) -> Option<&str> {
    tool_choice?
        .get("function")
        .and_then(|f| f.get("name"))
        .and_then(Value::as_str)
}
