//! Prompt assembly for the ReAct loop.

/// System instructions for the planning model.
pub const SYSTEM_PROMPT: &str = "\
You are a browser-automation agent. You are given a goal and drive a real \
web page toward it, one action at a time.

Rules:
- Observe before you act: capture a snapshot and address elements by their \
[ref] from the latest snapshot only.
- Emit at most one tool call per turn as a JSON object with a \"type\" field.
- When the goal is complete, reply with the final answer as plain text and \
no tool call.
- Failed actions come back as observations; adjust your plan instead of \
repeating the same call.
- Never invent refs, URLs, or data you have not observed.";

/// Assemble the full prompt for the next model call: system instructions,
/// memory enrichment, the goal, and the working-memory context.
pub fn build_prompt(system: &str, enriched: &str, goal: &str, context: &str) -> String {
    let mut prompt = String::with_capacity(
        system.len() + enriched.len() + goal.len() + context.len() + 128,
    );
    prompt.push_str(system);
    prompt.push_str("\n\n");
    if !enriched.trim().is_empty() {
        prompt.push_str("Relevant memory:\n");
        prompt.push_str(enriched.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Goal: ");
    prompt.push_str(goal);
    prompt.push('\n');
    if !context.trim().is_empty() {
        prompt.push_str("\nProgress so far:\n");
        prompt.push_str(context.trim_end());
        prompt.push('\n');
    }
    prompt.push_str("\nNext action or final answer:");
    prompt
}
