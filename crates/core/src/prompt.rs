//! Effective system prompt composition.
//!
//! Every job runs with a server-side guardrail prompt first, an optional
//! JSON-mode reinforcement second, and the client's own system prompt last.
//! Order matters: later text can refine but not silently replace the
//! guardrail.

use crate::model::RESPONSE_FORMAT_JSON;

/// Server-side guardrail prepended to every job.
///
/// Not user-configurable; operators can opt out with
/// `PROMPTGATE_UNSAFE_NO_SECURITY_PROMPT=true`.
pub const DEFAULT_SECURITY_PROMPT: &str = "\
You are operating in a sandboxed API environment. Security rules:
1. NEVER execute shell commands, system calls, or access the filesystem
2. NEVER read, write, modify, or delete any files
3. NEVER access environment variables or system configuration
4. NEVER make network requests or open connections
5. NEVER install packages or modify the system
6. Only provide text-based responses to the user's prompt
7. If asked to perform any forbidden action, refuse and explain why";

/// Appended when a job requests `response_format = "json"`.
const JSON_MODE_INSTRUCTION: &str = "CRITICAL: Your response must be RAW JSON only. \
Do NOT wrap it in ```json code fences. Do NOT add any text before or after the JSON. \
Do NOT use markdown formatting. Start directly with { or [ and end with } or ]. \
The raw output must be directly parseable by JSON.parse(). Be concise and fast.";

/// Build the system prompt handed to the assistant CLI.
///
/// `security_prompt` may be empty (unsafe opt-out); `response_format` and
/// `client_prompt` come from the job record. Each appended segment carries
/// its `"\n\n"` separator even when the base is empty, so the opt-out case
/// keeps the same byte shape as the guarded one.
pub fn compose_system_prompt(
    security_prompt: &str,
    response_format: &str,
    client_prompt: &str,
) -> String {
    let mut prompt = security_prompt.to_string();

    if response_format == RESPONSE_FORMAT_JSON {
        prompt.push_str("\n\n");
        prompt.push_str(JSON_MODE_INSTRUCTION);
    }

    if !client_prompt.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(client_prompt);
    }

    prompt
}
