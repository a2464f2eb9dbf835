//! Diagnosis request composition.
//!
//! Turns a command outcome plus a context snapshot into the bounded,
//! ordered prompt sent to the provider. Rendering is deterministic so prompt
//! quality can be tested without any backend.

use crate::capture::CommandOutcome;
use crate::config::Config;
use crate::providers::ChatMessage;
use crate::snapshot::ContextSnapshot;

/// System prompt shared by all backends.
pub const SYSTEM_PROMPT: &str = r#"You are a terminal companion that diagnoses failed shell commands.
Given a failed command, its exit status, its error output, and facts about
the environment it ran in, respond with:

1. CAUSE: what went wrong and why, grounded in the error output and environment
2. FIX: one or two concrete commands or changes that resolve it
3. NEXT: what the operator will likely want to do afterwards, given their recent commands

Be concise and practical. Prefer the most likely cause over an exhaustive list.
Never suggest destructive commands without a warning."#;

/// An immutable diagnosis request, passed by value to the gateway.
#[derive(Debug, Clone)]
pub struct DiagnosisRequest {
    pub command: String,
    pub exit_status: i32,
    pub error_text: String,
    pub snapshot: ContextSnapshot,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Byte budget for each rendered snapshot field
    pub field_budget: usize,
}

impl DiagnosisRequest {
    /// Build a request, applying the configured truncation budgets.
    /// The tail of the error text is kept — root causes surface there.
    pub fn new(outcome: &CommandOutcome, snapshot: ContextSnapshot, config: &Config) -> Self {
        Self {
            command: outcome.command.clone(),
            exit_status: outcome.exit_status,
            error_text: truncate_tail(&outcome.error_text, config.limits.max_error_bytes),
            snapshot,
            model: config.provider.model.clone(),
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            field_budget: config.limits.max_field_bytes,
        }
    }

    /// Free-form request for the `ask` path: no failed command, just a
    /// question asked against the current environment.
    pub fn question(question: &str, snapshot: ContextSnapshot, config: &Config) -> Self {
        Self {
            command: String::new(),
            exit_status: 0,
            error_text: question.to_string(),
            snapshot,
            model: config.provider.model.clone(),
            max_tokens: config.provider.max_tokens,
            temperature: config.provider.temperature,
            field_budget: config.limits.max_field_bytes,
        }
    }

    pub fn is_question(&self) -> bool {
        self.command.is_empty()
    }

    /// Render the user message with stable section order:
    /// environment, command, exit status, error output.
    pub fn user_message(&self) -> String {
        let mut sections = Vec::new();

        if !self.snapshot.is_empty() {
            sections.push(format!("Environment:\n{}", self.snapshot.render(self.field_budget)));
        }

        if self.is_question() {
            sections.push(format!("Question: {}", self.error_text));
            return sections.join("\n\n");
        }

        sections.push(format!("Command: {}", self.command));
        sections.push(format!(
            "Exit status: {} ({})",
            self.exit_status,
            interpret_exit_status(self.exit_status)
        ));
        if self.error_text.trim().is_empty() {
            sections.push("Error output: (none captured)".to_string());
        } else {
            sections.push(format!("Error output:\n{}", self.error_text));
        }

        sections.join("\n\n")
    }

    /// The ordered, role-tagged message list for chat-style backends.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: if self.is_question() {
                    QUESTION_SYSTEM_PROMPT.to_string()
                } else {
                    SYSTEM_PROMPT.to_string()
                },
            },
            ChatMessage {
                role: "user".to_string(),
                content: self.user_message(),
            },
        ]
    }
}

/// System prompt for the `ask` path.
pub const QUESTION_SYSTEM_PROMPT: &str = r#"You are a terminal companion. Answer the operator's question with
practical shell commands and short explanations, taking the described
environment and recent commands into account. Be concise."#;

/// Keep the last `max_bytes` of `text`, cutting on a character boundary and
/// preferring to start at a line boundary when one is near.
pub fn truncate_tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    // Drop the likely-partial first line when more lines follow
    let tail = match tail.split_once('\n') {
        Some((_, rest)) if !rest.trim().is_empty() => rest,
        _ => tail,
    };
    format!("[… earlier output truncated]\n{tail}")
}

/// Interpret common exit statuses
pub fn interpret_exit_status(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "general error",
        2 => "misuse of shell command",
        126 => "permission problem or command not executable",
        127 => "command not found",
        128 => "invalid exit argument",
        130 => "terminated by Ctrl+C (SIGINT)",
        137 => "killed (SIGKILL)",
        139 => "segmentation fault (SIGSEGV)",
        143 => "terminated (SIGTERM)",
        255 => "exit status out of range",
        _ if code > 128 && code < 256 => "terminated by signal",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureStrategy;
    use std::time::SystemTime;

    fn outcome(command: &str, exit_status: i32, error_text: &str) -> CommandOutcome {
        CommandOutcome {
            command: command.to_string(),
            exit_status,
            error_text: error_text.to_string(),
            strategy: CaptureStrategy::SessionStderr,
            timestamp: SystemTime::now(),
        }
    }

    #[test]
    fn test_truncate_tail_keeps_short_text() {
        assert_eq!(truncate_tail("short error", 4096), "short error");
    }

    #[test]
    fn test_truncate_tail_keeps_the_tail() {
        let head = "early noise line\n".repeat(300);
        let text = format!("{head}error: the actual root cause");
        let truncated = truncate_tail(&text, 40);

        assert!(truncated.contains("the actual root cause"));
        assert!(truncated.starts_with("[… earlier output truncated]"));
        assert!(!truncated.contains("early noise line"));
    }

    #[test]
    fn test_truncate_tail_char_boundary_safe() {
        let text = "ü".repeat(100);
        let truncated = truncate_tail(&text, 33);
        assert!(truncated.contains('ü'));
    }

    #[test]
    fn test_user_message_section_order() {
        let snapshot = ContextSnapshot {
            working_dir: Some("/srv/app".to_string()),
            ..Default::default()
        };
        let config = Config::default();
        let request = DiagnosisRequest::new(
            &outcome("ls /nonexistent", 2, "ls: cannot access '/nonexistent'"),
            snapshot,
            &config,
        );

        let message = request.user_message();
        let env_pos = message.find("Environment:").unwrap();
        let cmd_pos = message.find("Command: ls /nonexistent").unwrap();
        let exit_pos = message.find("Exit status: 2").unwrap();
        let err_pos = message.find("Error output:").unwrap();
        assert!(env_pos < cmd_pos && cmd_pos < exit_pos && exit_pos < err_pos);
        assert!(message.contains("misuse of shell command"));
    }

    #[test]
    fn test_user_message_without_snapshot_fields() {
        let config = Config::default();
        let request =
            DiagnosisRequest::new(&outcome("make", 2, "fatal"), ContextSnapshot::default(), &config);

        let message = request.user_message();
        assert!(!message.contains("Environment:"));
        assert!(message.starts_with("Command: make"));
    }

    #[test]
    fn test_user_message_notes_missing_error_output() {
        let config = Config::default();
        let request =
            DiagnosisRequest::new(&outcome("true", 1, "  "), ContextSnapshot::default(), &config);
        assert!(request.user_message().contains("(none captured)"));
    }

    #[test]
    fn test_messages_roles_ordered() {
        let config = Config::default();
        let request = DiagnosisRequest::new(
            &outcome("cargo build", 101, "error[E0382]"),
            ContextSnapshot::default(),
            &config,
        );

        let messages = request.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("CAUSE"));
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("error[E0382]"));
    }

    #[test]
    fn test_question_request() {
        let config = Config::default();
        let request = DiagnosisRequest::question(
            "how do I see memory usage?",
            ContextSnapshot::default(),
            &config,
        );

        assert!(request.is_question());
        let messages = request.messages();
        assert!(messages[1].content.contains("Question: how do I see memory usage?"));
        assert!(!messages[0].content.contains("CAUSE"));
    }

    #[test]
    fn test_request_applies_error_budget() {
        let mut config = Config::default();
        config.limits.max_error_bytes = 64;
        let long_error = "x".repeat(1000);
        let request = DiagnosisRequest::new(
            &outcome("build", 1, &long_error),
            ContextSnapshot::default(),
            &config,
        );
        assert!(request.error_text.len() < 200);
    }

    #[test]
    fn test_interpret_exit_status() {
        assert_eq!(interpret_exit_status(0), "success");
        assert_eq!(interpret_exit_status(127), "command not found");
        assert_eq!(interpret_exit_status(130), "terminated by Ctrl+C (SIGINT)");
        assert_eq!(interpret_exit_status(139), "segmentation fault (SIGSEGV)");
        assert_eq!(interpret_exit_status(150), "terminated by signal");
    }
}
