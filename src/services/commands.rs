//! Operator command grammar.
//!
//! Parses the text surface shared by Slack and the CLI. All forms are
//! case-insensitive.

use regex::Regex;
use std::sync::OnceLock;

/// Target of a stop command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopTarget {
    IssueNumber(u64),
    MinionId(String),
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Status,
    Work {
        repo: Option<String>,
        issue_number: u64,
    },
    Stop(StopTarget),
    Queue,
    Pause,
    Resume,
    History,
    Review {
        repo: Option<String>,
        pr_number: u64,
    },
    Help,
}

fn work_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^work\s+on\s+(?:([\w.-]+/[\w.-]+))?#(\d+)$").expect("valid regex")
    })
}

fn stop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:stop|kill)\s+(?:#(\d+)|(minion-[\w-]+)|(\d+))$").expect("valid regex")
    })
}

fn review_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^review\s+(?:([\w.-]+/[\w.-]+))?#?(\d+)$").expect("valid regex")
    })
}

fn check_pr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^check\s+pr\s+#?(\d+)$").expect("valid regex"))
}

/// Parse one line of operator text. Returns `None` for free text that is
/// not a command.
pub fn parse(text: &str) -> Option<OperatorCommand> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    let normalized = lower.replace('\u{2019}', "'");

    match normalized.as_str() {
        "status" | "what's the status" | "whats the status" | "how's it going"
        | "hows it going" | "show me status" | "what are the minions doing" => {
            return Some(OperatorCommand::Status)
        }
        "queue" => return Some(OperatorCommand::Queue),
        "pause" => return Some(OperatorCommand::Pause),
        "resume" => return Some(OperatorCommand::Resume),
        "history" => return Some(OperatorCommand::History),
        "help" => return Some(OperatorCommand::Help),
        _ => {}
    }

    if let Some(caps) = work_re().captures(trimmed) {
        return Some(OperatorCommand::Work {
            repo: caps.get(1).map(|m| m.as_str().to_string()),
            issue_number: caps[2].parse().ok()?,
        });
    }

    if let Some(caps) = stop_re().captures(trimmed) {
        if let Some(number) = caps.get(1).or_else(|| caps.get(3)) {
            return Some(OperatorCommand::Stop(StopTarget::IssueNumber(
                number.as_str().parse().ok()?,
            )));
        }
        if let Some(minion_id) = caps.get(2) {
            return Some(OperatorCommand::Stop(StopTarget::MinionId(
                minion_id.as_str().to_lowercase(),
            )));
        }
    }

    if let Some(caps) = review_re().captures(trimmed) {
        return Some(OperatorCommand::Review {
            repo: caps.get(1).map(|m| m.as_str().to_string()),
            pr_number: caps[2].parse().ok()?,
        });
    }
    if let Some(caps) = check_pr_re().captures(trimmed) {
        return Some(OperatorCommand::Review {
            repo: None,
            pr_number: caps[1].parse().ok()?,
        });
    }

    None
}

/// Help text listing the command surface.
pub fn help_text() -> String {
    [
        "Commands:",
        "  status                     - show active minions",
        "  work on [owner/repo]#N     - dispatch an issue",
        "  stop #N | stop minion-<id> - kill a minion",
        "  queue                      - show ready issues",
        "  pause / resume             - pause or resume dispatching",
        "  history                    - show completed work",
        "  review [owner/repo]#N      - review a pull request",
        "  help                       - this message",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_phrasings() {
        for text in [
            "status",
            "STATUS",
            "What's the status",
            "whats the status",
            "How's it going",
            "show me status",
            "what are the minions doing",
        ] {
            assert_eq!(parse(text), Some(OperatorCommand::Status), "failed: {text}");
        }
    }

    #[test]
    fn work_with_and_without_repo() {
        assert_eq!(
            parse("work on org/repo#42"),
            Some(OperatorCommand::Work {
                repo: Some("org/repo".to_string()),
                issue_number: 42
            })
        );
        assert_eq!(
            parse("WORK ON #7"),
            Some(OperatorCommand::Work {
                repo: None,
                issue_number: 7
            })
        );
    }

    #[test]
    fn stop_by_issue_or_minion_id() {
        assert_eq!(
            parse("stop #42"),
            Some(OperatorCommand::Stop(StopTarget::IssueNumber(42)))
        );
        assert_eq!(
            parse("stop 42"),
            Some(OperatorCommand::Stop(StopTarget::IssueNumber(42)))
        );
        assert_eq!(
            parse("kill minion-a1b2"),
            Some(OperatorCommand::Stop(StopTarget::MinionId(
                "minion-a1b2".to_string()
            )))
        );
    }

    #[test]
    fn review_and_check_pr_alias() {
        assert_eq!(
            parse("review org/repo#100"),
            Some(OperatorCommand::Review {
                repo: Some("org/repo".to_string()),
                pr_number: 100
            })
        );
        assert_eq!(
            parse("review #100"),
            Some(OperatorCommand::Review {
                repo: None,
                pr_number: 100
            })
        );
        assert_eq!(
            parse("check PR #100"),
            Some(OperatorCommand::Review {
                repo: None,
                pr_number: 100
            })
        );
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("queue"), Some(OperatorCommand::Queue));
        assert_eq!(parse("PAUSE"), Some(OperatorCommand::Pause));
        assert_eq!(parse("resume"), Some(OperatorCommand::Resume));
        assert_eq!(parse("history"), Some(OperatorCommand::History));
        assert_eq!(parse("help"), Some(OperatorCommand::Help));
    }

    #[test]
    fn free_text_is_not_a_command() {
        assert_eq!(parse("hello there"), None);
        assert_eq!(parse("work on everything"), None);
        assert_eq!(parse(""), None);
    }
}
