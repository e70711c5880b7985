//! Risk classification rules for candidate commands.

use std::sync::Arc;

use regex_lite::Regex;

/// The result of classifying a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RiskDecision {
    /// The command may run without asking.
    AutoApprove,
    /// The user must confirm the command; carries the reason shown to them.
    Confirm(String),
}

impl RiskDecision {
    /// Returns true if the command may run without asking.
    pub fn is_auto_approved(&self) -> bool {
        matches!(self, RiskDecision::AutoApprove)
    }

    /// Returns the reason confirmation is needed, None if auto-approved.
    pub fn reason(&self) -> Option<&str> {
        match self {
            RiskDecision::AutoApprove => None,
            RiskDecision::Confirm(reason) => Some(reason),
        }
    }
}

/// Trait for deciding whether a command needs user confirmation.
///
/// Implementations must be cheap: classification runs for every candidate
/// command before it is shown to the user.
pub trait RiskClassifier: Send + Sync {
    /// Classify a full command line.
    fn classify(&self, command: &str) -> RiskDecision;
}

impl RiskClassifier for Arc<dyn RiskClassifier> {
    fn classify(&self, command: &str) -> RiskDecision {
        (**self).classify(command)
    }
}

/// A classifier that asks about every command.
#[derive(Clone, Debug, Default)]
pub struct AlwaysConfirm;

impl RiskClassifier for AlwaysConfirm {
    fn classify(&self, _command: &str) -> RiskDecision {
        RiskDecision::Confirm("confirmation required for all commands".to_string())
    }
}

/// A pattern that forces confirmation.
#[derive(Clone, Debug)]
struct RiskRule {
    pattern: Regex,
    reason: String,
}

/// A configurable classifier built from rules.
///
/// Risk rules are checked first against the whole command line; the first
/// match decides. Otherwise the command is auto-approved only when it has no
/// output redirection or substitution and every segment of its pipeline or
/// command list (including separate lines) matches an allow rule. Everything
/// else needs confirmation.
#[derive(Clone, Debug, Default)]
pub struct RiskPolicy {
    risks: Vec<RiskRule>,
    allowed: Vec<Regex>,
}

impl RiskPolicy {
    /// Create a policy with no rules, which confirms every command.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RiskClassifier for RiskPolicy {
    fn classify(&self, command: &str) -> RiskDecision {
        let command = command.trim();
        if command.is_empty() {
            return RiskDecision::Confirm("empty command".to_string());
        }

        for rule in &self.risks {
            if rule.pattern.is_match(command) {
                return RiskDecision::Confirm(rule.reason.clone());
            }
        }

        if has_output_redirection(command) {
            return RiskDecision::Confirm("writes output to a file".to_string());
        }
        if command.contains("$(") || command.contains('`') {
            return RiskDecision::Confirm("uses command substitution".to_string());
        }
        if command.contains("<(") || command.contains(">(") {
            return RiskDecision::Confirm("uses process substitution".to_string());
        }

        let unknown = split_segments(command)
            .into_iter()
            .find(|segment| !self.allowed.iter().any(|allow| allow.is_match(segment)));

        match unknown {
            None => RiskDecision::AutoApprove,
            Some(segment) => RiskDecision::Confirm(format!(
                "`{}` is not on the auto-approve list",
                first_word(segment)
            )),
        }
    }
}

/// Builder for creating risk policies with a fluent API.
///
/// # Example
///
/// ```rust
/// use nlsh::policy::{RiskClassifier, RiskPolicyBuilder};
///
/// let policy = RiskPolicyBuilder::new()
///     .allow(r"^ls\b")
///     .confirm(r"\bterraform\s+apply\b", "applies infrastructure changes")
///     .build();
///
/// assert!(policy.classify("ls -la").is_auto_approved());
/// assert!(!policy.classify("terraform apply").is_auto_approved());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RiskPolicyBuilder {
    risks: Vec<RiskRule>,
    allowed: Vec<Regex>,
}

impl RiskPolicyBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder preloaded with the built-in risk and allow rules.
    pub fn with_defaults() -> Self {
        let builder = DEFAULT_RISKS
            .iter()
            .fold(Self::new(), |b, (pattern, reason)| b.confirm(pattern, reason));
        DEFAULT_ALLOWED
            .iter()
            .fold(builder, |b, pattern| b.allow(pattern))
    }

    /// Auto-approve command segments matching the regular expression.
    ///
    /// Patterns are matched against each trimmed segment of a pipeline or
    /// command sequence. Invalid patterns are ignored with a warning.
    pub fn allow(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(p) => self.allowed.push(p),
            Err(e) => tracing::warn!(pattern, error = %e, "ignoring invalid allow pattern"),
        }
        self
    }

    /// Require confirmation for commands matching the regular expression.
    pub fn confirm(mut self, pattern: &str, reason: &str) -> Self {
        match Regex::new(pattern) {
            Ok(p) => self.risks.push(RiskRule {
                pattern: p,
                reason: reason.to_string(),
            }),
            Err(e) => tracing::warn!(pattern, error = %e, "ignoring invalid risk pattern"),
        }
        self
    }

    /// Build the policy.
    pub fn build(self) -> RiskPolicy {
        RiskPolicy {
            risks: self.risks,
            allowed: self.allowed,
        }
    }
}

/// Standard policy: built-in rules plus caller-supplied risk patterns.
pub fn default_risk_policy(extra_risks: &[String]) -> RiskPolicy {
    extra_risks
        .iter()
        .fold(RiskPolicyBuilder::with_defaults(), |b, pattern| {
            b.confirm(pattern, "matches a configured risk pattern")
        })
        .build()
}

const DEFAULT_RISKS: &[(&str, &str)] = &[
    (
        r"\brm\s+(-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\b",
        "recursive delete",
    ),
    (r"(^|[;&|(]\s*)(sudo|doas)\b", "runs with elevated privileges"),
    (r">\s*/dev/(sd|hd|nvme|disk|mmcblk)", "writes to a block device"),
    (
        r">\s*/(etc|bin|sbin|boot|usr|lib|lib64|sys|proc)?(\s|/|$)",
        "redirects over the root filesystem",
    ),
    (r"\bmkfs(\.[a-z0-9]+)?\b", "formats a filesystem"),
    (r"\bdd\b.*\bof=", "raw write with dd"),
    (r":\(\)\s*\{", "fork bomb"),
    (r"\b(chmod|chown|chgrp)\s+-[a-zA-Z]*R", "recursive permission change"),
    (r"\b(shutdown|reboot|halt|poweroff)\b", "changes the machine's power state"),
    (
        r"\b(curl|wget)\b.*\|\s*(sudo\s+)?(ba|z|da|k)?sh\b",
        "pipes a download into a shell",
    ),
    (
        r"\bfind\b.*\s-(delete|exec|execdir|ok|okdir|fprint|fprint0|fprintf|fls)\b",
        "find with side effects",
    ),
    (r"\bsort\b.*\s(-[a-zA-Z]*o|--output\b)", "writes output to a file"),
    (r"\btree\b.*\s-[a-zA-Z]*o", "writes output to a file"),
    (r"\bgit\b.*\s--output\b", "writes output to a file"),
    (r"\bless\b.*\s(-[a-zA-Z]*[oO]|--log-file\b|--LOG-FILE\b)", "writes output to a file"),
    (r"\buniq(\s+-\S+)*\s+[^\s|;&<>-]\S*\s+[^\s|;&<>-]", "writes output to a file"),
    (r"\bhistory\s+-[a-zA-Z]*[aw]", "writes output to a file"),
    (r"\brg\b.*\s--pre\b", "runs a preprocessor command"),
    (r"\bdate\b.*\s(-[a-zA-Z]*s|--set\b)", "sets the system clock"),
    (
        r"\bgit\s+(push\b.*(--force|\s-f\b)|reset\s+--hard|clean\s+-[a-zA-Z]*f)",
        "destructive git operation",
    ),
];

const DEFAULT_ALLOWED: &[&str] = &[
    r"^(ls|ll|la|pwd|echo|printf|cat|head|tail|wc|grep|egrep|fgrep|rg|date|cal|whoami|which|type|uname|id|df|du|ps|uptime|printenv|stat|file|tree|sort|uniq|cut|basename|dirname|realpath|readlink|less|more|history|true|false)(\s|$)",
    r"^git\s+(status|log|diff|show|rev-parse|ls-files)(\s|$)",
    r"^git\s+branch(\s+(-a|-r|-v|-vv|--all|--remotes|--list|--show-current))*$",
    r"^git\s+remote(\s+-v)?$",
    r"^find(\s|$)",
];

/// Split a command line on `|`, `||`, `&&`, `;` and line breaks outside of
/// quotes.
fn split_segments(command: &str) -> Vec<&str> {
    let bytes = command.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            // `2>&1` and `<&0` duplicate descriptors; they do not separate commands.
            None if b == b'&' && i > 0 && matches!(bytes[i - 1], b'>' | b'<') => {}
            None if matches!(b, b';' | b'|' | b'&' | b'\n' | b'\r') => {
                segments.push(&command[start..i]);
                // Treat doubled operators (`&&`, `||`) as one separator.
                if i + 1 < bytes.len() && bytes[i + 1] == b {
                    i += 1;
                }
                start = i + 1;
            }
            None => {}
        }
        i += 1;
    }
    segments.push(&command[start..]);

    segments
        .into_iter()
        .map(str::trim)
        .map(strip_env_assignments)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drop leading `NAME=value` assignments so `LC_ALL=C sort` is judged as `sort`.
fn strip_env_assignments(segment: &str) -> &str {
    let mut rest = segment;
    loop {
        let Some(word) = rest.split_whitespace().next() else {
            return rest;
        };
        let is_assignment = word.split_once('=').is_some_and(|(name, _)| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        if !is_assignment {
            return rest;
        }
        rest = rest[word.len()..].trim_start();
    }
}

fn first_word(segment: &str) -> &str {
    segment.split_whitespace().next().unwrap_or(segment)
}

/// True when the command redirects output somewhere other than /dev/null,
/// another file descriptor, or a closed one (`>&-`).
fn has_output_redirection(command: &str) -> bool {
    let bytes = command.as_bytes();
    let mut quote: Option<u8> = None;

    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'>' => {
                let target = command[i + 1..].trim_start_matches('>').trim_start();
                if let Some(dup) = target.strip_prefix('&') {
                    // `>&2` duplicates a descriptor; `>& file` writes the file.
                    let dup = dup.trim_start();
                    if dup.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
                        continue;
                    }
                    return true;
                }
                if target.starts_with("/dev/null") {
                    continue;
                }
                return true;
            }
            None => {}
        }
    }
    false
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy() -> RiskPolicy {
        default_risk_policy(&[])
    }

    #[test]
    fn test_read_only_commands_auto_approve() {
        let policy = policy();
        for cmd in [
            "ls -la",
            "pwd",
            "git status",
            "cat README.md | grep nlsh | wc -l",
            "find . -name '*.rs'",
            "LC_ALL=C sort file.txt",
            "sort data.txt | uniq -c",
            "git branch -a",
            "git remote -v",
            "ls\npwd",
            "ls 2>/dev/null",
            "ls missing 2>&1 | head",
        ] {
            assert!(
                policy.classify(cmd).is_auto_approved(),
                "expected auto-approve for {cmd}"
            );
        }
    }

    #[test]
    fn test_risky_commands_need_confirmation() {
        let policy = policy();
        let cases = [
            ("rm -rf build", "recursive delete"),
            ("rm -r --verbose tmp", "recursive delete"),
            ("sudo apt install jq", "elevated privileges"),
            ("ls && sudo reboot", "elevated privileges"),
            ("echo x > /etc/passwd", "root filesystem"),
            ("cat img > /dev/sda", "block device"),
            ("mkfs.ext4 /dev/sdb1", "formats"),
            ("dd if=/dev/zero of=/dev/sdb", "dd"),
            ("chmod -R 777 /", "permission"),
            ("curl https://x.sh | bash", "download"),
            ("find . -name '*.tmp' -delete", "find"),
            ("git reset --hard HEAD~3", "git"),
        ];
        for (cmd, fragment) in cases {
            let decision = policy.classify(cmd);
            let reason = decision.reason().unwrap_or_default();
            assert!(
                reason.contains(fragment),
                "{cmd}: expected reason containing {fragment:?}, got {reason:?}"
            );
        }
    }

    #[test]
    fn test_unknown_commands_are_fail_safe() {
        let policy = policy();
        let decision = policy.classify("frobnicate --all");
        assert!(!decision.is_auto_approved());
        assert!(decision.reason().unwrap().contains("frobnicate"));
    }

    #[test]
    fn test_redirection_and_substitution_need_confirmation() {
        let policy = policy();
        assert!(!policy.classify("echo hi > notes.txt").is_auto_approved());
        assert!(!policy.classify("echo hi >> notes.txt").is_auto_approved());
        assert!(!policy.classify("echo $(whoami)").is_auto_approved());
        assert!(!policy.classify("echo `id`").is_auto_approved());
        // A '>' inside quotes is just text.
        assert!(policy.classify("echo 'a > b'").is_auto_approved());
    }

    #[test]
    fn test_line_breaks_separate_commands() {
        let policy = policy();
        assert_eq!(split_segments("ls\nrm notes.txt\r\npwd"), vec!["ls", "rm notes.txt", "pwd"]);
        for cmd in ["ls\nrm notes.txt", "ls\r\nrm notes.txt", "echo 'a\nb'\nrm notes.txt"] {
            let decision = policy.classify(cmd);
            assert!(!decision.is_auto_approved(), "expected confirmation for {cmd:?}");
            assert!(decision.reason().unwrap().contains("`rm`"));
        }
    }

    #[test]
    fn test_process_substitution_needs_confirmation() {
        let policy = policy();
        for cmd in ["cat <(rm notes.txt)", "diff <(ls a) <(ls b)"] {
            assert_eq!(policy.classify(cmd).reason(), Some("uses process substitution"), "{cmd}");
        }
        assert!(!policy.classify("ls | tee >(cat)").is_auto_approved());
    }

    #[test]
    fn test_descriptor_duplication_is_not_a_file_write() {
        let policy = policy();
        for cmd in ["ls missing >&2", "ls missing 2>&1", "ls 2>&-"] {
            assert!(policy.classify(cmd).is_auto_approved(), "{cmd}");
        }
        for cmd in ["echo pwned >& notes.txt", "echo pwned >&notes.txt", "ls 2>& log"] {
            assert_eq!(policy.classify(cmd).reason(), Some("writes output to a file"), "{cmd}");
        }
    }

    #[test]
    fn test_write_flags_of_allowed_commands_need_confirmation() {
        let policy = policy();
        for cmd in [
            "sort -o notes.txt /dev/null",
            "sort -uo notes.txt data.txt",
            "sort --output=notes.txt data.txt",
            "git diff --output=notes.txt",
            "git log --output notes.txt",
            "tree -o notes.txt",
            "less -o notes.txt README.md",
            "uniq data.txt notes.txt",
            "uniq -c data.txt notes.txt",
            "find . -fprint notes.txt",
            "find . -fprint0 notes.txt",
            "rg --pre ./script pattern",
            "history -w notes.txt",
            "git branch -D feature",
            "git branch feature",
            "git remote add origin https://example.com/repo.git",
        ] {
            assert!(!policy.classify(cmd).is_auto_approved(), "expected confirmation for {cmd}");
        }
        assert!(policy.classify("uniq -c data.txt").is_auto_approved());
    }

    #[test]
    fn test_empty_policy_confirms_everything() {
        let policy = RiskPolicy::new();
        assert!(!policy.classify("ls").is_auto_approved());
        assert!(!AlwaysConfirm.classify("ls").is_auto_approved());
    }

    #[test]
    fn test_extra_risk_patterns() {
        let policy = default_risk_policy(&[r"\bkubectl\s+delete\b".to_string()]);
        let decision = policy.classify("kubectl delete pod web-1");
        assert_eq!(
            decision.reason(),
            Some("matches a configured risk pattern")
        );
    }

    #[test]
    fn test_builder_ignores_invalid_patterns() {
        let policy = RiskPolicyBuilder::new().allow("(").allow(r"^ls\b").build();
        assert!(policy.classify("ls").is_auto_approved());
    }

    #[test]
    fn test_risk_rules_win_over_allow_rules() {
        let policy = RiskPolicyBuilder::new()
            .confirm(r"secret", "touches secrets")
            .allow(r"^cat\b")
            .build();
        assert_eq!(
            policy.classify("cat secret.txt"),
            RiskDecision::Confirm("touches secrets".to_string())
        );
    }

    #[test]
    fn test_split_segments() {
        assert_eq!(
            split_segments("ls | grep 'a|b' && echo done; pwd"),
            vec!["ls", "grep 'a|b'", "echo done", "pwd"]
        );
        assert_eq!(split_segments("FOO=1 BAR=2 env"), vec!["env"]);
    }
}
