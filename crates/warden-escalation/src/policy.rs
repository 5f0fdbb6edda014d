//! Escalation policy model and matching (§4.5).

use regex::RegexBuilder;
use warden_types::Severity;

/// One step of an escalation policy.
#[derive(Debug, Clone)]
pub struct Level {
    /// The level number. Levels are kept sorted ascending by this field.
    pub level: u32,
    /// Milliseconds after tracking began at which this level fires.
    pub after_ms: u64,
    /// Notification targets, e.g. `"slack:#oncall"`, `"pagerduty:primary"`.
    pub notify: Vec<String>,
    /// Whether this level re-fires on a repeating interval once reached.
    pub repeat: bool,
    /// The repeat interval, required when `repeat` is true.
    pub repeat_interval_ms: Option<u64>,
}

/// Errors raised while compiling a [`Policy`] from configuration.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The configured title regex failed to compile.
    #[error("policy {policy_id}: invalid title regex {pattern:?}: {source}")]
    InvalidPattern { policy_id: String, pattern: String, #[source] source: regex::Error },
}

/// An ordered escalation policy (§4.5 "Policy model").
#[derive(Debug, Clone)]
pub struct Policy {
    /// Unique policy identifier.
    pub id: String,
    /// Severities this policy applies to; empty means "all severities".
    pub severity_filter: Vec<Severity>,
    /// Case-insensitive title filter; `None` means "all titles".
    pub title_regex: Option<regex::Regex>,
    /// Escalation levels, sorted ascending by `level`.
    pub levels: Vec<Level>,
}

impl Policy {
    /// Compiles a policy from its raw pieces, sorting levels ascending and
    /// compiling the title pattern case-insensitively.
    pub fn compile(id: impl Into<String>, severity_filter: Vec<Severity>, title_pattern: Option<&str>, mut levels: Vec<Level>) -> Result<Self, PolicyError> {
        let id = id.into();
        let title_regex = title_pattern
            .map(|pattern| {
                RegexBuilder::new(pattern).case_insensitive(true).build().map_err(|source| PolicyError::InvalidPattern { policy_id: id.clone(), pattern: pattern.to_string(), source })
            })
            .transpose()?;
        levels.sort_by_key(|l| l.level);
        Ok(Self { id, severity_filter, title_regex, levels })
    }

    /// Whether this policy matches an incoming incident (§4.5 "Matching").
    pub fn matches(&self, severity: Severity, title: &str) -> bool {
        let severity_ok = self.severity_filter.is_empty() || self.severity_filter.contains(&severity);
        let title_ok = self.title_regex.as_ref().map_or(true, |re| re.is_match(title));
        severity_ok && title_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: u32, after_ms: u64) -> Level {
        Level { level, after_ms, notify: vec!["slack:#oncall".to_string()], repeat: false, repeat_interval_ms: None }
    }

    #[test]
    fn empty_severity_filter_matches_any_severity() {
        let policy = Policy::compile("p1", vec![], None, vec![level(1, 1000)]).unwrap();
        assert!(policy.matches(Severity::Info, "anything"));
        assert!(policy.matches(Severity::Critical, "anything"));
    }

    #[test]
    fn severity_filter_restricts_matching() {
        let policy = Policy::compile("p1", vec![Severity::Critical], None, vec![level(1, 1000)]).unwrap();
        assert!(!policy.matches(Severity::Warning, "anything"));
        assert!(policy.matches(Severity::Critical, "anything"));
    }

    #[test]
    fn title_regex_is_case_insensitive() {
        let policy = Policy::compile("p1", vec![], Some("disk.*full"), vec![level(1, 1000)]).unwrap();
        assert!(policy.matches(Severity::Warning, "DISK IS FULL"));
        assert!(!policy.matches(Severity::Warning, "memory leak"));
    }

    #[test]
    fn levels_are_sorted_ascending_regardless_of_input_order() {
        let policy = Policy::compile("p1", vec![], None, vec![level(3, 3000), level(1, 1000), level(2, 2000)]).unwrap();
        let levels: Vec<u32> = policy.levels.iter().map(|l| l.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
    }

    #[test]
    fn invalid_regex_is_rejected_at_compile_time() {
        let result = Policy::compile("p1", vec![], Some("("), vec![level(1, 1000)]);
        assert!(matches!(result, Err(PolicyError::InvalidPattern { .. })));
    }
}
