use crate::config::ProfileSettings;
use crate::models::{AllowedBy, BlockedBy, Decision, DomainAction, JudgeLabel, JudgeResult};

const JUDGE_SUSPICIOUS_CONFIDENCE: f64 = 0.75;

/// Inputs the engine combines into a single allow/block decision.
#[derive(Debug)]
pub struct PolicyInput<'a> {
    pub initial_score: u32,
    pub initial_flags: &'a [String],
    pub allow_signals: &'a [String],
    pub domain_action: DomainAction,
    pub domain_reason: Option<&'a str>,
    pub judge: Option<&'a JudgeResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub score: u32,
    pub flags: Vec<String>,
    pub reason: Option<String>,
    pub bypassed: bool,
    pub blocked_by: Option<BlockedBy>,
    pub allowed_by: Option<AllowedBy>,
}

impl PolicyDecision {
    pub fn is_block(&self) -> bool {
        self.decision == Decision::Block
    }
}

/// Combine rule score, optional judge verdict, fail-closed thresholds and
/// domain overrides. The engine never calls out; the caller is expected to
/// have invoked the judge only for scores in the medium band.
pub fn decide(input: PolicyInput<'_>, profile: &ProfileSettings, fail_closed: bool) -> PolicyDecision {
    match input.domain_action {
        DomainAction::Block => {
            let mut flags = input.initial_flags.to_vec();
            push_flag(&mut flags, "domain_blocklist");
            let reason = input
                .domain_reason
                .map(str::to_string)
                .or_else(|| Some("Domain blocked by policy".to_string()));
            return finish_block(input.domain_action, input.initial_score, flags, reason);
        }
        DomainAction::AllowBypass => {
            return PolicyDecision {
                decision: Decision::Allow,
                score: 0,
                flags: vec!["domain_allowlist_bypass".to_string()],
                reason: input.domain_reason.map(str::to_string),
                bypassed: true,
                blocked_by: None,
                allowed_by: Some(AllowedBy::DomainAllowlistBypass),
            };
        }
        DomainAction::Inspect => {}
    }

    let mut flags = input.initial_flags.to_vec();
    let score = input.initial_score;

    if let Some(judge) = input.judge {
        push_flag(&mut flags, &format!("llm_judge:{}", judge.label.as_str()));
        match judge.label {
            JudgeLabel::Malicious => {
                let reason = format!(
                    "LLM judge classified content as malicious (confidence {:.2})",
                    judge.confidence
                );
                return finish_block(input.domain_action, score, flags, Some(reason));
            }
            JudgeLabel::Suspicious if judge.confidence >= JUDGE_SUSPICIOUS_CONFIDENCE => {
                let reason = format!(
                    "LLM judge classified content as suspicious (confidence {:.2})",
                    judge.confidence
                );
                return finish_block(input.domain_action, score, flags, Some(reason));
            }
            _ => {}
        }
    }

    if score >= profile.block_threshold {
        let reason = format!(
            "Rule score {score} ≥ block threshold {}",
            profile.block_threshold
        );
        return finish_block(input.domain_action, score, flags, Some(reason));
    }

    if fail_closed && score >= profile.medium_threshold {
        let reason = format!(
            "Fail-closed: rule score {score} ≥ medium threshold {}",
            profile.medium_threshold
        );
        return finish_block(input.domain_action, score, flags, Some(reason));
    }

    PolicyDecision {
        decision: Decision::Allow,
        score,
        allowed_by: classify_allowed_by(false, input.allow_signals),
        flags,
        reason: None,
        bypassed: false,
        blocked_by: None,
    }
}

fn finish_block(
    domain_action: DomainAction,
    score: u32,
    flags: Vec<String>,
    reason: Option<String>,
) -> PolicyDecision {
    let blocked_by = classify_blocked_by(domain_action, &flags, reason.as_deref());
    PolicyDecision {
        decision: Decision::Block,
        score,
        flags,
        reason,
        bypassed: false,
        blocked_by: Some(blocked_by),
        allowed_by: None,
    }
}

fn push_flag(flags: &mut Vec<String>, flag: &str) {
    if !flags.iter().any(|f| f == flag) {
        flags.push(flag.to_string());
    }
}

/// Attribute a block to its deciding layer.
pub fn classify_blocked_by(
    domain_action: DomainAction,
    flags: &[String],
    reason: Option<&str>,
) -> BlockedBy {
    if domain_action == DomainAction::Block || flags.iter().any(|f| f == "domain_blocklist") {
        return BlockedBy::DomainPolicy;
    }
    let reason = reason.unwrap_or("");
    if reason.starts_with("Fail-closed:") {
        return BlockedBy::FailClosed;
    }
    if reason.starts_with("Rule score") {
        return BlockedBy::RuleThreshold;
    }
    if flags.iter().any(|f| f.starts_with("llm_judge:")) || reason.contains("LLM judge") {
        return BlockedBy::LlmJudge;
    }
    BlockedBy::Policy
}

/// Attribute an allow, when anything beyond the default applies.
pub fn classify_allowed_by(bypassed: bool, allow_signals: &[String]) -> Option<AllowedBy> {
    if bypassed {
        return Some(AllowedBy::DomainAllowlistBypass);
    }
    if allow_signals.iter().any(|s| s == "language_exception") {
        return Some(AllowedBy::LanguageException);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::models::JudgeResult;

    fn strict() -> ProfileSettings {
        Profile::Strict.settings()
    }

    fn inspect_input(score: u32, flags: &[String]) -> PolicyInput<'_> {
        PolicyInput {
            initial_score: score,
            initial_flags: flags,
            allow_signals: &[],
            domain_action: DomainAction::Inspect,
            domain_reason: None,
            judge: None,
        }
    }

    #[test]
    fn domain_block_wins_over_everything() {
        let flags: Vec<String> = vec![];
        let d = decide(
            PolicyInput {
                initial_score: 0,
                initial_flags: &flags,
                allow_signals: &[],
                domain_action: DomainAction::Block,
                domain_reason: Some("Domain matched blocklist rule: evil.example"),
                judge: None,
            },
            &strict(),
            true,
        );
        assert!(d.is_block());
        assert_eq!(d.blocked_by, Some(BlockedBy::DomainPolicy));
        assert!(d.flags.contains(&"domain_blocklist".to_string()));
        assert_eq!(
            d.reason.as_deref(),
            Some("Domain matched blocklist rule: evil.example")
        );
    }

    #[test]
    fn allowlist_bypass_zeroes_the_score() {
        let flags = vec!["instruction_override".to_string()];
        let d = decide(
            PolicyInput {
                initial_score: 11,
                initial_flags: &flags,
                allow_signals: &[],
                domain_action: DomainAction::AllowBypass,
                domain_reason: Some("Domain matched allowlist rule: docs.example"),
                judge: None,
            },
            &strict(),
            true,
        );
        assert_eq!(d.decision, Decision::Allow);
        assert!(d.bypassed);
        assert_eq!(d.score, 0);
        assert_eq!(d.flags, vec!["domain_allowlist_bypass".to_string()]);
        assert_eq!(d.allowed_by, Some(AllowedBy::DomainAllowlistBypass));
    }

    #[test]
    fn block_threshold_blocks() {
        let flags = vec!["instruction_override".to_string()];
        let d = decide(inspect_input(11, &flags), &strict(), false);
        assert!(d.is_block());
        assert_eq!(d.blocked_by, Some(BlockedBy::RuleThreshold));
        assert_eq!(d.reason.as_deref(), Some("Rule score 11 ≥ block threshold 10"));
    }

    #[test]
    fn fail_closed_blocks_the_medium_band() {
        let flags: Vec<String> = vec![];
        let d = decide(inspect_input(7, &flags), &strict(), true);
        assert!(d.is_block());
        assert_eq!(d.blocked_by, Some(BlockedBy::FailClosed));
        assert!(d.reason.unwrap().starts_with("Fail-closed:"));

        let d = decide(inspect_input(7, &flags), &strict(), false);
        assert_eq!(d.decision, Decision::Allow);
    }

    #[test]
    fn fail_closed_is_monotone_in_score() {
        let flags: Vec<String> = vec![];
        let mut blocked = false;
        for score in 0..20 {
            let d = decide(inspect_input(score, &flags), &strict(), true);
            if blocked {
                assert!(d.is_block(), "score {score} flipped back to allow");
            }
            blocked = d.is_block();
        }
    }

    #[test]
    fn malicious_judge_blocks_below_threshold() {
        let flags = vec!["tool_abuse".to_string()];
        let judge = JudgeResult {
            label: JudgeLabel::Malicious,
            confidence: 0.9,
            reasons: vec![],
        };
        let d = decide(
            PolicyInput {
                judge: Some(&judge),
                ..inspect_input(7, &flags)
            },
            &strict(),
            false,
        );
        assert!(d.is_block());
        assert_eq!(d.blocked_by, Some(BlockedBy::LlmJudge));
        assert!(d.flags.contains(&"llm_judge:malicious".to_string()));
    }

    #[test]
    fn suspicious_judge_needs_confidence() {
        let flags: Vec<String> = vec![];
        let low = JudgeResult {
            label: JudgeLabel::Suspicious,
            confidence: 0.5,
            reasons: vec![],
        };
        let d = decide(
            PolicyInput {
                judge: Some(&low),
                ..inspect_input(6, &flags)
            },
            &strict(),
            false,
        );
        assert_eq!(d.decision, Decision::Allow);
        assert!(d.flags.contains(&"llm_judge:suspicious".to_string()));

        let high = JudgeResult {
            confidence: 0.8,
            ..low
        };
        let d = decide(
            PolicyInput {
                judge: Some(&high),
                ..inspect_input(6, &flags)
            },
            &strict(),
            false,
        );
        assert!(d.is_block());
    }

    #[test]
    fn language_exception_classifies_the_allow() {
        let flags: Vec<String> = vec![];
        let signals = vec!["language_exception".to_string()];
        let d = decide(
            PolicyInput {
                allow_signals: &signals,
                ..inspect_input(0, &flags)
            },
            &strict(),
            true,
        );
        assert_eq!(d.decision, Decision::Allow);
        assert_eq!(d.allowed_by, Some(AllowedBy::LanguageException));
    }

    #[test]
    fn ordinary_allow_stays_unclassified() {
        let flags: Vec<String> = vec![];
        let d = decide(inspect_input(0, &flags), &strict(), true);
        assert_eq!(d.decision, Decision::Allow);
        assert_eq!(d.allowed_by, None);
        assert_eq!(d.blocked_by, None);
    }
}
