use crate::models::DomainAction;

/// Outcome of evaluating a host against the allow/block lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvaluation {
    pub action: DomainAction,
    pub reason: Option<String>,
    pub matched_rule: Option<String>,
}

impl DomainEvaluation {
    fn inspect() -> Self {
        Self {
            action: DomainAction::Inspect,
            reason: None,
            matched_rule: None,
        }
    }
}

/// Normalize a list rule or a host for matching: lowercase, trim, strip the
/// trailing dot and any leading `*.`. Returns None for empty input.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_lowercase();
    while s.ends_with('.') {
        s.pop();
    }
    if let Some(rest) = s.strip_prefix("*.") {
        s = rest.to_string();
    }
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Shape check for runtime list entries: RFC-1035-ish labels, 255 chars max.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 255 {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    })
}

fn rule_matches(host: &str, rule: &str) -> bool {
    host == rule || host.strip_suffix(rule).is_some_and(|p| p.ends_with('.'))
}

fn find_match<'a>(host: &str, rules: &'a [String]) -> Option<&'a String> {
    rules.iter().find(|r| rule_matches(host, r))
}

/// Decide `{allow-bypass, block, inspect}` for a host under two lists.
///
/// The blocklist is evaluated first and wins regardless of the allowlist.
/// Lists are expected pre-normalized (see [`normalize_domain`]); the host is
/// normalized here so redirect targets can be passed in verbatim.
pub fn evaluate(host: &str, allowlist: &[String], blocklist: &[String]) -> DomainEvaluation {
    let Some(host) = normalize_domain(host) else {
        return DomainEvaluation::inspect();
    };

    if let Some(rule) = find_match(&host, blocklist) {
        return DomainEvaluation {
            action: DomainAction::Block,
            reason: Some(format!("Domain matched blocklist rule: {rule}")),
            matched_rule: Some(rule.clone()),
        };
    }

    if let Some(rule) = find_match(&host, allowlist) {
        return DomainEvaluation {
            action: DomainAction::AllowBypass,
            reason: Some(format!("Domain matched allowlist rule: {rule}")),
            matched_rule: Some(rule.clone()),
        };
    }

    DomainEvaluation::inspect()
}

/// Union of static (config) and runtime (persisted) entries, deduplicated by
/// normalized domain. Static entries come first so reported matches favor
/// the operator-configured rule.
pub fn effective_list(static_entries: &[String], runtime_entries: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(static_entries.len() + runtime_entries.len());
    for raw in static_entries.iter().chain(runtime_entries.iter()) {
        if let Some(d) = normalize_domain(raw) {
            if !out.contains(&d) {
                out.push(d);
            }
        }
    }
    out
}

/// Parse a comma-separated config list into normalized entries.
pub fn parse_csv_list(csv: &str) -> Vec<String> {
    effective_list(
        &csv.split(',').map(|s| s.to_string()).collect::<Vec<_>>(),
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalizes_case_dots_and_wildcards() {
        assert_eq!(normalize_domain(" Example.COM. "), Some("example.com".into()));
        assert_eq!(normalize_domain("*.example.com"), Some("example.com".into()));
        assert_eq!(normalize_domain("."), None);
    }

    #[test]
    fn exact_and_subdomain_matching() {
        let block = list(&["example.com"]);
        assert_eq!(
            evaluate("example.com", &[], &block).action,
            DomainAction::Block
        );
        assert_eq!(
            evaluate("docs.example.com", &[], &block).action,
            DomainAction::Block
        );
        // Not a label boundary.
        assert_eq!(
            evaluate("notexample.com", &[], &block).action,
            DomainAction::Inspect
        );
    }

    #[test]
    fn blocklist_beats_allowlist() {
        let allow = list(&["example.com"]);
        let block = list(&["docs.example.com"]);
        let eval = evaluate("docs.example.com", &allow, &block);
        assert_eq!(eval.action, DomainAction::Block);
        assert_eq!(
            eval.reason.as_deref(),
            Some("Domain matched blocklist rule: docs.example.com")
        );
    }

    #[test]
    fn allowlist_yields_bypass() {
        let allow = list(&["example.com"]);
        let eval = evaluate("wiki.example.com", &allow, &[]);
        assert_eq!(eval.action, DomainAction::AllowBypass);
        assert!(eval.reason.unwrap().contains("allowlist"));
    }

    #[test]
    fn no_match_is_inspect() {
        let eval = evaluate("example.org", &list(&["example.com"]), &[]);
        assert_eq!(eval.action, DomainAction::Inspect);
        assert!(eval.reason.is_none());
    }

    #[test]
    fn effective_list_dedupes_across_sources() {
        let merged = effective_list(
            &list(&["Example.com", "other.net"]),
            &list(&["example.com.", "*.runtime.io"]),
        );
        assert_eq!(merged, list(&["example.com", "other.net", "runtime.io"]));
    }

    #[test]
    fn domain_shape_validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("a-b.c1.example"));
        assert!(!is_valid_domain(""));
        assert!(!is_valid_domain("Example.com"));
        assert!(!is_valid_domain("-bad.com"));
        assert!(!is_valid_domain("bad-.com"));
        assert!(!is_valid_domain(&"x".repeat(256)));
    }
}
