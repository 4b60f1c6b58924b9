use crate::models::{Detector, EvidenceMatch, MatchBasis};
use crate::normalizer::{self, Normalized};
use crate::rules::{COMPILED, HIGH_RISK_INTENT_FLAGS, RULES, TYPOGLYCEMIA_KEYWORDS};
use crate::langlist;
use once_cell::sync::Lazy;
use regex::Regex;

/// Evidence entries kept after dedup, ordered by descending weight.
const EVIDENCE_CAP: usize = 20;
/// Evidence entries recorded per rule before dedup.
const MATCHES_PER_RULE: usize = 3;
const EXCERPT_CONTEXT_BYTES: usize = 40;
const MATCHED_TEXT_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, Default)]
pub struct ScoreOutcome {
    pub score: u32,
    pub flags: Vec<String>,
    pub allow_signals: Vec<String>,
    pub evidence: Vec<EvidenceMatch>,
    pub normalization: Normalized,
}

impl ScoreOutcome {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

struct EncodingPatterns {
    base64: Regex,
    hex: Regex,
    percent: Regex,
    unicode_escape: Regex,
    byte_escape: Regex,
    decode_context: Regex,
}

static ENCODING: Lazy<EncodingPatterns> = Lazy::new(|| EncodingPatterns {
    base64: Regex::new(r"[A-Za-z0-9+/]{32,}={0,2}").unwrap(),
    hex: Regex::new(r"(?i)(?:[0-9a-f]{2}){12,}").unwrap(),
    percent: Regex::new(r"(?i)(?:%[0-9a-f]{2}){6,}").unwrap(),
    unicode_escape: Regex::new(r"(?i)(?:\\u[0-9a-f]{4}){4,}").unwrap(),
    byte_escape: Regex::new(r"(?i)(?:\\x[0-9a-f]{2}){4,}").unwrap(),
    decode_context: Regex::new(
        r"(?i)\b(?:decode|deobfuscate|unpack|execute|run|ignore|bypass|instruction|prompt|shell|command)\b",
    )
    .unwrap(),
});

static TYPO_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z]{5,20}\b").unwrap());

/// Deterministic prompt-injection score over sanitized plain text.
///
/// Pure function of `(text, language_extras)`: no I/O, stable flag order,
/// total order on evidence.
pub fn score(text: &str, language_extras: &[String]) -> ScoreOutcome {
    let mut out = ScoreOutcome {
        normalization: normalizer::normalize(text),
        ..Default::default()
    };
    let normalized = out.normalization.text.clone();
    let mut evidence: Vec<EvidenceMatch> = Vec::new();

    // Rules table. Each rule adds its weight once however often it matches.
    for (rule, re) in RULES.iter().zip(COMPILED.iter()) {
        let target = match rule.target {
            MatchBasis::Raw => text,
            MatchBasis::Normalized => normalized.as_str(),
        };
        let mut matched = false;
        for m in re.find_iter(target).take(MATCHES_PER_RULE) {
            matched = true;
            evidence.push(span_evidence(
                rule.id,
                Detector::Rule,
                rule.target,
                target,
                m.start(),
                m.end(),
                rule.weight,
                None,
            ));
        }
        if matched {
            out.score += rule.weight;
            push_flag(&mut out.flags, rule.id);
        }
    }

    // Normalization signals.
    if out
        .normalization
        .signal_flags
        .iter()
        .any(|f| f == "unicode_invisible_or_bidi")
    {
        out.score += 2;
        push_flag(&mut out.flags, "unicode_invisible_or_bidi");
        evidence.push(EvidenceMatch {
            flag: "unicode_invisible_or_bidi".to_string(),
            detector: Detector::Normalization,
            basis: MatchBasis::Raw,
            start: None,
            end: None,
            matched_text: String::new(),
            excerpt: String::new(),
            weight: 2,
            notes: Some("invisible or bidi controls stripped during normalization".to_string()),
        });
    }

    // Typoglycemia over normalized tokens.
    let typo_matches = typoglycemia_matches(&normalized);
    if !typo_matches.is_empty() {
        let count = typo_matches.len() as u32;
        out.score += (3 + count.saturating_sub(1)).min(7);
        push_flag(&mut out.flags, "typoglycemia_high_risk_keyword");
        for (token, keyword, start, end) in &typo_matches {
            push_flag(&mut out.flags, &format!("typoglycemia_keyword:{keyword}"));
            evidence.push(span_evidence(
                "typoglycemia_high_risk_keyword",
                Detector::Typoglycemia,
                MatchBasis::Normalized,
                &normalized,
                *start,
                *end,
                3,
                Some(format!("scrambled variant of '{keyword}' ({token})")),
            ));
        }
    }

    // Encoded-payload signals over the raw text.
    score_encoding_signals(text, &mut out, &mut evidence);

    // Language-exception gate, run only when confusable folding applied.
    let mut language_list_like = false;
    if out.normalization.confusables_replaced {
        let stats = langlist::detect(text, language_extras);
        language_list_like = stats.is_language_list_like();
    }

    // Confusable coupling: suspicious mixed-script tokens only score when
    // the text carries adversarial intent and is not a language selector.
    if !out.normalization.suspicious_tokens.is_empty() && !language_list_like {
        let has_intent = HIGH_RISK_INTENT_FLAGS
            .iter()
            .any(|f| out.flags.iter().any(|g| g == f));
        if has_intent {
            out.score += 3;
            push_flag(&mut out.flags, "confusable_mixed_script");
            for token in &out.normalization.suspicious_tokens {
                let span = text.find(token.as_str()).map(|s| (s, s + token.len()));
                evidence.push(EvidenceMatch {
                    flag: "confusable_mixed_script".to_string(),
                    detector: Detector::Normalization,
                    basis: MatchBasis::Raw,
                    start: span.map(|(s, _)| s),
                    end: span.map(|(_, e)| e),
                    matched_text: token.clone(),
                    excerpt: span
                        .map(|(s, e)| excerpt(text, s, e))
                        .unwrap_or_else(|| token.clone()),
                    weight: 3,
                    notes: Some("token mixes Latin with confusable Cyrillic/Greek".to_string()),
                });
            }
        }
    }
    if language_list_like {
        out.allow_signals.push("language_exception".to_string());
    }

    out.evidence = assemble_evidence(evidence);
    out
}

fn push_flag(flags: &mut Vec<String>, flag: &str) {
    if !flags.iter().any(|f| f == flag) {
        flags.push(flag.to_string());
    }
}

#[allow(clippy::too_many_arguments)]
fn span_evidence(
    flag: &str,
    detector: Detector,
    basis: MatchBasis,
    target: &str,
    start: usize,
    end: usize,
    weight: u32,
    notes: Option<String>,
) -> EvidenceMatch {
    EvidenceMatch {
        flag: flag.to_string(),
        detector,
        basis,
        start: Some(start),
        end: Some(end),
        matched_text: clip_chars(&target[start..end], MATCHED_TEXT_MAX_CHARS),
        excerpt: excerpt(target, start, end),
        weight,
        notes,
    }
}

fn clip_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn excerpt(target: &str, start: usize, end: usize) -> String {
    let from = floor_char_boundary(target, start.saturating_sub(EXCERPT_CONTEXT_BYTES));
    let to = ceil_char_boundary(target, (end + EXCERPT_CONTEXT_BYTES).min(target.len()));
    clip_chars(target[from..to].trim(), MATCHED_TEXT_MAX_CHARS * 2)
}

/// (token, keyword, start, end) per matched token occurrence. Exact keyword
/// occurrences are left to the rules table; this detector only reports
/// scrambled or lightly edited variants.
fn typoglycemia_matches(normalized: &str) -> Vec<(String, &'static str, usize, usize)> {
    let mut found = Vec::new();
    for m in TYPO_TOKEN.find_iter(normalized) {
        let token = m.as_str();
        for k in TYPOGLYCEMIA_KEYWORDS {
            if token == *k || token.len() != k.len() {
                continue;
            }
            let (tb, kb) = (token.as_bytes(), k.as_bytes());
            if tb[0] != kb[0] || tb[tb.len() - 1] != kb[kb.len() - 1] {
                continue;
            }
            let anagram = sorted_middle(token) == sorted_middle(k);
            if anagram || damerau_levenshtein(token, k) <= 2 {
                found.push((token.to_string(), *k, m.start(), m.end()));
                break;
            }
        }
    }
    found
}

fn sorted_middle(s: &str) -> Vec<u8> {
    let b = s.as_bytes();
    if b.len() <= 2 {
        return Vec::new();
    }
    let mut mid = b[1..b.len() - 1].to_vec();
    mid.sort_unstable();
    mid
}

/// Restricted Damerau-Levenshtein (optimal string alignment) over bytes;
/// inputs here are ASCII lowercase tokens.
pub fn damerau_levenshtein(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut prev2: Vec<usize> = vec![0; m + 1];
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut cur: Vec<usize> = vec![0; m + 1];

    for i in 1..=n {
        cur[0] = i;
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                cur[j] = cur[j].min(prev2[j - 2] + 1);
            }
        }
        std::mem::swap(&mut prev2, &mut prev);
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[m]
}

fn score_encoding_signals(raw: &str, out: &mut ScoreOutcome, evidence: &mut Vec<EvidenceMatch>) {
    let p = &*ENCODING;
    let base64_count = p.base64.find_iter(raw).count();
    let hex_count = p.hex.find_iter(raw).count();
    let percent_count = p.percent.find_iter(raw).count();
    let unicode_count = p.unicode_escape.find_iter(raw).count();
    let byte_count = p.byte_escape.find_iter(raw).count();

    let escape_count = percent_count + unicode_count + byte_count;
    let payload_count = base64_count + hex_count + escape_count;
    if payload_count == 0 {
        return;
    }

    out.score += 1;
    push_flag(&mut out.flags, "encoded_payload_candidate");
    for re in [&p.base64, &p.hex, &p.percent, &p.unicode_escape, &p.byte_escape] {
        for m in re.find_iter(raw).take(2) {
            evidence.push(span_evidence(
                "encoded_payload_candidate",
                Detector::Encoding,
                MatchBasis::Raw,
                raw,
                m.start(),
                m.end(),
                1,
                None,
            ));
        }
    }

    if escape_count > 0 {
        push_flag(&mut out.flags, "escape_sequence_obfuscation");
    }
    if let Some(m) = p.decode_context.find(raw) {
        out.score += 2;
        push_flag(&mut out.flags, "decode_instruction_context");
        evidence.push(span_evidence(
            "decode_instruction_context",
            Detector::Encoding,
            MatchBasis::Raw,
            raw,
            m.start(),
            m.end(),
            2,
            None,
        ));
    }
    if escape_count >= 2 {
        out.score += 1;
    }
    if base64_count + hex_count >= 2 {
        out.score += 1;
    }
}

fn assemble_evidence(mut evidence: Vec<EvidenceMatch>) -> Vec<EvidenceMatch> {
    evidence.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.flag.cmp(&b.flag))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.matched_text.cmp(&b.matched_text))
    });
    evidence.dedup_by(|a, b| {
        a.flag == b.flag
            && a.detector == b.detector
            && a.basis == b.basis
            && a.start == b.start
            && a.end == b.end
            && a.matched_text == b.matched_text
    });
    evidence.truncate(EVIDENCE_CAP);
    evidence
}
