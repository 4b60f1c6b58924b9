use crate::{confusables, sanitize};
use unicode_normalization::UnicodeNormalization;

/// Result of the obfuscation-normalization pass.
///
/// `transformations` records every step that changed the text, in order.
/// `signal_flags` carries the normalization signals the scorer weighs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub transformations: Vec<String>,
    pub signal_flags: Vec<String>,
    /// Tokens mixing Latin letters with confusable Cyrillic/Greek codepoints.
    pub suspicious_tokens: Vec<String>,
    /// Whether any confusable codepoint was folded to its Latin target.
    pub confusables_replaced: bool,
}

/// Invisible and bidi-control codepoints stripped by the normalizer and
/// flagged by the raw-basis `invisible_characters` rule.
pub fn is_invisible_or_bidi(c: char) -> bool {
    matches!(c,
        '\u{0000}'..='\u{0008}'
        | '\u{000b}'
        | '\u{000c}'
        | '\u{000e}'..='\u{001f}'
        | '\u{007f}'
        | '\u{200b}'..='\u{200f}'
        | '\u{202a}'..='\u{202e}'
        | '\u{2060}'
        | '\u{2066}'..='\u{2069}'
        | '\u{feff}'
    )
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn is_separator_char(c: char) -> bool {
    matches!(c, '.' | '_' | '-' | ':' | '/' | '\\' | '|')
}

/// Normalize text for scoring. Steps run in a fixed order; each is recorded
/// only when it changed the text.
pub fn normalize(input: &str) -> Normalized {
    let mut out = Normalized::default();
    let mut text = input.to_string();

    // 1. Unicode NFKC.
    let nfkc: String = text.nfkc().collect();
    if nfkc != text {
        out.transformations.push("unicode_nfkc".to_string());
        text = nfkc;
    }

    // 2. Invisible / bidi control stripping.
    let stripped: String = text.chars().filter(|&c| !is_invisible_or_bidi(c)).collect();
    if stripped != text {
        out.transformations.push("invisible_or_bidi_strip".to_string());
        out.signal_flags.push("unicode_invisible_or_bidi".to_string());
        text = stripped;
    }

    // 3. HTML entity decoding, to fixpoint so nested escaping cannot hide a
    // payload from one pass.
    let mut decoded = sanitize::decode_entities(&text);
    let mut rounds = 1;
    while decoded != sanitize::decode_entities(&decoded) && rounds < 4 {
        decoded = sanitize::decode_entities(&decoded);
        rounds += 1;
    }
    if decoded != text {
        out.transformations.push("html_entity_decode".to_string());
        text = decoded;
    }

    // 4. Confusable analysis over `[Letter|Mark|Number|_|-]+` tokens, then a
    // full fold of every known confusable to its Latin target.
    collect_suspicious_tokens(&text, &mut out.suspicious_tokens);
    let folded: String = text
        .chars()
        .map(|c| confusables::latin_target(c).unwrap_or(c))
        .collect();
    if folded != text {
        out.transformations.push("confusable_fold".to_string());
        out.confusables_replaced = true;
        text = folded;
    }

    // 5. Collapse separator runs to a space.
    let collapsed = collapse_separator_runs(&text);
    if collapsed != text {
        out.transformations.push("separator_collapse".to_string());
        text = collapsed;
    }

    // 6. Lowercase.
    let lower = text.to_lowercase();
    if lower != text {
        out.transformations.push("lowercase".to_string());
        text = lower;
    }

    // 7. Collapse Latin letters repeated four or more times to a double.
    let squeezed = collapse_letter_runs(&text);
    if squeezed != text {
        out.transformations.push("char_run_collapse".to_string());
        text = squeezed;
    }

    // 8. Whitespace normalization.
    let ws = sanitize::normalize_whitespace(&text);
    if ws != text {
        out.transformations.push("whitespace_normalize".to_string());
        text = ws;
    }

    out.text = text;
    out
}

fn collect_suspicious_tokens(text: &str, sink: &mut Vec<String>) {
    let mut token = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if is_token_char(c) {
            token.push(c);
            continue;
        }
        if !token.is_empty() {
            let has_latin = token.chars().any(confusables::is_latin_letter);
            let has_foreign = token.chars().any(confusables::is_foreign_confusable);
            if has_latin && has_foreign && !sink.contains(&token) {
                sink.push(token.clone());
            }
            token.clear();
        }
    }
}

fn collapse_separator_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    let mut run_start_char = ' ';

    for c in text.chars() {
        if is_separator_char(c) {
            if run == 0 {
                run_start_char = c;
            }
            run += 1;
            continue;
        }
        flush_separator_run(&mut out, run, run_start_char);
        run = 0;
        out.push(c);
    }
    flush_separator_run(&mut out, run, run_start_char);
    out
}

fn flush_separator_run(out: &mut String, run: usize, first: char) {
    match run {
        0 => {}
        1 => out.push(first),
        _ => out.push(' '),
    }
}

fn collapse_letter_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    let mut run = 0usize;

    for c in text.chars() {
        if Some(c) == prev && confusables::is_latin_letter(c) {
            run += 1;
        } else {
            if run >= 4 {
                trim_run_to_two(&mut out, run);
            }
            run = 1;
            prev = Some(c);
        }
        out.push(c);
    }
    if run >= 4 {
        trim_run_to_two(&mut out, run);
    }
    out
}

fn trim_run_to_two(out: &mut String, run: usize) {
    for _ in 0..run.saturating_sub(2) {
        out.pop();
    }
}
