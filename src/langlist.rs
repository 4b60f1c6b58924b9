use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Language names and autonyms as they appear in site language selectors.
/// Entries are NFKC-lowercased at build time; multi-word names match as
/// phrases of up to three tokens.
static LANGUAGE_NAMES: &[&str] = &[
    "afrikaans",
    "alemannisch",
    "aragonés",
    "armãneashti",
    "asturianu",
    "azərbaycanca",
    "bahasa indonesia",
    "bahasa melayu",
    "bosanski",
    "brezhoneg",
    "català",
    "cebuano",
    "čeština",
    "cymraeg",
    "dansk",
    "deutsch",
    "eesti",
    "english",
    "español",
    "esperanto",
    "euskara",
    "français",
    "frysk",
    "gaeilge",
    "gàidhlig",
    "galego",
    "hrvatski",
    "ido",
    "interlingua",
    "íslenska",
    "italiano",
    "kiswahili",
    "kreyòl ayisyen",
    "kurdî",
    "latina",
    "latviešu",
    "lëtzebuergesch",
    "lietuvių",
    "magyar",
    "malti",
    "nederlands",
    "norsk",
    "norsk bokmål",
    "norsk nynorsk",
    "occitan",
    "oʻzbekcha",
    "plattdüütsch",
    "polski",
    "português",
    "português do brasil",
    "română",
    "runa simi",
    "shqip",
    "simple english",
    "slovenčina",
    "slovenščina",
    "srpskohrvatski",
    "suomi",
    "svenska",
    "tagalog",
    "tiếng việt",
    "türkçe",
    "türkmençe",
    "võro",
    "walon",
    "winaray",
    "yorùbá",
    "zazaki",
    "žemaitėška",
    // Non-Latin autonyms.
    "العربية",
    "مصرى",
    "فارسی",
    "اردو",
    "עברית",
    "ייִדיש",
    "беларуская",
    "български",
    "қазақша",
    "кыргызча",
    "македонски",
    "монгол",
    "русский",
    "српски",
    "татарча",
    "тоҷикӣ",
    "українська",
    "ελληνικά",
    "հայերեն",
    "ქართული",
    "हिन्दी",
    "मराठी",
    "नेपाली",
    "বাংলা",
    "ਪੰਜਾਬੀ",
    "ગુજરાતી",
    "தமிழ்",
    "తెలుగు",
    "ಕನ್ನಡ",
    "മലയാളം",
    "සිංහල",
    "ไทย",
    "ລາວ",
    "မြန်မာဘာသာ",
    "ខ្មែរ",
    "한국어",
    "中文",
    "日本語",
    "粵語",
    "吴语",
    // English exonyms that co-occur in selector lists.
    "arabic",
    "bengali",
    "bulgarian",
    "chinese",
    "croatian",
    "czech",
    "danish",
    "dutch",
    "estonian",
    "finnish",
    "french",
    "german",
    "greek",
    "hebrew",
    "hindi",
    "hungarian",
    "indonesian",
    "italian",
    "japanese",
    "korean",
    "latvian",
    "lithuanian",
    "norwegian",
    "persian",
    "polish",
    "portuguese",
    "romanian",
    "russian",
    "serbian",
    "slovak",
    "slovenian",
    "spanish",
    "swedish",
    "thai",
    "turkish",
    "ukrainian",
    "vietnamese",
];

static CUE_PHRASES: &[&str] = &[
    "language",
    "languages",
    "choose your language",
    "select language",
    "idioma",
    "idiomas",
    "sprache",
    "sprachen",
    "langue",
    "langues",
    "язык",
    "языки",
    "语言",
    "言語",
];

static DICTIONARY: Lazy<HashSet<String>> = Lazy::new(|| {
    LANGUAGE_NAMES
        .iter()
        .map(|name| fold(name))
        .collect::<HashSet<_>>()
});

static CUE_MATCHER: Lazy<AhoCorasick> = Lazy::new(|| {
    AhoCorasick::new(CUE_PHRASES).expect("cue phrases must compile")
});

fn fold(s: &str) -> String {
    s.nfkc().collect::<String>().to_lowercase()
}

const MAX_PHRASE_TOKENS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanguageListStats {
    pub distinct_match_count: usize,
    pub matched_token_count: usize,
    pub total_token_count: usize,
    pub matched_token_ratio: f64,
    pub list_separator_count: usize,
    pub has_language_cue: bool,
}

impl LanguageListStats {
    /// The fixed classification rule for "this text is a language selector
    /// list, not an attack".
    pub fn is_language_list_like(&self) -> bool {
        let primary = self.distinct_match_count >= 4
            && self.matched_token_count >= 5
            && self.matched_token_ratio >= 0.45
            && (self.list_separator_count >= 2
                || self.matched_token_ratio >= 0.7
                || self.has_language_cue);
        let dense = self.distinct_match_count >= 8
            && self.matched_token_count >= 8
            && self.matched_token_ratio >= 0.35;
        primary || dense
    }
}

fn tokenize(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    for c in raw.chars().chain(std::iter::once(' ')) {
        if c.is_alphabetic() || matches!(c, '\u{0300}'..='\u{036f}') {
            cur.push(c);
        } else if !cur.is_empty() {
            tokens.push(fold(&cur));
            cur.clear();
        }
    }
    tokens
}

/// Run the language-list detector over raw text, merging configured extra
/// names (each NFKC-lowercased; entries outside 2..=80 chars are ignored).
pub fn detect(raw: &str, extras: &[String]) -> LanguageListStats {
    let extra_set: HashSet<String> = extras
        .iter()
        .map(|e| fold(e))
        .filter(|e| (2..=80).contains(&e.chars().count()))
        .collect();
    let known = |phrase: &str| DICTIONARY.contains(phrase) || extra_set.contains(phrase);

    let tokens = tokenize(raw);
    let mut matched_tokens = 0usize;
    let mut distinct: HashSet<String> = HashSet::new();

    // Greedy longest-phrase-first matching.
    let mut i = 0;
    while i < tokens.len() {
        let mut advanced = false;
        for len in (1..=MAX_PHRASE_TOKENS.min(tokens.len() - i)).rev() {
            let phrase = tokens[i..i + len].join(" ");
            if known(&phrase) {
                matched_tokens += len;
                distinct.insert(phrase);
                i += len;
                advanced = true;
                break;
            }
        }
        if !advanced {
            i += 1;
        }
    }

    let total = tokens.len();
    let lower = fold(raw);
    LanguageListStats {
        distinct_match_count: distinct.len(),
        matched_token_count: matched_tokens,
        total_token_count: total,
        matched_token_ratio: if total == 0 {
            0.0
        } else {
            matched_tokens as f64 / total as f64
        },
        list_separator_count: raw
            .chars()
            .filter(|c| matches!(c, ',' | '|' | ';' | '·' | '•' | '/'))
            .count(),
        has_language_cue: CUE_MATCHER.is_match(&lower),
    }
}
