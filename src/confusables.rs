use once_cell::sync::Lazy;
use std::collections::HashMap;
use unicode_script::{Script, UnicodeScript};

/// Cyrillic and Greek codepoints that render close enough to a Latin letter
/// to disguise keywords, mapped to the Latin target. Declared once, shared
/// read-only.
static TABLE: &[(char, char)] = &[
    // Cyrillic lowercase
    ('\u{0430}', 'a'), // а
    ('\u{0435}', 'e'), // е
    ('\u{043e}', 'o'), // о
    ('\u{0440}', 'p'), // р
    ('\u{0441}', 'c'), // с
    ('\u{0443}', 'y'), // у
    ('\u{0445}', 'x'), // х
    ('\u{0456}', 'i'), // і
    ('\u{0458}', 'j'), // ј
    ('\u{0455}', 's'), // ѕ
    ('\u{04bb}', 'h'), // һ
    ('\u{0501}', 'd'), // ԁ
    ('\u{051b}', 'q'), // ԛ
    ('\u{051d}', 'w'), // ԝ
    // Cyrillic uppercase
    ('\u{0410}', 'A'),
    ('\u{0412}', 'B'),
    ('\u{0415}', 'E'),
    ('\u{041a}', 'K'),
    ('\u{041c}', 'M'),
    ('\u{041d}', 'H'),
    ('\u{041e}', 'O'),
    ('\u{0420}', 'P'),
    ('\u{0421}', 'C'),
    ('\u{0422}', 'T'),
    ('\u{0423}', 'Y'),
    ('\u{0425}', 'X'),
    ('\u{0405}', 'S'),
    ('\u{0406}', 'I'),
    ('\u{0408}', 'J'),
    // Greek lowercase
    ('\u{03b1}', 'a'), // α
    ('\u{03b5}', 'e'), // ε
    ('\u{03b9}', 'i'), // ι
    ('\u{03ba}', 'k'), // κ
    ('\u{03bd}', 'v'), // ν
    ('\u{03bf}', 'o'), // ο
    ('\u{03c1}', 'p'), // ρ
    ('\u{03c4}', 't'), // τ
    ('\u{03c5}', 'u'), // υ
    ('\u{03c7}', 'x'), // χ
    ('\u{03c9}', 'w'), // ω
    ('\u{03f2}', 'c'), // ϲ
    // Greek uppercase
    ('\u{0391}', 'A'),
    ('\u{0392}', 'B'),
    ('\u{0395}', 'E'),
    ('\u{0396}', 'Z'),
    ('\u{0397}', 'H'),
    ('\u{0399}', 'I'),
    ('\u{039a}', 'K'),
    ('\u{039c}', 'M'),
    ('\u{039d}', 'N'),
    ('\u{039f}', 'O'),
    ('\u{03a1}', 'P'),
    ('\u{03a4}', 'T'),
    ('\u{03a5}', 'Y'),
    ('\u{03a7}', 'X'),
];

static MAP: Lazy<HashMap<char, char>> = Lazy::new(|| TABLE.iter().copied().collect());

/// The Latin letter a confusable Cyrillic/Greek codepoint imitates.
pub fn latin_target(c: char) -> Option<char> {
    MAP.get(&c).copied()
}

pub fn is_confusable(c: char) -> bool {
    MAP.contains_key(&c)
}

pub fn is_latin_letter(c: char) -> bool {
    c.is_alphabetic() && c.script() == Script::Latin
}

/// True when the codepoint is a known confusable from a non-Latin script.
pub fn is_foreign_confusable(c: char) -> bool {
    is_confusable(c) && matches!(c.script(), Script::Cyrillic | Script::Greek)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_cyrillic_and_greek_lookalikes() {
        assert_eq!(latin_target('\u{043e}'), Some('o'));
        assert_eq!(latin_target('\u{03c1}'), Some('p'));
        assert_eq!(latin_target('o'), None);
    }

    #[test]
    fn script_membership() {
        assert!(is_foreign_confusable('\u{0430}'));
        assert!(!is_foreign_confusable('a'));
        assert!(is_latin_letter('a'));
        assert!(!is_latin_letter('\u{0430}'));
    }
}
