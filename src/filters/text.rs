use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Language selector for word segmentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    #[serde(alias = "en")]
    English,
    #[serde(alias = "de")]
    German,
    #[serde(alias = "fr")]
    French,
    #[serde(alias = "es")]
    Spanish,
    #[serde(alias = "pt")]
    Portuguese,
    #[serde(alias = "it")]
    Italian,
    #[serde(alias = "nl")]
    Dutch,
    #[serde(alias = "ru")]
    Russian,
    #[serde(alias = "zh")]
    Chinese,
    #[serde(alias = "ja")]
    Japanese,
    #[serde(alias = "th")]
    Thai,
}

impl Language {
    /// Languages written without spaces between words.
    pub fn is_unspaced(self) -> bool {
        matches!(self, Language::Chinese | Language::Japanese | Language::Thai)
    }
}

/// Split text into words.
///
/// Uses Unicode (UAX #29) word boundaries; whitespace segments are discarded and
/// punctuation is kept as separate tokens. For unspaced scripts, segments the
/// boundary rules leave as long runs are broken into single graphemes.
pub fn split_into_words(text: &str, language: Language) -> Vec<&str> {
    let segments = text
        .split_word_bounds()
        .filter(|segment| !segment.chars().all(char::is_whitespace));

    if !language.is_unspaced() {
        return segments.collect();
    }

    segments
        .flat_map(|segment| {
            if segment.chars().any(is_unspaced_script) {
                segment.graphemes(true).collect::<Vec<_>>()
            } else {
                vec![segment]
            }
        })
        .collect()
}

fn is_unspaced_script(c: char) -> bool {
    matches!(c as u32,
        0x0E00..=0x0E7F      // Thai
        | 0x3040..=0x30FF    // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
        | 0xFF66..=0xFF9F    // halfwidth Katakana
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_keeps_punctuation_as_tokens() {
        let words = split_into_words("Hello, world! It's fine.", Language::English);
        assert_eq!(words, vec!["Hello", ",", "world", "!", "It's", "fine", "."]);
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert!(split_into_words(" \n\t ", Language::English).is_empty());
        assert!(split_into_words("", Language::English).is_empty());
    }

    #[test]
    fn unspaced_scripts_split_per_character() {
        let words = split_into_words("カタカナ and 漢字", Language::Japanese);
        assert_eq!(words, vec!["カ", "タ", "カ", "ナ", "and", "漢", "字"]);
    }

    #[test]
    fn language_accepts_iso_codes() {
        let lang: Language = serde_yaml::from_str("ja").unwrap();
        assert_eq!(lang, Language::Japanese);
        let lang: Language = serde_yaml::from_str("english").unwrap();
        assert_eq!(lang, Language::English);
    }
}
