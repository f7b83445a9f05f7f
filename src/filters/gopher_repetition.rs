//! Gopher repetition filter.
//!
//! Default thresholds follow Table A1 of "Scaling Language Models: Methods,
//! Analysis & Insights from Training Gopher" (Rae et al., 2021):
//!
//! | heuristic                              | max  |
//! |----------------------------------------|------|
//! | duplicate line fraction                | 0.30 |
//! | duplicate paragraph fraction           | 0.30 |
//! | duplicate line character fraction      | 0.20 |
//! | duplicate paragraph character fraction | 0.20 |
//! | top 2/3/4-gram character fraction      | 0.20 / 0.18 / 0.16 |
//! | duplicate 5..10-gram character fraction| 0.15 .. 0.10 |

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::data::Document;
use crate::filters::text::{split_into_words, Language};
use crate::filters::{Filter, FilterResult, ThresholdMap};
use crate::{Error, Result};

/// One `(n, max_fraction)` entry of an n-gram check. `None` records without dropping.
pub type NGramThreshold = (usize, Option<f64>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GopherRepetitionConfig {
    pub dup_line_frac: Option<f64>,
    pub dup_para_frac: Option<f64>,
    pub dup_line_char_frac: Option<f64>,
    pub dup_para_char_frac: Option<f64>,
    pub top_n_grams: Vec<NGramThreshold>,
    pub dup_n_grams: Vec<NGramThreshold>,
    pub language: Language,
}

impl Default for GopherRepetitionConfig {
    fn default() -> Self {
        Self {
            dup_line_frac: Some(0.3),
            dup_para_frac: Some(0.3),
            dup_line_char_frac: Some(0.2),
            dup_para_char_frac: Some(0.2),
            top_n_grams: vec![(2, Some(0.2)), (3, Some(0.18)), (4, Some(0.16))],
            dup_n_grams: vec![
                (5, Some(0.15)),
                (6, Some(0.14)),
                (7, Some(0.13)),
                (8, Some(0.12)),
                (9, Some(0.11)),
                (10, Some(0.10)),
            ],
            language: Language::English,
        }
    }
}

impl GopherRepetitionConfig {
    /// Every heuristic computed and recorded, none of them dropping.
    pub fn record_only() -> Self {
        let defaults = Self::default();
        Self {
            dup_line_frac: None,
            dup_para_frac: None,
            dup_line_char_frac: None,
            dup_para_char_frac: None,
            top_n_grams: defaults.top_n_grams.iter().map(|(n, _)| (*n, None)).collect(),
            dup_n_grams: defaults.dup_n_grams.iter().map(|(n, _)| (*n, None)).collect(),
            language: defaults.language,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("dup_line_frac", self.dup_line_frac),
            ("dup_para_frac", self.dup_para_frac),
            ("dup_line_char_frac", self.dup_line_char_frac),
            ("dup_para_char_frac", self.dup_para_char_frac),
        ];
        let n_grams = self
            .top_n_grams
            .iter()
            .map(|(n, t)| (format!("top_{n}_gram"), *n, *t))
            .chain(
                self.dup_n_grams
                    .iter()
                    .map(|(n, t)| (format!("duplicated_{n}_n_grams"), *n, *t)),
            );

        for (name, value) in fractions {
            check_fraction(name, value)?;
        }
        for (name, n, value) in n_grams {
            if n == 0 {
                return Err(Error::Config(format!("{name}: n must be >= 1")));
            }
            check_fraction(&name, value)?;
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(Error::Config(format!(
            "{name} must be a fraction in [0, 1], got {v}"
        ))),
        _ => Ok(()),
    }
}

pub struct GopherRepetitionFilter {
    config: GopherRepetitionConfig,
    paragraph_exp: Regex,
    line_exp: Regex,
}

impl GopherRepetitionFilter {
    pub fn new(config: GopherRepetitionConfig) -> Result<Self> {
        config.validate()?;
        let paragraph_exp =
            Regex::new(r"\n{2,}").map_err(|e| Error::Config(format!("paragraph regex: {e}")))?;
        let line_exp =
            Regex::new(r"\n+").map_err(|e| Error::Config(format!("line regex: {e}")))?;
        Ok(Self {
            config,
            paragraph_exp,
            line_exp,
        })
    }

    pub fn config(&self) -> &GopherRepetitionConfig {
        &self.config
    }

    /// Run every heuristic in order, stopping at the first violated threshold.
    /// Returns the recorded ratios and the violated heuristic, if any.
    pub fn evaluate(&self, text: &str) -> (ThresholdMap, Option<String>) {
        let mut values = ThresholdMap::new();
        let text_len = text.chars().count();

        // A split always yields at least one element, so the counts below are never zero.
        let paragraphs: Vec<&str> = self.paragraph_exp.split(text.trim()).collect();
        let (para_dups, para_dup_chars) = find_duplicates(&paragraphs);

        let checks = [
            (
                "dup_para_frac",
                para_dups as f64 / paragraphs.len() as f64,
                self.config.dup_para_frac,
            ),
            (
                "dup_para_char_frac",
                char_fraction(para_dup_chars, text_len),
                self.config.dup_para_char_frac,
            ),
        ];
        for (name, ratio, max) in checks {
            if let Some(reason) = record(&mut values, name, ratio, max) {
                return (values, Some(reason));
            }
        }

        let lines: Vec<&str> = self.line_exp.split(text).collect();
        let (line_dups, line_dup_chars) = find_duplicates(&lines);

        let checks = [
            (
                "dup_line_frac",
                line_dups as f64 / lines.len() as f64,
                self.config.dup_line_frac,
            ),
            (
                "dup_line_char_frac",
                char_fraction(line_dup_chars, text_len),
                self.config.dup_line_char_frac,
            ),
        ];
        for (name, ratio, max) in checks {
            if let Some(reason) = record(&mut values, name, ratio, max) {
                return (values, Some(reason));
            }
        }

        let words = split_into_words(text, self.config.language);

        for &(n, max) in &self.config.top_n_grams {
            let n_grams = get_n_grams(&words, n);
            let Some((top_chars, count)) = find_top_duplicate(&n_grams) else {
                continue;
            };
            if count <= 1 {
                continue;
            }
            let name = format!("top_{n}_gram");
            if let Some(reason) = record(&mut values, &name, char_fraction(top_chars, text_len), max) {
                return (values, Some(reason));
            }
        }

        for &(n, max) in &self.config.dup_n_grams {
            let repeated_chars = find_all_duplicate(&words, n);
            let name = format!("duplicated_{n}_n_grams");
            if let Some(reason) =
                record(&mut values, &name, char_fraction(repeated_chars, text_len), max)
            {
                return (values, Some(reason));
            }
        }

        (values, None)
    }
}

impl Filter for GopherRepetitionFilter {
    fn name(&self) -> &str {
        "gopher_repetition"
    }

    fn filter(&self, doc: &mut Document) -> Result<FilterResult> {
        let (values, violated) = self.evaluate(&doc.text);
        Ok((violated.is_none(), values, violated).into())
    }
}

/// Store `ratio` under `name`; return the name as drop reason when it exceeds `max`.
fn record(values: &mut ThresholdMap, name: &str, ratio: f64, max: Option<f64>) -> Option<String> {
    values.insert(name.to_string(), ratio);
    match max {
        Some(max) if ratio > max => Some(name.to_string()),
        _ => None,
    }
}

fn char_fraction(chars: usize, text_len: usize) -> f64 {
    if text_len == 0 {
        0.0
    } else {
        chars as f64 / text_len as f64
    }
}

/// Count elements that repeat an earlier element, and their total character length.
fn find_duplicates(items: &[&str]) -> (usize, usize) {
    let mut seen = HashSet::with_capacity(items.len());
    let mut duplicate_elements = 0;
    let mut duplicate_chars = 0;
    for item in items {
        if !seen.insert(*item) {
            duplicate_elements += 1;
            duplicate_chars += item.chars().count();
        }
    }
    (duplicate_elements, duplicate_chars)
}

fn get_n_grams(words: &[&str], n: usize) -> Vec<String> {
    if n == 0 || words.len() < n {
        return Vec::new();
    }
    words.windows(n).map(|w| w.join(" ")).collect()
}

/// Most frequent n-gram as `(chars * count, count)`; ties go to the n-gram seen first.
fn find_top_duplicate(n_grams: &[String]) -> Option<(usize, usize)> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (idx, n_gram) in n_grams.iter().enumerate() {
        counts.entry(n_gram.as_str()).or_insert((0, idx)).0 += 1;
    }

    let (top, (count, _)) = counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })?;
    Some((top.chars().count() * count, count))
}

/// Characters covered by repeated n-grams, scanning greedily and skipping
/// ahead by `n` words on every hit so overlapping repeats are not double counted.
fn find_all_duplicate(words: &[&str], n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut unique = HashSet::new();
    let mut repeated_chars = 0;
    let mut idx = 0;
    while idx + n <= words.len() {
        let n_gram: String = words[idx..idx + n].concat();
        if unique.contains(&n_gram) {
            repeated_chars += n_gram.chars().count();
            idx += n;
        } else {
            unique.insert(n_gram);
            idx += 1;
        }
    }
    debug_assert!(repeated_chars <= words.iter().map(|w| w.chars().count()).sum::<usize>());
    repeated_chars
}
