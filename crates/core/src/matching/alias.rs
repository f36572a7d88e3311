//! Enumerated options with alias matching.

use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumOption {
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl EnumOption {
    pub fn new(label: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            label: label.into(),
            aliases: aliases.iter().map(|alias| (*alias).to_string()).collect(),
        }
    }
}

/// Strength of a single alias hit; later variants win.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchKind {
    Substring,
    Boundary,
    Exact,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasHit<'a> {
    pub label: &'a str,
    pub alias: &'a str,
    pub kind: MatchKind,
}

#[derive(Clone, Debug)]
struct AliasPattern {
    text: String,
    char_len: usize,
    boundary: Regex,
    // Aliases without ASCII letters or digits have no word boundary to anchor on.
    bare_substring: bool,
}

impl AliasPattern {
    fn compile(raw: &str) -> Result<Option<Self>, regex::Error> {
        let text = raw.trim().to_lowercase();
        if text.is_empty() {
            return Ok(None);
        }
        let boundary =
            Regex::new(&format!(r"(?:^|[^a-z0-9])({})(?:$|[^a-z0-9])", regex::escape(&text)))?;
        let bare_substring = !text.chars().any(|ch| ch.is_ascii_alphanumeric());
        Ok(Some(Self { char_len: text.chars().count(), text, boundary, bare_substring }))
    }

    fn first_match(&self, text: &str) -> Option<MatchKind> {
        if text == self.text {
            return Some(MatchKind::Exact);
        }
        if self.boundary.is_match(text) {
            return Some(MatchKind::Boundary);
        }
        if self.bare_substring && text.contains(&self.text) {
            return Some(MatchKind::Substring);
        }
        None
    }

    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        if text == self.text {
            return vec![0..text.len()];
        }
        let mut spans: Vec<Range<usize>> = self
            .boundary
            .captures_iter(text)
            .filter_map(|captures| captures.get(1).map(|found| found.range()))
            .collect();
        if self.bare_substring {
            for (start, found) in text.match_indices(&self.text) {
                let span = start..start + found.len();
                if !spans.contains(&span) {
                    spans.push(span);
                }
            }
        }
        spans
    }
}

/// One canonical option with its compiled label and alias patterns.
#[derive(Clone, Debug)]
pub struct CompiledOption {
    label: String,
    patterns: Vec<AliasPattern>,
    alias_count: usize,
}

impl CompiledOption {
    fn compile(option: &EnumOption) -> Result<Self, regex::Error> {
        let mut patterns = Vec::with_capacity(option.aliases.len() + 1);
        for alias in &option.aliases {
            if let Some(pattern) = AliasPattern::compile(alias)? {
                patterns.push(pattern);
            }
        }
        let alias_count = patterns.len();
        if let Some(label) = AliasPattern::compile(&option.label)? {
            if !patterns.iter().any(|pattern| pattern.text == label.text) {
                patterns.push(label);
            }
        }
        Ok(Self { label: option.label.clone(), patterns, alias_count })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> + '_ {
        self.patterns[..self.alias_count].iter().map(|pattern| pattern.text.as_str())
    }

    fn best_hit(&self, text: &str, weak: &[String]) -> Option<(&AliasPattern, MatchKind)> {
        let mut best: Option<(&AliasPattern, MatchKind)> = None;
        for pattern in &self.patterns {
            if weak.iter().any(|entry| entry.trim().to_lowercase() == pattern.text) {
                continue;
            }
            let Some(kind) = pattern.first_match(text) else { continue };
            let better = match best {
                None => true,
                Some((current, current_kind)) => {
                    (pattern.char_len, kind) > (current.char_len, current_kind)
                }
            };
            if better {
                best = Some((pattern, kind));
            }
        }
        best
    }
}

/// The full option list behind one enumeration key.
#[derive(Clone, Debug)]
pub struct EnumTable {
    key: String,
    options: Vec<CompiledOption>,
}

impl EnumTable {
    pub fn compile(key: impl Into<String>, options: &[EnumOption]) -> Result<Self, regex::Error> {
        let options =
            options.iter().map(CompiledOption::compile).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { key: key.into(), options })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.options.iter().any(|option| option.label == label)
    }

    pub fn view(&self) -> OptionView<'_> {
        OptionView { options: self.options.iter().collect() }
    }

    /// Only the options whose label is in `allowed`, keeping table order.
    pub fn restricted(&self, allowed: &[String]) -> OptionView<'_> {
        OptionView {
            options: self
                .options
                .iter()
                .filter(|option| allowed.iter().any(|label| label == &option.label))
                .collect(),
        }
    }
}

/// An ordered subset of an [`EnumTable`], as presented to the user.
#[derive(Clone, Debug)]
pub struct OptionView<'a> {
    options: Vec<&'a CompiledOption>,
}

impl<'a> OptionView<'a> {
    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn labels(&self) -> Vec<&'a str> {
        self.options.iter().map(|option| option.label()).collect()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.options.iter().any(|option| option.label == label)
    }

    /// 1-based positional pick. Zero, negatives and anything past the end yield `None`.
    pub fn select(&self, number: i64) -> Option<&'a str> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.options.get(index).map(|option| option.label())
    }

    /// Best lexical hit in `text`: longest alias first, exact equality breaking ties.
    /// Aliases listed in `weak` are ignored here.
    pub fn best_alias_match(&self, text: &str, weak: &[String]) -> Option<AliasHit<'a>> {
        let text = normalize(text);
        if text.is_empty() {
            return None;
        }
        let mut best: Option<(&'a CompiledOption, &'a AliasPattern, MatchKind)> = None;
        for &option in &self.options {
            let Some((pattern, kind)) = option.best_hit(&text, weak) else { continue };
            let better = match best {
                None => true,
                Some((_, current, current_kind)) => {
                    (pattern.char_len, kind) > (current.char_len, current_kind)
                }
            };
            if better {
                best = Some((option, pattern, kind));
            }
        }
        best.map(|(option, pattern, kind)| AliasHit {
            label: option.label(),
            alias: pattern.text.as_str(),
            kind,
        })
    }

    /// Every canonical label mentioned in `text`.
    ///
    /// A label whose every hit lies strictly inside a longer hit of another label is
    /// dropped, so "m3 pro" names only `M3 Pro`.
    pub fn collect_matches(&self, text: &str) -> Vec<&'a str> {
        let text = normalize(text);
        if text.is_empty() {
            return Vec::new();
        }

        let hits: Vec<(&'a str, Vec<Range<usize>>)> = self
            .options
            .iter()
            .filter_map(|&option| {
                let spans: Vec<Range<usize>> =
                    option.patterns.iter().flat_map(|pattern| pattern.spans(&text)).collect();
                (!spans.is_empty()).then(|| (option.label(), spans))
            })
            .collect();

        let mut labels: Vec<&'a str> = Vec::new();
        for (index, (label, spans)) in hits.iter().enumerate() {
            let shadowed = spans.iter().all(|span| {
                hits.iter().enumerate().any(|(other_index, (_, other_spans))| {
                    other_index != index
                        && other_spans.iter().any(|other| strictly_contains(other, span))
                })
            });
            if !shadowed && !labels.contains(label) {
                labels.push(*label);
            }
        }
        labels
    }

    /// Maps a free value onto a canonical label: label equality, alias equality,
    /// then the longest boundary hit.
    pub fn canonicalize(&self, value: &str) -> Option<&'a str> {
        let normalized = normalize(value);
        if normalized.is_empty() {
            return None;
        }
        if let Some(option) =
            self.options.iter().find(|option| option.label.to_lowercase() == normalized)
        {
            return Some(option.label());
        }
        if let Some(option) = self
            .options
            .iter()
            .find(|option| option.patterns.iter().any(|pattern| pattern.text == normalized))
        {
            return Some(option.label());
        }
        self.best_alias_match(&normalized, &[]).map(|hit| hit.label)
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn strictly_contains(outer: &Range<usize>, inner: &Range<usize>) -> bool {
    outer.start <= inner.start && inner.end <= outer.end && outer.len() > inner.len()
}

#[cfg(test)]
mod tests {
    use super::{EnumOption, EnumTable, MatchKind};

    fn chip_table() -> EnumTable {
        EnumTable::compile(
            "chip",
            &[
                EnumOption::new("M3", &["m3"]),
                EnumOption::new("M3 Pro", &["m3 pro", "pro 芯片", "m3pro"]),
                EnumOption::new("M3 Max", &["m3 max", "max 芯片", "m3max"]),
            ],
        )
        .expect("chip table")
    }

    fn color_table() -> EnumTable {
        EnumTable::compile(
            "color",
            &[
                EnumOption::new("深空灰", &["深空灰", "灰色", "灰", "深灰"]),
                EnumOption::new("银色", &["银色", "银", "银白", "白银"]),
            ],
        )
        .expect("color table")
    }

    fn storage_table() -> EnumTable {
        EnumTable::compile(
            "storage",
            &[
                EnumOption::new("512GB", &["512", "512g", "512gb"]),
                EnumOption::new("512GB 特价版", &["512", "512 特价", "特价512"]),
                EnumOption::new("1TB", &["1t", "1tb"]),
            ],
        )
        .expect("storage table")
    }

    #[test]
    fn longest_alias_wins_and_exact_beats_boundary() {
        struct Case {
            text: &'static str,
            label: Option<&'static str>,
            kind: Option<MatchKind>,
        }

        let table = chip_table();
        let cases = [
            Case { text: "M3", label: Some("M3"), kind: Some(MatchKind::Exact) },
            Case {
                text: "我要 M3 Pro 的",
                label: Some("M3 Pro"),
                kind: Some(MatchKind::Boundary),
            },
            Case { text: "来个m3max", label: Some("M3 Max"), kind: Some(MatchKind::Boundary) },
            Case { text: "m35", label: None, kind: None },
            Case { text: "随便", label: None, kind: None },
        ];

        for case in cases {
            let hit = table.view().best_alias_match(case.text, &[]);
            assert_eq!(hit.as_ref().map(|hit| hit.label), case.label, "text: {}", case.text);
            assert_eq!(hit.map(|hit| hit.kind), case.kind, "text: {}", case.text);
        }
    }

    #[test]
    fn cjk_aliases_match_next_to_latin_text() {
        let table = color_table();
        let hit = table.view().best_alias_match("要银色macbook", &[]).expect("hit");
        assert_eq!(hit.label, "银色");
        assert_eq!(hit.kind, MatchKind::Substring);

        let hit = table.view().best_alias_match("深空灰", &[]).expect("hit");
        assert_eq!(hit.kind, MatchKind::Exact);
    }

    #[test]
    fn weak_aliases_are_skipped_for_direct_matching() {
        let series = EnumTable::compile(
            "series",
            &[
                EnumOption::new("MacBook Air", &["air", "macbook air"]),
                EnumOption::new("MacBook Pro", &["pro", "macbook pro"]),
            ],
        )
        .expect("series table");
        let weak = vec!["pro".to_string(), "air".to_string()];

        assert!(series.view().best_alias_match("要 pro", &weak).is_none());
        assert_eq!(
            series.view().best_alias_match("要 macbook pro", &weak).map(|hit| hit.label),
            Some("MacBook Pro")
        );
        assert_eq!(series.view().collect_matches("pro"), vec!["MacBook Pro"]);
    }

    #[test]
    fn collect_matches_drops_labels_shadowed_by_longer_hits() {
        let table = chip_table();
        assert_eq!(table.view().collect_matches("m3 pro 就行"), vec!["M3 Pro"]);
        assert_eq!(table.view().collect_matches("m3 或者 m3 max"), vec!["M3", "M3 Max"]);
        assert!(table.view().collect_matches("都可以").is_empty());
    }

    #[test]
    fn shared_aliases_stay_ambiguous() {
        let table = storage_table();
        assert_eq!(table.view().collect_matches("512"), vec!["512GB", "512GB 特价版"]);

        let allowed = vec!["512GB".to_string(), "1TB".to_string()];
        assert_eq!(table.restricted(&allowed).collect_matches("512"), vec!["512GB"]);
    }

    #[test]
    fn numeric_selection_accepts_exactly_one_through_len() {
        let table = chip_table();
        let view = table.view();
        assert_eq!(view.select(1), Some("M3"));
        assert_eq!(view.select(3), Some("M3 Max"));
        assert_eq!(view.select(0), None);
        assert_eq!(view.select(-1), None);
        assert_eq!(view.select(4), None);
    }

    #[test]
    fn canonicalize_prefers_label_then_alias_then_boundary() {
        let table = chip_table();
        let view = table.view();
        assert_eq!(view.canonicalize("m3 PRO"), Some("M3 Pro"));
        assert_eq!(view.canonicalize("m3max"), Some("M3 Max"));
        assert_eq!(view.canonicalize("推荐 M3 Max 芯片"), Some("M3 Max"));
        assert_eq!(view.canonicalize("A17"), None);
        assert_eq!(view.canonicalize("   "), None);
    }
}
