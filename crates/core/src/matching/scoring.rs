//! Keyword/synonym scoring of free text against a small option set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default confidence below which a semantic pick is treated as no pick at all.
pub const SEMANTIC_CONFIDENCE_FLOOR: f64 = 0.25;

/// A candidate presented to a [`SemanticScorer`]. `index` is 1-based.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredOption {
    pub index: usize,
    pub label: String,
    pub keywords: Vec<String>,
    pub synonyms: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub chosen_index: Option<usize>,
    pub confidence: f64,
    pub reason: String,
}

impl ScoreResult {
    pub fn none(confidence: f64, reason: impl Into<String>) -> Self {
        Self { chosen_index: None, confidence, reason: reason.into() }
    }
}

pub trait SemanticScorer: Send + Sync {
    fn score(&self, utterance: &str, options: &[ScoredOption]) -> ScoreResult;
}

/// Points awarded per hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    /// Keyword substring hit (default: 2.0)
    pub keyword: f64,
    /// Synonym substring hit not already counted as a keyword (default: 1.0)
    pub synonym: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self { keyword: 2.0, synonym: 1.0 }
    }
}

/// Substring scorer: keywords and synonyms add points, the best option wins.
///
/// Confidence is the winning score divided by the most that option could earn from its
/// keywords alone, capped at 1.0. Picks under the floor are reported without an index.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    weights: ScoringWeights,
    confidence_floor: f64,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self { weights: ScoringWeights::default(), confidence_floor: SEMANTIC_CONFIDENCE_FLOOR }
    }
}

impl KeywordScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        Self { weights, ..Self::default() }
    }

    pub fn with_floor(mut self, confidence_floor: f64) -> Self {
        self.confidence_floor = confidence_floor;
        self
    }

    fn option_score(&self, cleaned: &str, option: &ScoredOption) -> (f64, Vec<String>) {
        let mut score = 0.0;
        let mut hits: Vec<String> = Vec::new();

        for keyword in &option.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && cleaned.contains(&keyword) {
                score += self.weights.keyword;
                hits.push(keyword);
            }
        }
        for synonym in &option.synonyms {
            let synonym = synonym.trim().to_lowercase();
            if !synonym.is_empty() && cleaned.contains(&synonym) && !hits.contains(&synonym) {
                score += self.weights.synonym;
                hits.push(synonym);
            }
        }

        (score, hits)
    }
}

impl SemanticScorer for KeywordScorer {
    fn score(&self, utterance: &str, options: &[ScoredOption]) -> ScoreResult {
        let text = utterance.trim().to_lowercase();
        if text.is_empty() {
            return ScoreResult::none(0.0, "空输入");
        }
        let cleaned: String = text
            .chars()
            .map(|ch| if matches!(ch, '!' | '！' | '?' | '？' | ',' | '，' | '。') { ' ' } else { ch })
            .collect();

        let mut best: Option<(&ScoredOption, f64, Vec<String>)> = None;
        for option in options {
            let (score, hits) = self.option_score(&cleaned, option);
            let better = match &best {
                None => score > 0.0,
                Some((_, best_score, _)) => score > *best_score,
            };
            if better {
                best = Some((option, score, hits));
            }
        }

        let Some((option, score, hits)) = best else {
            return ScoreResult::none(0.0, "无匹配");
        };

        let max_possible = match option.keywords.len() as f64 * self.weights.keyword {
            value if value > 0.0 => value,
            _ => 1.0,
        };
        let confidence = (score / max_possible).min(1.0);
        if confidence < self.confidence_floor {
            return ScoreResult::none(confidence, format!("匹配分数低({confidence:.2})"));
        }

        ScoreResult {
            chosen_index: Some(option.index),
            confidence,
            reason: format!("命中:{} 分:{score}", hits.join(",")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageOption {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// One option set, used when every `when` entry equals the current slot value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageVariant {
    #[serde(default)]
    pub when: BTreeMap<String, String>,
    pub options: Vec<StageOption>,
}

/// A semantic scoring stage whose options depend on upstream slot values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemanticStage {
    pub variants: Vec<StageVariant>,
}

impl SemanticStage {
    /// Options of the first variant matching `values`, numbered from 1.
    pub fn build_options(&self, values: &BTreeMap<String, String>) -> Vec<ScoredOption> {
        let Some(variant) = self.variants.iter().find(|variant| {
            variant.when.iter().all(|(slot, expected)| values.get(slot) == Some(expected))
        }) else {
            return Vec::new();
        };

        variant
            .options
            .iter()
            .enumerate()
            .map(|(position, option)| ScoredOption {
                index: position + 1,
                label: option.label.clone(),
                keywords: option.keywords.clone(),
                synonyms: option.synonyms.clone(),
            })
            .collect()
    }

    /// Slots named by any variant condition.
    pub fn referenced_slots(&self) -> impl Iterator<Item = &str> + '_ {
        self.variants.iter().flat_map(|variant| variant.when.keys().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{
        KeywordScorer, ScoredOption, SemanticScorer, SemanticStage, StageOption, StageVariant,
    };

    fn option(index: usize, label: &str, keywords: &[&str], synonyms: &[&str]) -> ScoredOption {
        ScoredOption {
            index,
            label: label.to_string(),
            keywords: keywords.iter().map(|entry| (*entry).to_string()).collect(),
            synonyms: synonyms.iter().map(|entry| (*entry).to_string()).collect(),
        }
    }

    fn storage_options() -> Vec<ScoredOption> {
        vec![
            option(1, "512GB", &["512", "半", "基础", "低容量"], &["五一二", "基础容量"]),
            option(2, "1TB", &["1t", "一t", "中等", "升级", "扩展"], &["一兆", "中等容量"]),
            option(3, "2TB", &["2t", "二t", "双", "更大", "最大", "高容量"], &["两t", "最大容量"]),
        ]
    }

    #[test]
    fn best_scoring_option_is_chosen_with_normalized_confidence() {
        let result = KeywordScorer::new().score("要最大的，高容量！", &storage_options());
        assert_eq!(result.chosen_index, Some(3));
        // two keywords (4 points) out of six keywords (12 points)
        assert!((result.confidence - 4.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn synonyms_already_counted_as_keywords_do_not_score_twice() {
        let options = vec![option(1, "深空灰", &["灰"], &["灰", "深灰"])];
        let result = KeywordScorer::new().score("深灰", &options);
        assert_eq!(result.chosen_index, Some(1));
        assert!((result.confidence - 1.0).abs() < 1e-9, "capped at 1.0");
    }

    #[test]
    fn weak_evidence_falls_under_the_floor() {
        let options = vec![option(
            1,
            "M3 Max",
            &["最高", "4k", "剪辑", "渲染", "重度"],
            &["最高性能", "剪辑"],
        )];
        let result = KeywordScorer::new().score("我要做视频剪辑", &options);
        assert_eq!(result.chosen_index, None);
        assert!((result.confidence - 0.2).abs() < 1e-9);
    }

    #[test]
    fn empty_or_unmatched_input_has_no_pick() {
        let scorer = KeywordScorer::new();
        assert_eq!(scorer.score("  ", &storage_options()).chosen_index, None);
        assert_eq!(scorer.score("随便看看", &storage_options()).chosen_index, None);
    }

    #[test]
    fn stage_uses_first_variant_whose_conditions_hold() {
        let stage = SemanticStage {
            variants: vec![
                StageVariant {
                    when: BTreeMap::from([
                        ("series".to_string(), "MacBook Pro".to_string()),
                        ("size".to_string(), "14寸".to_string()),
                    ]),
                    options: vec![
                        StageOption { label: "M3".into(), keywords: vec![], synonyms: vec![] },
                        StageOption { label: "M3 Pro".into(), keywords: vec![], synonyms: vec![] },
                    ],
                },
                StageVariant {
                    when: BTreeMap::from([("series".to_string(), "MacBook Pro".to_string())]),
                    options: vec![StageOption {
                        label: "M3 Max".into(),
                        keywords: vec![],
                        synonyms: vec![],
                    }],
                },
            ],
        };

        let mut values = BTreeMap::from([("series".to_string(), "MacBook Pro".to_string())]);
        let labels: Vec<String> =
            stage.build_options(&values).into_iter().map(|option| option.label).collect();
        assert_eq!(labels, vec!["M3 Max"]);

        values.insert("size".to_string(), "14寸".to_string());
        let options = stage.build_options(&values);
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].index, 2);

        values.insert("series".to_string(), "MacBook Air".to_string());
        assert!(stage.build_options(&values).is_empty());
    }
}
