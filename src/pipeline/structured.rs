//! 生成テキストから属性レコードを取り出す。
//!
//! 生成モデルの出力は JSON 配列の前後に説明文が付いたり、配列の括弧が欠けて
//! オブジェクトだけが並んだりする。ここでは復元戦略を順に試し、最初に
//! レコードを得られた戦略の結果を採用する。

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

static BRACE_FRAGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^{}]+\}").expect("brace fragment pattern is valid"));

/// 属性とその特徴の組。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub attribute: String,
    pub characteristic: String,
}

impl AttributeRecord {
    pub fn new(attribute: impl Into<String>, characteristic: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            characteristic: characteristic.into(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self::new(
            object.get("attribute")?.as_str()?,
            object.get("characteristic")?.as_str()?,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no structured fragment found in generated text")]
    NoStructuredFragment,
}

/// 復元戦略。失敗はエラーではなく `None` で表す。
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// レコードが1件も得られない場合は `None` を返す。
    fn recover(&self, text: &str) -> Option<Vec<AttributeRecord>>;
}

/// 整形式の `[...]` 配列を先頭から探し、最初にレコードを含むものを採用する。
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketedArray;

impl RecoveryStrategy for BracketedArray {
    fn name(&self) -> &'static str {
        "bracketed_array"
    }

    fn recover(&self, text: &str) -> Option<Vec<AttributeRecord>> {
        text.match_indices('[').find_map(|(start, _)| {
            let end = closing_bracket(&text[start..])?;
            let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text[start..=start + end])
            else {
                return None;
            };
            let records: Vec<AttributeRecord> =
                items.iter().filter_map(AttributeRecord::from_value).collect();
            (!records.is_empty()).then_some(records)
        })
    }
}

/// 入れ子のない `{...}` 断片をそれぞれ独立にパースし、失敗した断片は読み飛ばす。
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceFragments;

impl RecoveryStrategy for BraceFragments {
    fn name(&self) -> &'static str {
        "brace_fragments"
    }

    fn recover(&self, text: &str) -> Option<Vec<AttributeRecord>> {
        let records: Vec<AttributeRecord> = BRACE_FRAGMENT
            .find_iter(text)
            .filter_map(|fragment| serde_json::from_str::<Value>(fragment.as_str()).ok())
            .filter_map(|value| AttributeRecord::from_value(&value))
            .collect();
        (!records.is_empty()).then_some(records)
    }
}

/// `[` で始まる `text` の中で対応する `]` のバイト位置を返す。文字列リテラル内は無視する。
fn closing_bracket(text: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// 集約の結果。復元できなかった場合は元のテキストをそのまま保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeRendering {
    Grouped { text: String, records: usize },
    RawFallback { text: String, reason: ParseError },
}

impl AttributeRendering {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Grouped { text, .. } | Self::RawFallback { text, .. } => text,
        }
    }

    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Grouped { text, .. } | Self::RawFallback { text, .. } => text,
        }
    }

    #[must_use]
    pub fn is_grouped(&self) -> bool {
        matches!(self, Self::Grouped { .. })
    }
}

/// 復元戦略のチェーン。
pub struct StructuredRecoverer {
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Default for StructuredRecoverer {
    fn default() -> Self {
        Self::with_strategies(vec![Box::new(BracketedArray), Box::new(BraceFragments)])
    }
}

impl StructuredRecoverer {
    #[must_use]
    pub fn with_strategies(strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// 最初に成功した戦略のレコードを、(属性, 特徴) の重複を除いて初出順で返す。
    ///
    /// # Errors
    /// どの戦略もレコードを得られなかった場合は [`ParseError::NoStructuredFragment`]。
    pub fn recover(&self, text: &str) -> Result<Vec<AttributeRecord>, ParseError> {
        let (strategy, records) = self
            .strategies
            .iter()
            .find_map(|strategy| strategy.recover(text).map(|records| (strategy.name(), records)))
            .ok_or(ParseError::NoStructuredFragment)?;

        let mut seen = HashSet::new();
        let unique: Vec<AttributeRecord> = records
            .into_iter()
            .filter(|record| seen.insert(record.clone()))
            .collect();
        debug!(strategy, records = unique.len(), "structured output recovered");
        Ok(unique)
    }

    /// 属性ごとに特徴をまとめ、`属性: 特徴1; 特徴2;` の行にする。
    ///
    /// 属性は辞書順に並ぶ。復元に失敗した場合は入力をそのまま返す。
    #[must_use]
    pub fn render(&self, text: &str) -> AttributeRendering {
        match self.recover(text) {
            Ok(records) => AttributeRendering::Grouped {
                text: group_records(&records),
                records: records.len(),
            },
            Err(reason) => AttributeRendering::RawFallback {
                text: text.to_string(),
                reason,
            },
        }
    }
}

fn group_records(records: &[AttributeRecord]) -> String {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.attribute.as_str())
            .or_default()
            .push(record.characteristic.as_str());
    }
    groups
        .into_iter()
        .map(|(attribute, characteristics)| format!("{attribute}: {};", characteristics.join("; ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 既定の戦略チェーンでレコードを復元する。
///
/// # Errors
/// 構造化された断片が見つからない場合は [`ParseError::NoStructuredFragment`]。
pub fn recover_structured(text: &str) -> Result<Vec<AttributeRecord>, ParseError> {
    StructuredRecoverer::default().recover(text)
}

/// 既定の戦略チェーンで集約したテキスト。失敗時は入力そのもの。
#[must_use]
pub fn render_attributes(text: &str) -> String {
    StructuredRecoverer::default().render(text).into_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn array_surrounded_by_prose_is_recovered() {
        let text = r#"Текст: [{"attribute":"вкус","characteristic":"сладкий"}] лишний текст"#;
        assert_eq!(
            recover_structured(text).unwrap(),
            vec![AttributeRecord::new("вкус", "сладкий")]
        );
    }

    #[test]
    fn brackets_inside_strings_do_not_end_the_array() {
        let text = r#"[{"attribute":"цвет","characteristic":"ярко [очень] красный"}]"#;
        assert_eq!(
            recover_structured(text).unwrap(),
            vec![AttributeRecord::new("цвет", "ярко [очень] красный")]
        );
    }

    #[test]
    fn unusable_array_falls_through_to_the_next_one() {
        let text = r#"[1, 2] и потом [{"attribute":"запах","characteristic":"свежий"}]"#;
        assert_eq!(
            recover_structured(text).unwrap(),
            vec![AttributeRecord::new("запах", "свежий")]
        );
    }

    #[test]
    fn bare_fragments_are_parsed_independently() {
        let text = r#"{"attribute":"вкус","characteristic":"кислый"}
            {"attribute": broken}
            {"attribute":"цена","characteristic":"высокая"}"#;
        assert_eq!(
            recover_structured(text).unwrap(),
            vec![
                AttributeRecord::new("вкус", "кислый"),
                AttributeRecord::new("цена", "высокая"),
            ]
        );
    }

    #[test]
    fn duplicate_fragments_collapse_to_one_record() {
        let text = r#"{"attribute":"вкус","characteristic":"сладкий"}{"attribute":"вкус","characteristic":"сладкий"}"#;
        assert_eq!(recover_structured(text).unwrap().len(), 1);
    }

    #[rstest]
    #[case("")]
    #[case("модель ничего не вернула")]
    #[case("[не json]")]
    #[case(r#"{"attribute": 1}"#)]
    fn text_without_records_is_a_parse_error(#[case] text: &str) {
        assert_eq!(
            recover_structured(text).unwrap_err(),
            ParseError::NoStructuredFragment
        );
    }

    #[test]
    fn render_groups_by_attribute_in_sorted_order() {
        let text = r#"[
            {"attribute":"вкус","characteristic":"сладкий"},
            {"attribute":"запах","characteristic":"свежий"},
            {"attribute":"вкус","characteristic":"кислый"}
        ]"#;
        assert_eq!(
            render_attributes(text),
            "вкус: сладкий; кислый;\nзапах: свежий;"
        );
    }

    #[test]
    fn render_returns_raw_text_on_failure() {
        let rendering = StructuredRecoverer::default().render("просто текст");
        assert!(!rendering.is_grouped());
        assert_eq!(rendering.text(), "просто текст");
    }

    struct Fixed;

    impl RecoveryStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn recover(&self, _text: &str) -> Option<Vec<AttributeRecord>> {
            Some(vec![AttributeRecord::new("a", "b"), AttributeRecord::new("a", "b")])
        }
    }

    #[test]
    fn custom_strategies_are_deduplicated_too() {
        let recoverer = StructuredRecoverer::with_strategies(vec![Box::new(Fixed)]);
        assert_eq!(
            recoverer.recover("anything").unwrap(),
            vec![AttributeRecord::new("a", "b")]
        );
    }
}
