//! Review splitting, normalization and stop words.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::AnalysisError;

/// 否定の助詞を直後の単語と結合したまま、4文字以上のキリル文字語を抽出する。
static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:не |ни |нет |\b)[Ё-ё]{4,}").expect("token pattern is valid")
});

/// 入力テキストを1行1レビューとして分割する。
///
/// # Errors
/// 空行を除いてレビューが1件も残らない場合は [`AnalysisError::Validation`] を返す。
pub fn split_reviews(text: &str) -> Result<Vec<String>, AnalysisError> {
    let reviews: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect();
    if reviews.is_empty() {
        return Err(AnalysisError::Validation(
            "could not extract a single review from the input text".to_string(),
        ));
    }
    Ok(reviews)
}

/// レビュー1件をトークン列の文字列へ正規化する外部コラボレーター。
///
/// 出力は元のレビューとインデックスで対応付けられる。
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str, stop_words: &StopWords) -> String;
}

/// 見出し語化を行わない既定のノーマライザ。
///
/// 小文字化した上でトークンパターンに一致する語を取り出し、否定との結合部を `_` で
/// つなぎ、末尾の語がストップワードであるトークンを捨てる。
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPatternNormalizer;

impl Normalizer for TokenPatternNormalizer {
    fn normalize(&self, text: &str, stop_words: &StopWords) -> String {
        let lowered = text.to_lowercase();
        TOKEN_PATTERN
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|token| {
                token
                    .split_whitespace()
                    .last()
                    .is_some_and(|word| !stop_words.contains(word))
            })
            .map(|token| token.replace(' ', "_"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// ストップワード集合。
#[derive(Debug, Clone, Default)]
pub struct StopWords {
    words: HashSet<String>,
}

impl StopWords {
    #[must_use]
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    /// 組み込みのロシア語リストに、任意の CSV ファイルの語を加えて読み込む。
    ///
    /// CSV が読めない場合は警告を出して組み込みリストのみで続行する。
    #[must_use]
    pub fn load(csv_path: Option<&str>) -> Self {
        let mut words: HashSet<String> = stop_words::get(stop_words::LANGUAGE::Russian)
            .into_iter()
            .collect();
        let builtin = words.len();

        if let Some(path) = csv_path {
            match read_csv_words(Path::new(path)) {
                Ok(extra) => words.extend(extra),
                Err(error) => {
                    warn!(path, error = %error, "failed to read stop words file, using built-in list");
                }
            }
        }

        info!(builtin, total = words.len(), "stop words loaded");
        Self { words }
    }

    #[must_use]
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// `word` 列を持つ CSV から語を読み込む。
fn read_csv_words(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut lines = content.lines();
    let header = lines.next().context("stop words file is empty")?;
    let column = header
        .split(',')
        .position(|name| name.trim() == "word")
        .context("stop words file has no `word` column")?;

    Ok(lines
        .filter_map(|line| line.split(',').nth(column))
        .map(|word| word.trim().trim_matches('"').to_lowercase())
        .filter(|word| !word.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn split_trims_and_drops_blank_lines() {
        let reviews = split_reviews("  первый отзыв \n\n\t\nвторой отзыв\r\n").unwrap();
        assert_eq!(reviews, vec!["первый отзыв", "второй отзыв"]);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\n \n\t\n")]
    fn split_rejects_blank_input(#[case] input: &str) {
        let error = split_reviews(input).unwrap_err();
        assert!(matches!(error, AnalysisError::Validation(_)));
    }

    #[rstest]
    #[case("Очень вкусный сок", "очень вкусный")]
    #[case("Сок не вкусный совсем", "не_вкусный совсем")]
    #[case("Нет запаха, ни капли сахара", "нет_запаха ни_капли сахара")]
    #[case("ok, 5 stars", "")]
    fn normalizer_extracts_cyrillic_tokens(#[case] input: &str, #[case] expected: &str) {
        let normalized = TokenPatternNormalizer.normalize(input, &StopWords::default());
        assert_eq!(normalized, expected);
    }

    #[test]
    fn normalizer_drops_stop_words_by_last_word() {
        let stop_words = StopWords::from_words(["очень", "совсем"]);
        let normalized = TokenPatternNormalizer.normalize("Очень вкусный, не совсем", &stop_words);
        assert_eq!(normalized, "вкусный");
    }

    #[test]
    fn load_merges_csv_words_with_builtin_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,word").unwrap();
        writeln!(file, "1,Товар").unwrap();
        writeln!(file, "2,покупка").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let stop_words = StopWords::load(Some(&path));

        assert!(stop_words.contains("товар"));
        assert!(stop_words.contains("покупка"));
        assert!(stop_words.len() > 2);
    }

    #[test]
    fn load_survives_missing_file() {
        let stop_words = StopWords::load(Some("/nonexistent/stop_words.csv"));
        assert!(!stop_words.is_empty());
    }
}
