/// テキスト処理ユーティリティ。
///
/// バッチのフィンガープリント計算とトークン化を提供します。
use once_cell::sync::Lazy;
use regex::Regex;
use xxhash_rust::xxh3::{Xxh3, xxh3_64};

static ANALYZER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("analyzer token pattern is valid"));

/// テキストをXXH3でハッシュする。
#[must_use]
pub fn hash_text(text: &str) -> u64 {
    xxh3_64(text.as_bytes())
}

/// 正規化済みテキストのバッチからキャッシュキーを計算する。
///
/// 順序に依存する。同じテキストでも並びが違えば別のキーになる。
/// 各テキストは長さを前置してから流し込むため、区切りの位置も区別される。
#[must_use]
pub fn batch_fingerprint(texts: &[String]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&texts.len().to_le_bytes());
    for text in texts {
        hasher.update(&text.len().to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.digest()
}

/// 2文字以上の単語トークンを小文字で取り出す。
#[must_use]
pub fn analyzer_tokens(doc: &str) -> Vec<String> {
    let lowered = doc.to_lowercase();
    ANALYZER_TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_sensitive() {
        let a = vec!["вкус сладкий".to_string(), "запах".to_string()];
        let b = vec!["запах".to_string(), "вкус сладкий".to_string()];
        assert_eq!(batch_fingerprint(&a), batch_fingerprint(&a.clone()));
        assert_ne!(batch_fingerprint(&a), batch_fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_text_boundaries() {
        let joined = vec!["a\nb".to_string()];
        let split = vec!["a".to_string(), "b".to_string()];
        let shifted = vec!["ab".to_string(), String::new()];
        assert_ne!(batch_fingerprint(&joined), batch_fingerprint(&split));
        assert_ne!(batch_fingerprint(&split), batch_fingerprint(&shifted));
        assert_ne!(batch_fingerprint(&[]), batch_fingerprint(&[String::new()]));
    }

    #[test]
    fn analyzer_keeps_underscored_negations() {
        let tokens = analyzer_tokens("Не_вкусный сок и я");
        assert_eq!(tokens, vec!["не_вкусный".to_string(), "сок".to_string()]);
    }
}
