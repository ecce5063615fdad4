use rustc_hash::FxHashMap;

/// 正規化済みレビュー全体で出現頻度の高いトークンを、出現回数とともに上位 `top_n` 件返す。
///
/// 同じ頻度のトークンは最初に現れた順に並ぶ。
#[must_use]
pub fn top_keywords(normalized: &[String], top_n: usize) -> Vec<(String, usize)> {
    let mut counts: FxHashMap<&str, (usize, usize)> = FxHashMap::default();
    let mut order = 0_usize;
    for token in normalized.iter().flat_map(|doc| doc.split_whitespace()) {
        let entry = counts.entry(token).or_insert_with(|| {
            order += 1;
            (0, order)
        });
        entry.0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first_seen))| (token, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(token, count, _)| (token.to_string(), count))
        .collect()
}
