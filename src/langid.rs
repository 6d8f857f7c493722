//! Rule-based language identification and target-language plausibility.
//!
//! Both are Unicode-range heuristics over a bounded sample. They back up the
//! model-based detection prompt and gate the wrong-language retry.

/// Sample size for rule-based detection (code points).
const DETECTION_SAMPLE: usize = 500;

#[derive(Debug, Default)]
struct CharCounts {
    cjk: usize,
    hiragana: usize,
    katakana: usize,
    hangul: usize,
    latin: usize,
    total: usize,
}

fn count_classes(sample: impl Iterator<Item = char>) -> CharCounts {
    let mut counts = CharCounts::default();
    for c in sample {
        counts.total += 1;
        match c {
            '\u{4e00}'..='\u{9fff}' => counts.cjk += 1,
            '\u{3040}'..='\u{309f}' => counts.hiragana += 1,
            '\u{30a0}'..='\u{30ff}' => counts.katakana += 1,
            '\u{ac00}'..='\u{d7af}' => counts.hangul += 1,
            'a'..='z' | 'A'..='Z' => counts.latin += 1,
            _ => {}
        }
    }
    counts
}

/// Detect the language of `text` from character ranges alone.
///
/// Returns `(code, confidence)`, or `None` for empty input. The thresholds
/// favour CJK scripts first since Latin letters are common in mixed text.
pub fn rule_based_detection(text: &str) -> Option<(&'static str, f64)> {
    let counts = count_classes(text.chars().take(DETECTION_SAMPLE));
    if counts.total == 0 {
        return None;
    }

    let total = counts.total as f64;
    if (counts.hiragana + counts.katakana) as f64 / total > 0.1 {
        return Some(("ja", 0.7));
    }
    if counts.hangul as f64 / total > 0.1 {
        return Some(("ko", 0.7));
    }
    if counts.cjk as f64 / total > 0.3 {
        return Some(("zh-TW", 0.6));
    }
    if counts.latin as f64 / total > 0.5 {
        return Some(("en", 0.6));
    }

    Some(("zh-TW", 0.5))
}

/// Does `text` plausibly look like the target language?
///
/// Only English and Chinese have reliable single-range signatures; other
/// targets are accepted as-is.
pub fn looks_like_target(text: &str, target_code: &str) -> bool {
    let counts = count_classes(text.chars());
    match target_code {
        "en" => counts.latin >= 3 && counts.latin >= counts.cjk,
        "zh-TW" | "zh-CN" => counts.cjk >= 3 && counts.cjk >= counts.latin,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_japanese_by_kana() {
        let (code, conf) = rule_based_detection("これはテストです").unwrap();
        assert_eq!(code, "ja");
        assert!((conf - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn detects_korean_by_hangul() {
        let (code, _) = rule_based_detection("안녕하세요 세계").unwrap();
        assert_eq!(code, "ko");
    }

    #[test]
    fn detects_chinese_by_cjk() {
        let (code, conf) = rule_based_detection("這是一段繁體中文測試文字").unwrap();
        assert_eq!(code, "zh-TW");
        assert!((conf - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn detects_english_by_latin() {
        let (code, _) = rule_based_detection("Hello, world! This is a test.").unwrap();
        assert_eq!(code, "en");
    }

    #[test]
    fn kana_wins_over_shared_cjk_ideographs() {
        // Japanese text mixes kanji (CJK range) with kana; kana decides.
        let (code, _) = rule_based_detection("日本語のテキストです。漢字も含む。").unwrap();
        assert_eq!(code, "ja");
    }

    #[test]
    fn punctuation_only_defaults_to_chinese_low_confidence() {
        let (code, conf) = rule_based_detection("!?!? 1234 ...").unwrap();
        assert_eq!(code, "zh-TW");
        assert!((conf - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_input_detects_nothing() {
        assert!(rule_based_detection("").is_none());
    }

    #[test]
    fn plausibility_for_english() {
        assert!(looks_like_target("Hello there", "en"));
        assert!(!looks_like_target("你好世界", "en"));
        assert!(!looks_like_target("ab", "en"));
    }

    #[test]
    fn plausibility_for_chinese() {
        assert!(looks_like_target("你好，世界！", "zh-TW"));
        assert!(looks_like_target("你好，世界！", "zh-CN"));
        assert!(!looks_like_target("Hello world", "zh-TW"));
    }

    #[test]
    fn mixed_text_compares_dominant_script() {
        // More CJK than Latin: plausible Chinese, implausible English.
        let text = "翻譯結果如下 ok";
        assert!(looks_like_target(text, "zh-TW"));
        assert!(!looks_like_target(text, "en"));
    }

    #[test]
    fn other_targets_always_accepted() {
        assert!(looks_like_target("whatever", "fr"));
        assert!(looks_like_target("", "de"));
    }
}
