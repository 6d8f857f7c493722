//! Model-output cleanup.
//!
//! Chat-tuned models decorate their answers: wrapping quotes, leading
//! dashes/arrows, echoed headers like `翻譯：` or `Translation:`, and stray
//! blank lines. The cleanup here reduces the raw generation to the bare
//! translation. Markers appearing at the start are dropped (the translation
//! follows them); markers appearing later cut the output (everything after
//! is commentary or an echo of the original).

/// Headers models prepend or append around the actual translation.
const STOP_MARKERS: [&str; 12] = [
    "譯文：",
    "譯文:",
    "翻譯：",
    "翻譯:",
    "翻譯結果：",
    "翻譯結果:",
    "原文：",
    "原文:",
    "Translation:",
    "translation:",
    "Original:",
    "original:",
];

const QUOTE_PAIRS: [(char, char); 4] = [('"', '"'), ('\'', '\''), ('“', '”'), ('「', '」')];

/// Clean a raw generation down to the translation itself.
pub fn clean_output(raw: &str) -> String {
    let mut text = raw.trim().to_owned();
    text = strip_matching_quotes(&text);
    text = strip_leading_decoration(&text);
    text = apply_stop_markers(&text);
    // Dropping a header can expose a quoted body, so strip quotes again.
    text = strip_matching_quotes(&text);
    text = drop_junk_lines(&text);
    text = collapse_blank_lines(&text);
    text.trim().to_owned()
}

/// If the input contained no newline, the output must not either: keep the
/// first non-empty line.
pub fn first_nonempty_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_owned()
}

fn strip_matching_quotes(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let mut stripped = false;
        for (open, close) in QUOTE_PAIRS {
            if current.len() >= open.len_utf8() + close.len_utf8()
                && current.starts_with(open)
                && current.ends_with(close)
            {
                current = current[open.len_utf8()..current.len() - close.len_utf8()].trim();
                stripped = true;
            }
        }
        if !stripped {
            return current.to_owned();
        }
    }
}

fn strip_leading_decoration(text: &str) -> String {
    let mut rest = text;
    loop {
        let trimmed = rest.trim_start();
        let stripped = trimmed.trim_start_matches(['-', '>', '|']);
        if stripped.len() == rest.len() {
            return rest.to_owned();
        }
        rest = stripped;
    }
}

fn apply_stop_markers(text: &str) -> String {
    let mut rest = text;

    // A marker at the very start (after whitespace) is a header: drop it and
    // keep what follows.
    loop {
        let trimmed = rest.trim_start();
        match STOP_MARKERS
            .iter()
            .find(|marker| trimmed.starts_with(**marker))
        {
            Some(marker) => rest = &trimmed[marker.len()..],
            None => break,
        }
    }

    // A marker later in the text ends the translation: truncate there.
    let cut = STOP_MARKERS
        .iter()
        .filter_map(|marker| rest.find(*marker))
        .min();
    match cut {
        Some(pos) => rest[..pos].to_owned(),
        None => rest.to_owned(),
    }
}

/// Drop lines that carry no content: purely punctuation, or a bare marker.
fn drop_junk_lines(text: &str) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return true; // blank lines are handled by the collapse pass
            }
            if STOP_MARKERS.contains(&trimmed) {
                return false;
            }
            trimmed.chars().any(char::is_alphanumeric)
        })
        .collect();
    kept.join("\n")
}

/// Collapse runs of three or more blank lines into a single blank line.
fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blanks = 0usize;
    let mut pending: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            pending.push(line);
        } else {
            if blanks >= 3 {
                out.push("");
            } else {
                out.append(&mut pending);
            }
            pending.clear();
            blanks = 0;
            out.push(line);
        }
    }
    if blanks >= 3 {
        out.push("");
    } else {
        out.append(&mut pending);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(clean_output("\"你好世界\""), "你好世界");
        assert_eq!(clean_output("'你好'"), "你好");
        assert_eq!(clean_output("「你好」"), "你好");
    }

    #[test]
    fn inner_quotes_survive() {
        assert_eq!(clean_output("他說「你好」然後離開"), "他說「你好」然後離開");
    }

    #[test]
    fn strips_leading_decoration() {
        assert_eq!(clean_output("--> 你好世界"), "你好世界");
        assert_eq!(clean_output("|| - 你好"), "你好");
    }

    #[test]
    fn marker_at_start_is_dropped() {
        assert_eq!(clean_output("翻譯：你好世界"), "你好世界");
        assert_eq!(clean_output("  Translation: Hello there"), "Hello there");
    }

    #[test]
    fn marker_later_truncates() {
        assert_eq!(clean_output("你好世界\n原文：Hello world"), "你好世界");
        assert_eq!(clean_output("Bonjour le monde Original: hello"), "Bonjour le monde");
    }

    #[test]
    fn header_then_echo_keeps_only_the_translation() {
        let raw = "譯文：你好，世界！\n\n原文：Hello, world!";
        assert_eq!(clean_output(raw), "你好，世界！");
    }

    #[test]
    fn punctuation_only_lines_are_dropped() {
        let raw = "你好世界\n！！！\n第二行";
        assert_eq!(clean_output(raw), "你好世界\n第二行");
    }

    #[test]
    fn bare_marker_line_is_dropped() {
        let raw = "你好\n翻譯：\n世界";
        assert_eq!(clean_output(raw), "你好\n世界");
    }

    #[test]
    fn blank_line_runs_collapse() {
        let raw = "段落一\n\n\n\n段落二";
        assert_eq!(clean_output(raw), "段落一\n\n段落二");
        // One or two blank lines are preserved.
        assert_eq!(clean_output("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn first_nonempty_line_picks_first_content() {
        assert_eq!(first_nonempty_line("\n\n  hello\nworld"), "hello");
        assert_eq!(first_nonempty_line(""), "");
    }

    #[test]
    fn clean_output_is_stable_on_clean_text() {
        let clean = "這是一段乾淨的譯文。";
        assert_eq!(clean_output(clean), clean);
    }
}
