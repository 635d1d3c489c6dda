pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Whitespace-delimited token count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The last `max_chars` characters of `text`, cut on a char boundary and
/// advanced to the next word start so the window never opens mid-word.
pub fn trailing_context(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window = &text[start..];
    let at_word_start = text[..start]
        .chars()
        .next_back()
        .map_or(true, char::is_whitespace);
    if at_word_start {
        return window.trim_start();
    }
    match window.find(char::is_whitespace) {
        Some(ws) if ws > 0 => window[ws..].trim_start(),
        _ => window,
    }
}

/// Splits long narration into pieces of at most `max_chars` characters,
/// preferring paragraph, then sentence, then word boundaries.
pub fn split_for_synthesis(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        if sentence.chars().count() > max_chars {
            flush(&mut current, &mut pieces);
            split_words(sentence, max_chars, &mut pieces);
            continue;
        }
        let needed = current.chars().count() + sentence.chars().count() + 1;
        if !current.is_empty() && needed > max_chars {
            flush(&mut current, &mut pieces);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    flush(&mut current, &mut pieces);
    pieces
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for paragraph in text.split("\n\n") {
        let mut start = 0;
        for (i, c) in paragraph.char_indices() {
            if matches!(c, '.' | '!' | '?' | '…') {
                let end = i + c.len_utf8();
                let next_is_space = paragraph[end..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace);
                if next_is_space {
                    push_trimmed(&paragraph[start..end], &mut out);
                    start = end;
                }
            }
        }
        push_trimmed(&paragraph[start..], &mut out);
    }
    out
}

fn push_trimmed<'a>(s: &'a str, out: &mut Vec<&'a str>) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s);
    }
}

fn split_words(sentence: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > max_chars {
            flush(&mut current, pieces);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    flush(&mut current, pieces);
}

fn flush(current: &mut String, pieces: &mut Vec<String>) {
    if !current.trim().is_empty() {
        pieces.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
