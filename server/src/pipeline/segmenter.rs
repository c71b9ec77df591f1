use tracing::debug;

use super::SentenceUnit;

/// Tokens whose trailing period never ends a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "mt.", "etc.", "e.g.", "i.e.",
    "vs.", "approx.", "fig.", "no.", "cf.",
];

/// Incremental sentence splitter.
///
/// Holds the text that has not been terminated yet plus a counter of emitted
/// sentences. A boundary is a run of `.`, `!` or `?` (optionally followed by
/// closing quotes or brackets) that is followed by whitespace and then an
/// uppercase letter, unless the period closes a known abbreviation or an
/// initial. Punctuation at the very end of the buffer is undecided until
/// more text arrives or the stream is flushed.
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    next_index: usize,
    min_flush_chars: usize,
}

impl SentenceSegmenter {
    pub fn new(min_flush_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            next_index: 0,
            min_flush_chars,
        }
    }

    /// Append a fragment, returning every sentence it completed, in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(fragment);

        let mut units = Vec::new();
        while let Some(end) = find_boundary(&self.buffer) {
            let sentence = self.buffer[..end].trim().to_string();
            let rest = self.buffer[end..].trim_start().to_string();
            self.buffer = rest;
            if sentence.chars().any(char::is_alphabetic) {
                units.push(self.emit(sentence));
            } else if !sentence.is_empty() {
                debug!(sentence = %sentence, "dropping sentence without words");
            }
        }
        units
    }

    /// Drain the buffered tail once the source has ended.
    ///
    /// The tail is emitted only if it has alphabetic content and reaches the
    /// minimum length; otherwise it is dropped. The buffer is empty afterwards,
    /// so a second flush never emits anything.
    pub fn flush(&mut self) -> Option<SentenceUnit> {
        let rest = std::mem::take(&mut self.buffer);
        let text = rest.trim();
        if text.is_empty() {
            return None;
        }
        if text.chars().count() < self.min_flush_chars || !text.chars().any(char::is_alphabetic) {
            debug!(tail = %text, "dropping trailing fragment");
            return None;
        }
        Some(self.emit(text.to_string()))
    }

    /// Number of sentences emitted so far.
    pub fn emitted(&self) -> usize {
        self.next_index
    }

    fn emit(&mut self, text: String) -> SentenceUnit {
        let unit = SentenceUnit {
            text,
            sequence_index: self.next_index,
        };
        self.next_index += 1;
        unit
    }
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}')
}

/// Byte offset just past the first decided sentence boundary in `text`.
fn find_boundary(text: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if !is_terminal(c) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && is_terminal(chars[j].1) {
            j += 1;
        }
        let single_period = c == '.' && j == i + 1;
        while j < chars.len() && is_closer(chars[j].1) {
            j += 1;
        }

        // Nothing after the punctuation yet: more text may still arrive.
        let Some(&(end, next)) = chars.get(j) else {
            return None;
        };
        if !next.is_whitespace() {
            i = j;
            continue;
        }

        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        let Some(&(_, first)) = chars.get(k) else {
            return None;
        };

        let next_is_initial = chars.get(k + 1).is_some_and(|&(_, c)| c == '.');
        if first.is_uppercase()
            && !(single_period && closes_abbreviation(&text[..pos], next_is_initial))
        {
            return Some(end);
        }
        i = j;
    }

    None
}

/// Whether the word right before a period is an abbreviation or an initial.
///
/// A lone uppercase letter is an initial only next to a name: after a
/// capitalized word (`George W. Bush`) or before another initial
/// (`J. K. Rowling`). Otherwise it ends the sentence (`The answer is B.`).
fn closes_abbreviation(before_period: &str, next_is_initial: bool) -> bool {
    let mut words = before_period.rsplit(char::is_whitespace);
    let word = strip_openers(words.next().unwrap_or(""));

    let mut chars = word.chars();
    if let (Some(only), None) = (chars.next(), chars.next()) {
        if only.is_uppercase() {
            let after_name = words
                .find(|w| !w.is_empty())
                .and_then(|w| strip_openers(w).chars().next())
                .is_some_and(char::is_uppercase);
            return after_name || next_is_initial;
        }
    }

    let token = format!("{}.", word.to_lowercase());
    ABBREVIATIONS.contains(&token.as_str())
}

fn strip_openers(word: &str) -> &str {
    word.trim_start_matches(|c: char| matches!(c, '(' | '"' | '\'' | '[' | '\u{201c}'))
}
