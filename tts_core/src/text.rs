/// Clean text for natural TTS speech.
///
/// Removes markdown formatting (code blocks, links, emphasis, headers, list
/// markers) and normalizes whitespace and punctuation spacing. Returns an
/// empty string when nothing speakable remains.
pub fn clean_text_for_speech(text: &str) -> String {
    let mut cleaned = text.to_string();

    // Remove fenced code blocks (diagrams are never spoken)
    while let Some(start) = cleaned.find("```") {
        match cleaned[start + 3..].find("```") {
            Some(end) => cleaned.replace_range(start..start + end + 6, " "),
            None => cleaned.truncate(start),
        }
    }

    // Inline code: keep the content, drop the backticks
    cleaned = cleaned.replace('`', "");

    // Markdown links [text](url) -> text
    let mut pos = 0;
    while let Some(offset) = cleaned[pos..].find('[') {
        let start = pos + offset;
        let Some(close) = cleaned[start..].find(']').map(|c| start + c) else {
            break;
        };
        if !cleaned[close + 1..].starts_with('(') {
            pos = close + 1;
            continue;
        }
        let Some(end) = cleaned[close..].find(')').map(|e| close + e) else {
            break;
        };
        let link_text = cleaned[start + 1..close].to_string();
        cleaned.replace_range(start..=end, &link_text);
        pos = start + link_text.len();
    }

    // Headers and list markers, line by line
    let lines: Vec<&str> = cleaned
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let trimmed = trimmed.trim_start_matches('#').trim_start();
            if let Some(rest) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| trimmed.strip_prefix("+ "))
            {
                return rest;
            }
            match trimmed.find(". ") {
                Some(num_end)
                    if num_end > 0 && trimmed[..num_end].chars().all(|c| c.is_ascii_digit()) =>
                {
                    &trimmed[num_end + 2..]
                }
                _ => trimmed,
            }
        })
        .collect();
    cleaned = lines.join("\n");

    // Emphasis markers
    for marker in ["**", "__", "~~", "*"] {
        cleaned = cleaned.replace(marker, "");
    }

    // Normalize whitespace - replace runs of spaces/newlines with a single space
    let mut result = String::with_capacity(cleaned.len());
    let mut last_was_whitespace = false;
    for ch in cleaned.chars() {
        if ch.is_whitespace() {
            if !last_was_whitespace {
                result.push(' ');
                last_was_whitespace = true;
            }
        } else {
            result.push(ch);
            last_was_whitespace = false;
        }
    }

    // Remove space before punctuation
    for punct in [",", ".", "!", "?", ";", ":"] {
        result = result.replace(&format!(" {punct}"), punct);
    }

    result.trim().to_string()
}
