/// Withholds text that must never be spoken from the fragment stream:
/// fenced code blocks (diagrams) and bracketed control tags such as
/// `[LESSON_COMPLETE]`.
///
/// Fences and tags may be split across deltas, so a short tail is held back
/// until it can be classified.
#[derive(Debug, Default)]
pub(crate) struct SpokenTextFilter {
    pending: String,
    in_fence: bool,
}

const FENCE: &str = "```";
/// Longest bracketed run still considered a possible control tag.
const MAX_TAG_LEN: usize = 32;

impl SpokenTextFilter {
    /// Push a delta, returning the text that is safe to speak now.
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut out = String::new();

        loop {
            if self.in_fence {
                match self.pending.find(FENCE) {
                    Some(pos) => {
                        self.pending.drain(..pos + FENCE.len());
                        self.in_fence = false;
                    }
                    None => {
                        let cut = self.pending.len() - held_backticks(&self.pending);
                        self.pending.drain(..cut);
                        return out;
                    }
                }
                continue;
            }

            let fence = self.pending.find(FENCE);
            let tag = self.pending.find('[');
            match (fence, tag) {
                (Some(f), t) if t.map_or(true, |t| f < t) => {
                    out.push_str(&self.pending[..f]);
                    self.pending.drain(..f + FENCE.len());
                    self.in_fence = true;
                }
                (_, Some(t)) => {
                    out.push_str(&self.pending[..t]);
                    self.pending.drain(..t);
                    match self.pending.find(']') {
                        Some(end) if is_control_tag(&self.pending[..=end]) => {
                            self.pending.drain(..=end);
                        }
                        Some(end) => {
                            out.push_str(&self.pending[..=end]);
                            self.pending.drain(..=end);
                        }
                        None if self.pending.len() > MAX_TAG_LEN => {
                            out.push('[');
                            self.pending.drain(..1);
                        }
                        None => return out,
                    }
                }
                (_, None) => {
                    let cut = self.pending.len() - held_backticks(&self.pending);
                    out.push_str(&self.pending[..cut]);
                    self.pending.drain(..cut);
                    return out;
                }
            }
        }
    }

    /// Release whatever is still held once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.in_fence || is_control_tag(rest.trim()) {
            String::new()
        } else {
            rest
        }
    }
}

/// Trailing backticks that could be the start of a fence.
fn held_backticks(text: &str) -> usize {
    let trailing = text.len() - text.trim_end_matches('`').len();
    trailing.min(FENCE.len() - 1)
}

fn is_control_tag(text: &str) -> bool {
    let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) else {
        return false;
    };
    !inner.is_empty() && inner.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}
