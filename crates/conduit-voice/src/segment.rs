//! Splits streamed model text into speakable segments

const TERMINATORS: [char; 3] = ['.', '!', '?'];
const CLOSERS: [char; 6] = ['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Buffers text deltas and releases whole sentences
///
/// A sentence ends at a newline, or at `.`, `!` or `?` (plus any closing
/// quotes or brackets) once whitespace follows. Text that runs past
/// `max_chars` without a boundary is cut at the last space.
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    max_chars: usize,
}

impl SentenceSegmenter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            max_chars: max_chars.max(1),
        }
    }

    /// Append a delta and return every segment it completed
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut segments = Vec::new();
        while let Some(end) = boundary(&self.buffer).or_else(|| forced_split(&self.buffer, self.max_chars)) {
            let segment: String = self.buffer.drain(..end).collect();
            let segment = segment.trim();
            if !segment.is_empty() {
                segments.push(segment.to_owned());
            }
        }
        segments
    }

    /// Release whatever is buffered
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_owned())
    }
}

/// Byte offset just past the first complete sentence
fn boundary(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if c == '\n' {
            return Some(index + 1);
        }
        if !TERMINATORS.contains(&c) {
            continue;
        }

        let mut end = index + c.len_utf8();
        while let Some(&(next_index, next)) = chars.peek() {
            if CLOSERS.contains(&next) {
                end = next_index + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        match chars.peek() {
            Some(&(_, next)) if next.is_whitespace() => return Some(end),
            // Undecided until more text arrives ("3." may become "3.14")
            None => return None,
            Some(_) => {}
        }
    }
    None
}

/// Byte offset to cut an overlong unterminated run at
fn forced_split(text: &str, max_chars: usize) -> Option<usize> {
    let (limit, _) = text.char_indices().nth(max_chars)?;
    let head = &text[..limit];
    match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => Some(space + 1),
        _ => Some(limit),
    }
}
