//! German typographic quotes: `´´` toggles between „ and “.

const MARKER: &str = "´´";
const OPENING: char = '\u{201e}';
const CLOSING: char = '\u{201c}';

#[derive(Debug)]
pub struct GermanQuotes {
    opening: bool,
}

impl Default for GermanQuotes {
    fn default() -> Self {
        Self { opening: true }
    }
}

impl GermanQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace each marker, alternating opening and closing quotes across
    /// calls. Returns `None` when the text has no marker.
    pub fn replace(&mut self, text: &str) -> Option<String> {
        if !text.contains(MARKER) {
            return None;
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find(MARKER) {
            out.push_str(&rest[..pos]);
            out.push(if self.opening { OPENING } else { CLOSING });
            self.opening = !self.opening;
            rest = &rest[pos + MARKER.len()..];
        }
        out.push_str(rest);
        Some(out)
    }
}
