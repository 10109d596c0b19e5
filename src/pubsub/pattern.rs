//! Glob patterns for PSUBSCRIBE.
//!
//! Supported syntax:
//! - `*` any run of bytes, including none
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, `[^abc]` byte classes
//! - `\x` the literal byte `x`

use bytes::Bytes;

/// A compiled-once, match-many channel pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    raw: Bytes,
}

impl Pattern {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self { raw: raw.into() }
    }

    /// The pattern as the client sent it.
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Returns true if `channel` matches the whole pattern.
    pub fn matches(&self, channel: &[u8]) -> bool {
        glob_match(&self.raw, channel)
    }
}

/// Greedy match that backtracks only to the most recent `*`, so the cost
/// is bounded by `pattern.len() * text.len()` however many stars there are.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern position after the last `*`, and the text position it resumes at.
    let mut resume: Option<(usize, usize)> = None;

    while t < text.len() {
        if pattern.get(p) == Some(&b'*') {
            p += 1;
            resume = Some((p, t));
            continue;
        }

        if let Some(width) = match_one(&pattern[p..], text[t]) {
            p += width;
            t += 1;
            continue;
        }

        match resume {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                resume = Some((star_p, t));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Matches `byte` against the single element at the start of `pattern`.
///
/// Returns how many pattern bytes the element spans.
fn match_one(pattern: &[u8], byte: u8) -> Option<usize> {
    match *pattern.first()? {
        b'?' => Some(1),
        b'[' => match class_match(&pattern[1..], byte)? {
            (true, consumed) => Some(1 + consumed),
            (false, _) => None,
        },
        b'\\' if pattern.len() > 1 => (pattern[1] == byte).then_some(2),
        literal => (literal == byte).then_some(1),
    }
}

/// Matches one byte against a class body (the part after `[`).
///
/// Returns whether it matched and how many pattern bytes the class used,
/// including the closing `]`. An unterminated class never matches.
fn class_match(class: &[u8], byte: u8) -> Option<(bool, usize)> {
    let mut i = 0;
    let negate = class.first() == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < class.len() && class[i] != b']' {
        let mut low = class[i];
        if low == b'\\' && i + 1 < class.len() {
            i += 1;
            low = class[i];
        }

        if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
            let high = class[i + 2];
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            matched |= (low..=high).contains(&byte);
            i += 3;
        } else {
            matched |= low == byte;
            i += 1;
        }
    }

    if i >= class.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, channel: &str) -> bool {
        Pattern::new(pattern.to_string()).matches(channel.as_bytes())
    }

    #[test]
    fn test_star() {
        assert!(matches("*", ""));
        assert!(matches("*", "anything"));
        assert!(matches("news.*", "news.sports"));
        assert!(matches("news.*", "news."));
        assert!(!matches("news.*", "weather.today"));
        assert!(matches("h*llo", "hllo"));
        assert!(matches("h*llo", "heeeello"));
        assert!(matches("a**b", "axxb"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("h?llo", "hello"));
        assert!(matches("h?llo", "hallo"));
        assert!(!matches("h?llo", "hllo"));
    }

    #[test]
    fn test_classes() {
        assert!(matches("h[ae]llo", "hello"));
        assert!(matches("h[ae]llo", "hallo"));
        assert!(!matches("h[ae]llo", "hillo"));
        assert!(matches("h[^e]llo", "hallo"));
        assert!(!matches("h[^e]llo", "hello"));
        assert!(matches("user:[0-9]", "user:7"));
        assert!(!matches("user:[0-9]", "user:x"));
        assert!(matches("[z-a]", "m"));
    }

    #[test]
    fn test_unterminated_class_never_matches() {
        assert!(!matches("h[ae", "ha"));
        assert!(!matches("h[ae", "h[ae"));
    }

    #[test]
    fn test_escape() {
        assert!(matches("a\\*b", "a*b"));
        assert!(!matches("a\\*b", "axb"));
        assert!(matches("[\\]]", "]"));
    }

    #[test]
    fn test_star_backtracks_past_partial_match() {
        assert!(matches("*ab", "aab"));
        assert!(matches("a*b*c", "abxbyc"));
        assert!(!matches("a*b*c", "abxbyd"));
        assert!(matches("*[0-9]?", "id-42x"));
        assert!(matches("*\\*", "star*"));
    }

    #[test]
    fn test_many_stars_stay_fast() {
        let pattern = Pattern::new("*a*a*a*a*a*a*a*b");
        let text = vec![b'a'; 20_000];

        let start = std::time::Instant::now();
        assert!(!pattern.matches(&text));
        let mut hit = text.clone();
        hit.push(b'b');
        assert!(pattern.matches(&hit));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_exact() {
        assert!(matches("news", "news"));
        assert!(!matches("news", "news2"));
        assert!(!matches("news", ""));
    }
}
