//! IMAP command line splitting and literal detection
//!
//! The proxy never parses full IMAP grammar; it only needs the tag (to
//! recognize the tagged completion and to synthesize responses), the
//! verb (to dispatch APPEND and LOGOUT), and whether the line announces
//! a trailing literal.

/// One client command line split into its first two tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Client-chosen tag, preserved verbatim so synthesized responses
    /// echo it exactly.
    pub tag: String,
    /// ASCII-uppercased command word.
    pub verb: String,
    /// Remainder of the line, CRLF stripped.
    pub rest: String,
}

impl CommandLine {
    /// Split a raw line on its first two spaces. Absent fields are
    /// empty.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        let (tag, after_tag) = match line.split_once(' ') {
            Some((t, r)) => (t, r),
            None => (line, ""),
        };
        let (verb, rest) = match after_tag.split_once(' ') {
            Some((v, r)) => (v, r),
            None => (after_tag, ""),
        };

        Self {
            tag: tag.to_string(),
            verb: verb.to_ascii_uppercase(),
            rest: rest.to_string(),
        }
    }
}

/// A trailing `{N}` or `{N+}` literal announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Literal {
    /// Octet count the client will send next.
    pub len: usize,
    /// Synchronizing literals wait for a `+` continuation;
    /// non-synchronizing (`{N+}`) ones do not.
    pub sync: bool,
}

/// Detect a literal announcement at the tail of `rest`.
///
/// Returns `None` when there is no `{...}` tail or the digits do not
/// parse; the caller then forwards the line verbatim and lets the
/// upstream answer `BAD`.
#[must_use]
pub fn trailing_literal(rest: &str) -> Option<Literal> {
    let trimmed = rest.trim_end();
    let tail = trimmed.strip_suffix('}')?;
    let open = tail.rfind('{')?;
    let inner = &tail[open + 1..];

    let (digits, sync) = match inner.strip_suffix('+') {
        Some(d) => (d, false),
        None => (inner, true),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let len = digits.parse().ok()?;

    Some(Literal { len, sync })
}
