//! `@file` mention parsing for chat input.
//!
//! A mention is an `@` followed by a run of non-whitespace characters, so
//! paths such as `@src/lib.rs` are a single token. When several `@` appear in
//! one run (`@foo@bar`) the right-most one starts the token.
//!
//! All offsets are byte offsets into the UTF-8 text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionToken {
    /// Text after the `@`.
    pub raw: String,
    /// Offset of the `@`.
    pub start: usize,
    /// Offset one past the last token character.
    pub end: usize,
    /// True while the token is still being typed at the cursor.
    pub is_open: bool,
}

/// The input after a suggestion was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub cursor: usize,
}

/// Finds the mention being typed at `cursor`.
///
/// The token is open only when no whitespace separates its `@` from the
/// cursor and the cursor sits at the end of the token (followed by whitespace
/// or the end of the text). A cursor in the middle of an existing reference
/// does not reopen it.
pub fn find_open_token(text: &str, cursor: usize) -> Option<MentionToken> {
    let cursor = floor_char_boundary(text, cursor);

    if text[cursor..]
        .chars()
        .next()
        .is_some_and(|c| !c.is_whitespace())
    {
        return None;
    }

    let before = &text[..cursor];
    let at = before.rfind('@')?;
    let raw = &before[at + 1..];
    if raw.chars().any(char::is_whitespace) {
        return None;
    }

    Some(MentionToken {
        raw: raw.to_string(),
        start: at,
        end: cursor,
        is_open: true,
    })
}

/// Every complete mention in `text`, left to right.
pub fn extract_closed_tokens(text: &str) -> Vec<MentionToken> {
    let mut tokens = Vec::new();
    for (run_start, run) in non_whitespace_runs(text) {
        let Some(at) = run.rfind('@') else {
            continue;
        };
        let raw = &run[at + 1..];
        if raw.is_empty() {
            continue;
        }
        tokens.push(MentionToken {
            raw: raw.to_string(),
            start: run_start + at,
            end: run_start + run.len(),
            is_open: false,
        });
    }
    tokens
}

/// Replaces `token` with `@filename` and places the cursor right after it.
pub fn complete(text: &str, token: &MentionToken, filename: &str) -> Completion {
    let start = floor_char_boundary(text, token.start);
    let end = floor_char_boundary(text, token.end.max(start));

    let mut out = String::with_capacity(text.len() + filename.len() + 1);
    out.push_str(&text[..start]);
    out.push('@');
    out.push_str(filename);
    let cursor = out.len();
    out.push_str(&text[end..]);

    Completion { text: out, cursor }
}

fn non_whitespace_runs(text: &str) -> Vec<(usize, &str)> {
    let mut runs = Vec::new();
    let mut run_start = None;
    for (idx, c) in text.char_indices() {
        match (c.is_whitespace(), run_start) {
            (true, Some(start)) => {
                runs.push((start, &text[start..idx]));
                run_start = None;
            }
            (false, None) => run_start = Some(idx),
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push((start, &text[start..]));
    }
    runs
}

fn floor_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}
