//! Cleanup of raw comparator output.
//!
//! Schema comparators report every `AUTO_INCREMENT` counter that moved between
//! two databases. Such a report arrives as its own commented block:
//!
//! ```text
//!
//! # Table `shop`.`orders` differs
//!
//! ALTER TABLE `shop`.`orders`
//! AUTO_INCREMENT=1042;
//! ```
//!
//! Counter churn is data, not schema, so these blocks are removed before an
//! artifact is written. Comment and blank lines are dropped afterwards and an
//! `AUTO_INCREMENT` clause trailing a longer statement is folded into the
//! statement terminator.

use regex::Regex;
use std::sync::LazyLock;

/// Marker character of comparator comment lines.
pub const COMMENT_MARKER: char = '#';

static ALTER_TABLE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ALTER TABLE (`[^`]+`|[^\s`.]+)\.(`[^`]+`|[^\s`.]+)$").unwrap()
});

static AUTO_INCREMENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^AUTO_INCREMENT=\d+;$").unwrap());

static TRAILING_AUTO_INCREMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\n\s*AUTO_INCREMENT=\d+;").unwrap());

/// Normalize raw comparator output given as one blob of text.
pub fn normalize_sql(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    normalize_sql_lines(&lines)
}

/// Normalize raw comparator output given as lines.
///
/// The result holds the remaining statement lines joined with `\n` and ends
/// with a trailing newline. Input without any statement yields an empty string.
pub fn normalize_sql_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let statements: Vec<&str> = strip_noise_blocks(lines)
        .into_iter()
        .filter(|line| !is_blank(line) && !is_comment(line))
        .collect();
    if statements.is_empty() {
        return String::new();
    }

    let joined = statements.join("\n");
    let mut normalized = TRAILING_AUTO_INCREMENT
        .replace_all(&joined, ";")
        .into_owned();
    normalized.push('\n');
    normalized
}

/// Drop `` `database`. `` qualifiers naming one of `databases`, so that the
/// statements apply to the database selected by the executing connection.
pub fn strip_schema_qualifiers(sql: &str, databases: &[&str]) -> String {
    databases
        .iter()
        .filter(|database| !database.is_empty())
        .fold(sql.to_string(), |sql, database| {
            sql.replace(&format!("`{database}`."), "")
        })
}

enum ScanState {
    /// Copying lines to the output.
    Scanning,
    /// `header` is a bare `ALTER TABLE` line directly followed by an
    /// `AUTO_INCREMENT=<n>;` line.
    Candidate { header: usize },
    /// Confirmed noise block covering `start..=header + 1`.
    Discarding { start: usize, header: usize },
}

/// Remove every confirmed `AUTO_INCREMENT` noise block, keeping all other
/// lines untouched and in order.
pub(crate) fn strip_noise_blocks<S: AsRef<str>>(lines: &[S]) -> Vec<&str> {
    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    let mut cursor = 0;
    let mut state = ScanState::Scanning;

    while cursor < lines.len() {
        state = match state {
            ScanState::Scanning => {
                if is_candidate_header(lines, cursor) {
                    ScanState::Candidate { header: cursor }
                } else {
                    kept.push(lines[cursor].as_ref());
                    cursor += 1;
                    ScanState::Scanning
                }
            }
            ScanState::Candidate { header } => match noise_block_start(lines, header) {
                Some(start) => ScanState::Discarding { start, header },
                None => {
                    kept.push(lines[header].as_ref());
                    cursor = header + 1;
                    ScanState::Scanning
                }
            },
            ScanState::Discarding { start, header } => {
                // The blank and comment lines before the header were already copied.
                let emitted = header - start;
                debug_assert!(kept.len() >= emitted);
                kept.truncate(kept.len().saturating_sub(emitted));
                cursor = header + 2;
                ScanState::Scanning
            }
        };
    }
    kept
}

fn is_candidate_header<S: AsRef<str>>(lines: &[S], index: usize) -> bool {
    ALTER_TABLE_HEADER.is_match(lines[index].as_ref().trim())
        && lines
            .get(index + 1)
            .is_some_and(|next| AUTO_INCREMENT_LINE.is_match(next.as_ref().trim()))
}

/// Walk backwards from `header` expecting a blank line, one or more comment
/// lines and another blank line. Returns the index of that leading blank line.
fn noise_block_start<S: AsRef<str>>(lines: &[S], header: usize) -> Option<usize> {
    let mut back = header.checked_sub(1)?;
    if !is_blank(lines[back].as_ref()) {
        return None;
    }

    let mut comments = 0;
    loop {
        back = back.checked_sub(1)?;
        if !is_comment(lines[back].as_ref()) {
            break;
        }
        comments += 1;
    }

    (comments > 0 && is_blank(lines[back].as_ref())).then_some(back)
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with(COMMENT_MARKER)
}
