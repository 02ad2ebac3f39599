//! patch::header
//!
//! Commit metadata from the text that precedes the first file in a patch.
//!
//! Two layouts are recognized:
//!
//! - mail format, as written by `git format-patch` (`From:`, `Date:`,
//!   `Subject:` headers, message body up to the `---` separator)
//! - `git log` / `git show` format (`commit <sha>`, `Author:`, `Date:`,
//!   indented message), including `--pretty=fuller` fields
//!
//! Any other non-empty preamble is taken as a bare commit message.

use chrono::{DateTime, FixedOffset};

use crate::core::types::{Identity, PatchHeader};

/// Parse a patch preamble. Returns `None` if the preamble is blank.
pub fn parse_header(preamble: &str) -> Option<PatchHeader> {
    let first = preamble.lines().find(|l| !l.trim().is_empty())?;

    let header = if first.starts_with("From ")
        || first.starts_with("From:")
        || first.starts_with("Subject:")
        || first.starts_with("Date:")
    {
        parse_mail(preamble)
    } else if first.starts_with("commit ") {
        parse_log(preamble)
    } else {
        let (title, body) = split_message(preamble);
        PatchHeader::with_message(title, body)
    };
    Some(header)
}

/// Split a commit message into a title and a body.
///
/// The title is the first paragraph with its lines joined by spaces; the
/// body is everything after the first blank line, trimmed.
pub fn split_message(message: &str) -> (String, String) {
    let message = message.trim();
    let mut lines = message.lines();

    let mut title = Vec::new();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        title.push(line.trim());
    }

    let body = lines.collect::<Vec<_>>().join("\n");
    (title.join(" "), body.trim().to_string())
}

/// Parse a date in any of the formats git emits.
///
/// Accepted: RFC 2822 (mail headers), RFC 3339 / ISO 8601 strict, git's
/// default `Mon Jan 2 15:04:05 2006 -0700`, and raw `<seconds> <zone>`
/// (optionally prefixed with `@`).
pub fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(s)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok())
        .or_else(|| DateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y %z").ok())
        .or_else(|| parse_raw_date(s))
}

fn parse_raw_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.strip_prefix('@').unwrap_or(s);
    let (secs, zone) = s.split_once(' ')?;
    let secs: i64 = secs.parse().ok()?;

    let zone = zone.trim();
    let (sign, digits) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;

    Some(DateTime::from_timestamp(secs, 0)?.with_timezone(&offset))
}

fn parse_mail(preamble: &str) -> PatchHeader {
    let mut header = PatchHeader::default();
    let mut lines = preamble
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .peekable();

    if lines.peek().is_some_and(|l| l.starts_with("From ")) {
        lines.next();
    }

    // Header block, with RFC 2822 folding.
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = fields.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            fields.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    for (name, value) in fields {
        match name.as_str() {
            "from" => header.author = Identity::parse(&value),
            "date" => header.author_date = parse_date(&value),
            "subject" => header.title = strip_subject_tags(&value).to_string(),
            _ => {}
        }
    }

    let mut body = Vec::new();
    for line in lines {
        if line.trim_end() == "---" || line.starts_with("diff --git ") {
            break;
        }
        body.push(line);
    }
    header.body = body.join("\n").trim().to_string();
    header
}

/// Drop leading `[PATCH ...]` style tags from a subject line.
fn strip_subject_tags(subject: &str) -> &str {
    let mut s = subject.trim();
    while s.starts_with('[') {
        match s.find(']') {
            Some(end) => s = s[end + 1..].trim_start(),
            None => break,
        }
    }
    s
}

fn parse_log(preamble: &str) -> PatchHeader {
    let mut header = PatchHeader::default();
    let mut lines = preamble.lines().skip_while(|l| !l.starts_with("commit "));
    lines.next();

    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name {
            "Author" => header.author = Identity::parse(value),
            "Date" | "AuthorDate" => header.author_date = parse_date(value),
            "Commit" => header.committer = Identity::parse(value),
            "CommitDate" => header.committer_date = parse_date(value),
            _ => {}
        }
    }

    let mut message = Vec::new();
    for line in lines {
        if !line.is_empty() && !line.starts_with([' ', '\t']) {
            break;
        }
        message.push(line.strip_prefix("    ").unwrap_or(line.trim_start()));
    }

    let (title, body) = split_message(&message.join("\n"));
    header.title = title;
    header.body = body;
    header
}
