//! patch
//!
//! Parsed git-format patches and the diff-apply primitive.
//!
//! # Design
//!
//! A [`FilePatch`] describes the change to one file: names, modes, the
//! create/delete/rename/copy flags from git's extended headers, and the raw
//! hunk text. [`FilePatch::apply`] turns old content into new content; hunk
//! matching is delegated to `diffy`.
//!
//! [`parse`] splits a multi-file `git diff` / `git format-patch` text into
//! file patches and returns the preamble that precedes the first file so
//! that [`parse_header`] can extract commit metadata from it.
//!
//! # Example
//!
//! ```
//! use patchpr::patch;
//!
//! let text = "\
//! diff --git a/a.txt b/a.txt
//! index ce01362..95d09f2 100644
//! --- a/a.txt
//! +++ b/a.txt
//! @@ -1 +1 @@
//! -hello
//! +hello world
//! ";
//!
//! let parsed = patch::parse(text.as_bytes()).unwrap();
//! assert_eq!(parsed.files.len(), 1);
//!
//! let new = parsed.files[0].apply(b"hello\n").unwrap();
//! assert_eq!(new, b"hello world\n");
//! ```

mod header;

pub use header::{parse_date, parse_header, split_message};

use thiserror::Error;

use crate::core::types::FileMode;

/// Errors from parsing or applying patches.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    /// The patch text is malformed.
    #[error("invalid patch at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The patch does not match the content it is applied to.
    #[error("patch does not apply to {path}: {message}")]
    Apply { path: String, message: String },

    /// Binary patches cannot be applied.
    #[error("binary patch for {0} is not supported")]
    Binary(String),
}

/// The change to a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePatch {
    /// Path before the change; empty for new files
    pub old_name: String,
    /// Path after the change; empty for deleted files
    pub new_name: String,
    /// Mode before the change, when the patch states it
    pub old_mode: Option<FileMode>,
    /// Mode after the change, when the patch states it
    pub new_mode: Option<FileMode>,
    pub is_new: bool,
    pub is_delete: bool,
    pub is_rename: bool,
    pub is_copy: bool,
    pub is_binary: bool,
    fragments: Vec<u8>,
}

impl FilePatch {
    /// A modification of `path` with no hunks yet.
    pub fn modify(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            old_name: path.clone(),
            new_name: path,
            ..Default::default()
        }
    }

    /// A new file at `path`.
    pub fn create(path: impl Into<String>) -> Self {
        Self {
            new_name: path.into(),
            is_new: true,
            ..Default::default()
        }
    }

    /// A deletion of `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            old_name: path.into(),
            is_delete: true,
            ..Default::default()
        }
    }

    /// A rename from `old` to `new`.
    pub fn rename(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old_name: old.into(),
            new_name: new.into(),
            is_rename: true,
            ..Default::default()
        }
    }

    pub fn copy(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old_name: old.into(),
            new_name: new.into(),
            is_copy: true,
            ..Default::default()
        }
    }

    /// Attach unified-diff hunks (starting at the first `@@` line).
    pub fn with_fragments(mut self, hunks: impl Into<Vec<u8>>) -> Self {
        self.fragments = hunks.into();
        self
    }

    pub fn with_old_mode(mut self, mode: FileMode) -> Self {
        self.old_mode = Some(mode);
        self
    }

    pub fn with_new_mode(mut self, mode: FileMode) -> Self {
        self.new_mode = Some(mode);
        self
    }

    /// Whether the patch changes content (as opposed to a pure rename or
    /// mode change).
    pub fn has_fragments(&self) -> bool {
        !self.fragments.is_empty() || self.is_binary
    }

    /// Raw hunk text.
    pub fn fragments(&self) -> &[u8] {
        &self.fragments
    }

    /// The path this patch is about: the old name for deletions, the new
    /// name otherwise.
    pub fn path(&self) -> &str {
        if self.is_delete {
            &self.old_name
        } else {
            &self.new_name
        }
    }

    /// Apply the patch to `old`, producing the new content.
    ///
    /// A patch without hunks returns `old` unchanged.
    ///
    /// # Errors
    ///
    /// - `PatchError::Binary` for binary patches
    /// - `PatchError::Apply` if the hunks do not match `old`
    pub fn apply(&self, old: &[u8]) -> Result<Vec<u8>, PatchError> {
        if self.is_binary {
            return Err(PatchError::Binary(self.path().to_string()));
        }
        if self.fragments.is_empty() {
            return Ok(old.to_vec());
        }

        let patch = diffy::Patch::from_bytes(&self.fragments).map_err(|e| PatchError::Apply {
            path: self.path().to_string(),
            message: e.to_string(),
        })?;

        diffy::apply_bytes(old, &patch).map_err(|e| PatchError::Apply {
            path: self.path().to_string(),
            message: e.to_string(),
        })
    }
}

/// Result of parsing a patch.
#[derive(Debug, Clone, Default)]
pub struct ParsedPatch {
    /// File patches in the order they appear
    pub files: Vec<FilePatch>,
    /// Text before the first file (mail headers, commit message, ...)
    pub preamble: String,
}

/// Parse a git-format patch into file patches.
///
/// Text before the first `diff --git` line is returned as the preamble.
/// Lines between files that are not part of a hunk (for example the
/// `-- ` signature that `git format-patch` appends) are skipped.
///
/// # Errors
///
/// Returns `PatchError::Parse` for malformed headers or hunks.
pub fn parse(input: &[u8]) -> Result<ParsedPatch, PatchError> {
    let lines: Vec<&[u8]> = input.split_inclusive(|&b| b == b'\n').collect();

    let mut pos = 0;
    let mut preamble = Vec::new();
    while pos < lines.len() && !lines[pos].starts_with(b"diff --git ") {
        preamble.extend_from_slice(lines[pos]);
        pos += 1;
    }

    let mut files = Vec::new();
    while pos < lines.len() {
        if !lines[pos].starts_with(b"diff --git ") {
            pos += 1;
            continue;
        }
        let (file, next) = parse_file(&lines, pos)?;
        files.push(file);
        pos = next;
    }

    Ok(ParsedPatch {
        files,
        preamble: String::from_utf8_lossy(&preamble).into_owned(),
    })
}

fn text(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

fn parse_error(index: usize, message: impl Into<String>) -> PatchError {
    PatchError::Parse {
        line: index + 1,
        message: message.into(),
    }
}

/// Parse one file starting at its `diff --git` line. Returns the file and
/// the index of the first line after it.
fn parse_file(lines: &[&[u8]], start: usize) -> Result<(FilePatch, usize), PatchError> {
    let first = text(lines[start]);
    let (git_old, git_new) = parse_git_names(&first["diff --git ".len()..]);

    let mut file = FilePatch::default();
    let mut old_name: Option<String> = None;
    let mut new_name: Option<String> = None;
    let mut pos = start + 1;

    while pos < lines.len() {
        let line = text(lines[pos]);
        if line.starts_with("--- ") || line.starts_with("@@ ") || line.starts_with("diff --git ")
        {
            break;
        }

        if let Some(m) = line.strip_prefix("old mode ") {
            file.old_mode = Some(parse_mode(m, pos)?);
        } else if let Some(m) = line.strip_prefix("new mode ") {
            file.new_mode = Some(parse_mode(m, pos)?);
        } else if let Some(m) = line.strip_prefix("deleted file mode ") {
            file.is_delete = true;
            file.old_mode = Some(parse_mode(m, pos)?);
        } else if let Some(m) = line.strip_prefix("new file mode ") {
            file.is_new = true;
            file.new_mode = Some(parse_mode(m, pos)?);
        } else if let Some(name) = line.strip_prefix("rename from ") {
            file.is_rename = true;
            old_name = Some(unquote(name));
        } else if let Some(name) = line.strip_prefix("rename to ") {
            file.is_rename = true;
            new_name = Some(unquote(name));
        } else if let Some(name) = line.strip_prefix("copy from ") {
            file.is_copy = true;
            old_name = Some(unquote(name));
        } else if let Some(name) = line.strip_prefix("copy to ") {
            file.is_copy = true;
            new_name = Some(unquote(name));
        } else if let Some(index) = line.strip_prefix("index ") {
            if let Some(m) = index.split_whitespace().nth(1) {
                let mode = parse_mode(m, pos)?;
                file.old_mode.get_or_insert(mode);
            }
        } else if line.starts_with("Binary files ") || line == "GIT binary patch" {
            file.is_binary = true;
        }
        pos += 1;
    }

    if pos < lines.len() && lines[pos].starts_with(b"--- ") {
        let old = header_name(&text(lines[pos])["--- ".len()..]);
        pos += 1;
        if pos >= lines.len() || !lines[pos].starts_with(b"+++ ") {
            return Err(parse_error(pos, "expected '+++' line after '---' line"));
        }
        let new = header_name(&text(lines[pos])["+++ ".len()..]);
        pos += 1;

        match old {
            Some(name) => {
                old_name.get_or_insert(name);
            }
            None => file.is_new = true,
        }
        match new {
            Some(name) => {
                new_name.get_or_insert(name);
            }
            None => file.is_delete = true,
        }
    }

    let mut fragments = Vec::new();
    while pos < lines.len() && lines[pos].starts_with(b"@@ ") {
        let (mut old_count, mut new_count) = parse_hunk_header(&text(lines[pos]), pos)?;
        fragments.extend_from_slice(lines[pos]);
        pos += 1;

        while old_count > 0 || new_count > 0 {
            let Some(line) = lines.get(pos) else {
                return Err(parse_error(pos, "unexpected end of hunk"));
            };
            match line.first() {
                Some(b' ') | Some(b'\n') | Some(b'\r') => {
                    old_count = old_count
                        .checked_sub(1)
                        .ok_or_else(|| parse_error(pos, "too many context lines in hunk"))?;
                    new_count = new_count
                        .checked_sub(1)
                        .ok_or_else(|| parse_error(pos, "too many context lines in hunk"))?;
                    if line[0] != b' ' {
                        // some tools strip the space from blank context lines
                        fragments.push(b' ');
                    }
                }
                Some(b'-') => {
                    old_count = old_count
                        .checked_sub(1)
                        .ok_or_else(|| parse_error(pos, "too many deleted lines in hunk"))?;
                }
                Some(b'+') => {
                    new_count = new_count
                        .checked_sub(1)
                        .ok_or_else(|| parse_error(pos, "too many added lines in hunk"))?;
                }
                Some(b'\\') => {}
                _ => return Err(parse_error(pos, "unexpected line in hunk")),
            }
            fragments.extend_from_slice(line);
            pos += 1;
        }

        if pos < lines.len() && lines[pos].starts_with(b"\\") {
            fragments.extend_from_slice(lines[pos]);
            pos += 1;
        }
    }
    file.fragments = fragments;

    file.old_name = old_name.or(git_old).unwrap_or_default();
    file.new_name = new_name.or(git_new).unwrap_or_default();
    if file.is_new {
        file.old_name.clear();
    }
    if file.is_delete {
        file.new_name.clear();
    }
    if file.old_name.is_empty() && file.new_name.is_empty() {
        return Err(parse_error(start, "could not determine file name"));
    }

    Ok((file, pos))
}

fn parse_mode(s: &str, index: usize) -> Result<FileMode, PatchError> {
    FileMode::parse_octal(s).map_err(|e| parse_error(index, e.to_string()))
}

/// Split the names on a `diff --git a/x b/y` line.
fn parse_git_names(rest: &str) -> (Option<String>, Option<String>) {
    let rest = rest.trim_end();

    // Identical names are the common case and may contain " b/".
    if rest.len() % 2 == 1 {
        let mid = rest.len() / 2;
        if rest.is_char_boundary(mid) && rest.as_bytes()[mid] == b' ' {
            let a = strip_side(&rest[..mid], "a/");
            let b = strip_side(&rest[mid + 1..], "b/");
            if a == b {
                return (Some(a), Some(b));
            }
        }
    }

    match rest.find(" b/") {
        Some(idx) => (
            Some(strip_side(&rest[..idx], "a/")),
            Some(rest[idx + 3..].to_string()),
        ),
        None => (None, None),
    }
}

/// Name on a `---` / `+++` line; `None` for `/dev/null`.
fn header_name(s: &str) -> Option<String> {
    let s = s.split('\t').next().unwrap_or(s).trim_end();
    if s == "/dev/null" {
        return None;
    }
    let s = unquote(s);
    let s = s
        .strip_prefix("a/")
        .or_else(|| s.strip_prefix("b/"))
        .unwrap_or(&s);
    Some(s.to_string())
}

fn strip_side(s: &str, prefix: &str) -> String {
    let s = unquote(s);
    s.strip_prefix(prefix).unwrap_or(&s).to_string()
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => s.to_string(),
    }
}

/// Line counts from `@@ -a,b +c,d @@`.
fn parse_hunk_header(line: &str, index: usize) -> Result<(usize, usize), PatchError> {
    let invalid = || parse_error(index, format!("invalid hunk header: {}", line));

    let rest = line.strip_prefix("@@ -").ok_or_else(invalid)?;
    let end = rest.find(" @@").ok_or_else(invalid)?;
    let (old, new) = rest[..end].split_once(" +").ok_or_else(invalid)?;

    let count = |range: &str| -> Option<usize> {
        match range.split_once(',') {
            Some((start, len)) => {
                start.parse::<usize>().ok()?;
                len.parse().ok()
            }
            None => range.parse::<usize>().ok().map(|_| 1),
        }
    };

    Ok((
        count(old).ok_or_else(invalid)?,
        count(new).ok_or_else(invalid)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODIFY: &str = "\
diff --git a/a.txt b/a.txt
index ce01362..95d09f2 100644
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-hello
+hello world
";

    const CREATE: &str = "\
diff --git a/bin/run.sh b/bin/run.sh
new file mode 100755
index 0000000..3e75765
--- /dev/null
+++ b/bin/run.sh
@@ -0,0 +1 @@
+new
";

    const DELETE: &str = "\
diff --git a/gone.txt b/gone.txt
deleted file mode 100644
index 3e75765..0000000
--- a/gone.txt
+++ /dev/null
@@ -1 +0,0 @@
-new
";

    const RENAME: &str = "\
diff --git a/old/name.go b/new/name.go
similarity index 100%
rename from old/name.go
rename to new/name.go
";

    const MODE_CHANGE: &str = "\
diff --git a/script.sh b/script.sh
old mode 100644
new mode 100755
";

    mod parsing {
        use super::*;

        #[test]
        fn modify() {
            let parsed = parse(MODIFY.as_bytes()).unwrap();
            assert_eq!(parsed.files.len(), 1);
            let file = &parsed.files[0];
            assert_eq!(file.old_name, "a.txt");
            assert_eq!(file.new_name, "a.txt");
            assert_eq!(file.old_mode, Some(FileMode::REGULAR));
            assert_eq!(file.new_mode, None);
            assert!(!file.is_new && !file.is_delete && !file.is_rename);
            assert!(file.has_fragments());
            assert!(parsed.preamble.is_empty());
        }

        #[test]
        fn create() {
            let parsed = parse(CREATE.as_bytes()).unwrap();
            let file = &parsed.files[0];
            assert!(file.is_new);
            assert_eq!(file.old_name, "");
            assert_eq!(file.new_name, "bin/run.sh");
            assert_eq!(file.new_mode, Some(FileMode::EXECUTABLE));
        }

        #[test]
        fn delete() {
            let parsed = parse(DELETE.as_bytes()).unwrap();
            let file = &parsed.files[0];
            assert!(file.is_delete);
            assert_eq!(file.old_name, "gone.txt");
            assert_eq!(file.new_name, "");
            assert_eq!(file.path(), "gone.txt");
        }

        #[test]
        fn pure_rename_has_no_fragments() {
            let parsed = parse(RENAME.as_bytes()).unwrap();
            let file = &parsed.files[0];
            assert!(file.is_rename);
            assert_eq!(file.old_name, "old/name.go");
            assert_eq!(file.new_name, "new/name.go");
            assert!(!file.has_fragments());
        }

        #[test]
        fn mode_change() {
            let parsed = parse(MODE_CHANGE.as_bytes()).unwrap();
            let file = &parsed.files[0];
            assert_eq!(file.old_mode, Some(FileMode::REGULAR));
            assert_eq!(file.new_mode, Some(FileMode::EXECUTABLE));
            assert!(!file.has_fragments());
        }

        #[test]
        fn multiple_files_with_preamble_and_signature() {
            let input = format!(
                "From 1234 Mon Sep 17 00:00:00 2001\nSubject: [PATCH] Two files\n\n---\n{}{}-- \n2.39.0\n\n",
                MODIFY, CREATE
            );
            let parsed = parse(input.as_bytes()).unwrap();
            assert_eq!(parsed.files.len(), 2);
            assert!(parsed.preamble.starts_with("From 1234"));
            assert_eq!(parsed.files[1].new_name, "bin/run.sh");
        }

        #[test]
        fn binary_marker() {
            let input = "\
diff --git a/logo.png b/logo.png
index 1111111..2222222 100644
Binary files a/logo.png and b/logo.png differ
";
            let parsed = parse(input.as_bytes()).unwrap();
            let file = &parsed.files[0];
            assert!(file.is_binary);
            assert!(file.has_fragments());
            assert_eq!(
                file.apply(b"anything"),
                Err(PatchError::Binary("logo.png".to_string()))
            );
        }

        #[test]
        fn truncated_hunk_is_an_error() {
            let input = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1,2 +1,2 @@
-hello
";
            let err = parse(input.as_bytes()).unwrap_err();
            assert!(matches!(err, PatchError::Parse { .. }));
        }

        #[test]
        fn missing_plus_line_is_an_error() {
            let input = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n@@ -1 +1 @@\n";
            assert!(parse(input.as_bytes()).is_err());
        }

        #[test]
        fn git_names_with_spaces() {
            assert_eq!(
                parse_git_names("a/my file.txt b/my file.txt"),
                (Some("my file.txt".into()), Some("my file.txt".into()))
            );
            assert_eq!(
                parse_git_names("a/x b/y"),
                (Some("x".into()), Some("y".into()))
            );
        }

        #[test]
        fn hunk_header_counts() {
            assert_eq!(parse_hunk_header("@@ -1,3 +1,4 @@ fn main()", 0), Ok((3, 4)));
            assert_eq!(parse_hunk_header("@@ -1 +1 @@", 0), Ok((1, 1)));
            assert_eq!(parse_hunk_header("@@ -0,0 +1 @@", 0), Ok((0, 1)));
            assert!(parse_hunk_header("@@ bogus @@", 0).is_err());
        }
    }

    mod applying {
        use super::*;

        #[test]
        fn modify_applies_hunks() {
            let file = &parse(MODIFY.as_bytes()).unwrap().files[0];
            assert_eq!(file.apply(b"hello\n").unwrap(), b"hello world\n");
        }

        #[test]
        fn create_applies_to_empty_content() {
            let file = &parse(CREATE.as_bytes()).unwrap().files[0];
            assert_eq!(file.apply(b"").unwrap(), b"new\n");
        }

        #[test]
        fn context_mismatch_fails() {
            let file = &parse(MODIFY.as_bytes()).unwrap().files[0];
            let err = file.apply(b"goodbye\n").unwrap_err();
            assert!(matches!(err, PatchError::Apply { ref path, .. } if path == "a.txt"));
        }

        #[test]
        fn no_fragments_is_identity() {
            let file = FilePatch::rename("a", "b");
            assert_eq!(file.apply(b"same").unwrap(), b"same");
        }
    }
}
