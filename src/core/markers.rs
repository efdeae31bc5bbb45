//! Marker-delimited blocks appended to text files.
//!
//! An appended block looks like:
//!
//! ```text
//! # BEGIN HOTFIX <id>
//! ...content...
//! # END HOTFIX <id>
//! ```
//!
//! Removal deletes everything from the begin line through the end line.
//! Marker text that occurs naturally in a file would be matched too; callers
//! that recorded a block hash should use [`remove_block_verified`].

use crate::utils::hash::sha256_bytes;

pub fn begin_marker(id: &str) -> String {
    format!("# BEGIN HOTFIX {}", id)
}

pub fn end_marker(id: &str) -> String {
    format!("# END HOTFIX {}", id)
}

/// The full block for `content`, markers included, newline-terminated.
pub fn wrap_block(id: &str, content: &str) -> String {
    let mut block = begin_marker(id);
    block.push('\n');
    block.push_str(content);
    if !content.is_empty() && !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str(&end_marker(id));
    block.push('\n');
    block
}

/// Whether appending to `existing` inserts a newline before the block.
pub fn needs_separator(existing: &str) -> bool {
    !existing.is_empty() && !existing.ends_with('\n')
}

/// Append a block to `existing`. Returns the new text and the block's hash.
pub fn append_block(existing: &str, id: &str, content: &str) -> (String, String) {
    let block = wrap_block(id, content);
    let mut out = existing.to_string();
    if needs_separator(&out) {
        out.push('\n');
    }
    out.push_str(&block);
    (out, sha256_bytes(block.as_bytes()))
}

/// Line range `[start, end]` of the first complete block for `id`.
fn find_block(lines: &[&str], id: &str) -> Option<(usize, usize)> {
    let begin = begin_marker(id);
    let end = end_marker(id);
    let start = lines.iter().position(|l| l.trim_end() == begin)?;
    let stop = lines[start + 1..]
        .iter()
        .position(|l| l.trim_end() == end)
        .map(|offset| start + 1 + offset)?;
    Some((start, stop))
}

/// Whether `content` holds a complete block for `id`.
pub fn contains_block(content: &str, id: &str) -> bool {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    find_block(&lines, id).is_some()
}

/// Remove the block for `id`.
///
/// Returns `None` when no complete block exists, so running the removal twice
/// is a no-op. A begin marker without an end marker is left untouched.
pub fn remove_block(content: &str, id: &str) -> Option<String> {
    remove_matching(content, id, |_| true).ok().flatten()
}

/// Finish undoing an append once the block is gone.
///
/// Drops the newline that [`append_block`] inserted before the block. Returns
/// `None` when the file did not exist before and nothing else was written to it.
pub fn undo_separator(mut text: String, separator_added: bool, target_existed: bool) -> Option<String> {
    if separator_added && text.ends_with('\n') {
        text.pop();
    }
    if !target_existed && text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Outcome of a hash-checked removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedRemoval {
    Removed(String),
    NotFound,
    /// A block exists but is not the one that was appended.
    HashMismatch { found: String },
}

/// Remove the block for `id` only if it hashes to `expected_hash`.
pub fn remove_block_verified(content: &str, id: &str, expected_hash: &str) -> VerifiedRemoval {
    match remove_matching(content, id, |block| sha256_bytes(block.as_bytes()) == expected_hash) {
        Ok(Some(text)) => VerifiedRemoval::Removed(text),
        Ok(None) => VerifiedRemoval::NotFound,
        Err(block) => VerifiedRemoval::HashMismatch {
            found: sha256_bytes(block.as_bytes()),
        },
    }
}

fn remove_matching(
    content: &str,
    id: &str,
    accept: impl Fn(&str) -> bool,
) -> std::result::Result<Option<String>, String> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let Some((start, stop)) = find_block(&lines, id) else {
        return Ok(None);
    };

    let mut block: String = lines[start..=stop].concat();
    if !block.ends_with('\n') {
        block.push('\n');
    }
    if !accept(&block) {
        return Err(block);
    }

    let mut out: String = lines[..start].concat();
    out.push_str(&lines[stop + 1..].concat());
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_then_remove_restores_original() {
        let original = "line1\nline2";
        let (appended, _) = append_block(original, "op-1", "alias ll='ls -l'");
        assert!(appended.contains("# BEGIN HOTFIX op-1\nalias ll='ls -l'\n# END HOTFIX op-1\n"));

        let removed = remove_block(&appended, "op-1").unwrap();
        assert_eq!(removed, "line1\nline2\n");
    }

    #[test]
    fn test_undo_separator_restores_exact_text() {
        let original = "export A=1";
        assert!(needs_separator(original));
        let (appended, _) = append_block(original, "env", "export B=2\n");
        let removed = remove_block(&appended, "env").unwrap();
        assert_eq!(undo_separator(removed, true, true).as_deref(), Some(original));

        let (fresh, _) = append_block("", "env", "export B=2\n");
        assert!(!needs_separator(""));
        let removed = remove_block(&fresh, "env").unwrap();
        assert_eq!(undo_separator(removed, false, false), None);
        assert_eq!(undo_separator("kept\n".to_string(), false, false).as_deref(), Some("kept\n"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (appended, _) = append_block("a\n", "x", "b\n");
        let once = remove_block(&appended, "x").unwrap();
        assert_eq!(once, "a\n");
        assert!(remove_block(&once, "x").is_none());
    }

    #[test]
    fn test_only_named_block_removed() {
        let (one, _) = append_block("base\n", "first", "1\n");
        let (two, _) = append_block(&one, "second", "2\n");
        let removed = remove_block(&two, "first").unwrap();
        assert!(!removed.contains("BEGIN HOTFIX first"));
        assert!(removed.contains("# BEGIN HOTFIX second\n2\n# END HOTFIX second\n"));
    }

    #[test]
    fn test_unterminated_block_left_alone() {
        let content = "a\n# BEGIN HOTFIX z\nb\n";
        assert!(remove_block(content, "z").is_none());
        assert!(!contains_block(content, "z"));
    }

    #[test]
    fn test_verified_removal() {
        let (appended, hash) = append_block("a\n", "v", "payload\n");
        assert_eq!(
            remove_block_verified(&appended, "v", &hash),
            VerifiedRemoval::Removed("a\n".to_string())
        );

        let tampered = appended.replace("payload", "edited");
        assert!(matches!(
            remove_block_verified(&tampered, "v", &hash),
            VerifiedRemoval::HashMismatch { .. }
        ));
        assert_eq!(remove_block_verified("a\n", "v", &hash), VerifiedRemoval::NotFound);
    }
}
