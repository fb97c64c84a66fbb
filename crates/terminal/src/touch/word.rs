//! Word boundaries for tap-hold selection.

/// Characters that make up a selectable word: ASCII letters, digits, `_`, `-`, `.`.
pub fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Inclusive column range of the word covering `col` in `line`.
///
/// Returns `None` when `col` is not on a word character or the word is a
/// single character long, so the caller falls back to a one-cell selection.
pub fn word_bounds(line: &str, col: u16) -> Option<(u16, u16)> {
    let chars: Vec<char> = line.chars().collect();
    let col = col as usize;
    if !chars.get(col).copied().is_some_and(is_word_char) {
        return None;
    }

    let mut start = col;
    while start > 0 && is_word_char(chars[start - 1]) {
        start -= 1;
    }
    let mut end = col;
    while end + 1 < chars.len() && is_word_char(chars[end + 1]) {
        end += 1;
    }

    if end > start {
        Some((start as u16, end as u16))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_includes_dots_and_dashes() {
        let line = "cat ~/src/my-file.rs | less";
        // col 12 is inside "my-file.rs" after the last slash
        assert_eq!(word_bounds(line, 12), Some((10, 19)));
    }

    #[test]
    fn test_word_at_line_start_and_end() {
        assert_eq!(word_bounds("ls -la", 0), Some((0, 1)));
        assert_eq!(word_bounds("ls -la", 5), Some((3, 5)));
    }

    #[test]
    fn test_single_character_is_not_a_word() {
        assert_eq!(word_bounds("a = b", 0), None);
    }

    #[test]
    fn test_non_word_character() {
        assert_eq!(word_bounds("echo | x", 5), None);
        assert_eq!(word_bounds("echo", 10), None);
    }
}
