//! Wildcard filename matching.
//!
//! `*` matches any run of characters (including none) and `?` matches
//! exactly one character. Matching is case-sensitive and anchored at both
//! ends: the pattern has to describe the whole filename. Every other
//! character, brackets included, stands for itself.
use glob::{MatchOptions, Pattern};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Returns `true` when `name` matches the wildcard `pattern`.
pub fn matches(pattern: &str, name: &str) -> bool {
    match Pattern::new(&to_glob(pattern)) {
        Ok(compiled) => compiled.matches_with(name, OPTIONS),
        Err(_) => false,
    }
}

/// Rewrite a wildcard pattern into glob syntax: brackets become literal
/// character classes and runs of `*` collapse, since `**` means something
/// else to glob.
fn to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    let mut previous = None;
    for c in pattern.chars() {
        match c {
            '*' if previous == Some('*') => {}
            '[' => glob.push_str("[[]"),
            ']' => glob.push_str("[]]"),
            c => glob.push(c),
        }
        previous = Some(c);
    }
    glob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        assert!(matches("*.mp4", "a.mp4"));
        assert!(matches("*.mp4", ".mp4"));
        assert!(matches("*", ""));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(!matches("*.mp4", "a.mp4.txt"));
    }

    #[test]
    fn question_mark_matches_one() {
        assert!(matches("?.txt", "b.txt"));
        assert!(!matches("?.txt", "bb.txt"));
        assert!(!matches("?", ""));
    }

    #[test]
    fn anchored_not_substring() {
        assert!(!matches("report", "report.pdf"));
        assert!(!matches("pdf", "report.pdf"));
        assert!(matches("report.pdf", "report.pdf"));
    }

    #[test]
    fn case_sensitive() {
        assert!(!matches("*.MP4", "a.mp4"));
    }

    #[test]
    fn backtracks_across_repeated_segments() {
        assert!(matches("*ab", "aaab"));
        assert!(matches("*a?b*", "xxacbacb"));
        assert!(!matches("*ab", "aaba"));
    }

    #[test]
    fn brackets_are_literal() {
        assert!(matches("[ab].txt", "[ab].txt"));
        assert!(!matches("[ab].txt", "a.txt"));
        assert!(matches("x]*", "x]y"));
    }

    #[test]
    fn repeated_stars_act_as_one() {
        assert!(matches("a**b", "aXYb"));
        assert!(matches("**", "anything.bin"));
    }

    #[test]
    fn multibyte_characters_count_once() {
        assert!(matches("?.txt", "é.txt"));
    }
}
