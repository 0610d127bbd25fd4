//! Glob matching for key patterns.
//!
//! Supports `*` (any run of characters) and `?` (any single character),
//! the same subset Redis KEYS/SCAN understands. Used by the backends to
//! filter key listings and by `clear(pattern)`.

/// Match `key` against a glob `pattern`.
///
/// Iterative backtracking matcher; linear in practice for the patterns
/// keys use (a handful of `*` segments).
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            // Backtrack: let the last * absorb one more character
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(glob_match("session:1", "session:1"));
        assert!(!glob_match("session:1", "session:2"));
    }

    #[test]
    fn test_star() {
        assert!(glob_match("session:*", "session:1"));
        assert!(glob_match("session:*", "session:"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("session:*", "sess:1"));
    }

    #[test]
    fn test_question_mark() {
        assert!(glob_match("user:?", "user:a"));
        assert!(!glob_match("user:?", "user:ab"));
        assert!(!glob_match("user:?", "user:"));
    }

    #[test]
    fn test_multiple_stars() {
        assert!(glob_match("*:cache:*", "app:cache:42"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
    }

    #[test]
    fn test_star_backtracking() {
        assert!(glob_match("*abc", "ababc"));
        assert!(glob_match("a*a*a", "aaaa"));
        assert!(!glob_match("a*a*a", "aa"));
    }
}
