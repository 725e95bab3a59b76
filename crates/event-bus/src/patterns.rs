//! Pattern matching shared by event-bus subscriptions and the pub-sub
//! coordinator's topic patterns (§4.3, property test §8.7).
//!
//! Two independent syntaxes are supported because the source treats them
//! separately: a `glob`-style matcher (`*`/`?`) for service names, and a
//! dotted hierarchical matcher for `a.b.c`-style type/topic names where `*`
//! stands for exactly one segment and segment counts must match.

/// Glob match (`*` = any run of characters, `?` = exactly one character).
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    glob::Pattern::new(pattern)
        .map(|p| p.matches(value))
        .unwrap_or(false)
}

/// Dotted hierarchical match: `a.*.c` matches `a.b.c` and `a.xyz.c` but not
/// `a.b.d.c` (too many segments), `a.c` (too few), or `x.b.c` (wrong
/// literal). `a.*` matches `a.b` but not `a.b.c` — `*` matches exactly one
/// segment, not a tail.
pub fn dotted_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let value_segments: Vec<&str> = value.split('.').collect();
    if pattern_segments.len() != value_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(value_segments.iter())
        .all(|(p, v)| *p == "*" || p == v)
}

/// Matches an event/subscription pattern against a type name, accepting
/// either an exact match, the universal wildcard, or a dotted hierarchical
/// pattern (the event bus's documented "exact, wildcard `*`, or glob").
pub fn type_pattern_matches(pattern: &str, value: &str) -> bool {
    pattern == value || dotted_match(pattern, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_match_examples_from_spec() {
        assert!(dotted_match("a.*.c", "a.b.c"));
        assert!(dotted_match("a.*.c", "a.xyz.c"));
        assert!(!dotted_match("a.*.c", "a.b.d.c"));
        assert!(!dotted_match("a.*.c", "a.c"));
        assert!(!dotted_match("a.*.c", "x.b.c"));
        assert!(dotted_match("a.*", "a.b"));
        assert!(!dotted_match("a.*", "a.b.c"));
    }

    #[test]
    fn universal_wildcard_matches_anything() {
        assert!(dotted_match("*", "a.b.c"));
        assert!(type_pattern_matches("*", "anything.at.all"));
    }

    #[test]
    fn exact_match_wins_without_wildcards() {
        assert!(type_pattern_matches("system.event.dead_letter", "system.event.dead_letter"));
        assert!(!type_pattern_matches("system.event.dead_letter", "system.event.other"));
    }

    #[test]
    fn glob_match_on_service_names() {
        assert!(glob_match("si_*", "si_banking"));
        assert!(!glob_match("si_*", "app_banking"));
        assert!(glob_match("*", "anything"));
    }
}
