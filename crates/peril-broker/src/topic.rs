//! Topic-exchange pattern matching.

/// Returns `true` if `routing_key` matches the topic binding `pattern`.
///
/// Both are split on `.` into words. In the pattern, `*` matches exactly
/// one word and `#` matches zero or more words; any other word must be
/// equal to the corresponding routing-key word.
///
/// ```rust
/// use peril_broker::topic_matches;
///
/// assert!(topic_matches("army_moves.*", "army_moves.alice"));
/// assert!(!topic_matches("army_moves.*", "army_moves"));
/// assert!(topic_matches("game_logs.#", "game_logs"));
/// ```
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` may swallow any number of words, including none.
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((&word, rest)) => match key.split_first() {
            Some((&k, key_rest)) if word == "*" || word == k => match_words(rest, key_rest),
            _ => false,
        },
    }
}
