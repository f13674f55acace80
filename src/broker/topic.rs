//! Topic pattern matching
//!
//! Binding patterns follow topic-exchange rules: dot-separated words where
//! `*` matches exactly one word and `#` matches zero or more words.

/// A parsed binding pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    words: Vec<Word>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    Literal(String),
    OneWord,
    ZeroOrMore,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        let words = pattern
            .split('.')
            .map(|segment| match segment {
                "*" => Word::OneWord,
                "#" => Word::ZeroOrMore,
                literal => Word::Literal(literal.to_string()),
            })
            .collect();
        Self { words }
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        let key: Vec<&str> = routing_key.split('.').collect();
        matches_from(&self.words, &key)
    }
}

fn matches_from(pattern: &[Word], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((Word::ZeroOrMore, rest)) => {
            // Try consuming zero, one, two... words.
            (0..=key.len()).any(|taken| matches_from(rest, &key[taken..]))
        }
        Some((word, rest)) => match key.split_first() {
            None => false,
            Some((head, tail)) => {
                let word_matches = match word {
                    Word::Literal(literal) => literal == head,
                    Word::OneWord => true,
                    Word::ZeroOrMore => unreachable!(),
                };
                word_matches && matches_from(rest, tail)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, key: &str) -> bool {
        TopicPattern::parse(pattern).matches(key)
    }

    #[test]
    fn test_exact_match() {
        assert!(matches("Users.Created", "Users.Created"));
        assert!(!matches("Users.Created", "Users.Updated"));
    }

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(matches("Users.*", "Users.Created"));
        assert!(matches("*.Created", "Users.Created"));
        assert!(!matches("Users.*", "Users"));
        assert!(!matches("Users.*", "Users.Created.Twice"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(matches("#", "Users.Created"));
        assert!(matches("Tasks.#", "Tasks"));
        assert!(matches("Tasks.#", "Tasks.Added"));
        assert!(matches("Tasks.#", "Tasks.Added.Again"));
        assert!(!matches("Tasks.#", "Users.Created"));
    }

    #[test]
    fn test_hash_in_the_middle() {
        assert!(matches("Tasks.#.Completed", "Tasks.Completed"));
        assert!(matches("Tasks.#.Completed", "Tasks.Sub.Completed"));
        assert!(!matches("Tasks.#.Completed", "Tasks.Sub.Added"));
    }
}
