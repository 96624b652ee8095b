//! Pattern Registry
//!
//! Each module keeps two insertion-ordered association lists of
//! (pattern, callback): one consulted for addressed events, one for
//! overheard events.

use regex::{Regex, RegexBuilder};

use crate::script::{CallbackHandle, PatternSource};

/// Which registry an event is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// The bot was spoken to directly
    Addressed,
    /// A channel line not directed at the bot
    Overheard,
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Addressed => f.write_str("addressed"),
            Audience::Overheard => f.write_str("overheard"),
        }
    }
}

/// A script pattern compiled for matching
#[derive(Debug, Clone)]
pub struct Pattern {
    source: PatternSource,
    regex: Regex,
}

impl Pattern {
    /// Compile a JavaScript pattern.
    ///
    /// `i`, `m` and `s` map to the matching regex options. `g`, `y`, `u` and
    /// `d` only affect stateful JavaScript matching and are ignored.
    pub fn compile(source: &PatternSource) -> Result<Self, regex::Error> {
        let mut builder = RegexBuilder::new(&source.source);
        for flag in source.flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                _ => &mut builder,
            };
        }

        Ok(Self {
            source: source.clone(),
            regex: builder.build()?,
        })
    }

    pub fn source(&self) -> &PatternSource {
        &self.source
    }

    /// Capture groups of the first match, index 0 is the whole match.
    /// Groups that did not participate are `None`.
    pub fn captures(&self, line: &str) -> Option<Vec<Option<String>>> {
        self.regex.captures(line).map(|caps| {
            caps.iter()
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect()
        })
    }
}

/// One registered handler
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub pattern: Pattern,
    pub callback: CallbackHandle,
}

/// Ordered (pattern, callback) list keyed by pattern source and flags
#[derive(Debug, Default)]
pub struct PatternRegistry {
    entries: Vec<RegistryEntry>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler, or replace the callback of an identical pattern in
    /// place. Returns the replaced callback.
    pub fn insert(&mut self, pattern: Pattern, callback: CallbackHandle) -> Option<CallbackHandle> {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.pattern.source == pattern.source)
        {
            Some(entry) => Some(std::mem::replace(&mut entry.callback, callback)),
            None => {
                self.entries.push(RegistryEntry { pattern, callback });
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Copy of the current entries, so handlers may register more while a
    /// dispatch is iterating
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.clone()
    }
}

/// The addressed and overheard registries of one module
#[derive(Debug, Default)]
pub struct Registries {
    addressed: PatternRegistry,
    overheard: PatternRegistry,
}

impl Registries {
    pub fn get(&self, audience: Audience) -> &PatternRegistry {
        match audience {
            Audience::Addressed => &self.addressed,
            Audience::Overheard => &self.overheard,
        }
    }

    pub fn get_mut(&mut self, audience: Audience) -> &mut PatternRegistry {
        match audience {
            Audience::Addressed => &mut self.addressed,
            Audience::Overheard => &mut self.overheard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::CallbackTable;

    fn pattern(source: &str, flags: &str) -> Pattern {
        Pattern::compile(&PatternSource::new(source, flags)).unwrap()
    }

    #[test]
    fn test_captures_whole_match_first() {
        let p = pattern(r#"meme( me)? (\w+) "(.*)" "(.*)""#, "");

        let caps = p.captures(r#"meme bcat "top" "bottom""#).unwrap();
        assert_eq!(
            caps,
            vec![
                Some(r#"meme bcat "top" "bottom""#.to_string()),
                None,
                Some("bcat".to_string()),
                Some("top".to_string()),
                Some("bottom".to_string()),
            ]
        );
        assert!(p.captures("nothing here").is_none());
    }

    #[test]
    fn test_flags() {
        assert!(pattern("^hello$", "i").captures("HELLO").is_some());
        assert!(pattern("^hello$", "").captures("HELLO").is_none());
        assert!(pattern("^two$", "m").captures("one\ntwo").is_some());
        assert!(pattern("a.b", "s").captures("a\nb").is_some());
        assert!(pattern("abc", "gu").captures("xabcx").is_some());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Pattern::compile(&PatternSource::new("(unclosed", "")).is_err());
    }

    #[test]
    fn test_insert_keeps_order_and_overwrites_in_place() {
        let mut table = CallbackTable::new();
        let first = table.insert(());
        let second = table.insert(());
        let replacement = table.insert(());

        let mut registry = PatternRegistry::new();
        assert!(registry.insert(pattern("a", ""), first.clone()).is_none());
        assert!(registry.insert(pattern("b", ""), second.clone()).is_none());
        // Same source with different flags is a different key
        assert!(registry.insert(pattern("a", "i"), second.clone()).is_none());

        let replaced = registry.insert(pattern("a", ""), replacement.clone());
        assert_eq!(replaced, Some(first));
        assert_eq!(registry.len(), 3);

        let order: Vec<_> = registry
            .iter()
            .map(|entry| (entry.pattern.source().to_string(), entry.callback.id()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("/a/".to_string(), replacement.id()),
                ("/b/".to_string(), second.id()),
                ("/a/i".to_string(), second.id()),
            ]
        );
    }

    #[test]
    fn test_registries_are_separate() {
        let mut table = CallbackTable::new();
        let mut registries = Registries::default();

        registries
            .get_mut(Audience::Overheard)
            .insert(pattern("x", ""), table.insert(()));

        assert!(registries.get(Audience::Addressed).is_empty());
        assert_eq!(registries.get(Audience::Overheard).len(), 1);
    }
}
