//! Parsing, querying, and serializing the `Cache-Control` header.
//!
//! Mirrors spec.md §4.1. A [`BTreeMap`] backs the directive map so that
//! [`CacheControl::to_string`]'s two-group (booleans, then valued) emission
//! order falls out of the map's natural iteration order instead of a
//! separate sort step.

use std::collections::BTreeMap;
use std::fmt;

/// The value carried by a single `Cache-Control` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// A bare directive, e.g. `public` or `no-cache`.
    Bool,
    /// A `name=value` directive. The raw string is kept as-is (digits stay
    /// as strings; `max_age`/`shared_max_age`/`reverse_max_age` do the
    /// integer coercion at query time).
    Value(String),
}

/// A parsed `Cache-Control` header: lowercase directive name -> value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl(BTreeMap<String, Directive>);

impl CacheControl {
    /// Parses a `Cache-Control` header value. Accepts `None` (header
    /// absent) and returns an empty map in that case.
    ///
    /// Splits on `,`, trims surrounding whitespace, splits each piece on the
    /// first `=` into at most two parts, lowercases the directive name.
    /// Empty names are dropped.
    pub fn parse(value: Option<&str>) -> Self {
        let mut map = BTreeMap::new();
        let Some(value) = value else {
            return Self(map);
        };
        for piece in value.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let mut parts = piece.splitn(2, '=');
            let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            if name.is_empty() {
                continue;
            }
            match parts.next() {
                Some(raw) => {
                    map.insert(name, Directive::Value(raw.trim().to_string()));
                }
                None => {
                    map.insert(name, Directive::Bool);
                }
            }
        }
        Self(map)
    }

    /// Inserts or overwrites a boolean directive.
    pub fn set_bool(&mut self, name: &str) {
        self.0.insert(name.to_ascii_lowercase(), Directive::Bool);
    }

    /// Inserts or overwrites a valued directive.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), Directive::Value(value.into()));
    }

    /// Returns the raw directive for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Directive> {
        self.0.get(name)
    }

    fn flag(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            Directive::Value(v) => v.trim().parse().ok(),
            Directive::Bool => None,
        }
    }

    /// `public?`
    pub fn public(&self) -> bool {
        self.flag("public")
    }

    /// `private?`
    pub fn private(&self) -> bool {
        self.flag("private")
    }

    /// `no_cache?`
    pub fn no_cache(&self) -> bool {
        self.flag("no-cache")
    }

    /// `no_store?`
    pub fn no_store(&self) -> bool {
        self.flag("no-store")
    }

    /// `must_revalidate?`
    pub fn must_revalidate(&self) -> bool {
        self.flag("must-revalidate")
    }

    /// `proxy_revalidate?`
    pub fn proxy_revalidate(&self) -> bool {
        self.flag("proxy-revalidate")
    }

    /// `max-age`, coerced to an integer. `None` if absent or unparseable.
    pub fn max_age(&self) -> Option<i64> {
        self.int("max-age")
    }

    /// `s-maxage`, coerced to an integer.
    pub fn shared_max_age(&self) -> Option<i64> {
        self.int("s-maxage")
    }

    /// `r-maxage`, coerced to an integer.
    pub fn reverse_max_age(&self) -> Option<i64> {
        self.int("r-maxage")
    }

    /// Iterates all directives, in alphabetical-by-name order (the map's
    /// native iteration order).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Directive)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for CacheControl {
    /// Serializes back to a `Cache-Control` header value: sorted boolean
    /// directives first, then sorted `name=value` directives, joined by
    /// `", "`. Entries are never `null`-valued in this representation, so
    /// there is nothing to omit.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(self.0.len());
        for (name, directive) in &self.0 {
            if matches!(directive, Directive::Bool) {
                parts.push(name.clone());
            }
        }
        for (name, directive) in &self.0 {
            if let Directive::Value(v) = directive {
                parts.push(format!("{name}={v}"));
            }
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_basic() {
        let cc = CacheControl::parse(Some("public, max-age=300"));
        assert!(cc.public());
        assert_eq!(cc.max_age(), Some(300));
    }

    #[test]
    fn parse_absent() {
        let cc = CacheControl::parse(None);
        assert!(!cc.public());
        assert_eq!(cc.max_age(), None);
    }

    #[test]
    fn parse_drops_empty_names() {
        let cc = CacheControl::parse(Some(", public,, max-age=1"));
        assert!(cc.public());
        assert_eq!(cc.max_age(), Some(1));
    }

    #[test]
    fn to_string_orders_bools_then_values() {
        let mut cc = CacheControl::default();
        cc.set_value("max-age", "300");
        cc.set_bool("public");
        assert_eq!(cc.to_string(), "public, max-age=300");
    }

    #[test]
    fn round_trip() {
        let original = "public, must-revalidate, max-age=300, s-maxage=60";
        let cc = CacheControl::parse(Some(original));
        let reparsed = CacheControl::parse(Some(&cc.to_string()));
        assert_eq!(cc, reparsed);
    }

    #[test]
    fn malformed_max_age_is_absent() {
        let cc = CacheControl::parse(Some("max-age=abc"));
        assert_eq!(cc.max_age(), None);
    }

    #[test]
    fn r_and_s_maxage_independent_of_max_age() {
        let cc = CacheControl::parse(Some("max-age=1, s-maxage=2, r-maxage=3"));
        assert_eq!(cc.max_age(), Some(1));
        assert_eq!(cc.shared_max_age(), Some(2));
        assert_eq!(cc.reverse_max_age(), Some(3));
    }
}
