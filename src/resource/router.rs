use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

// ── Verb ─────────────────────────────────────────────────────

/// Request verbs a route rule can bind a handler to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
            Verb::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown verb '{0}'")]
pub struct UnknownVerb(pub String);

/// Parsing is case-insensitive: `get`, `Get` and `GET` are the same verb.
impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "PATCH" => Ok(Verb::Patch),
            "DELETE" => Ok(Verb::Delete),
            "HEAD" => Ok(Verb::Head),
            "OPTIONS" => Ok(Verb::Options),
            _ => Err(UnknownVerb(s.to_string())),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no route matches path '{path}'")]
    RouteNotFound { path: String },

    #[error("route for '{path}' has no {verb} handler")]
    HandlerNotFound { verb: Verb, path: String },
}

// ── Router ───────────────────────────────────────────────────

struct Endpoint<H> {
    base: String,
    handler: H,
}

struct RouteRule<H> {
    pattern: String,
    /// Compiled form of `pattern`; `None` for the empty (collection) pattern.
    regex: Option<Regex>,
    endpoints: HashMap<Verb, Endpoint<H>>,
}

impl<H> RouteRule<H> {
    fn matches(&self, path: &str) -> bool {
        self.pattern == path || self.regex.as_ref().is_some_and(|re| re.is_match(path))
    }
}

/// A handler picked by [`PathRouter::resolve`].
#[derive(Debug)]
pub struct ResolvedRoute<'a, H> {
    /// Diagnostic name, e.g. `getEntity`.
    pub name: String,
    pub handler: &'a H,
}

/// Ordered `(pattern, verb) → handler` table.
///
/// Rules are tried in declaration order. A rule matches when its pattern is
/// equal to the path, or when the (non-empty) pattern, read as a regular
/// expression, finds a match anywhere in the path. Only the first matching
/// rule is consulted for the verb.
pub struct PathRouter<H> {
    rules: Vec<RouteRule<H>>,
}

impl<H> PathRouter<H> {
    pub fn builder() -> PathRouterBuilder<H> {
        PathRouterBuilder { rules: Vec::new() }
    }

    pub fn resolve(&self, path: &str, verb: Verb) -> Result<ResolvedRoute<'_, H>, RouteError> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matches(path))
            .ok_or_else(|| RouteError::RouteNotFound {
                path: path.to_string(),
            })?;

        let endpoint = rule
            .endpoints
            .get(&verb)
            .ok_or_else(|| RouteError::HandlerNotFound {
                verb,
                path: path.to_string(),
            })?;

        Ok(ResolvedRoute {
            name: handler_name(verb, &endpoint.base),
            handler: &endpoint.handler,
        })
    }

    /// Patterns in declaration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.pattern.as_str())
    }
}

pub struct PathRouterBuilder<H> {
    rules: Vec<(String, Vec<(Verb, String, H)>)>,
}

impl<H> PathRouterBuilder<H> {
    /// Bind `verb` on `pattern` to `handler`. Repeating a pattern adds the
    /// verb to the existing rule, which keeps its original position.
    pub fn route(mut self, pattern: &str, verb: Verb, base: &str, handler: H) -> Self {
        let entry = (verb, base.to_string(), handler);
        match self.rules.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, endpoints)) => endpoints.push(entry),
            None => self.rules.push((pattern.to_string(), vec![entry])),
        }
        self
    }

    /// Compile every pattern. Fails on the first invalid expression.
    pub fn build(self) -> Result<PathRouter<H>, regex::Error> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for (pattern, endpoints) in self.rules {
            let regex = if pattern.is_empty() {
                None
            } else {
                Some(Regex::new(&pattern)?)
            };
            let endpoints = endpoints
                .into_iter()
                .map(|(verb, base, handler)| (verb, Endpoint { base, handler }))
                .collect();
            rules.push(RouteRule {
                pattern,
                regex,
                endpoints,
            });
        }
        Ok(PathRouter { rules })
    }
}

/// `GET` + `entity` → `getEntity`.
pub fn handler_name(verb: Verb, base: &str) -> String {
    let mut name = verb.as_str().to_ascii_lowercase();
    let mut chars = base.chars();
    if let Some(first) = chars.next() {
        name.extend(first.to_uppercase());
        name.push_str(chars.as_str());
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_router() -> PathRouter<&'static str> {
        PathRouter::builder()
            .route("", Verb::Get, "list", "list")
            .route(r"\d+", Verb::Get, "entity", "entity")
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_path_resolves_to_list() {
        let router = default_router();
        let resolved = router.resolve("", Verb::Get).unwrap();
        assert_eq!(resolved.name, "getList");
        assert_eq!(*resolved.handler, "list");
    }

    #[test]
    fn test_numeric_path_resolves_to_entity() {
        let router = default_router();
        let resolved = router.resolve("42", Verb::Get).unwrap();
        assert_eq!(resolved.name, "getEntity");
        assert_eq!(*resolved.handler, "entity");
    }

    #[test]
    fn test_verb_miss_is_handler_not_found() {
        let router = default_router();
        let err = router.resolve("42", Verb::Post).unwrap_err();
        assert_eq!(
            err,
            RouteError::HandlerNotFound {
                verb: Verb::Post,
                path: "42".into()
            }
        );
    }

    #[test]
    fn test_unmatched_path_is_route_not_found() {
        let router = default_router();
        let err = router.resolve("abc", Verb::Get).unwrap_err();
        assert_eq!(err, RouteError::RouteNotFound { path: "abc".into() });
    }

    #[test]
    fn test_empty_pattern_only_matches_empty_path() {
        let router = PathRouter::builder()
            .route("", Verb::Get, "list", ())
            .build()
            .unwrap();
        assert!(router.resolve("", Verb::Get).is_ok());
        assert!(matches!(
            router.resolve("anything", Verb::Get),
            Err(RouteError::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_verb_miss_does_not_fall_through() {
        // The second rule would accept POST, but the first rule matched.
        let router = PathRouter::builder()
            .route(r"\d+", Verb::Get, "entity", 1)
            .route(r"^42$", Verb::Post, "entity", 2)
            .build()
            .unwrap();
        assert!(matches!(
            router.resolve("42", Verb::Post),
            Err(RouteError::HandlerNotFound { .. })
        ));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let router = PathRouter::builder()
            .route(r"\d", Verb::Get, "first", 1)
            .route(r"\d+", Verb::Get, "second", 2)
            .build()
            .unwrap();
        let resolved = router.resolve("42", Verb::Get).unwrap();
        assert_eq!(*resolved.handler, 1);
        assert_eq!(resolved.name, "getFirst");
    }

    #[test]
    fn test_regex_search_is_unanchored() {
        let router = default_router();
        assert_eq!(router.resolve("abc42", Verb::Get).unwrap().name, "getEntity");
    }

    #[test]
    fn test_repeated_pattern_extends_rule() {
        let router = PathRouter::builder()
            .route("", Verb::Get, "list", 1)
            .route(r"\d+", Verb::Get, "entity", 2)
            .route("", Verb::Post, "list", 3)
            .build()
            .unwrap();
        assert_eq!(router.patterns().collect::<Vec<_>>(), vec!["", r"\d+"]);
        let resolved = router.resolve("", Verb::Post).unwrap();
        assert_eq!(resolved.name, "postList");
        assert_eq!(*resolved.handler, 3);
    }

    #[test]
    fn test_invalid_pattern_fails_build() {
        let result = PathRouter::builder()
            .route("(unclosed", Verb::Get, "entity", ())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_verb_parse_is_case_insensitive() {
        assert_eq!("get".parse::<Verb>().unwrap(), Verb::Get);
        assert_eq!("Get".parse::<Verb>().unwrap(), Verb::Get);
        assert_eq!("DELETE".parse::<Verb>().unwrap(), Verb::Delete);
        assert!("PURGE".parse::<Verb>().is_err());
    }

    #[test]
    fn test_handler_name() {
        assert_eq!(handler_name(Verb::Get, "entity"), "getEntity");
        assert_eq!(handler_name(Verb::Get, "orCreateToken"), "getOrCreateToken");
        assert_eq!(handler_name(Verb::Delete, ""), "delete");
    }
}
