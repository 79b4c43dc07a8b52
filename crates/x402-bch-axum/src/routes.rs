//! Route-pattern matching for payment-gated endpoints.
//!
//! Patterns are configured as `"VERB /path"` or `"/path"` keys. The verb
//! `*` (or omitting it) matches any method. Within the path, `*` is a
//! non-greedy wildcard and `[param]` matches one path segment. Matching is
//! case-insensitive against a normalized request path; when several
//! patterns match, the most specific one (longest compiled matcher) wins.

use regex::Regex;

use x402_bch::network::Network;
use x402_bch::types::Satoshis;

/// Payment configuration for one protected route.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// The per-call charge in satoshis, advertised as `minAmountRequired`.
    pub price_sat: Satoshis,
    pub network: Network,
    pub description: String,
    pub mime_type: String,
    pub max_timeout_seconds: u64,
    pub discoverable: bool,
}

impl RouteConfig {
    /// A route charging `price_sat` satoshis with default metadata.
    pub fn price(price_sat: u64) -> Self {
        RouteConfig {
            price_sat: Satoshis(price_sat),
            network: Network::Bch,
            description: String::new(),
            mime_type: String::new(),
            max_timeout_seconds: 60,
            discoverable: true,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoutePatternError {
    #[error("Invalid route pattern: {0}")]
    Empty(String),
    #[error("Unclosed [param] in route pattern: {0}")]
    UnclosedParam(String),
    #[error("Route pattern {pattern} compiled to an invalid matcher: {source}")]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    verb: String,
    matcher: Regex,
    specificity: usize,
    config: RouteConfig,
}

/// The compiled set of protected-route patterns.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile `("VERB /pattern", config)` pairs into a matchable table.
    pub fn compile<I>(routes: I) -> Result<Self, RoutePatternError>
    where
        I: IntoIterator<Item = (String, RouteConfig)>,
    {
        let mut compiled = Vec::new();
        for (key, config) in routes {
            let key = key.trim();
            let (verb, path) = match key.split_once(char::is_whitespace) {
                Some((verb, path)) => (verb.trim(), path.trim()),
                None => ("*", key),
            };
            if path.is_empty() {
                return Err(RoutePatternError::Empty(key.to_string()));
            }
            let matcher = compile_path_pattern(path)?;
            compiled.push(CompiledRoute {
                verb: verb.to_ascii_uppercase(),
                specificity: matcher.as_str().len(),
                matcher,
                config,
            });
        }
        Ok(RouteTable { routes: compiled })
    }

    /// The config of the most specific pattern matching `path` under
    /// `method`, if any. `path` is the raw request path; it is normalized
    /// before matching, and an undecodable path matches nothing.
    pub fn matching(&self, path: &str, method: &str) -> Option<&RouteConfig> {
        let normalized = normalize_path(path)?;
        let method = method.to_ascii_uppercase();
        self.routes
            .iter()
            .filter(|route| route.verb == "*" || route.verb == method)
            .filter(|route| route.matcher.is_match(&normalized))
            .max_by_key(|route| route.specificity)
            .map(|route| &route.config)
    }
}

/// Translate a route path pattern into an anchored case-insensitive regex:
/// `*` becomes a non-greedy wildcard, `[param]` matches one path segment,
/// everything else is literal.
fn compile_path_pattern(path: &str) -> Result<Regex, RoutePatternError> {
    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push_str("(?i)^");
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*?"),
            '[' => {
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(RoutePatternError::UnclosedParam(path.to_string()));
                }
                pattern.push_str("[^/]+");
            }
            '$' | '(' | ')' | '+' | '.' | '?' | '^' | '{' | '|' | '}' | ']' | '\\' => {
                pattern.push('\\');
                pattern.push(c);
            }
            other => pattern.push(other),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|source| RoutePatternError::BadRegex {
        pattern: path.to_string(),
        source,
    })
}

/// Normalize a request path before matching: strip query and fragment,
/// percent-decode, unify separators, collapse duplicate slashes, trim
/// trailing slashes. Returns `None` when the path cannot be decoded.
fn normalize_path(path: &str) -> Option<String> {
    let without_query = path.split(['?', '#']).next().unwrap_or("");
    let decoded = percent_decode(without_query)?;
    let mut normalized = decoded.replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    Some(normalized)
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_value(*bytes.get(i + 1)?)?;
            let lo = hex_value(*bytes.get(i + 2)?)?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(keys: &[&str]) -> RouteTable {
        RouteTable::compile(
            keys.iter()
                .map(|key| (key.to_string(), RouteConfig::price(1000))),
        )
        .unwrap()
    }

    #[test]
    fn test_plain_route_matches() {
        let table = table(&["GET /weather"]);
        assert!(table.matching("/weather", "GET").is_some());
        assert!(table.matching("/weather", "get").is_some());
        assert!(table.matching("/weather", "POST").is_none());
        assert!(table.matching("/other", "GET").is_none());
    }

    #[test]
    fn test_verbless_route_matches_any_method() {
        let table = table(&["/weather"]);
        assert!(table.matching("/weather", "GET").is_some());
        assert!(table.matching("/weather", "DELETE").is_some());
    }

    #[test]
    fn test_wildcard_and_param_patterns() {
        let table = table(&["GET /api/*", "GET /users/[id]/profile"]);
        assert!(table.matching("/api/anything/nested", "GET").is_some());
        assert!(table.matching("/users/42/profile", "GET").is_some());
        assert!(table.matching("/users/42/48/profile", "GET").is_none());
    }

    #[test]
    fn test_most_specific_pattern_wins() {
        let mut routes = vec![
            ("GET /api/*".to_string(), RouteConfig::price(1)),
            ("GET /api/premium/*".to_string(), RouteConfig::price(9000)),
        ];
        // Order must not matter.
        routes.reverse();
        let table = RouteTable::compile(routes).unwrap();
        let config = table.matching("/api/premium/data", "GET").unwrap();
        assert_eq!(config.price_sat, Satoshis(9000));
        let config = table.matching("/api/basic", "GET").unwrap();
        assert_eq!(config.price_sat, Satoshis(1));
    }

    #[test]
    fn test_path_normalization() {
        let table = table(&["GET /weather"]);
        assert!(table.matching("/weather?units=c#frag", "GET").is_some());
        assert!(table.matching("/weather/", "GET").is_some());
        assert!(table.matching("//weather///", "GET").is_some());
        assert!(table.matching("\\weather", "GET").is_some());
        assert!(table.matching("/%77eather", "GET").is_some());
    }

    #[test]
    fn test_undecodable_path_matches_nothing() {
        let table = table(&["GET /weather"]);
        assert!(table.matching("/weather%zz", "GET").is_none());
        assert!(table.matching("/weather%2", "GET").is_none());
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let table = table(&["GET /v1.0/data"]);
        assert!(table.matching("/v1.0/data", "GET").is_some());
        // The dot must not act as a regex wildcard.
        assert!(table.matching("/v1x0/data", "GET").is_none());
    }

    #[test]
    fn test_unclosed_param_is_rejected() {
        let result = RouteTable::compile([(
            "GET /users/[id".to_string(),
            RouteConfig::price(1000),
        )]);
        assert!(matches!(result, Err(RoutePatternError::UnclosedParam(_))));
    }
}
