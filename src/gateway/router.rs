//! Declarative route matching. Patterns are `/`-delimited templates in which
//! `{name}` captures a single non-empty segment; everything else matches
//! literally. Routes are tried in declaration order and the first match wins.

use std::collections::HashMap;

use crate::data_model::{EventSource, Route, RouteMatch};

/// Matches a request path against the route table. Only `api`-sourced routes
/// participate. Matching is pure: the same table and path always produce the
/// same result.
pub fn match_route<'a>(routes: &'a [Route], path: &str) -> Option<RouteMatch<'a>> {
    routes
        .iter()
        .filter(|route| route.source == EventSource::Api)
        .find_map(|route| {
            match_pattern(&route.route, path).map(|path_parameters| RouteMatch {
                target: &route.target,
                path_parameters,
            })
        })
}

fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments = split_segments(pattern);
    let path_segments = split_segments(path);
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut path_parameters = HashMap::new();
    for (pattern_segment, path_segment) in pattern_segments.iter().zip(&path_segments) {
        match parameter_name(pattern_segment) {
            Some(name) => {
                if path_segment.is_empty() {
                    return None;
                }
                path_parameters.insert(name.to_string(), (*path_segment).to_string());
            }
            None => {
                if pattern_segment != path_segment {
                    return None;
                }
            }
        }
    }
    Some(path_parameters)
}

fn parameter_name(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

fn split_segments(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('/').collect();
    // A leading slash yields one empty leading segment; drop it so
    // "/a/b" and "a/b" describe the same path.
    if segments.first() == Some(&"") {
        segments.remove(0);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_route(target: &str, pattern: &str) -> Route {
        Route {
            source: EventSource::Api,
            target: target.to_string(),
            route: pattern.to_string(),
        }
    }

    #[test]
    fn literal_pattern_matches_only_itself() {
        let routes = vec![api_route("Fn", "/test/function")];

        let matched = match_route(&routes, "/test/function").unwrap();
        assert_eq!(matched.target, "Fn");
        assert!(matched.path_parameters.is_empty());

        assert!(match_route(&routes, "/test/not-function").is_none());
        assert!(match_route(&routes, "/test").is_none());
        assert!(match_route(&routes, "/test/function/extra").is_none());
    }

    #[test]
    fn parameter_segment_captures_its_value() {
        let routes = vec![api_route("Fn", "/{api}/function")];

        let matched = match_route(&routes, "/test/function").unwrap();
        assert_eq!(matched.target, "Fn");
        assert_eq!(matched.path_parameters["api"], "test");
    }

    #[test]
    fn segment_counts_must_be_exactly_equal() {
        let routes = vec![api_route("Fn", "/{api}/function")];

        assert!(match_route(&routes, "/test").is_none());
        assert!(match_route(&routes, "/test/function/extra").is_none());
    }

    #[test]
    fn parameter_does_not_capture_an_empty_segment() {
        let routes = vec![api_route("Fn", "/{api}/function")];
        assert!(match_route(&routes, "//function").is_none());
    }

    #[test]
    fn non_api_routes_never_match() {
        let routes = vec![Route {
            source: EventSource::Other,
            target: "Fn".to_string(),
            route: "/test/function".to_string(),
        }];
        assert!(match_route(&routes, "/test/function").is_none());
    }

    #[test]
    fn first_declared_match_wins() {
        let routes = vec![
            api_route("First", "/{anything}/function"),
            api_route("Second", "/test/function"),
        ];
        assert_eq!(match_route(&routes, "/test/function").unwrap().target, "First");
    }

    #[test]
    fn matching_is_idempotent() {
        let routes = vec![api_route("Fn", "/{api}/function")];
        let first = match_route(&routes, "/test/function").unwrap();
        let second = match_route(&routes, "/test/function").unwrap();
        assert_eq!(first, second);
    }
}
