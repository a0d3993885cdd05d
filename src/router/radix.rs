//! Segment tree for route matching.
//!
//! Patterns are split on `/` and inserted one segment per level. Static
//! segments match exactly; `{name}` segments match any single segment (and
//! `{name:re}` only those the regex accepts). Routes sit on terminal nodes
//! keyed by HTTP method. Lookup is O(k) in the number of path segments, with
//! backtracking from static to parameter children when a static branch
//! dead-ends.

use http::Method;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use super::route::{ParamVec, Route, Segment};

#[derive(Clone, Default)]
pub(crate) struct RadixNode {
    segment: String,
    /// Routes terminating here, per method
    routes: HashMap<Method, Arc<Route>>,
    param_name: Option<Arc<str>>,
    constraint: Option<Regex>,
    children: Vec<RadixNode>,
    /// Parameter children, tried in insertion order after static children
    param_children: Vec<RadixNode>,
}

fn same_constraint(a: &Option<Regex>, b: &Option<Regex>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x.as_str() == y.as_str(),
        _ => false,
    }
}

impl RadixNode {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    fn new_param(name: Arc<str>, constraint: Option<Regex>) -> Self {
        Self {
            param_name: Some(name),
            constraint,
            ..Self::default()
        }
    }

    /// Insert `route` for `method`. Returns `false` when the slot was
    /// already taken; the first registration wins.
    pub(crate) fn insert(&mut self, segments: &[Segment], method: Method, route: Arc<Route>) -> bool {
        let Some((segment, remaining)) = segments.split_first() else {
            if self.routes.contains_key(&method) {
                return false;
            }
            self.routes.insert(method, route);
            return true;
        };

        match segment {
            Segment::Param { name, constraint } => {
                if let Some(child) = self.param_children.iter_mut().find(|c| {
                    c.param_name.as_deref() == Some(name.as_ref())
                        && same_constraint(&c.constraint, constraint)
                }) {
                    return child.insert(remaining, method, route);
                }
                let mut child = RadixNode::new_param(Arc::clone(name), constraint.clone());
                let inserted = child.insert(remaining, method, route);
                self.param_children.push(child);
                inserted
            }
            Segment::Static(s) => {
                if let Some(child) = self.children.iter_mut().find(|c| &c.segment == s) {
                    return child.insert(remaining, method, route);
                }
                let mut child = RadixNode {
                    segment: s.clone(),
                    ..Self::default()
                };
                let inserted = child.insert(remaining, method, route);
                self.children.push(child);
                inserted
            }
        }
    }

    fn accepts(&self, value: &str) -> bool {
        self.constraint.as_ref().is_none_or(|re| re.is_match(value))
    }

    pub(crate) fn search(
        &self,
        segments: &[&str],
        method: &Method,
        params: &mut ParamVec,
    ) -> Option<Arc<Route>> {
        let Some((&segment, remaining)) = segments.split_first() else {
            return self.routes.get(method).map(Arc::clone);
        };

        for child in &self.children {
            if child.segment == segment {
                if let Some(route) = child.search(remaining, method, params) {
                    return Some(route);
                }
            }
        }

        for child in &self.param_children {
            let Some(name) = &child.param_name else { continue };
            if !child.accepts(segment) {
                continue;
            }
            params.push((Arc::clone(name), segment.to_string()));
            if let Some(route) = child.search(remaining, method, params) {
                return Some(route);
            }
            params.pop();
        }

        None
    }

    /// Every method registered on any terminal node the path reaches.
    pub(crate) fn collect_allowed(&self, segments: &[&str], out: &mut Vec<Method>) {
        let Some((&segment, remaining)) = segments.split_first() else {
            for method in self.routes.keys() {
                if !out.contains(method) {
                    out.push(method.clone());
                }
            }
            return;
        };
        for child in self.children.iter().filter(|c| c.segment == segment) {
            child.collect_allowed(remaining, out);
        }
        for child in self.param_children.iter().filter(|c| c.accepts(segment)) {
            child.collect_allowed(remaining, out);
        }
    }
}

/// Path segments as matched: split on `/`, empties dropped.
pub(crate) fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::route::{handler, parse_pattern};

    fn tree(routes: &[(Method, &str)]) -> RadixNode {
        let mut root = RadixNode::root();
        for (method, pattern) in routes {
            let route = Arc::new(Route::new(
                vec![method.clone()],
                pattern.to_string(),
                handler(|_| Ok(().into())),
            ));
            root.insert(&parse_pattern(pattern).unwrap(), method.clone(), route);
        }
        root
    }

    fn find(root: &RadixNode, method: Method, path: &str) -> Option<(String, ParamVec)> {
        let mut params = ParamVec::new();
        root.search(&path_segments(path), &method, &mut params)
            .map(|r| (r.pattern().to_string(), params))
    }

    #[test]
    fn test_static_beats_param() {
        let root = tree(&[(Method::GET, "/users/{id}"), (Method::GET, "/users/me")]);
        let (pattern, params) = find(&root, Method::GET, "/users/me").unwrap();
        assert_eq!(pattern, "/users/me");
        assert!(params.is_empty());
        let (pattern, params) = find(&root, Method::GET, "/users/42").unwrap();
        assert_eq!(pattern, "/users/{id}");
        assert_eq!(params[0].1, "42");
    }

    #[test]
    fn test_backtracks_out_of_dead_static_branch() {
        let root = tree(&[
            (Method::GET, "/files/static/readme"),
            (Method::GET, "/files/{name}/meta"),
        ]);
        let (pattern, params) = find(&root, Method::GET, "/files/static/meta").unwrap();
        assert_eq!(pattern, "/files/{name}/meta");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].1, "static");
    }

    #[test]
    fn test_constraints_pick_between_params() {
        let root = tree(&[
            (Method::GET, "/items/{id:\\d+}"),
            (Method::GET, "/items/{slug}"),
        ]);
        let (pattern, _) = find(&root, Method::GET, "/items/12").unwrap();
        assert_eq!(pattern, "/items/{id:\\d+}");
        let (pattern, params) = find(&root, Method::GET, "/items/red-shoes").unwrap();
        assert_eq!(pattern, "/items/{slug}");
        assert_eq!(params[0].0.as_ref(), "slug");
    }

    #[test]
    fn test_collect_allowed() {
        let root = tree(&[
            (Method::GET, "/items"),
            (Method::POST, "/items"),
            (Method::DELETE, "/items/{id}"),
        ]);
        let mut allowed = Vec::new();
        root.collect_allowed(&path_segments("/items"), &mut allowed);
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(allowed, vec![Method::GET, Method::POST]);
    }

    #[test]
    fn test_first_registration_wins() {
        let mut root = RadixNode::root();
        let a = Arc::new(Route::new(vec![Method::GET], "/a".into(), handler(|_| Ok(().into()))));
        let segments = parse_pattern("/a").unwrap();
        assert!(root.insert(&segments, Method::GET, Arc::clone(&a)));
        assert!(!root.insert(&segments, Method::GET, a));
    }
}
