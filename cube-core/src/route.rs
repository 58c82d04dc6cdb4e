// Copyright 2026 the Cube authors. MIT license.
//
// The route table (§3, §9 "Route storage"). Grounded in
// `internal/cache.go`'s `CacheClient.{SetRoute,GetRoute,InitRoutes}`: every
// `{name}` path segment becomes a named capture group, routes are rebuilt
// into an ordered structure on any mutation, and lookup is first-match in
// that order. We take the spec's stability recommendation literally and
// order by descending row id, same as the original's
// `order by rowid desc`.

use regex::Regex;
use std::collections::HashMap;

use crate::artifact::ControllerRoute;
use crate::error::CubeResult;

struct CompiledRoute {
    name: String,
    method: String,
    pattern: Regex,
}

/// Holds routes in insertion order (a `Vec`, not a map) so first-match scan
/// order is deterministic regardless of hashing — the open question in §9
/// about unordered-map iteration is resolved by never using one here.
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn rebuild(controllers: &[ControllerRoute]) -> CubeResult<Self> {
        // `list_active_controllers` already orders by `rowid desc`; preserve
        // that order here so first-match semantics are stable across a
        // from-scratch rebuild.
        let mut ordered = controllers.to_vec();
        ordered.sort_by(|a, b| b.row_id.cmp(&a.row_id));

        let mut routes = Vec::with_capacity(ordered.len());
        for c in &ordered {
            routes.push(compile_route(&c.name, &c.url, &c.method)?);
        }
        Ok(Self { routes })
    }

    /// Patches a single controller's route in place (insert-or-replace),
    /// for the CRUD layer's incremental path (§4.A step 2, "route-table
    /// patch or rebuild"). The patched route moves to the front, since a
    /// freshly (re)activated controller has the highest row id.
    pub fn upsert(&mut self, name: &str, url: &str, method: &str) -> CubeResult<()> {
        self.routes.retain(|r| r.name != name);
        self.routes.insert(0, compile_route(name, url, method)?);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) {
        self.routes.retain(|r| r.name != name);
    }

    /// First-match lookup. Returns the controller name, its method
    /// constraint, and the captured path variables (§3 "Route table";
    /// §6 "`{identifier}`... becomes a named capture").
    pub fn matches(&self, path: &str) -> Option<MatchedRoute<'_>> {
        for route in &self.routes {
            if let Some(captures) = route.pattern.captures(path) {
                let mut vars = HashMap::new();
                for name in route.pattern.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        vars.insert(name.to_string(), m.as_str().to_string());
                    }
                }
                return Some(MatchedRoute {
                    name: &route.name,
                    method: &route.method,
                    vars,
                });
            }
        }
        None
    }
}

pub struct MatchedRoute<'a> {
    pub name: &'a str,
    pub method: &'a str,
    pub vars: HashMap<String, String>,
}

/// Replaces every `{name}` path segment with a named, non-greedy capture
/// group, same substitution `internal/cache.go`'s `SetRoute` performs with
/// `regexp.MustCompile("{(.*?)}")`.
fn compile_route(name: &str, url: &str, method: &str) -> CubeResult<CompiledRoute> {
    static PLACEHOLDER: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"\{(.*?)\}").unwrap());

    let pattern_src = PLACEHOLDER.replace_all(url, r"(?P<$1>[^/]+)");
    let pattern = Regex::new(&format!("^{pattern_src}$"))
        .map_err(|e| crate::error::CubeError::Native(anyhow::anyhow!("bad route pattern for {name}: {e}")))?;
    Ok(CompiledRoute {
        name: name.to_string(),
        method: method.to_string(),
        pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, url: &str, method: &str, row_id: i64) -> ControllerRoute {
        ControllerRoute {
            name: name.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            row_id,
        }
    }

    #[test]
    fn matches_path_variable() {
        let table = RouteTable::rebuild(&[route("hello", "/greet/{who}", "", 1)]).unwrap();
        let m = table.matches("/greet/world").expect("should match");
        assert_eq!(m.name, "hello");
        assert_eq!(m.vars.get("who").map(String::as_str), Some("world"));
    }

    #[test]
    fn no_match_returns_none() {
        let table = RouteTable::rebuild(&[route("hello", "/greet/{who}", "", 1)]).unwrap();
        assert!(table.matches("/nope").is_none());
    }

    #[test]
    fn first_match_wins_by_insertion_order() {
        let table = RouteTable::rebuild(&[
            route("newer", "/a/{x}", "", 2),
            route("older", "/a/{x}", "", 1),
        ])
        .unwrap();
        let m = table.matches("/a/1").unwrap();
        assert_eq!(m.name, "newer");
    }

    #[test]
    fn upsert_moves_route_to_front() {
        let mut table = RouteTable::rebuild(&[route("a", "/x", "", 1), route("b", "/x", "", 2)]).unwrap();
        table.upsert("a", "/x", "").unwrap();
        let m = table.matches("/x").unwrap();
        assert_eq!(m.name, "a");
    }
}
