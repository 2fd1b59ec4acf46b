//! Priority-ordered route table.
//!
//! Routes are kept sorted by descending priority; ties preserve insertion
//! order (stable sort), so among equally-prioritized overlapping patterns
//! the first registered wins. Matching is a linear first-match scan under a
//! shared read lock; registration is rare and takes the writer lock.

use crate::models::route::Route;
use crate::routing::matcher::MatchError;
use log::debug;
use std::collections::HashMap;
use std::sync::RwLock;

/// Concurrent route table with first-match-wins semantics.
///
/// # Examples
///
/// ```
/// use tollgate_rs::models::route::Route;
/// use tollgate_rs::routing::router::Router;
///
/// let router = Router::new();
/// router.add(
///     Route::new("/users/:id").unwrap()
///         .with_methods(["GET"])
///         .with_targets(["users:8080"]),
/// );
///
/// let (route, params) = router.match_route("/users/42", "GET").unwrap();
/// assert_eq!(route.pattern, "/users/:id");
/// assert_eq!(params["id"], "42");
/// ```
#[derive(Debug, Default)]
pub struct Router {
    routes: RwLock<Vec<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Registers a route, keeping the table sorted by descending priority.
    ///
    /// `Vec::sort_by` is stable, so routes with equal priority stay in
    /// insertion order.
    pub fn add(&self, route: Route) -> &Self {
        let mut routes = self.routes.write().unwrap();
        debug!(
            "Registering route {} (methods {:?}, priority {})",
            route.pattern, route.methods, route.priority
        );
        routes.push(route);
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    /// Compiles and registers a pattern in one call.
    pub fn route<I, S>(
        &self,
        pattern: &str,
        targets: I,
        methods: Vec<String>,
        priority: i32,
    ) -> Result<&Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let route = Route::new(pattern)?
            .with_targets(targets)
            .with_methods(methods)
            .with_priority(priority);
        Ok(self.add(route))
    }

    /// Registers a GET route for `pattern`.
    pub fn get<I, S>(&self, pattern: &str, targets: I) -> Result<&Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route(pattern, targets, vec!["GET".to_string()], 0)
    }

    /// Registers a POST route for `pattern`.
    pub fn post<I, S>(&self, pattern: &str, targets: I) -> Result<&Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route(pattern, targets, vec!["POST".to_string()], 0)
    }

    /// Registers a PUT route for `pattern`.
    pub fn put<I, S>(&self, pattern: &str, targets: I) -> Result<&Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route(pattern, targets, vec!["PUT".to_string()], 0)
    }

    /// Registers a DELETE route for `pattern`.
    pub fn delete<I, S>(&self, pattern: &str, targets: I) -> Result<&Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route(pattern, targets, vec!["DELETE".to_string()], 0)
    }

    /// Registers a PATCH route for `pattern`.
    pub fn patch<I, S>(&self, pattern: &str, targets: I) -> Result<&Self, MatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route(pattern, targets, vec!["PATCH".to_string()], 0)
    }

    /// Returns the first route whose pattern matches `path` and whose
    /// method set admits `method`, together with the captured parameters.
    pub fn match_route(&self, path: &str, method: &str) -> Option<(Route, HashMap<String, String>)> {
        let routes = self.routes.read().unwrap();
        for route in routes.iter() {
            if let Some(params) = route.matches(path, method) {
                return Some((route.clone(), params));
            }
        }
        None
    }

    /// True when some route matches the path but none admits the method.
    /// Distinguishes 405 from 404 in the pipeline.
    pub fn path_known(&self, path: &str) -> bool {
        let routes = self.routes.read().unwrap();
        routes.iter().any(|route| route.matches_path(path))
    }

    /// Removes the first route with the given name. Returns true on removal.
    pub fn remove(&self, name: &str) -> bool {
        let mut routes = self.routes.write().unwrap();
        if let Some(pos) = routes.iter().position(|r| r.name == name) {
            routes.remove(pos);
            true
        } else {
            false
        }
    }

    /// Copies of all registered routes in match order.
    pub fn routes(&self) -> Vec<Route> {
        self.routes.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.routes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str, priority: i32, name: &str) -> Route {
        Route::new(pattern)
            .unwrap()
            .with_priority(priority)
            .with_name(name)
    }

    #[test]
    fn higher_priority_wins() {
        let router = Router::new();
        router.add(route("/api/*", 0, "catch"));
        router.add(route("/api/users", 10, "users"));

        let (matched, _) = router.match_route("/api/users", "GET").unwrap();
        assert_eq!(matched.name, "users");
    }

    #[test]
    fn equal_priority_first_registered_wins() {
        let router = Router::new();
        router.add(route("/api/:a", 5, "first"));
        router.add(route("/api/:b", 5, "second"));

        let (matched, _) = router.match_route("/api/x", "GET").unwrap();
        assert_eq!(matched.name, "first");
    }

    #[test]
    fn no_match_returns_none() {
        let router = Router::new();
        router.add(route("/users", 0, "users"));
        assert!(router.match_route("/posts", "GET").is_none());
    }

    #[test]
    fn method_mismatch_skips_route() {
        let router = Router::new();
        router.add(
            Route::new("/users")
                .unwrap()
                .with_methods(["POST"])
                .with_name("create"),
        );
        assert!(router.match_route("/users", "GET").is_none());
        assert!(router.path_known("/users"));
    }

    #[test]
    fn remove_by_name() {
        let router = Router::new();
        router.add(route("/users", 0, "users"));
        assert!(router.remove("users"));
        assert!(!router.remove("users"));
        assert!(router.is_empty());
    }

    #[test]
    fn method_helpers_register_single_method_routes() {
        let router = Router::new();
        router.get("/users/:id", ["u:80"]).unwrap();
        router.post("/users", ["u:80"]).unwrap();

        assert!(router.match_route("/users/1", "GET").is_some());
        assert!(router.match_route("/users/1", "POST").is_none());
        assert!(router.match_route("/users", "POST").is_some());
    }

    #[test]
    fn params_flow_through() {
        let router = Router::new();
        router.add(route("/users/:id/posts/:post", 0, ""));
        let (_, params) = router.match_route("/users/1/posts/2", "GET").unwrap();
        assert_eq!(params["id"], "1");
        assert_eq!(params["post"], "2");
    }
}
