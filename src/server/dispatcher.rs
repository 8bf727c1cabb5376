//! Virtual-host and method routing on top of [`route::Trie`].
//!
//! [`Router`] owns a set of [`Host`]s keyed by the request's `Host` header,
//! falling back to a default host registered under `*`. Each [`Host`] owns
//! one [`route::Trie`] per HTTP method plus its own [`RouteLimits`] and
//! [`TransformRegistry`] — [`ServerBuilder`](crate::ServerBuilder) has no
//! route-limits slot, so this state lives entirely on the router side of
//! the `Handler` boundary instead.

use crate::{
    http::types::{Method, StatusCode},
    limits::RouteLimits,
    route::{MatchCaptures, Pattern, TransformRegistry, Trie},
    server::{
        connection::ConnectionData,
        middleware::{DynMiddleware, Middleware, Outcome},
        server_impl::Handler,
    },
    Handled, Request, Response,
};
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Arc,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe stand-in for [`Handler`], so heterogeneous handlers can be
/// stored behind `Arc<dyn DynHandler<S>>` in a [`Trie`].
///
/// `Handler::handle` returns `impl Future`, which can't appear in a trait
/// object; this boxes the future instead. Every `H: Handler<S>` gets this
/// for free via the blanket impl below.
pub(crate) trait DynHandler<S>: Send + Sync {
    fn dyn_handle<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled>;
}

impl<S, H> DynHandler<S> for H
where
    H: Handler<S>,
    S: ConnectionData,
{
    fn dyn_handle<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(self.handle(data, request, response))
    }
}

/// All methods a route may be registered under, in the order probed when
/// synthesizing an `Allow` header.
const ALL_METHODS: [Method; 7] = [
    Method::Get,
    Method::Put,
    Method::Post,
    Method::Head,
    Method::Patch,
    Method::Delete,
    Method::Options,
];

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Put => "PUT",
        Method::Post => "POST",
        Method::Head => "HEAD",
        Method::Patch => "PATCH",
        Method::Delete => "DELETE",
        Method::Options => "OPTIONS",
    }
}

/// One virtual host: a name (or `*` for the catch-all default), its own
/// route tries, and hooks for the responses it synthesizes itself (404,
/// method-not-allowed, internal error).
pub struct Host<S: ConnectionData = ()> {
    routes: HashMap<Method, Trie<Arc<dyn DynHandler<S>>>>,
    limits: RouteLimits,
    transforms: TransformRegistry,
    not_found: Option<Arc<dyn DynHandler<S>>>,
    server_name: Option<&'static str>,
}

impl<S: ConnectionData> Default for Host<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConnectionData> Host<S> {
    /// Creates an empty host with default route limits and the built-in
    /// transforms (`String`, `Bool`, `Int32`, ...).
    pub fn new() -> Self {
        Host {
            routes: HashMap::new(),
            limits: RouteLimits::default(),
            transforms: TransformRegistry::with_builtins(),
            not_found: None,
            server_name: None,
        }
    }

    /// Overrides the default [`RouteLimits`] (max trie depth, max captures
    /// per match) used to parse and match every route on this host.
    pub fn route_limits(mut self, limits: RouteLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Registers a custom string-to-[`crate::Captured`] transform usable in
    /// `<name>` position by this host's route patterns.
    pub fn transform<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> Option<crate::route::Captured> + Send + Sync + 'static,
    {
        self.transforms.register(name, f);
        self
    }

    /// Sets the value written by [`Response::standard_headers`] for
    /// responses this host synthesizes itself (404, 405, 500).
    pub fn server_name(mut self, name: &'static str) -> Self {
        self.server_name = Some(name);
        self
    }

    /// Registers `handler` for `pattern` under `method`.
    ///
    /// # Panics
    /// Panics if `pattern` fails to parse under this host's [`RouteLimits`].
    #[track_caller]
    pub fn route<H>(mut self, method: Method, pattern: &str, handler: H) -> Self
    where
        H: Handler<S>,
    {
        let parsed = Pattern::parse(pattern, &self.limits)
            .unwrap_or_else(|err| panic!("invalid route pattern {pattern:?}: {err:?}"));
        self.routes
            .entry(method)
            .or_insert_with(Trie::new_root)
            .insert(parsed, Arc::new(handler));
        self
    }

    /// Shorthand for [`Host::route`] with [`Method::Get`].
    pub fn get<H: Handler<S>>(self, pattern: &str, handler: H) -> Self {
        self.route(Method::Get, pattern, handler)
    }

    /// Shorthand for [`Host::route`] with [`Method::Post`].
    pub fn post<H: Handler<S>>(self, pattern: &str, handler: H) -> Self {
        self.route(Method::Post, pattern, handler)
    }

    /// Shorthand for [`Host::route`] with [`Method::Put`].
    pub fn put<H: Handler<S>>(self, pattern: &str, handler: H) -> Self {
        self.route(Method::Put, pattern, handler)
    }

    /// Shorthand for [`Host::route`] with [`Method::Patch`].
    pub fn patch<H: Handler<S>>(self, pattern: &str, handler: H) -> Self {
        self.route(Method::Patch, pattern, handler)
    }

    /// Shorthand for [`Host::route`] with [`Method::Delete`].
    pub fn delete<H: Handler<S>>(self, pattern: &str, handler: H) -> Self {
        self.route(Method::Delete, pattern, handler)
    }

    /// Replaces the default `404 Not Found` response for this host.
    pub fn not_found<H: Handler<S>>(mut self, handler: H) -> Self {
        self.not_found = Some(Arc::new(handler));
        self
    }

    fn find(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(String, String)],
        has_trailing_slash: bool,
    ) -> Option<(&Arc<dyn DynHandler<S>>, MatchCaptures)> {
        let trie = self.routes.get(&method)?;
        if segments.is_empty() {
            if let Some(handler) = trie.root_handler() {
                return Some((handler, MatchCaptures::default()));
            }
        }
        trie.matches(segments, query, &self.transforms, &self.limits, has_trailing_slash)
    }

    /// Every method that has at least one route matching `segments`,
    /// `OPTIONS` always included, for `Allow` header synthesis.
    ///
    /// `HEAD` is reported as allowed whenever a dedicated `HEAD` route
    /// matches *or* a `GET` route does, mirroring the fallback
    /// [`Host::find_head_or_get`] applies at dispatch time.
    fn allowed_methods(&self, segments: &[&str], query: &[(String, String)], has_trailing_slash: bool) -> Vec<Method> {
        let mut methods: Vec<Method> = ALL_METHODS
            .iter()
            .copied()
            .filter(|&m| m != Method::Options && self.method_matches(m, segments, query, has_trailing_slash))
            .collect();
        if !methods.contains(&Method::Options) {
            methods.push(Method::Options);
        }
        methods
    }

    /// Every method with at least one registered route anywhere on this
    /// host, `OPTIONS` always included. Backs the RFC 7230 asterisk-form
    /// `OPTIONS * HTTP/1.1` response (spec §4.4), which is server-wide
    /// rather than scoped to a matched path.
    fn all_registered_methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = ALL_METHODS
            .iter()
            .copied()
            .filter(|&m| m != Method::Options)
            .filter(|m| self.routes.get(m).is_some_and(Trie::has_any_handler))
            .collect();
        if !methods.contains(&Method::Options) {
            methods.push(Method::Options);
        }
        methods
    }

    fn method_matches(&self, method: Method, segments: &[&str], query: &[(String, String)], has_trailing_slash: bool) -> bool {
        match method {
            Method::Head => self.find_head_or_get(segments, query, has_trailing_slash).is_some(),
            _ => self.find(method, segments, query, has_trailing_slash).is_some(),
        }
    }

    /// `HEAD` dispatch: consult the dedicated `HEAD` trie first (spec
    /// §4.4's "HEAD uses a dedicated trie of response-head handlers"),
    /// falling through to the `GET` trie on a miss so a host that never
    /// registers `HEAD` routes still answers `HEAD` for every `GET` route.
    fn find_head_or_get(
        &self,
        segments: &[&str],
        query: &[(String, String)],
        has_trailing_slash: bool,
    ) -> Option<(&Arc<dyn DynHandler<S>>, MatchCaptures)> {
        self.find(Method::Head, segments, query, has_trailing_slash)
            .or_else(|| self.find(Method::Get, segments, query, has_trailing_slash))
    }

    fn not_found_handler(&self) -> Option<&Arc<dyn DynHandler<S>>> {
        self.not_found.as_ref()
    }
}

/// Dispatches requests to a [`Host`] selected by the `Host` request header,
/// falling back to a default host, and wires global [`Middleware`] in front
/// of route matching.
///
/// Implements [`Handler`], so it plugs into [`Server`](crate::Server) via
/// `.handler(router)` with no changes to the connection/worker-pool layer.
pub struct Router<S: ConnectionData = ()> {
    hosts: HashMap<String, Host<S>>,
    default_host: Option<Host<S>>,
    /// Global filters, stored under the universal `**` pattern per spec
    /// §4.3 — always run first, in registration order, regardless of path.
    middleware: Vec<Arc<dyn DynMiddleware<S>>>,
    /// Path-scoped filters, one `Trie` node per registered pattern with a
    /// `Vec` of filters accumulated there (see [`Router::middleware_for`]).
    /// Run in trie-order (fixed > regex > `*` > `**`) after globals and
    /// before route dispatch.
    path_middleware: Trie<Vec<Arc<dyn DynMiddleware<S>>>>,
    path_middleware_limits: RouteLimits,
    path_middleware_transforms: TransformRegistry,
    server_name: &'static str,
}

impl<S: ConnectionData> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConnectionData> Router<S> {
    pub fn new() -> Self {
        Router {
            hosts: HashMap::new(),
            default_host: None,
            middleware: Vec::new(),
            path_middleware: Trie::new_root(),
            path_middleware_limits: RouteLimits::default(),
            path_middleware_transforms: TransformRegistry::with_builtins(),
            server_name: "littleweb",
        }
    }

    /// Registers `host` under the exact `Host` header value `name`.
    pub fn host(mut self, name: impl Into<String>, host: Host<S>) -> Self {
        self.hosts.insert(name.into(), host);
        self
    }

    /// Registers `host` as the fallback used when no `Host` header value
    /// matches a registered host (including requests with no `Host` header
    /// at all, as with `HTTP/1.0`).
    pub fn default_host(mut self, host: Host<S>) -> Self {
        self.default_host = Some(host);
        self
    }

    /// Adds a global middleware, run in registration order before route
    /// matching on every host. Spec §4.3's filters "scoped globally" — the
    /// universal `**` pattern.
    pub fn middleware<M: Middleware<S>>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Adds a middleware scoped to `pattern` (the same route-path DSL
    /// [`Host::route`] patterns use). Path-scoped filters run after global
    /// filters and before route dispatch, selected through the same
    /// fixed > regex > `*` > `**` trie precedence route tries use — spec
    /// §4.3's "Path-specific filters run next in trie-order." Several
    /// filters registered under the same pattern run in registration order.
    ///
    /// # Panics
    /// Panics if `pattern` fails to parse.
    #[track_caller]
    pub fn middleware_for<M: Middleware<S>>(mut self, pattern: &str, middleware: M) -> Self {
        let parsed = Pattern::parse(pattern, &self.path_middleware_limits)
            .unwrap_or_else(|err| panic!("invalid middleware pattern {pattern:?}: {err:?}"));
        self.path_middleware
            .entry(parsed)
            .get_or_insert_with(Vec::new)
            .push(Arc::new(middleware));
        self
    }

    /// Sets the value used for `Response::standard_headers`'s `server_name`
    /// argument in this router's own synthesized responses.
    pub fn server_name(mut self, name: &'static str) -> Self {
        self.server_name = name;
        self
    }

    fn select_host(&self, request: &Request) -> Option<&Host<S>> {
        let name = request
            .header(b"host")
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(|raw| raw.split(':').next().unwrap_or(raw));

        if let Some(name) = name {
            if let Some(host) = self.hosts.get(name) {
                return Some(host);
            }
        }
        self.default_host.as_ref().or_else(|| self.hosts.values().next())
    }

    fn effective_server_name<'a>(&'a self, host: Option<&'a Host<S>>) -> &'a str {
        host.and_then(|h| h.server_name).unwrap_or(self.server_name)
    }

    fn not_found(&self, response: &mut Response, host: Option<&Host<S>>) -> Handled {
        response
            .status(StatusCode::NotFound)
            .standard_headers(self.effective_server_name(host))
            .header("content-type", "text/plain")
            .body("Not Found")
    }

    fn method_not_allowed(&self, response: &mut Response, host: &Host<S>, allowed: &[Method]) -> Handled {
        let allow = allowed.iter().map(|m| method_name(*m)).collect::<Vec<_>>().join(", ");
        response
            .status(StatusCode::MethodNotAllowed)
            .standard_headers(self.effective_server_name(Some(host)))
            .header("allow", allow)
            .body("Method Not Allowed")
    }

    fn options_response(&self, response: &mut Response, host: &Host<S>, allow: String) -> Handled {
        response
            .status(StatusCode::Ok)
            .standard_headers(self.effective_server_name(Some(host)))
            .header("allow", allow)
            .body("")
    }

    /// 301 to `request`'s path with a trailing `/` appended, for the
    /// slash-redirect case in [`Router::handle`].
    fn redirect_to_slash(&self, response: &mut Response, host: &Host<S>, request: &Request) -> Handled {
        let mut location = String::from_utf8_lossy(request.url().path()).into_owned();
        location.push('/');
        if let Some(query) = request.url().query() {
            location.push_str(&String::from_utf8_lossy(query));
        }
        response
            .status(StatusCode::MovedPermanently)
            .standard_headers(self.effective_server_name(Some(host)))
            .header("location", location)
            .body("")
    }
}

impl<S> Handler<S> for Router<S>
where
    S: ConnectionData,
{
    async fn handle(&self, data: &mut S, request: &Request, response: &mut Response) -> Handled {
        let Some(host) = self.select_host(request) else {
            return self.not_found(response, None);
        };

        for middleware in &self.middleware {
            match middleware.dyn_filter(data, request, response).await {
                Outcome::Continue => {}
                Outcome::Respond(handled) => return handled,
                Outcome::Stop => return self.not_found(response, Some(host)),
            }
        }

        let segments = request.path_segments();
        let segments_ref: Vec<&str> = segments.iter().map(String::as_str).collect();
        let query = request.query_items();
        let method = request.method();
        let path = request.path();
        let has_trailing_slash = path.len() > 1 && path.ends_with('/');

        let path_filters = if segments_ref.is_empty() {
            self.path_middleware.root_handler()
        } else {
            self.path_middleware
                .matches(
                    &segments_ref,
                    query,
                    &self.path_middleware_transforms,
                    &self.path_middleware_limits,
                    has_trailing_slash,
                )
                .map(|(filters, _captures)| filters)
        };
        if let Some(filters) = path_filters {
            for middleware in filters {
                match middleware.dyn_filter(data, request, response).await {
                    Outcome::Continue => {}
                    Outcome::Respond(handled) => return handled,
                    Outcome::Stop => return self.not_found(response, Some(host)),
                }
            }
        }

        if method == Method::Options {
            let allowed = if request.is_asterisk_form() {
                host.all_registered_methods()
            } else {
                host.allowed_methods(&segments_ref, query, has_trailing_slash)
            };
            let allow = allowed.iter().map(|m| method_name(*m)).collect::<Vec<_>>().join(", ");
            return self.options_response(response, host, allow);
        }

        // The asterisk-form request-target is only meaningful for OPTIONS
        // (RFC 7230 §5.3.4); anything else naming it has no path to dispatch.
        if request.is_asterisk_form() {
            return self.not_found(response, Some(host));
        }

        let found = if method == Method::Head {
            host.find_head_or_get(&segments_ref, query, has_trailing_slash)
        } else {
            host.find(method, &segments_ref, query, has_trailing_slash)
        };

        match found {
            Some((handler, captures)) => {
                bind_captures(request, captures);
                handler.dyn_handle(data, request, response).await
            }
            None => {
                // GET miss on a slash-less path: retry as if the path had
                // ended in `/`. A hit there means only the slash-terminated
                // form was registered (`Pattern::trailing_slash`); redirect
                // instead of ever serving it for the slash-less URL.
                if method == Method::Get
                    && !has_trailing_slash
                    && host.find(Method::Get, &segments_ref, query, true).is_some()
                {
                    return self.redirect_to_slash(response, host, request);
                }

                let allowed = host.allowed_methods(&segments_ref, query, has_trailing_slash);
                if allowed.iter().any(|&m| m != Method::Options) {
                    self.method_not_allowed(response, host, &allowed)
                } else if let Some(handler) = host.not_found_handler() {
                    handler.dyn_handle(data, request, response).await
                } else {
                    self.not_found(response, Some(host))
                }
            }
        }
    }
}

fn bind_captures(request: &Request, captures: MatchCaptures) {
    for (name, value) in captures.identities {
        request.bind_identity(name, value);
    }
    for (name, value) in captures.properties {
        request.bind_property(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{server::connection::HttpConnection, StatusCode};

    crate::impt_default_handler!(Hello);

    #[test]
    fn host_matches_root() {
        let host: Host<()> = Host::new().get("/", Hello);
        let query: Vec<(String, String)> = Vec::new();
        assert!(host.find(Method::Get, &[], &query, true).is_some());
    }

    #[test]
    fn host_matches_named_segment() {
        let host: Host<()> = Host::new().get("/users/:id", Hello);
        let query: Vec<(String, String)> = Vec::new();
        let (_, captures) = host.find(Method::Get, &["users", "42"], &query, true).unwrap();
        assert_eq!(
            captures.identities.get("id").and_then(|c| c.as_str()),
            Some("42")
        );
    }

    #[test]
    fn allowed_methods_includes_options() {
        let host: Host<()> = Host::new().get("/x", Hello).post("/x", Hello);
        let query: Vec<(String, String)> = Vec::new();
        let allowed = host.allowed_methods(&["x"], &query, true);
        assert!(allowed.contains(&Method::Get));
        assert!(allowed.contains(&Method::Post));
        assert!(allowed.contains(&Method::Options));
        assert!(!allowed.contains(&Method::Delete));
    }

    #[tokio::test]
    async fn router_dispatches_matched_route() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/hello", Hello));
        let mut t = HttpConnection::from_req("GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn router_404_for_unmatched_path() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/hello", Hello));
        let mut t = HttpConnection::from_req("GET /missing HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn router_405_lists_allow_header() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/x", Hello));
        let mut t = HttpConnection::from_req("DELETE /x HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 405"));
        assert!(text.to_lowercase().contains("allow: get"));
    }

    #[tokio::test]
    async fn router_options_lists_allowed_methods() {
        let router: Router<()> =
            Router::new().default_host(Host::new().get("/x", Hello).post("/x", Hello));
        let mut t = HttpConnection::from_req("OPTIONS /x HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.to_lowercase().contains("get"));
        assert!(text.to_lowercase().contains("post"));
    }

    #[tokio::test]
    async fn router_options_asterisk_form_lists_every_registered_method() {
        let router: Router<()> = Router::new().default_host(
            Host::new()
                .get("/x", Hello)
                .post("/other", Hello)
                .delete("/y/:id", Hello),
        );
        let mut t = HttpConnection::from_req("OPTIONS * HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 200"));
        let lower = text.to_lowercase();
        assert!(lower.contains("get"));
        assert!(lower.contains("post"));
        assert!(lower.contains("delete"));
    }

    #[tokio::test]
    async fn non_options_asterisk_form_is_not_found() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/x", Hello));
        let mut t = HttpConnection::from_req("GET * HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn router_binds_captures_visible_to_handler() {
        struct EchoesId;
        impl Handler<()> for EchoesId {
            async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
                let id = req.identity("id").and_then(|c| c.as_str().map(str::to_owned));
                resp.status(StatusCode::Ok).body(id.unwrap_or_default())
            }
        }

        let router: Router<()> = Router::new().default_host(Host::new().get("/users/:id", EchoesId));
        let mut t = HttpConnection::from_req("GET /users/42 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.ends_with("42"));
    }

    #[tokio::test]
    async fn head_falls_through_to_get_when_no_head_route() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/x", Hello));
        let mut t = HttpConnection::from_req("HEAD /x HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn head_route_is_reachable_and_preferred_over_get() {
        struct HeadOnly;
        impl Handler<()> for HeadOnly {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).header("x-from", "head").body("")
            }
        }

        let router: Router<()> = Router::new().default_host(
            Host::new()
                .route(Method::Head, "/x", HeadOnly)
                .get("/x", Hello),
        );
        let mut t = HttpConnection::from_req("HEAD /x HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.to_lowercase().contains("x-from: head"));
    }

    #[tokio::test]
    async fn allowed_methods_reports_head_from_get_fallback() {
        let host: Host<()> = Host::new().get("/x", Hello);
        let query: Vec<(String, String)> = Vec::new();
        let allowed = host.allowed_methods(&["x"], &query, true);
        assert!(allowed.contains(&Method::Head));
    }

    #[tokio::test]
    async fn slash_only_route_redirects_slashless_get() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/x/", Hello));
        let mut t = HttpConnection::from_req("GET /x HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 301"));
        assert!(text.to_lowercase().contains("location: /x/"));
    }

    #[tokio::test]
    async fn slash_only_route_serves_directly_when_request_has_slash() {
        let router: Router<()> = Router::new().default_host(Host::new().get("/x/", Hello));
        let mut t = HttpConnection::from_req("GET /x/ HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 200"));
    }

    struct RejectScoped;
    impl Middleware for RejectScoped {
        async fn filter(&self, _: &mut (), _: &Request, resp: &mut Response) -> Outcome {
            Outcome::Respond(resp.status(StatusCode::Forbidden).body("scoped"))
        }
    }

    #[tokio::test]
    async fn path_scoped_middleware_only_runs_under_its_pattern() {
        let router: Router<()> = Router::new()
            .middleware_for("/admin/**", RejectScoped)
            .default_host(Host::new().get("/admin/panel", Hello).get("/public", Hello));

        let mut admin = HttpConnection::from_req("GET /admin/panel HTTP/1.1\r\nHost: h\r\n\r\n");
        admin.parse().unwrap();
        router.handle(&mut (), &admin.request, &mut admin.response).await;
        assert!(crate::tools::str_op(admin.response.buffer()).starts_with("HTTP/1.1 403"));

        let mut public = HttpConnection::from_req("GET /public HTTP/1.1\r\nHost: h\r\n\r\n");
        public.parse().unwrap();
        router.handle(&mut (), &public.request, &mut public.response).await;
        assert!(crate::tools::str_op(public.response.buffer()).starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn global_middleware_runs_before_path_scoped_middleware() {
        struct RejectGlobal;
        impl Middleware for RejectGlobal {
            async fn filter(&self, _: &mut (), _: &Request, resp: &mut Response) -> Outcome {
                Outcome::Respond(resp.status(StatusCode::Unauthorized).body("global"))
            }
        }

        let router: Router<()> = Router::new()
            .middleware(RejectGlobal)
            .middleware_for("/admin/**", RejectScoped)
            .default_host(Host::new().get("/admin/panel", Hello));

        let mut t = HttpConnection::from_req("GET /admin/panel HTTP/1.1\r\nHost: h\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.starts_with("HTTP/1.1 401"), "global filter must run first: {text}");
    }

    #[tokio::test]
    async fn multiple_middleware_at_same_pattern_run_in_registration_order() {
        struct MarkA;
        impl Middleware for MarkA {
            async fn filter(&self, _: &mut (), req: &Request, _: &mut Response) -> Outcome {
                req.bind_identity("order".to_owned(), crate::route::Captured::Str("a".to_owned()));
                Outcome::Continue
            }
        }
        struct MarkB;
        impl Middleware for MarkB {
            async fn filter(&self, _: &mut (), req: &Request, _: &mut Response) -> Outcome {
                req.bind_identity("order".to_owned(), crate::route::Captured::Str("b".to_owned()));
                Outcome::Continue
            }
        }
        struct EchoOrder;
        impl Handler<()> for EchoOrder {
            async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
                let order = req.identity("order").and_then(|c| c.as_str().map(str::to_owned));
                resp.status(StatusCode::Ok).body(order.unwrap_or_default())
            }
        }

        let router: Router<()> = Router::new()
            .middleware_for("/x", MarkA)
            .middleware_for("/x", MarkB)
            .default_host(Host::new().get("/x", EchoOrder));

        let mut t = HttpConnection::from_req("GET /x HTTP/1.1\r\nHost: h\r\n\r\n");
        t.parse().unwrap();
        router.handle(&mut (), &t.request, &mut t.response).await;
        let text = crate::tools::str_op(t.response.buffer());
        assert!(text.ends_with('b'), "last-registered filter's write should win: {text}");
    }
}
