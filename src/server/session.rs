//! Server-side session storage, keyed by the [`SESSION_COOKIE_NAME`
//! ](crate::http::cookie::SESSION_COOKIE_NAME) cookie.
//!
//! [`Request`] has a fixed, `'static`-transmuted per-connection layout (see
//! [`crate::http::request`]) with no session slot, so sessions are a
//! decoupled utility rather than something the [`Router`](crate::Router)
//! wires into every request automatically: a handler that wants sessions
//! reads the cookie off the request, asks a [`SessionStore`] for it, and
//! writes the cookie back onto the response itself.

use crate::{
    http::cookie::SESSION_COOKIE_NAME,
    route::Captured,
    Cookie, Request, Response,
};
use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};
use uuid::Uuid;

/// A server-side session: an opaque id plus a bag of named values.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    values: HashMap<String, Captured>,
}

impl Session {
    fn new() -> Self {
        Session {
            id: Uuid::new_v4().to_string(),
            values: HashMap::new(),
        }
    }

    /// The opaque session id sent back to the client as the cookie value.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&Captured> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Captured) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Captured> {
        self.values.remove(key)
    }

    /// Builds the `Set-Cookie` value that should accompany any response
    /// that created, touched, or refreshed this session.
    pub fn to_cookie(&self) -> Cookie {
        let mut cookie = Cookie::new(SESSION_COOKIE_NAME, self.id.clone());
        cookie.path = Some("/".to_owned());
        cookie.http_only = true;
        cookie
    }
}

struct Entry {
    session: Session,
    last_touched: Instant,
}

/// Where sessions live between requests.
///
/// The [`MemoryStore`] in this module is the only implementation provided;
/// a deployment that needs sessions shared across server processes
/// implements this trait over whatever it already uses for that (a cache,
/// a database) and passes an `Arc` of it into its handlers via
/// [`ConnectionData`](crate::ConnectionData) or its own application state.
pub trait SessionStore: Send + Sync + 'static {
    /// Creates and stores a brand new session, returning it.
    fn create(&self) -> Session;
    /// Looks up a session by id, refreshing its idle timer on a hit.
    fn get(&self, id: &str) -> Option<Session>;
    /// Persists a session the caller mutated via [`Session::set`]/[`remove`
    /// ](Session::remove).
    fn save(&self, session: Session);
    /// Deletes a session, e.g. on logout.
    fn remove(&self, id: &str);
    /// Evicts every session idle longer than `max_idle`.
    fn sweep(&self, max_idle: Duration);

    /// Reads the session cookie off `request` and returns the session it
    /// names, if any and if it hasn't expired.
    fn from_request(&self, request: &Request) -> Option<Session> {
        let id = request
            .cookies()
            .into_iter()
            .find(|c| c.name == SESSION_COOKIE_NAME)?
            .value;
        self.get(&id)
    }

    /// Looks up the session named by `request`'s cookie, or creates a new
    /// one if there isn't one (or it expired).
    fn load_or_create(&self, request: &Request) -> Session {
        self.from_request(request).unwrap_or_else(|| self.create())
    }

    /// Writes `session`'s `Set-Cookie` header onto `response` and persists
    /// it back to the store.
    fn attach(&self, response: &mut Response, session: Session) {
        response.header("set-cookie", session.to_cookie().to_set_cookie());
        self.save(session);
    }
}

/// In-memory [`SessionStore`], guarded by a single [`RwLock`].
///
/// Sessions don't survive a process restart and aren't shared across
/// server instances; swap in a different [`SessionStore`] impl for either.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Entry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl SessionStore for MemoryStore {
    fn create(&self) -> Session {
        let session = Session::new();
        self.sessions.write().unwrap().insert(
            session.id.clone(),
            Entry {
                session: session.clone(),
                last_touched: Instant::now(),
            },
        );
        session
    }

    fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().unwrap();
        let entry = sessions.get_mut(id)?;
        entry.last_touched = Instant::now();
        Some(entry.session.clone())
    }

    fn save(&self, session: Session) {
        self.sessions.write().unwrap().insert(
            session.id.clone(),
            Entry {
                session,
                last_touched: Instant::now(),
            },
        );
    }

    fn remove(&self, id: &str) {
        self.sessions.write().unwrap().remove(id);
    }

    fn sweep(&self, max_idle: Duration) {
        self.sessions
            .write()
            .unwrap()
            .retain(|_, entry| entry.last_touched.elapsed() < max_idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::RespLimits;

    #[test]
    fn create_then_get_round_trips() {
        let store = MemoryStore::new();
        let session = store.create();
        let id = session.id().to_owned();

        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.id(), id);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("nonexistent").is_none());
    }

    #[test]
    fn set_and_save_persist_values() {
        let store = MemoryStore::new();
        let mut session = store.create();
        let id = session.id().to_owned();
        session.set("user_id", Captured::U64(42));
        store.save(session);

        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.get("user_id").and_then(Captured::as_u64), Some(42));
    }

    #[test]
    fn remove_deletes_session() {
        let store = MemoryStore::new();
        let session = store.create();
        let id = session.id().to_owned();
        store.remove(&id);
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn sweep_evicts_idle_sessions() {
        let store = MemoryStore::new();
        let session = store.create();
        let id = session.id().to_owned();

        store.sweep(Duration::from_secs(0));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn attach_writes_set_cookie_header() {
        let store = MemoryStore::new();
        let session = store.create();
        let id = session.id().to_owned();

        let mut response = Response::new(&RespLimits::default());
        response.status(crate::StatusCode::Ok);
        store.attach(&mut response, session);

        let text = crate::tools::str_op(response.buffer());
        assert!(text.to_lowercase().contains("set-cookie"));
        assert!(text.contains(&id));
    }

    #[test]
    fn to_cookie_carries_session_id() {
        let session = Session::new();
        let cookie = session.to_cookie();
        assert_eq!(cookie.name, SESSION_COOKIE_NAME);
        assert_eq!(cookie.value, session.id);
        assert!(cookie.http_only);
    }
}
