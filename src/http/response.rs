//! A highly efficient, zero-allocation HTTP response builder for embedded web servers.

use crate::{
    http::types::{StatusCode, Version},
    limits::{RateLimit, RespLimits},
    BodyWriter, WriteBuffer,
};
use std::{borrow::Cow, path::PathBuf, rc::Rc, sync::Arc};

#[derive(Debug)]
/// HTTP response builder for constructing server responses.
///
/// Provides a fluent interface for building HTTP responses with status codes,
/// headers, and body content. Automatically handles content-length calculation
/// and connection management.
///
/// Build responses by chaining methods in strict order:
/// [`status()`](Response::status) -> headers -> any body method.
///
/// Instances are created automatically by the server and passed to
/// the [`Handler::handle`](crate::Handler::handle).
///
/// # Examples
/// ```
/// use littleweb::{Handled, Request, Response, StatusCode};
///
/// // In your implementation `Handler`
/// async fn handle(_req: &Request, resp: &mut Response) -> Handled {
///     resp
///         .status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>")
/// }
/// ```
///
/// # Panics
/// All methods perform validity checks in `debug` mode that panic on violations.
/// In `release` mode, these checks are omitted for performance, which may
/// produce invalid HTTP responses. Before creating a release version, conduct tests.
pub struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
    chunked: bool,
    write_queue: Cow<'static, str>,
    pending_file: Option<FileBody>,
    pending_rate_limit: Option<RateLimit>,
    pending_text: Option<Vec<TextSegment>>,
}

#[doc(hidden)]
pub struct Handled(());

/// A file body staged by [`Response::file`]/[`Response::file_range`],
/// consumed by the connection loop once the header buffer is on the wire.
#[derive(Debug)]
pub(crate) struct FileBody {
    pub(crate) path: PathBuf,
    /// Inclusive `(start, end)` byte offsets, or the whole file when `None`.
    pub(crate) range: Option<(u64, u64)>,
    pub(crate) rate_limit: Option<RateLimit>,
}

/// One piece of a [`Response::text_with`] body: either bytes to write as-is,
/// or an `include(path, query)` marker the connection loop resolves by
/// re-entering the dispatcher with a synthetic `GET` request.
#[derive(Debug, Clone)]
pub(crate) enum TextSegment {
    Literal(Vec<u8>),
    Include {
        path: String,
        query: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
            chunked: false,
            write_queue: Cow::Borrowed("current"),
            pending_file: None,
            pending_rate_limit: None,
            pending_text: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
        self.chunked = false;
        self.write_queue = Cow::Borrowed("current");
        self.pending_file = None;
        self.pending_rate_limit = None;
        self.pending_text = None;
    }

    /// Name of the worker queue that must produce this response's body.
    ///
    /// `"current"` (the default) means the request's own worker writes it;
    /// anything else is a tag for callers that hand responses off to a
    /// dedicated queue (e.g. a `websocket` upgrade queue) to inspect.
    #[inline(always)]
    pub(crate) fn write_queue_name(&self) -> &str {
        &self.write_queue
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &Vec<u8> {
        &self.buffer
    }

    /// Takes the file body staged by [`file()`](Response::file) or
    /// [`file_range()`](Response::file_range), if any, so the connection
    /// loop can stream it after the header buffer is written.
    #[inline(always)]
    pub(crate) fn take_file_body(&mut self) -> Option<FileBody> {
        self.pending_file.take()
    }

    /// Takes the segments staged by [`text_with()`](Response::text_with), if
    /// any, so the connection loop can resolve their includes and patch in
    /// the deferred `content-length`.
    #[inline(always)]
    pub(crate) fn take_pending_text(&mut self) -> Option<Vec<TextSegment>> {
        self.pending_text.take()
    }

    /// Whether [`chunked()`](Response::chunked) was set on this response.
    ///
    /// Used by the connection loop to refuse folding a chunked sub-response
    /// into an outer [`text_with()`](Response::text_with) body: the bytes
    /// past `start_body` would be chunk-envelope framing, not content.
    #[inline(always)]
    pub(crate) fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// The finalized body bytes (headers excluded), for a response used as
    /// an `include(path, query)` target.
    #[inline(always)]
    pub(crate) fn body_bytes(&self) -> &[u8] {
        &self.buffer[self.start_body..]
    }

    /// Appends `resolved` — the concatenation of every literal chunk and
    /// resolved include from a [`text_with()`](Response::text_with) body —
    /// and patches the `content-length` placeholder `start_body()` reserved.
    #[inline(always)]
    pub(crate) fn finish_pending_text(&mut self, resolved: Vec<u8>) {
        self.buffer.extend_from_slice(&resolved);
        let _ = self.end_body();
    }

    /// Truncates an already-finalized response back to its headers, for
    /// `HEAD` requests that must echo `GET`'s headers with no body.
    #[inline(always)]
    pub(crate) fn suppress_body(&mut self) {
        self.buffer.truncate(self.start_body);
        if self.chunked {
            self.buffer.extend_from_slice(b"0\r\n\r\n");
        }
        self.pending_file = None;
    }
}

/// Methods that work with all protocols
impl Response {
    /// Forces the connection to close after a response.
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .close()  // Connection will close after this response
    ///     .body("Closing connection")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when:
    /// - Called after any finalizing method (method returning `Handler`)
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }

    /// Marks the response body as `Transfer-Encoding: chunked` instead of
    /// computing a `content-length`.
    ///
    /// The body is still assembled in memory and written as a single chunk
    /// followed by the terminating zero-chunk; this buys wire compatibility
    /// with chunked clients without a true incremental streaming writer.
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when:
    /// - Called after any finalizing method (method returning `Handler`)
    #[inline]
    #[track_caller]
    pub fn chunked(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.chunked = true;
        self
    }

    /// Tags the response with the name of the worker queue that should
    /// produce its body, instead of the request's own worker (`"current"`).
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when:
    /// - Called after any finalizing method (method returning `Handler`)
    #[inline]
    #[track_caller]
    pub fn write_queue(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.write_queue = name.into();
        self
    }
}

/// Methods for working with `HTTP/1.X` (HTTP/1.1 or HTTP/1.1)
impl Response {
    /// Sets the HTTP status code for the response.
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be first and called only once`
    /// - <code>This method is only for \`HTTP/1.X\`</code>
    ///
    /// Panics in `debug` mode when:
    /// - Called multiple times
    /// - Called after any body method
    /// - Called for a non-HTTP/1.X response
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.to_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header to the response.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")        // &str, &str
    ///     .header("x-custom-id", 128)                  // &str, i32  
    ///     .header("x-cache-enabled", true)             // &str, bool
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a `date` (RFC 1123, GMT) and `server` header in one call.
    ///
    /// Handlers that want these headers call it explicitly, right after
    /// [`status()`](Response::status), same as any other header method;
    /// the dispatcher's own 404/405/500/`OPTIONS` responses always do.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn standard_headers(&mut self, server_name: &str) -> &mut Self {
        self.header("date", crate::http::date::http_date())
            .header("server", server_name)
    }

    /// Add a multi-value header to the response
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header_multi(b"x-tags", ", ", ["user"])
    ///     // x-tags: user
    ///     .header_multi("accept", "; ", ["text/html", "text/plain"])
    ///     // accept: text/html; text/plain
    ///     .header_multi("id-users", ", ", vec![123, 234, 345])
    ///     // id-users: 123, 234, 345
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut self.buffer);

            for value in iter {
                split.write_to(&mut self.buffer);
                value.write_to(&mut self.buffer);
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a header with parameters to the response.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header_params("content-type", "; ", vec![
    ///         ("text/html", None),
    ///         ("charset", Some("utf-8")),
    ///     ])
    ///     // Content-Type: text/html; charset=utf-8
    ///     .header_params("cache-control", ", ", [
    ///         ("max-age", Some("3600")),
    ///         ("must-revalidate", None),
    ///     ])
    ///     // Cache-Control: max-age=3600, must-revalidate
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut self.buffer);
            if let Some(val) = first_val {
                self.buffer.extend_from_slice(b"=");
                val.write_to(&mut self.buffer);
            }

            for (key, value) in iter {
                split.write_to(&mut self.buffer);
                key.write_to(&mut self.buffer);
                if let Some(val) = value {
                    self.buffer.extend_from_slice(b"=");
                    val.write_to(&mut self.buffer);
                }
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Sets the response body and finalizes the response.
    ///
    /// # Side Effects
    /// - Adds a `connection` header if necessary
    /// - Calculates and sets the `content-length` header
    ///
    /// After calling this method, the response is considered complete
    /// and cannot be modified further.
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    //
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")
    ///     .body("Hello, World!")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure and finalizes the response.
    ///
    /// # Side Effects
    /// - Adds a `connection` header if necessary
    /// - Calculates and sets the `content-length` header
    ///
    /// After calling this method, the response is considered complete
    /// and cannot be modified further.
    ///
    /// # Examples
    /// Using [`write!`]:
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    /// use std::io::Write;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "application/json")
    ///     .body_with(|writer| {
    ///         // Write JSON directly to the buffer
    ///         write!(writer, r#"{{"status": "ok", "message": "Hello"}}"#);
    ///     })
    /// # });
    /// ```
    /// Using [`WriteBuffer`]:
    /// ```rust
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "application/octet-stream")
    ///     .body_with(|writer| {
    ///         writer.write(b"lib: ");
    ///         writer.write("littleweb");
    ///         writer.write(b", love_is_lib: ");
    ///         writer.write(true);
    ///         writer.write(b", just_number: ");
    ///         writer.write(123456);
    ///     })
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }

    /// Builds a text body out of literal chunks and `include(path, query)`
    /// sub-requests, finalizing the response.
    ///
    /// The included path is dispatched as a synthetic `GET`, inheriting this
    /// request's headers (so its session cookie carries over); its resolved
    /// body is spliced in where the `include()` call appears. `content-length`
    /// is computed once every include resolves, same as [`body()`
    /// ](Response::body) — the connection loop does the actual resolving
    /// after the handler returns, since it alone can re-enter the dispatcher.
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/html")
    ///     .text_with(|w| {
    ///         w.write("<header>")
    ///             .include("/partials/nav", [])
    ///             .write("</header><main>hello</main>");
    ///     })
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called after [`body()`](Response::body) or [`body_with()`](Response::body_with)
    #[inline]
    #[track_caller]
    pub fn text_with<F: FnOnce(&mut write::TextWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        let mut segments = Vec::new();
        f(&mut write::TextWriter(&mut segments));

        self.start_body();
        self.pending_text = Some(segments);
        self.state = ResponseState::Complete;
        Handled(())
    }

    /// Attaches a transfer rate limit to the next [`file()`](Response::file)
    /// or [`file_range()`](Response::file_range) call.
    ///
    /// Has no effect on in-memory bodies ([`body()`](Response::body)/
    /// [`body_with()`](Response::body_with)).
    ///
    /// # Panics
    /// Error message: `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when:
    /// - Called after any finalizing method (method returning `Handler`)
    #[inline]
    #[track_caller]
    pub fn rate_limit(&mut self, rate_limit: RateLimit) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.pending_rate_limit = Some(rate_limit);
        self
    }

    /// Serves `path` in full as the response body, finalizing the response.
    ///
    /// `total_size` must be the file's exact size in bytes; the connection
    /// loop opens and streams the file itself after the headers are on the
    /// wire, in chunks sized by [`RespLimits::file_buffer_size`] (or by any
    /// [`rate_limit()`](Response::rate_limit) attached beforehand).
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "video/mp4")
    ///     .file("/srv/media/clip.mp4", 10_485_760)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called on a [`chunked()`](Response::chunked) response
    #[inline]
    #[track_caller]
    pub fn file(&mut self, path: impl Into<PathBuf>, total_size: u64) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );
        debug_assert!(!self.chunked, "File bodies cannot be chunked");

        self.finish_file_headers(total_size);
        self.pending_file = Some(FileBody {
            path: path.into(),
            range: None,
            rate_limit: self.pending_rate_limit.take(),
        });
        self.state = ResponseState::Complete;
        Handled(())
    }

    /// Serves the inclusive byte range `start..=end` of `path`, finalizing
    /// the response with a `content-range` header.
    ///
    /// Callers decide `start`/`end` themselves (typically from
    /// [`Request::byte_range`](crate::Request::byte_range)) and are
    /// responsible for calling [`status(StatusCode::PartialContent)`
    /// ](Response::status) beforehand, the same way [`chunked()`
    /// ](Response::chunked) doesn't pick a status on its own.
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::PartialContent)
    ///     .file_range("Cargo.toml", 1000, 100, 199)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    ///
    /// Panics in `debug` mode when:
    /// - Called before [`status()`](Response::status)
    /// - Called on a [`chunked()`](Response::chunked) response
    /// - `start > end` or `end >= total_size`
    #[inline]
    #[track_caller]
    pub fn file_range(
        &mut self,
        path: impl Into<PathBuf>,
        total_size: u64,
        start: u64,
        end: u64,
    ) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );
        debug_assert!(!self.chunked, "File bodies cannot be chunked");
        debug_assert!(start <= end && end < total_size, "Range out of bounds");

        self.header(
            "content-range",
            format!("bytes {start}-{end}/{total_size}"),
        );
        self.finish_file_headers(end - start + 1);
        self.pending_file = Some(FileBody {
            path: path.into(),
            range: Some((start, end)),
            rate_limit: self.pending_rate_limit.take(),
        });
        self.state = ResponseState::Complete;
        Handled(())
    }
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        if self.chunked {
            self.buffer.extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");
        } else {
            self.buffer.extend_from_slice(b"content-length: ");
            self.posit_length = self.buffer.len();
            self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        }
        self.start_body = self.buffer.len();
        self
    }

    /// Writes the `connection` and exact `content-length` headers for a
    /// file body, whose byte count is already known ahead of streaming it.
    #[inline(always)]
    fn finish_file_headers(&mut self, content_length: u64) {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        content_length.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n\r\n");
        self.start_body = self.buffer.len();
    }

    #[inline(always)]
    fn end_body(&mut self) -> Handled {
        if self.chunked {
            // The body written since start_body() becomes a single chunk;
            // reframe it as `<size-hex>\r\n<body>\r\n` plus the zero-chunk.
            let body = self.buffer.split_off(self.start_body);
            if !body.is_empty() {
                self.buffer
                    .extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
                self.buffer.extend_from_slice(&body);
                self.buffer.extend_from_slice(b"\r\n");
            }
            self.buffer.extend_from_slice(b"0\r\n\r\n");
        } else {
            let body_len = self.buffer.len() - self.start_body;
            let (arr, _) = Response::number_to_bytes(body_len as u128);

            let target_range = self.posit_length..self.posit_length + 10;
            self.buffer[target_range].copy_from_slice(&arr[29..39]);
        }

        self.state = ResponseState::Complete;
        Handled(())
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
            _ => None,
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// # Examples
    ///
    /// With [WriteBuffer]:
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         w.write("This goes in the response body");
    ///         w.write("<html>...</html>");
    ///         w.write(true);
    ///     })
    /// # });
    /// ```
    /// With [std::io::Write]:
    /// ```
    /// # littleweb::run_test(|_, resp| {
    /// use littleweb::StatusCode;
    /// use std::io::Write;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         write!(w, "This goes in the response body");
    ///         write!(w, "{} - {} = {}", 6, 2, 4);
    ///     })
    /// # });
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        ///
        /// Adds data to the body section of the HTTP response. This method
        /// only affects the response body, not headers or status.
        ///
        /// # Examples
        /// ```
        /// # littleweb::run_test(|_, resp| {
        /// use littleweb::StatusCode;
        ///
        /// resp.status(StatusCode::Ok)
        ///     .body_with(|w| {
        ///         w.write("Hello");
        ///         w.write(123);
        ///         w.write(true);
        ///     })
        /// # });
        /// ```
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Writer for constructing a [`Response::text_with`] body out of literal
    /// chunks and `include(path, query)` sub-requests, in order.
    #[derive(Debug)]
    pub struct TextWriter<'a>(pub(crate) &'a mut Vec<TextSegment>);

    impl TextWriter<'_> {
        /// Appends a literal chunk.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) -> &mut Self {
            let mut bytes = Vec::new();
            value.write_to(&mut bytes);
            self.0.push(TextSegment::Literal(bytes));
            self
        }

        /// Appends an `include(path, query)` marker: at write time the
        /// dispatcher re-enters with a synthetic `GET path?query`, inheriting
        /// this request's headers, and its body is spliced in here.
        #[inline]
        pub fn include(
            &mut self,
            path: impl Into<String>,
            query: impl IntoIterator<Item = (String, String)>,
        ) -> &mut Self {
            self.0.push(TextSegment::Include {
                path: path.into(),
                query: query.into_iter().collect(),
            });
            self
        }
    }

    /// Trait for writing data to the [`Response`] buffer.
    ///
    /// Implemented for common types like strings, bytes, booleans
    /// and numeric types (excluding floating-point numbers)
    ///
    /// # Note on Floating-Point
    /// Floating-point numbers are not implemented to avoid locale-dependent
    /// formatting and precision issues in protocol headers.
    ///
    /// For explicit float serialization, consider using the
    /// [`ryu`](https://crates.io/crates/ryu)
    /// crate or formatting to string with controlled precision.
    ///
    /// # Example
    /// ```
    /// use littleweb::WriteBuffer;
    ///
    /// struct MyString(String);
    ///
    /// impl WriteBuffer for MyString {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        ///
        /// This should avoid intermediate allocations and write the
        /// most efficient representation possible.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}

#[cfg(test)]
mod close_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (Version::Http11, false, ""),
            (Version::Http11, true, "connection: close\r\n"),
            (Version::Http10, false, "connection: keep-alive\r\n"),
            (Version::Http10, true, "connection: close\r\n"),
        ];

        for (version, is_close, header) in cases {
            let mut resp = Response::new(&RespLimits::default());
            resp.version = version;

            assert_eq!(resp.keep_alive, true);
            if is_close {
                resp.close();
                assert_eq!(resp.keep_alive, false);
                resp.close();
                assert_eq!(resp.keep_alive, false);
            }

            resp.status(StatusCode::Ok).body("");
            assert_eq!(
                str_op(&resp.buffer),
                format!(
                    "{}{header}content-length: 0000000000\r\n\r\n",
                    str_op(StatusCode::Ok.to_first_line(version))
                )
            );
        }
    }

    #[test]
    #[should_panic(expected = "Must be called before any finalizing method")]
    fn after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.close();
    }
}

#[cfg(test)]
mod chunked_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).chunked().body("hi");

        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n"
        );
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn empty_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).chunked().body("");

        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn no_content_length() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).chunked().body("abc");
        assert!(!str_op(&resp.buffer).contains("content-length"));
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (StatusCode::Ok, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::Found, "HTTP/1.1 302 Found\r\n"),
            (StatusCode::BadRequest, "HTTP/1.1 400 Bad Request\r\n"),
        ];

        for (status, result) in cases {
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);
            assert_eq!(resp.state, ResponseState::Clean);

            resp.status(status);
            assert_eq!(str_op(&resp.buffer), result);
            assert_eq!(resp.state, ResponseState::Headers);
        }
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    fn double_call() {
        Response::new(&RespLimits::default())
            .status(StatusCode::Ok)
            .status(StatusCode::Found);
    }

}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($method:ident, $(($name:expr $(, $params:expr)*; $result:expr);)*) => {
           #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);

            resp.status(StatusCode::Ok);
            assert_eq!(resp.state, ResponseState::Headers);

            resp.$method($name $(, $params)*);
            assert_eq!(str_op(&resp.buffer[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*}};
    }

    test_header! {header,
        ("name", "value"; "name: value\r\n");
        ("", "value"; ": value\r\n");
        ("name", ""; "name: \r\n");

        ("name", 123; "name: 123\r\n");
        ("name", vec![35, 33, 43]; "name: #!+\r\n");
        ("name", false; "name: false\r\n");
        ("name", -123; "name: -123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::new(&RespLimits::default()).header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }

    test_header! {header_multi,
        ("name", ", ", ["q", "w", "e"]; "name: q, w, e\r\n");
        ("name", ",", [true, false]; "name: true,false\r\n");
        ("name", "; ", [-123, 123]; "name: -123; 123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_before_status() {
        Response::new(&RespLimits::default()).header_multi("Name", ",", ["value1", "value2"]);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_multi("Name", ",", ["value1", "value2"]);
    }

    test_header! {header_params,
        ("name", ", ", [("name", Some("value"))]; "name: name=value\r\n");
        (
            "name", ", ", [("q", Some("1")), ("w", Some("2")), ("e", Some("3"))];
            "name: q=1, w=2, e=3\r\n"
        );
        (
            "name", ";", [("q", Some("v1")), ("w", Some("v2")), ("e", Some("v3"))];
            "name: q=v1;w=v2;e=v3\r\n"
        );
        (
            "name", ", ", [("min", Some(-128)), ("max", Some(128)), ("mean", Some(0))];
            "name: min=-128, max=128, mean=0\r\n"
        );
        (
            "u128", ", ", [("min", Some(u128::MIN)), ("max", Some(u128::MAX))];
            "u128: min=0, max=340282366920938463463374607431768211455\r\n"
        );
        (
            "i128", ", ", [("min", Some(i128::MIN)), ("max", Some(i128::MAX))];
    "i128: min=-170141183460469231731687303715884105728, max=170141183460469231731687303715884105727\r\n"
        );
        (
            "name", ", ", [("debug", Some(true)), ("doc", Some(false))];
            "name: debug=true, doc=false\r\n"
        );
        (
            "name", "; ", [("debug", None), ("text", Some("asd"))];
            "name: debug; text=asd\r\n"
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_before_status() {
        Response::new(&RespLimits::default()).header_params(
            "Name",
            ",",
            [("name1", Some("value1")), ("name2", None)],
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_params("Name", ",", [("name1", Some("value1")), ("name2", None)]);
    }
}

#[cfg(test)]
mod body_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_body {
        ($method:ident, $(($data:expr, $len:expr);)*) => {
        #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            let result_data = test_body!{ $method, resp, $data };

            assert_eq!(
                str_op(&resp.buffer),
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                    format!("{:0>10}", $len),
                    str_op(&result_data)
                )
            );
            assert_eq!(resp.state, ResponseState::Complete);
        )*}};

        (body, $resp:expr, $data:expr) => {{
            $resp.status(StatusCode::Ok).body($data);
            let mut expected = Vec::new();
            $data.write_to(&mut expected);
            expected
        }};
        (body_with, $resp:expr, $data:expr) => {{
            $resp.status(StatusCode::Ok).body_with($data);

            let mut vector = Vec::new();
            let mut result_data = BodyWriter(&mut vector);
            $data(&mut result_data);
            vector
        }};
    }

    test_body! {body,
        ("sample body", 11);
        ("{\"debug\": true, \"doc\": false}", 29);
        (true, 4);
        (-1234, 5);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_before_status() {
        Response::new(&RespLimits::default()).body("Name");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_double_call() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.body("Name");
    }

    test_body! {body_with,
        (|buf: &mut BodyWriter| buf.write("qwe"), 3);
        (|buf: &mut BodyWriter| buf.write(vec![23, 34, 56]), 3);
        (|buf: &mut BodyWriter| buf.write(String::from("body")), 4);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_with_before_status() {
        Response::new(&RespLimits::default()).body_with(|_| {});
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_with_double_call() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body_with(|_| {});
        resp.body_with(|_| {});
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn full_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\n",
            "connection: close\r\ncontent-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.header("location", "/api/update");
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        assert_eq!(resp.keep_alive, true);
        resp.close();
        assert_eq!(resp.keep_alive, false);
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[1].to_owned() + result[2]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn full_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.header("location", "/api/update");
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[1].to_owned() + result[2]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "connection: close\r\ncontent-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        assert_eq!(resp.keep_alive, true);
        resp.close();
        assert_eq!(resp.keep_alive, false);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;
    use crate::{limits::RateLimit, tools::*};
    use std::time::Duration;

    #[test]
    fn whole_file_sets_headers_and_pending_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).file("video.mp4", 2048);

        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 200 OK\r\ncontent-length: 2048\r\n\r\n"
        );
        assert_eq!(resp.state, ResponseState::Complete);

        let file = resp.take_file_body().expect("pending file body");
        assert_eq!(file.path, std::path::PathBuf::from("video.mp4"));
        assert_eq!(file.range, None);
        assert!(file.rate_limit.is_none());
        assert!(resp.take_file_body().is_none());
    }

    #[test]
    fn range_sets_content_range_and_length() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::PartialContent)
            .file_range("video.mp4", 1000, 100, 199);

        assert_eq!(
            str_op(&resp.buffer),
            concat!(
                "HTTP/1.1 206 Partial Content\r\n",
                "content-range: bytes 100-199/1000\r\n",
                "content-length: 100\r\n\r\n",
            )
        );

        let file = resp.take_file_body().expect("pending file body");
        assert_eq!(file.range, Some((100, 199)));
    }

    #[test]
    fn rate_limit_carries_into_pending_file() {
        let mut resp = Response::new(&RespLimits::default());
        let limit = RateLimit::new(4096, Duration::from_millis(10));
        resp.status(StatusCode::Ok)
            .rate_limit(limit)
            .file("big.bin", 1 << 20);

        let file = resp.take_file_body().expect("pending file body");
        let rate_limit = file.rate_limit.expect("rate limit carried over");
        assert_eq!(rate_limit.chunk_size, 4096);
        assert_eq!(rate_limit.interval, Duration::from_millis(10));
    }

    #[test]
    #[should_panic(expected = "Range out of bounds")]
    fn range_out_of_bounds_panics() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::PartialContent)
            .file_range("video.mp4", 1000, 950, 999 + 1);
    }

    #[test]
    fn suppress_body_keeps_headers_drops_in_memory_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("this would be the body");
        resp.suppress_body();

        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 200 OK\r\ncontent-length: 0000000023\r\n\r\n"
        );
    }

    #[test]
    fn suppress_body_terminates_chunked_stream() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).chunked().body("chunked body");
        resp.suppress_body();

        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn suppress_body_drops_pending_file() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).file("video.mp4", 2048);
        resp.suppress_body();

        assert_eq!(
            str_op(&resp.buffer),
            "HTTP/1.1 200 OK\r\ncontent-length: 2048\r\n\r\n"
        );
        assert!(resp.take_file_body().is_none());
    }
}

