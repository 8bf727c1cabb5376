use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::{FileBody, Response, TextSegment},
    },
    limits::{ConnLimits, MultipartLimits, ReqLimits, RespLimits, ServerLimits},
    server::server_impl::{AllLimits, Handler},
    Handled, Method, Version,
};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{atomic::AtomicBool, Arc},
    time::Instant,
};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) multipart_limits: MultipartLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
            multipart_limits: limits.4,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        stopping: &AtomicBool,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;

        match self.impl_run(stream, stopping).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                self.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(
        &mut self,
        stream: &mut TcpStream,
        stopping: &AtomicBool,
    ) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            // Loop boundary, checked before every read: a connection that
            // isn't already mid-request is safe to drop here without cutting
            // anything off mid-write.
            if stopping.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }

            self.reset_request_response();

            let read_timeout = if self.connection.request_count == 0 {
                self.conn_limits.initial_request_timeout
            } else {
                self.conn_limits.socket_read_timeout
            };

            if self.parser.fill_buffer(stream, read_timeout).await? == 0 {
                break;
            }
            self.response.version = self.parse()?;
            self.read_body(stream).await?;

            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;

            if let Some(segments) = self.response.take_pending_text() {
                self.resolve_text_includes(segments).await?;
            }

            if self.request.method() == Method::Head {
                self.response.suppress_body();
            }

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            if let Some(file) = self.response.take_file_body() {
                self.conn_limits
                    .stream_file(stream, file, &self.resp_limits)
                    .await?;
            }

            // §4.5 step 4: close the request-loop on `Connection: close` or
            // when the response tagged itself for a different write queue
            // (e.g. a protocol upgrade) — the socket no longer belongs to
            // this worker's keep-alive loop once that happens.
            if !self.response.keep_alive || self.response.write_queue_name() != "current" {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// §4.1 text-body includes: resolves every `include(path, query)` marker
    /// staged by [`Response::text_with`](crate::Response::text_with) by
    /// re-entering `self.handler` with a synthetic `GET` request per
    /// include, in order, and splices the results between the literal
    /// chunks. Fails if an included response is a file body, a chunked
    /// response (its bytes past the header would be chunk-envelope framing,
    /// not content), or itself stages further includes — one level of
    /// nesting is the limit, to rule out an include cycle hanging the worker.
    async fn resolve_text_includes(&mut self, segments: Vec<TextSegment>) -> Result<(), ErrorKind> {
        let mut resolved = Vec::new();

        for segment in segments {
            match segment {
                TextSegment::Literal(bytes) => resolved.extend_from_slice(&bytes),
                TextSegment::Include { path, query } => {
                    let sub_request =
                        Request::for_include(&self.req_limits, &self.request, &path, &query);
                    let mut sub_response = Response::new(&self.resp_limits);

                    self.handler
                        .handle(&mut self.connection_data, &sub_request, &mut sub_response)
                        .await;

                    let is_inline = sub_response.take_file_body().is_none()
                        && !sub_response.is_chunked()
                        && sub_response.take_pending_text().is_none();

                    if !is_inline {
                        return Err(ErrorKind::internal());
                    }

                    resolved.extend_from_slice(sub_response.body_bytes());
                }
            }
        }

        self.response.finish_pending_text(resolved);
        Ok(())
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }

    /// Streams a [`FileBody`] staged by [`Response::file`](crate::Response::file)
    /// or [`Response::file_range`](crate::Response::file_range) onto `stream`,
    /// in chunks sized by the file's own [`RateLimit`](crate::limits::RateLimit)
    /// or else [`RespLimits::file_buffer_size`], sleeping between chunks when
    /// a rate limit is set.
    ///
    /// Headers (including `content-length`) were already written by the
    /// caller; an I/O error here (file gone, socket reset) just closes the
    /// connection, since a response can't be retracted mid-stream.
    pub(crate) async fn stream_file(
        &self,
        stream: &mut TcpStream,
        file: FileBody,
        resp_limits: &RespLimits,
    ) -> Result<(), io::Error> {
        let mut handle = tokio::fs::File::open(&file.path).await?;

        let mut remaining = file.range.map(|(start, end)| {
            end - start + 1
        });

        if let Some((start, _)) = file.range {
            if start > 0 {
                handle.seek(io::SeekFrom::Start(start)).await?;
            }
        }

        let chunk_size = file
            .rate_limit
            .as_ref()
            .map(|rate_limit| rate_limit.chunk_size)
            .unwrap_or(resp_limits.file_buffer_size)
            .max(1);

        let mut buf = vec![0u8; chunk_size];

        loop {
            if remaining == Some(0) {
                break;
            }

            let want = remaining
                .map(|r| (chunk_size as u64).min(r) as usize)
                .unwrap_or(chunk_size);

            let read = tokio::select! {
                biased;

                result = handle.read(&mut buf[..want]) => result?,
                _ = sleep(self.socket_write_timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"));
                },
            };

            if read == 0 {
                break;
            }

            self.write_bytes(stream, &buf[..read]).await?;

            if let Some(r) = remaining.as_mut() {
                *r -= read as u64;
            }

            if let Some(rate_limit) = &file.rate_limit {
                sleep(rate_limit.interval).await;
            }
        }

        Ok(())
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        Ok(!self.response.keep_alive
            || self.connection.request_count >= self.conn_limits.max_requests_per_connection
            || self.connection.created.elapsed() > self.conn_limits.connection_lifetime)
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use littleweb::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/littleweb/blob/main/examples/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use littleweb::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use littleweb::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use littleweb::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
                multipart_limits: MultipartLimits::default(),
            }
        }
    }
}
