use crate::{
    errors::*,
    http::{
        cookie::Cookie,
        types::{self, Header, HeaderMap},
    },
    limits::ReqLimits,
    query::Query,
    route::Captured,
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{
    cell::RefCell,
    collections::HashMap,
    io, mem,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

/// The content of a request body, framed according to `Content-Length` or
/// `Transfer-Encoding: chunked`.
///
/// `Fixed` reuses the connection's zero-copy parse buffer when the whole
/// body arrived with the head (the common case for small API payloads);
/// anything requiring extra socket reads past that single fill is owned.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No body was present (or it was consumed into form/multipart parsing).
    Empty,
    /// Body bytes backed by the connection's per-request buffer.
    Bytes(&'static [u8]),
    /// Body bytes assembled across more than one socket read (chunked
    /// decoding, or a fixed body larger than what arrived in the first read).
    Owned(Vec<u8>),
}

impl Body {
    /// Returns the body bytes, regardless of which variant backs them.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => b"",
            Body::Bytes(b) => b,
            Body::Owned(b) => b,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// How the codec determined the body should be read for the current request,
/// decided from `Content-Length`/`Transfer-Encoding`/`Content-Type` during
/// header parsing, before any body bytes are read.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BodyFraming {
    None,
    Chunked,
    Fixed(usize),
}

/// A reference to a file part uploaded via `multipart/form-data`.
///
/// The referenced spool file is deleted when the request completes (see
/// [`http::multipart`](crate::http::multipart)); handlers that need to keep
/// the data must copy or move it out before returning.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    /// Name of the form field the file was submitted under.
    pub field_name: String,
    /// Client-supplied original filename (`filename*` preferred over `filename`).
    pub file_name: String,
    /// `Content-Type` of the part, if the client sent one.
    pub content_type: Option<String>,
    /// Path to the spooled temporary file containing the part's bytes.
    pub spool_path: std::path::PathBuf,
    /// Size of the spooled file in bytes.
    pub size: u64,
}

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance. Wire-level
/// fields (method, raw URL, version, headers) are zero-copy referenced from
/// the connection's per-request buffer; everything a handler might hold onto
/// past the buffer's next reuse (decoded path, merged query items, captures,
/// uploads) is owned.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Body,
    pub(crate) body_framing: BodyFraming,
    pub(crate) transfer_encoding_chunked: bool,
    pub(crate) boundary: Option<String>,
    pub(crate) is_form_urlencoded: bool,

    decoded_path: String,
    path_segments: Vec<String>,
    query_items: Vec<(String, String)>,
    uploads: Vec<UploadedFile>,

    // `RefCell` because the dispatcher only ever sees `&Request` (the sole
    // extension point, `Handler::handle`, takes it by shared reference) but
    // still needs to populate captures while matching a route.
    pub(crate) identities: RefCell<HashMap<String, Captured>>,
    pub(crate) property_transformations: RefCell<HashMap<String, Captured>>,

    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

const UNSPECIFIED_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: Body::Empty,
            body_framing: BodyFraming::None,
            transfer_encoding_chunked: false,
            boundary: None,
            is_form_urlencoded: false,

            decoded_path: String::new(),
            path_segments: Vec::with_capacity(limits.url_parts),
            query_items: Vec::with_capacity(limits.url_query_parts),
            uploads: Vec::new(),

            identities: RefCell::new(HashMap::new()),
            property_transformations: RefCell::new(HashMap::new()),

            client_addr: UNSPECIFIED_ADDR,
            server_addr: UNSPECIFIED_ADDR,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = Body::Empty;
        self.body_framing = BodyFraming::None;
        self.transfer_encoding_chunked = false;
        self.boundary = None;
        self.is_form_urlencoded = false;

        self.decoded_path.clear();
        self.path_segments.clear();
        self.query_items.clear();
        for upload in self.uploads.drain(..) {
            // Best-effort: the spool file may already be gone if the handler
            // moved or deleted it itself. Either way the request is done
            // with it and it must not outlive the request.
            let _ = std::fs::remove_file(&upload.spool_path);
        }

        self.identities.borrow_mut().clear();
        self.property_transformations.borrow_mut().clear();
    }

    /// Builds a synthetic `GET` request for a [text-body include](crate::Response::text_with)
    /// re-entering the dispatcher.
    ///
    /// `path`/`query` are already decoded, so this skips the wire parser
    /// entirely and fills `decoded_path`/`path_segments`/`query_items`
    /// directly; `headers` is cloned from `parent` so the included handler
    /// sees the same `Cookie`/`Host`/etc. (and therefore the same session)
    /// as the request that triggered the include. `parent.url()`'s raw bytes
    /// are not reconstructed — there is no wire target to decode them from —
    /// so an included handler that reads `url()` directly instead of the
    /// decoded accessors sees an empty one.
    #[inline]
    pub(crate) fn for_include(
        limits: &ReqLimits,
        parent: &Request,
        path: &str,
        query: &[(String, String)],
    ) -> Request {
        let mut request = Request::new(limits);
        request.method = Method::Get;
        request.headers = parent.headers.clone();
        request.headers.content_length = None;
        request.client_addr = parent.client_addr;
        request.server_addr = parent.server_addr;

        request.decoded_path = path.to_owned();
        request.path_segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        request.query_items = query.to_vec();

        request
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        self.body.as_bytes()
    }

    /// Returns the percent-decoded request path (no query string).
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.decoded_path
    }

    /// Returns the percent-decoded path split on `/`.
    #[inline(always)]
    pub fn path_segments(&self) -> &[String] {
        &self.path_segments
    }

    /// Whether the request line used the RFC 7230 asterisk-form
    /// (`OPTIONS * HTTP/1.1`), i.e. the request-target was the single byte
    /// `*` rather than a path.
    #[inline(always)]
    pub fn is_asterisk_form(&self) -> bool {
        self.url.target == b"*"
    }

    /// Returns the union of URL query parameters and (for
    /// `application/x-www-form-urlencoded` bodies) decoded form fields, in
    /// the order they were parsed.
    #[inline(always)]
    pub fn query_items(&self) -> &[(String, String)] {
        &self.query_items
    }

    /// Returns the first value for `key` among [`query_items`](Self::query_items).
    #[inline]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Reconstructs the form body as `application/x-www-form-urlencoded`
    /// bytes, substituting spaces with `+` (mirrors the bytes a browser would
    /// have sent).
    pub fn body_query(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.query_items.iter().enumerate() {
            if i != 0 {
                out.push('&');
            }
            out.push_str(&k.replace(' ', "+"));
            out.push('=');
            out.push_str(&v.replace(' ', "+"));
        }
        out
    }

    /// Returns the uploaded file references produced by a `multipart/form-data` body.
    #[inline(always)]
    pub fn uploads(&self) -> &[UploadedFile] {
        &self.uploads
    }

    /// Returns the cookies sent in the `Cookie` header, parsed per [`http::cookie`
    /// ](crate::http::cookie).
    pub fn cookies(&self) -> Vec<Cookie> {
        self.header(b"cookie")
            .map(Cookie::parse_header)
            .unwrap_or_default()
    }

    /// The address of the connected client.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The local address the connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Returns a captured path identity bound by the matched route pattern.
    pub fn identity(&self, name: &str) -> Option<Captured> {
        self.identities.borrow().get(name).cloned()
    }

    /// Returns a transformed query/form parameter bound by a route's `PARAMS` clause.
    pub fn property(&self, name: &str) -> Option<Captured> {
        self.property_transformations.borrow().get(name).cloned()
    }

    /// Parses a `Range: bytes=START-END` request header against a resource
    /// of `total_size` bytes, supporting the `N-`, `-N` and `N-M` forms.
    ///
    /// A missing or malformed header resolves to [`RangeRequest::None`]
    /// (serve the whole resource), matching the common browser expectation
    /// that an unparseable `Range` header is simply ignored rather than
    /// rejected.
    ///
    /// # Examples
    /// ```
    /// # littleweb::run_test(|req, resp| {
    /// use littleweb::{RangeRequest, StatusCode};
    ///
    /// match req.byte_range(1000) {
    ///     RangeRequest::None => resp.status(StatusCode::Ok).body("whole resource"),
    ///     RangeRequest::Satisfiable(start, end) => {
    ///         resp.status(StatusCode::PartialContent).body(format!("{start}-{end}"))
    ///     }
    ///     RangeRequest::Unsatisfiable => resp.status(StatusCode::RangeNotSatisfiable).body(""),
    /// }
    /// # });
    /// ```
    pub fn byte_range(&self, total_size: u64) -> RangeRequest {
        let Some(header) = self.header(b"range") else {
            return RangeRequest::None;
        };
        let Some(spec) = header.strip_prefix(b"bytes=") else {
            return RangeRequest::None;
        };
        let Some(dash) = memchr(b'-', spec) else {
            return RangeRequest::None;
        };
        let (start_bytes, end_bytes) = (&spec[..dash], &spec[dash + 1..]);

        if total_size == 0 {
            return RangeRequest::Unsatisfiable;
        }

        let range = match (start_bytes.is_empty(), end_bytes.is_empty()) {
            (false, false) => {
                let Some(start) = types::slice_to_usize(start_bytes) else {
                    return RangeRequest::None;
                };
                let Some(end) = types::slice_to_usize(end_bytes) else {
                    return RangeRequest::None;
                };
                (start as u64, end as u64)
            }
            (false, true) => {
                let Some(start) = types::slice_to_usize(start_bytes) else {
                    return RangeRequest::None;
                };
                (start as u64, total_size - 1)
            }
            (true, false) => {
                let Some(suffix_len) = types::slice_to_usize(end_bytes) else {
                    return RangeRequest::None;
                };
                if suffix_len == 0 {
                    return RangeRequest::Unsatisfiable;
                }
                (total_size.saturating_sub(suffix_len as u64), total_size - 1)
            }
            (true, true) => return RangeRequest::None,
        };

        let (start, end) = range;
        if start > end || start >= total_size {
            RangeRequest::Unsatisfiable
        } else {
            RangeRequest::Satisfiable(start, end.min(total_size - 1))
        }
    }
}

/// The outcome of matching a request's `Range` header against a known
/// resource size, returned by [`Request::byte_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No (or an unparseable) `Range` header; serve the full resource.
    None,
    /// An inclusive, in-bounds byte range (`start..=end`).
    Satisfiable(u64, u64),
    /// A syntactically valid range that falls outside the resource.
    Unsatisfiable,
}

impl Request {
    #[inline]
    fn finalize_decoded(&mut self) {
        let mut path_buf = self.url.path().to_vec();
        let len = types::percent_decode_in_place(&mut path_buf);
        path_buf.truncate(len);
        self.decoded_path = String::from_utf8_lossy(&path_buf).into_owned();

        self.path_segments = self
            .decoded_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        for &(key, value) in &self.url.query_parts {
            self.query_items
                .push((decode_query_component(key), decode_query_component(value)));
        }
    }

    /// Merges decoded `application/x-www-form-urlencoded` body bytes into
    /// [`query_items`](Self::query_items), in parsing order.
    pub(crate) fn merge_form_body(&mut self, body: &[u8]) {
        for pair in body.split(|&b| b == b'&') {
            if pair.is_empty() {
                continue;
            }
            let mut it = pair.splitn(2, |&b| b == b'=');
            let key = it.next().unwrap_or(b"");
            let value = it.next().unwrap_or(b"");
            self.query_items
                .push((decode_query_component(key), decode_query_component(value)));
        }
    }

    pub(crate) fn push_upload(&mut self, upload: UploadedFile) {
        self.uploads.push(upload);
    }

    /// Binds route-match captures onto a request already handed out as
    /// `&Request`. On collision the descendant wins — later calls (deeper
    /// trie nodes) overwrite earlier ones for the same name.
    pub(crate) fn bind_identity(&self, name: String, value: Captured) {
        self.identities.borrow_mut().insert(name, value);
    }

    pub(crate) fn bind_property(&self, name: String, value: Captured) {
        self.property_transformations.borrow_mut().insert(name, value);
    }

    pub(crate) fn push_field(&mut self, name: String, value: String) {
        self.query_items.push((name, value));
    }
}

/// Decodes a single percent-encoded query/form component: `+` becomes a
/// space, then `%XX` escapes are decoded. Invalid UTF-8 in the decoded bytes
/// is replaced, never rejected (form input from browsers is not guaranteed
/// to be valid UTF-8, e.g. legacy charsets).
fn decode_query_component(raw: &[u8]) -> String {
    let mut buf: Vec<u8> = raw.iter().map(|&b| if b == b'+' { b' ' } else { b }).collect();
    let len = types::percent_decode_in_place(&mut buf);
    buf.truncate(len);
    String::from_utf8_lossy(&buf).into_owned()
}

// If you don't like using HttpConnection instead of transmitting all the
// values, then you can't even imagine what happened here...
// It's a pity now that you can understand this code (when passing all the
//  values, I didn't understand it myself):(
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn parse(&mut self) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;

        self.parse_headers()?;
        self.check_body()?;
        self.request.finalize_decoded();

        Ok(self.request.version)
    }
}

// Parse first line
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::InvalidMethod)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` method
    // due to ownership error. And there is no need to use `into_static`
    fn parse_url(&mut self) -> Result<(), ErrorKind> {
        let posit = self
            .parser
            .find_char(self.req_limits.url_size, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;
        let start = self.parser.position + 1;

        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let mut last = 0;
        let start_pos = start + posit;
        let slice_url = &parser.buffer[start..start_pos];

        // RFC 7230 asterisk-form (`OPTIONS * HTTP/1.1`): the request-target
        // is the single byte `*`, not a path. The dispatcher rejects it for
        // any method but OPTIONS.
        if slice_url == b"*" {
            url.path = b"*";
            url.target = b"*";
            parser.update_position(posit);
            return Ok(());
        }

        if slice_url.is_empty() || parser.buffer[start - 1] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        for index in memchr_iter(b'/', slice_url) {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }

            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::InvalidUrl)?;

            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }

        let range = [start + last, (posit - last).saturating_sub(1)];
        let (end, url_middle) = match parser.find_char(posit, b'?') {
            Some(q_pos) => {
                let slice = parser
                    .get_slice_static(q_pos, (range[0] + range[1]).saturating_sub(q_pos))
                    .ok_or(ErrorKind::InvalidUrl)?;
                let limit = url.query_parts.capacity();

                Query::parse_into(&mut url.query_parts, slice, limit)?;
                url.query = Some(slice);

                (q_pos, q_pos)
            }
            None => (posit, posit),
        };

        let slice = parser
            .get_slice_static(range[0], (parser.position + end).saturating_sub(range[0]))
            .ok_or(ErrorKind::InvalidUrl)?;

        if !slice.is_empty() {
            url.parts.push(slice);
        }

        url.path = parser
            .get_slice_static(parser.position, url_middle)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.target = parser
            .get_slice_static(parser.position, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n')
            .ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        (self.response.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.request.version = self.response.version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders)
    }

    #[inline]
    fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        let parser = &mut self.parser;
        // HeaderName: Someone=data\r\n
        //                            |
        let end = parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        match parser.get_slice(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = parser
            .get_slice_static(parser.position + value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> Result<bool, ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            b"transfer-encoding" => self.parse_transfer_encoding(header.value),
            b"content-type" => self.parse_content_type(header.value),
            _ => return Ok(false),
        }
        .map(|_| true)?;

        // Content-Type/Transfer-Encoding are still visible to handlers via
        // `Request::header`, unlike Content-Length/Connection which the
        // teacher's codec fully owns.
        Ok(matches!(
            header.name,
            b"content-length" | b"connection"
        ))
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + start - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader);
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 10];
        let len = types::into_lower_case(value, &mut normalized);

        match &normalized[..len] {
            b"keep-alive" => self.response.keep_alive = true,
            b"close" => self.response.keep_alive = false,
            _ => return Err(ErrorKind::InvalidConnection),
        }

        Ok(())
    }

    #[inline]
    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        // Case-insensitive substring match, per the ancestor: any `Transfer-Encoding`
        // naming `chunked` (with or without other codings) is treated as chunked.
        let mut normalized = vec![0u8; value.len()];
        types::into_lower_case(value, &mut normalized);
        self.request.transfer_encoding_chunked = memchr::memmem::find(&normalized, b"chunked").is_some();
        Ok(())
    }

    #[inline]
    fn parse_content_type(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = vec![0u8; value.len()];
        types::into_lower_case(value, &mut normalized);

        if normalized.starts_with(b"application/x-www-form-urlencoded") {
            self.request.is_form_urlencoded = true;
        } else if normalized.starts_with(b"multipart/form-data") {
            let marker = b"boundary=";
            if let Some(pos) = memchr::memmem::find(&normalized, marker) {
                let raw = &value[pos + marker.len()..];
                let raw = raw.split(|&b| b == b';').next().unwrap_or(raw);
                let raw = std::str::from_utf8(raw).unwrap_or("").trim_matches('"');
                if raw.len() < 2 {
                    return Err(ErrorKind::UnableToFindBoundary);
                }
                self.request.boundary = Some(raw.to_owned());
            } else {
                return Err(ErrorKind::UnableToFindBoundary);
            }
        }

        Ok(())
    }
}

// Decide body framing
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn check_body(&mut self) -> Result<(), ErrorKind> {
        if self.request.transfer_encoding_chunked {
            self.request.body_framing = BodyFraming::Chunked;
            return Ok(());
        }

        match self.request.headers.content_length {
            Some(len) => {
                self.request.body_framing = BodyFraming::Fixed(len);

                let parser = &self.parser;
                let available = parser.len - parser.position;
                if available >= len {
                    let slice = parser
                        .get_slice_static(parser.position, len)
                        .ok_or(ErrorKind::BodyMismatch {
                            expected: len,
                            available,
                        })?;
                    self.request.body = Body::Bytes(slice);
                }
                // Otherwise the remaining bytes are read later by the
                // connection loop (see `server::connection::read_body`).
                Ok(())
            }
            None => {
                // A body is implied by a method that customarily carries
                // one (POST/PUT/PATCH) or by the presence of a
                // `Content-Type` header on any method; with neither
                // `Content-Length` nor `Transfer-Encoding: chunked` framing
                // it, the request can't be read safely (spec §7
                // `LengthRequired`/411). GET/HEAD/DELETE/OPTIONS routinely
                // arrive with no body and no `Content-Type` at all, so
                // those aren't flagged on method alone.
                let body_implied = matches!(self.request.method, Method::Post | Method::Put | Method::Patch)
                    || self.request.is_form_urlencoded
                    || self.request.boundary.is_some()
                    || self.request.header(b"content-type").is_some();

                if body_implied {
                    return Err(ErrorKind::LengthRequired);
                }

                self.request.body_framing = BodyFraming::None;
                self.request.body = Body::Empty;
                Ok(())
            }
        }
    }
}

// Finish reading the body past the head, and run form/multipart decoding
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn read_body(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        match self.request.body_framing {
            BodyFraming::None => {}
            BodyFraming::Fixed(len) => {
                while self.parser.len - self.parser.position < len {
                    if self
                        .parser
                        .fill_more(stream, self.conn_limits.socket_read_timeout)
                        .await?
                        == 0
                    {
                        return Err(ErrorKind::BodyMismatch {
                            expected: len,
                            available: self.parser.len - self.parser.position,
                        });
                    }
                }

                if matches!(self.request.body, Body::Empty) && len > 0 {
                    let available = self.parser.len - self.parser.position;
                    let slice = self
                        .parser
                        .get_slice_static(self.parser.position, len)
                        .ok_or(ErrorKind::BodyMismatch {
                            expected: len,
                            available,
                        })?;
                    self.request.body = Body::Bytes(slice);
                }
            }
            BodyFraming::Chunked => {
                let mut window =
                    self.parser.buffer[self.parser.position..self.parser.len].to_vec();

                let bytes = crate::http::chunked::decode(
                    &mut window,
                    stream,
                    self.conn_limits.socket_read_timeout,
                    self.req_limits.body_size,
                )
                .await?;

                self.request.body = Body::Owned(bytes);
            }
        }

        if self.request.is_form_urlencoded {
            let body = self.request.body.as_bytes().to_vec();
            self.request.merge_form_body(&body);
        }

        if let Some(boundary) = self.request.boundary.take() {
            let body = self.request.body.as_bytes().to_vec();
            let parsed =
                crate::http::multipart::parse(&body, &boundary, &self.multipart_limits).await?;

            for (name, value) in parsed.fields {
                self.request.push_field(name, value);
            }
            for upload in parsed.uploads {
                self.request.push_upload(upload);
            }
        }

        Ok(())
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    pub(crate) position: usize,
    pub(crate) len: usize,
    has_crlf: bool,
    pub(crate) buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer) => {
                let n = read_result?;
                self.len = n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    /// Reads more bytes past the initial fill, appending at `self.len`.
    /// Used when a fixed-length body arrives split across multiple reads.
    #[inline]
    pub(crate) async fn fill_more(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    // DO NOT SUGGEST FIXES without full server architecture context.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t =
            HttpConnection::from_req("OPTIONS /qwe&q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse(), Ok(Version::Http10));
        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("PYU ",       None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);

            if let Some(expected) = expected {
                assert_eq!(t.parse_method(), Ok(()));
                assert_eq!(t.request.method(), expected);
            } else {
                assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
            }
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some((vec![], vec![]))),
            ("/// ",           Some((vec![], vec![]))),
            ("/? ",            Some((vec![], vec![]))),
            ("/?/ ",           Some((vec!["?"], vec![]))),
            ("/?? ",           Some((vec![], vec![]))),
            ("/???? ",         Some((vec![], vec![]))),

            ("/api/user ",     Some((vec!["api", "user"], vec![]))),
            ("///api//user ",  Some((vec!["api", "user"], vec![]))),
            ("/api/qwe/name/len ",  Some((vec!["api", "qwe", "name", "len"], vec![]))),
            ("/api//user/// ", Some((vec!["api", "user"], vec![]))),
            ("/api//user//? ", Some((vec!["api", "user"], vec![]))),

            ("/api ",          Some((vec!["api"], vec![]))),
            ("///api ",        Some((vec!["api"], vec![]))),
            ("/api// ",        Some((vec!["api"], vec![]))),
            ("//api///? ",     Some((vec!["api"], vec![]))),

            (
                "/api/find?user=qwe&id=223 ", Some((vec!["api", "find"],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?user=qwe&id=223 ", Some((vec![],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?debug&name=&=Qwe&key=sda&&id=123 ", Some((vec![],
                    vec![
                        ("debug", ""), ("name", ""), ("", "Qwe"),
                        ("key", "sda"), ("", "Qwe"), ("id", "123")
                    ]
                ))
            ),
            (
                "/?a=1&a=2&a=3 ",
                Some((vec![], vec![("a", "1"), ("a", "1"), ("a", "1")]))
            ),
            (
                "/?very=long=value=with=equals ",
                Some((vec![], vec![("very", "long=value=with=equals")]))
            ),

            ("qwe ",           None),
            (" ",              None),
            ("qwe/qwe ",       None),
            ("/qwe",           None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some((url, query)) = expected {
                assert_eq!(t.parse_url(), Ok(()));

                url.iter().enumerate().for_each(|(i, value)| {
                    assert_eq!(str(t.request.url().path_segment(i)), Some(*value));
                });
                assert_eq!(str(t.request.url().path_segment(url.len())), None);

                query.iter().for_each(|(name, value)| {
                    assert_eq!(str(t.request.url().query(name.as_bytes())), Some(*value));
                });
            } else {
                assert_eq!(t.parse_url(), Err(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn parse_url_full() {
        let mut t = HttpConnection::from_req("/api/users/123?sort=name&debug ");
        let segments = &[b"api" as &[u8], b"users" as &[u8], b"123" as &[u8]] as &[&[u8]];

        assert_eq!(t.parse_url(), Ok(()));

        assert_eq!(
            str_op(t.request.url().target()),
            "/api/users/123?sort=name&debug"
        );
        assert_eq!(str_op(t.request.url().path()), "/api/users/123");

        assert!(t.request.url().matches(segments));
        assert!(t.request.url().starts_with(segments));
        assert!(t.request.url().starts_with(&segments[..1]));
        assert!(t.request.url().starts_with(&[]));
        assert!(t.request.url().ends_with(segments));
        assert!(t.request.url().ends_with(&segments[1..]));
        assert!(t.request.url().ends_with(&[]));

        assert_eq!(t.request.url().path_segments(), segments);
        assert_eq!(str(t.request.url().path_segment(0)), Some("api"));
        assert_eq!(str(t.request.url().path_segment(1)), Some("users"));
        assert_eq!(str(t.request.url().path_segment(2)), Some("123"));
        assert_eq!(str(t.request.url().path_segment(3)), None);

        assert_eq!(str(t.request.url().query_full()), Some("?sort=name&debug"));
        assert_eq!(str(t.request.url().query(b"sort")), Some("name"));
        assert_eq!(str(t.request.url().query(b"debug")), Some(""));
    }

    #[test]
    fn parse_url_asterisk_form() {
        let mut t = HttpConnection::from_req("* ");
        assert_eq!(t.parse_url(), Ok(()));
        assert_eq!(str_op(t.request.url().target()), "*");
        assert_eq!(str_op(t.request.url().path()), "*");
        assert!(t.request.is_asterisk_form());
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r \n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.0\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.\n",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1 ",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.",        Err(ErrorKind::InvalidVersion)),
            ("\r\n",           Err(ErrorKind::InvalidVersion)),
            ("\r",             Err(ErrorKind::InvalidVersion)),
            ("\n",             Err(ErrorKind::InvalidVersion)),
            (" ",              Err(ErrorKind::InvalidVersion)),
            ("",               Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);

            if let Ok((version, has_crlf)) = expected {
                assert_eq!(t.check_version(), Ok(()));

                assert_eq!(t.request.version, version);
                assert_eq!(t.response.version, version);
                assert_eq!(t.parser.has_crlf, has_crlf);
            } else {
                assert_eq!(t.check_version(), expected);
            }
        }
    }

    #[test]
    fn decode_query_component() {
        assert_eq!(super::decode_query_component(b"John+Doe"), "John Doe");
        assert_eq!(super::decode_query_component(b"a%2Bb"), "a+b");
        assert_eq!(super::decode_query_component(b"100%25"), "100%");
    }

    #[test]
    fn finalize_decoded_merges_query_and_path() {
        let mut t = HttpConnection::from_req("/caf%C3%A9/page?name=John+Doe ");
        assert_eq!(t.parse_url(), Ok(()));
        t.request.finalize_decoded();

        assert_eq!(t.request.path(), "/café/page");
        assert_eq!(t.request.path_segments(), ["café", "page"]);
        assert_eq!(t.request.query("name"), Some("John Doe"));
    }

    #[test]
    fn byte_range() {
        #[rustfmt::skip]
        let cases = [
            (None,                        RangeRequest::None),
            (Some("bytes=100-199"),       RangeRequest::Satisfiable(100, 199)),
            (Some("bytes=0-"),            RangeRequest::Satisfiable(0, 999)),
            (Some("bytes=950-"),          RangeRequest::Satisfiable(950, 999)),
            (Some("bytes=-100"),          RangeRequest::Satisfiable(900, 999)),
            (Some("bytes=-5000"),         RangeRequest::Satisfiable(0, 999)),
            (Some("bytes=-0"),            RangeRequest::Unsatisfiable),
            (Some("bytes=2000-3000"),     RangeRequest::Unsatisfiable),
            (Some("bytes=500-100"),       RangeRequest::Unsatisfiable),
            (Some("not-a-range"),         RangeRequest::None),
            (Some("bytes=abc-def"),       RangeRequest::None),
        ];

        for (header, expected) in cases {
            let raw = match header {
                Some(h) => format!("GET / HTTP/1.1\r\nRange: {h}\r\n\r\n"),
                None => "GET / HTTP/1.1\r\n\r\n".to_owned(),
            };

            let mut t = HttpConnection::from_req(raw);
            t.parse().unwrap();

            assert_eq!(t.request.byte_range(1000), expected, "header: {header:?}");
        }
    }

    #[test]
    fn post_without_length_or_chunked_is_length_required() {
        let mut t = HttpConnection::from_req("POST /submit HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(t.parse(), Err(ErrorKind::LengthRequired));
    }

    #[test]
    fn get_with_content_type_but_no_length_is_length_required() {
        let mut t = HttpConnection::from_req(
            "GET /x HTTP/1.1\r\nHost: h\r\nContent-Type: application/json\r\n\r\n",
        );
        assert_eq!(t.parse(), Err(ErrorKind::LengthRequired));
    }

    #[test]
    fn get_without_body_headers_parses_to_empty_body() {
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\nHost: h\r\n\r\n");
        assert!(t.parse().is_ok());
        assert_eq!(t.request.body_framing, BodyFraming::None);
    }

    #[test]
    fn post_with_content_length_zero_is_empty_body() {
        let mut t = HttpConnection::from_req(
            "POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 0\r\n\r\n",
        );
        assert!(t.parse().is_ok());
        assert_eq!(t.request.body_framing, BodyFraming::Fixed(0));
    }
}
