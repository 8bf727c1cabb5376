use crate::{query, Version};
use std::{error, fmt, io, panic::Location};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),
    /// A body is implied (a method that customarily carries one, or a
    /// `Content-Type` header) but neither `Content-Length` nor
    /// `Transfer-Encoding: chunked` framed it.
    LengthRequired,

    /// Malformed chunk size line or missing trailing `\r\n` after a chunk.
    ChunkInvalidSize,
    /// A chunk body wasn't followed by `\r\n`.
    ChunkInvalidEndCharacter,
    /// `Content-Type: multipart/form-data` with no (or a too-short) `boundary=`.
    UnableToFindBoundary,
    /// A part's `Content-Disposition:` line had no `name="..."`.
    InvalidContentDisposition,
    /// Bytes followed a boundary line that were neither `--` nor `\r\n`.
    UnexpectedDataAfterBoundary,

    /// No registered route matched the request path.
    NotFound,
    /// A route exists for this path under other methods, carries the `Allow` list.
    #[allow(dead_code)]
    MethodNotAllowed(&'static [&'static str]),
    /// A client-supplied byte range fell outside the resource, carries the total size.
    #[allow(dead_code)]
    RangeNotSatisfiable(u64),
    /// A handler returned an error; wrapped with the call site that raised it.
    #[allow(dead_code)]
    InternalError(Traced),
    /// No bytes were read within the applicable timeout.
    ConnectionTimedOut,

    ServiceUnavailable,
    Io(IoError),
}

/// File/line of an [`ErrorKind::InternalError`]'s origin, for host-side correlation.
///
/// Transparent to equality and display: it never changes what an error *is*,
/// only where it came from.
#[derive(Debug)]
pub(crate) struct Traced {
    pub(crate) location: &'static Location<'static>,
}

impl PartialEq for Traced {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl ErrorKind {
    #[track_caller]
    pub(crate) fn internal() -> Self {
        ErrorKind::InternalError(Traced {
            location: Location::caller(),
        })
    }
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )*
                // Variants carrying dynamic data (Allow list, Content-Range, trace
                // location) can't be expressed as `concat!`-time constants; they are
                // rendered by `ErrorKind::to_response` instead, which never reaches here.
                _ => "HTTP/1.1 500 Internal Server Error\r\nconnection: close\r\ncontent-length: 0\r\n\r\n",
            }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;
        LengthRequired: "411 Length Required", "80"
            => r#"{"error":"Content-Length or chunked encoding required","code":"LENGTH_REQUIRED"}"#;

        ChunkInvalidSize: "400 Bad Request", "58"
            => r#"{"error":"Invalid chunk size line","code":"CHUNK_INVALID_SIZE"}"#;
        ChunkInvalidEndCharacter: "400 Bad Request", "61"
            => r#"{"error":"Invalid chunk terminator","code":"CHUNK_INVALID_END"}"#;
        UnableToFindBoundary: "400 Bad Request", "64"
            => r#"{"error":"Missing multipart boundary","code":"NO_BOUNDARY"}"#;
        InvalidContentDisposition: "400 Bad Request", "67"
            => r#"{"error":"Invalid Content-Disposition","code":"INVALID_DISPOSITION"}"#;
        UnexpectedDataAfterBoundary: "400 Bad Request", "68"
            => r#"{"error":"Unexpected data after boundary","code":"BAD_BOUNDARY_TAIL"}"#;

        NotFound: "404 Not Found", "49"
            => r#"{"error":"Resource not found","code":"NOT_FOUND"}"#;
        ConnectionTimedOut: "408 Request Timeout", "52"
            => r#"{"error":"Connection timed out","code":"TIMED_OUT"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl ErrorKind {
    /// Renders this error to its wire-format HTTP response.
    ///
    /// Most variants are precomputed `&'static [u8]` by [`Self::as_http`].
    /// [`ErrorKind::MethodNotAllowed`] and [`ErrorKind::RangeNotSatisfiable`]
    /// carry data that can't be baked into a `concat!`-generated constant
    /// (an `Allow` list, a `Content-Range` total), so they format directly here.
    pub(crate) fn to_response(&self, version: Version, json: bool) -> std::borrow::Cow<'static, [u8]> {
        match self {
            ErrorKind::MethodNotAllowed(methods) => {
                let allow = methods.join(", ");
                let http_version = match version {
                    Version::Http11 => "HTTP/1.1",
                    Version::Http10 => "HTTP/1.0",
                };
                let body = match json {
                    true => format!(r#"{{"error":"Method not allowed","code":"METHOD_NOT_ALLOWED"}}"#),
                    false => String::new(),
                };
                let content_type = match json {
                    true => "content-type: application/json\r\n",
                    false => "",
                };
                std::borrow::Cow::Owned(
                    format!(
                        "{http_version} 405 Method Not Allowed\r\nallow: {allow}\r\nconnection: close\r\ncontent-length: {}\r\n{content_type}\r\n{body}",
                        body.len()
                    )
                    .into_bytes(),
                )
            }
            ErrorKind::RangeNotSatisfiable(total) => {
                let http_version = match version {
                    Version::Http11 => "HTTP/1.1",
                    Version::Http10 => "HTTP/1.0",
                };
                std::borrow::Cow::Owned(
                    format!(
                        "{http_version} 416 Range Not Satisfiable\r\ncontent-range: bytes */{total}\r\nconnection: keep-alive\r\ncontent-length: 0\r\n\r\n"
                    )
                    .into_bytes(),
                )
            }
            ErrorKind::InternalError(traced) => {
                let http_version = match version {
                    Version::Http11 => "HTTP/1.1",
                    Version::Http10 => "HTTP/1.0",
                };
                let body = match json {
                    true => format!(
                        r#"{{"error":"Internal server error","code":"INTERNAL_ERROR","at":"{}:{}"}}"#,
                        traced.location.file(),
                        traced.location.line()
                    ),
                    false => String::new(),
                };
                let content_type = match json {
                    true => "content-type: application/json\r\n",
                    false => "",
                };
                std::borrow::Cow::Owned(
                    format!(
                        "{http_version} 500 Internal Server Error\r\nconnection: close\r\ncontent-length: {}\r\n{content_type}\r\n{body}",
                        body.len()
                    )
                    .into_bytes(),
                )
            }
            other => std::borrow::Cow::Borrowed(other.as_http(version, json)),
        }
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
