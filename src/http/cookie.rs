//! Cookie parsing and rendering.
//!
//! Two distinct formats are handled: the request-side `Cookie:` header is a
//! flat `;`-separated list of `name=value` pairs with no attributes (per
//! [RFC 6265](https://tools.ietf.org/html/rfc6265#section-4.2)); a single
//! `Set-Cookie:` value names one cookie followed by its attributes.

/// A cookie, with the attributes a `Set-Cookie` value may carry.
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub comment: Option<String>,
    pub expires: Option<String>,
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub same_site: Option<SameSite>,
    pub version: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

/// `SameSite` attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            comment: None,
            expires: None,
            max_age: None,
            domain: None,
            path: None,
            same_site: None,
            version: None,
            secure: false,
            http_only: false,
        }
    }

    /// Parses a request `Cookie:` header into its `name=value` pairs.
    ///
    /// No attributes are recognized here; the client only ever sends bare
    /// pairs (multiple sessions in flight show up as repeated names).
    pub fn parse_header(header: &[u8]) -> Vec<Cookie> {
        let header = String::from_utf8_lossy(header);
        header
            .split(';')
            .filter_map(|raw| {
                let pair = raw.trim();
                let (name, value) = pair.split_once('=')?;
                Some(Cookie::new(name.trim(), value.trim()))
            })
            .collect()
    }

    /// Parses a single `Set-Cookie:` value, including attributes.
    ///
    /// Returns `None` if the first pair isn't a `name=value`, or if an
    /// attribute name outside the fixed set below is encountered (the whole
    /// cookie is rejected, not just the unknown attribute).
    pub fn parse_set_cookie(value: &[u8]) -> Option<Cookie> {
        let value = String::from_utf8_lossy(value);
        let mut parts = value.split(';');

        let (name, val) = parts.next()?.trim().split_once('=')?;
        let mut cookie = Cookie::new(name.trim(), val.trim());

        for raw_attr in parts {
            let attr = raw_attr.trim();
            if attr.is_empty() {
                continue;
            }

            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attr, None),
            };

            if !apply_attribute(&mut cookie, key, val) {
                return None;
            }
        }

        Some(cookie)
    }

    /// Renders this cookie (with attributes) as a `Set-Cookie` value.
    pub fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);

        if let Some(v) = &self.comment {
            out.push_str(&format!("; Comment={v}"));
        }
        if let Some(v) = &self.expires {
            out.push_str(&format!("; Expires={v}"));
        }
        if let Some(v) = self.max_age {
            out.push_str(&format!("; Max-Age={v}"));
        }
        if let Some(v) = &self.domain {
            out.push_str(&format!("; Domain={v}"));
        }
        if let Some(v) = &self.path {
            out.push_str(&format!("; Path={v}"));
        }
        if let Some(v) = &self.version {
            out.push_str(&format!("; Version={v}"));
        }
        match self.same_site {
            Some(SameSite::Strict) => out.push_str("; SameSite=Strict"),
            Some(SameSite::Lax) => out.push_str("; SameSite=Lax"),
            Some(SameSite::None) => out.push_str("; SameSite=None"),
            None => {}
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }

        out
    }
}

/// Applies a recognized attribute to `cookie`. Returns `false` if `name`
/// isn't one of the fixed attribute names.
fn apply_attribute(cookie: &mut Cookie, name: &str, value: Option<&str>) -> bool {
    match name.to_ascii_lowercase().as_str() {
        "comment" => cookie.comment = value.map(str::to_owned),
        "expires" => cookie.expires = value.map(str::to_owned),
        "max-age" => match value.and_then(|v| v.parse().ok()) {
            Some(n) => cookie.max_age = Some(n),
            None => return false,
        },
        "domain" => cookie.domain = value.map(str::to_owned),
        "path" => cookie.path = value.map(str::to_owned),
        "version" => cookie.version = value.map(str::to_owned),
        "secure" => cookie.secure = true,
        "httponly" => cookie.http_only = true,
        "samesite" => {
            cookie.same_site = match value.map(str::to_ascii_lowercase).as_deref() {
                Some("strict") => Some(SameSite::Strict),
                Some("lax") => Some(SameSite::Lax),
                Some("none") => {
                    cookie.secure = true;
                    Some(SameSite::None)
                }
                _ => return false,
            };
        }
        _ => return false,
    }

    true
}

/// Fixed name of the session cookie, shared by every host.
pub(crate) const SESSION_COOKIE_NAME: &str = "LWSSESSION";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_multiple_cookies() {
        let cookies = Cookie::parse_header(b"a=1; b=2; c=3");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies[1].name, "b");
        assert_eq!(cookies[1].value, "2");
    }

    #[test]
    fn header_repeated_session_names() {
        let cookies = Cookie::parse_header(b"LWSSESSION=aaa; LWSSESSION=bbb");
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.name == SESSION_COOKIE_NAME));
    }

    #[test]
    fn set_cookie_with_attributes() {
        let cookie = Cookie::parse_set_cookie(b"session=xyz; Path=/; Secure; HttpOnly").unwrap();
        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
    }

    #[test]
    fn set_cookie_samesite_none_forces_secure() {
        let cookie = Cookie::parse_set_cookie(b"a=1; SameSite=None").unwrap();
        assert_eq!(cookie.same_site, Some(SameSite::None));
        assert!(cookie.secure);
    }

    #[test]
    fn set_cookie_unknown_attribute_rejects() {
        assert_eq!(Cookie::parse_set_cookie(b"a=1; Bogus=yes"), None);
    }

    #[test]
    fn set_cookie_round_trip() {
        let mut cookie = Cookie::new("id", "42");
        cookie.path = Some("/".to_owned());
        cookie.secure = true;
        cookie.http_only = true;

        let rendered = cookie.to_set_cookie();
        let reparsed = Cookie::parse_set_cookie(rendered.as_bytes()).unwrap();
        assert_eq!(cookie, reparsed);
    }

    #[test]
    fn header_empty() {
        assert_eq!(Cookie::parse_header(b""), vec![]);
    }
}
