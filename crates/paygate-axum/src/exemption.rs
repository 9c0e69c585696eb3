//! First-party origins that may use priced routes without paying.
//!
//! The check is evaluated before anything else in the gate and never performs I/O.
//! `Origin` must equal an allow-listed value byte for byte. When it does not, the
//! origin of the `Referer` URL (`scheme://host[:port]`) is tested against the same list.

use http::HeaderMap;
use http::header::{ORIGIN, REFERER};
use url::Url;

/// Fixed allow-list of exempt origins, e.g. `https://app.example.com`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExemptOrigins {
    origins: Vec<String>,
}

impl ExemptOrigins {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    fn contains(&self, origin: &str) -> bool {
        self.origins.iter().any(|allowed| allowed == origin)
    }

    /// Decides exemption from raw `Origin` and `Referer` header values.
    pub fn is_exempt(&self, origin: Option<&str>, referer: Option<&str>) -> bool {
        if origin.is_some_and(|origin| self.contains(origin)) {
            return true;
        }
        let Some(referer) = referer else {
            return false;
        };
        match Url::parse(referer) {
            Ok(url) => {
                let referer_origin = url.origin();
                referer_origin.is_tuple() && self.contains(&referer_origin.ascii_serialization())
            }
            Err(err) => {
                tracing::debug!(referer, error = %err, "Ignoring unparseable Referer");
                false
            }
        }
    }

    /// Same as [`ExemptOrigins::is_exempt`], reading both headers from a request.
    ///
    /// A header whose value is not valid UTF-8 is treated as absent.
    pub fn is_exempt_request(&self, headers: &HeaderMap) -> bool {
        if self.is_empty() {
            return false;
        }
        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        let referer = headers.get(REFERER).and_then(|v| v.to_str().ok());
        self.is_exempt(origin, referer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn exempt() -> ExemptOrigins {
        ExemptOrigins::new(["https://app.example.com", "http://localhost:3000"])
    }

    #[test]
    fn origin_must_match_exactly() {
        let exempt = exempt();
        assert!(exempt.is_exempt(Some("https://app.example.com"), None));
        assert!(exempt.is_exempt(Some("http://localhost:3000"), None));
        assert!(!exempt.is_exempt(Some("https://app.example.com/"), None));
        assert!(!exempt.is_exempt(Some("https://app.example.com.evil.io"), None));
        assert!(!exempt.is_exempt(Some("https://evil.io/https://app.example.com"), None));
        assert!(!exempt.is_exempt(Some("http://localhost"), None));
    }

    #[test]
    fn referer_is_reduced_to_its_origin() {
        let exempt = exempt();
        assert!(exempt.is_exempt(None, Some("https://app.example.com/dashboard?tab=1")));
        assert!(exempt.is_exempt(None, Some("http://localhost:3000/page")));
        assert!(!exempt.is_exempt(None, Some("http://localhost:4000/page")));
        assert!(!exempt.is_exempt(None, Some("https://app.example.com.evil.io/x")));
    }

    #[test]
    fn default_port_is_elided_from_referer_origin() {
        let exempt = ExemptOrigins::new(["https://app.example.com"]);
        assert!(exempt.is_exempt(None, Some("https://app.example.com:443/x")));
    }

    #[test]
    fn referer_is_consulted_when_origin_does_not_match() {
        assert!(exempt().is_exempt(
            Some("https://other.example.com"),
            Some("https://app.example.com/")
        ));
    }

    #[test]
    fn malformed_or_missing_headers_do_not_exempt() {
        let exempt = exempt();
        assert!(!exempt.is_exempt(None, None));
        assert!(!exempt.is_exempt(None, Some("not a url")));
        assert!(!exempt.is_exempt(None, Some("")));
        assert!(!exempt.is_exempt(Some(""), Some("data:text/plain,hello")));
    }

    #[test]
    fn empty_allow_list_exempts_nothing() {
        let exempt = ExemptOrigins::default();
        assert!(!exempt.is_exempt(Some("https://app.example.com"), None));
    }

    #[test]
    fn reads_request_headers() {
        let exempt = exempt();
        let mut headers = HeaderMap::new();
        assert!(!exempt.is_exempt_request(&headers));

        headers.insert(REFERER, HeaderValue::from_static("https://app.example.com/a"));
        assert!(exempt.is_exempt_request(&headers));

        let mut opaque = HeaderMap::new();
        opaque.insert(ORIGIN, HeaderValue::from_bytes(b"https://app.example.com\xff").unwrap());
        assert!(!exempt.is_exempt_request(&opaque));
    }
}
