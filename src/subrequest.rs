//! Subrequest Fetcher
//!
//! Builds the outbound GET for an `esi:include` and interprets the reply.
//! The call itself goes through Envoy's `dispatch_http_call`, which needs an
//! explicit authority and path, so include URLs are resolved here against
//! the request being served, using the `url` crate.
//!
//! No retry and no status validation: a non-2xx body is still spliced in.
//! Redirects are followed by the caller, up to a configured limit.

use url::Url;

/// Redirect statuses that carry a `location` worth following
const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Sub-request failures. Each one aborts translation of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Envoy refused to dispatch the call (unknown cluster, bad headers)
    Dispatch(String),
    /// The call completed without a response (reset, timeout)
    NoResponse,
    /// Redirect chain longer than allowed
    TooManyRedirects(u32),
    /// URL could not be turned into a request
    InvalidUrl(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Dispatch(e) => write!(f, "Dispatch failed: {}", e),
            FetchError::NoResponse => write!(f, "No response"),
            FetchError::TooManyRedirects(n) => write!(f, "Too many redirects ({})", n),
            FetchError::InvalidUrl(url) => write!(f, "Invalid URL: '{}'", url),
        }
    }
}

/// Where a sub-request goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubrequestTarget {
    url: Url,
    pub scheme: String,
    /// `host[:port]`, never userinfo
    pub authority: String,
    /// Path including any query string
    pub path: String,
}

impl SubrequestTarget {
    /// Target for the request being served, from its pseudo-headers
    pub fn new(scheme: &str, authority: &str, path: &str) -> Result<Self, FetchError> {
        let raw = format!("{}://{}{}", scheme, authority, path);
        let url = Url::parse(&raw).map_err(|_| FetchError::InvalidUrl(raw.clone()))?;
        Self::from_url(url).ok_or(FetchError::InvalidUrl(raw))
    }

    /// Resolve `target` against `base`, the request being served.
    ///
    /// Absolute URLs need no base; relative ones fail without it. Dot
    /// segments are normalised and fragments dropped.
    pub fn resolve(base: Option<&SubrequestTarget>, target: &str) -> Result<Self, FetchError> {
        let target = target.trim();
        let invalid = || FetchError::InvalidUrl(target.to_string());

        if target.is_empty() {
            return Err(invalid());
        }

        let parsed = match base {
            Some(base) => base.url.join(target),
            None => Url::parse(target),
        }
        .map_err(|_| invalid())?;

        Self::from_url(parsed).ok_or_else(invalid)
    }

    fn from_url(mut url: Url) -> Option<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        url.set_fragment(None);

        let host = url.host_str().filter(|h| !h.is_empty())?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        Some(Self {
            scheme: url.scheme().to_string(),
            authority,
            path,
            url,
        })
    }

    /// Full URL, for logs
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Pseudo and regular headers for `dispatch_http_call`
    pub fn headers<'a>(&'a self, user_agent: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            (":method", "GET"),
            (":scheme", self.scheme.as_str()),
            (":authority", self.authority.as_str()),
            (":path", self.path.as_str()),
            ("user-agent", user_agent),
            ("accept", "*/*"),
        ]
    }
}

/// Interpretation of a completed sub-request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Body text to splice in
    Body(String),
    /// Follow this `location`
    Redirect(String),
}

impl FetchOutcome {
    /// Classify a reply from its `:status`, `location` and body
    pub fn from_response(
        status: Option<u16>,
        location: Option<String>,
        body: Option<Vec<u8>>,
    ) -> Result<Self, FetchError> {
        let status = status.ok_or(FetchError::NoResponse)?;

        if REDIRECT_STATUSES.contains(&status) {
            if let Some(location) = location.filter(|l| !l.is_empty()) {
                return Ok(FetchOutcome::Redirect(location));
            }
        }

        let body = body.unwrap_or_default();
        Ok(FetchOutcome::Body(String::from_utf8_lossy(&body).into_owned()))
    }
}
