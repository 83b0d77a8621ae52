//! HTTP method as a typed enum.
//!
//! Only the methods an endpoint can be declared with. Inbound requests
//! carrying any other method never match a route and fall through to the
//! not-found stage.

use std::fmt;
use std::str::FromStr;

/// A declarable HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get    => "GET",
            Self::Post   => "POST",
            Self::Put    => "PUT",
            Self::Patch  => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub(crate) fn from_http(method: &http::Method) -> Option<Self> {
        match *method {
            http::Method::GET    => Some(Self::Get),
            http::Method::POST   => Some(Self::Post),
            http::Method::PUT    => Some(Self::Put),
            http::Method::PATCH  => Some(Self::Patch),
            http::Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET"    => Ok(Self::Get),
            "POST"   => Ok(Self::Post),
            "PUT"    => Ok(Self::Put),
            "PATCH"  => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _        => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for http::Method {
    fn from(m: Method) -> http::Method {
        match m {
            Method::Get    => http::Method::GET,
            Method::Post   => http::Method::POST,
            Method::Put    => http::Method::PUT,
            Method::Patch  => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
        }
    }
}
