//! HTTP status codes as a typed enum.
//!
//! Each terminal method on [`Send`](crate::Send) maps to exactly one
//! [`Status`] variant, so this enum is the complete set of codes the
//! envelope can put on the wire. The status is always set explicitly,
//! never left to a default.

/// A status code the response envelope can produce.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    // ── 2xx Success ───────────────────────────────────────────────────────────
    Ok,                  // 200
    Created,             // 201
    Accepted,            // 202
    NoContent,           // 204
    PartialContent,      // 206

    // ── 3xx Redirection ───────────────────────────────────────────────────────
    MovedPermanently,    // 301
    Found,               // 302
    NotModified,         // 304

    // ── 4xx Client errors ─────────────────────────────────────────────────────
    BadRequest,          // 400
    Unauthorized,        // 401
    Forbidden,           // 403
    NotFound,            // 404
    MethodNotAllowed,    // 405

    // ── 5xx Server errors ─────────────────────────────────────────────────────
    InternalServerError, // 500
    NotImplemented,      // 501
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        match s {
            Status::Ok                  => 200,
            Status::Created             => 201,
            Status::Accepted            => 202,
            Status::NoContent           => 204,
            Status::PartialContent      => 206,
            Status::MovedPermanently    => 301,
            Status::Found               => 302,
            Status::NotModified         => 304,
            Status::BadRequest          => 400,
            Status::Unauthorized        => 401,
            Status::Forbidden           => 403,
            Status::NotFound            => 404,
            Status::MethodNotAllowed    => 405,
            Status::InternalServerError => 500,
            Status::NotImplemented      => 501,
        }
    }
}

impl From<Status> for http::StatusCode {
    fn from(s: Status) -> http::StatusCode {
        match s {
            Status::Ok                  => http::StatusCode::OK,
            Status::Created             => http::StatusCode::CREATED,
            Status::Accepted            => http::StatusCode::ACCEPTED,
            Status::NoContent           => http::StatusCode::NO_CONTENT,
            Status::PartialContent      => http::StatusCode::PARTIAL_CONTENT,
            Status::MovedPermanently    => http::StatusCode::MOVED_PERMANENTLY,
            Status::Found               => http::StatusCode::FOUND,
            Status::NotModified         => http::StatusCode::NOT_MODIFIED,
            Status::BadRequest          => http::StatusCode::BAD_REQUEST,
            Status::Unauthorized        => http::StatusCode::UNAUTHORIZED,
            Status::Forbidden           => http::StatusCode::FORBIDDEN,
            Status::NotFound            => http::StatusCode::NOT_FOUND,
            Status::MethodNotAllowed    => http::StatusCode::METHOD_NOT_ALLOWED,
            Status::InternalServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
            Status::NotImplemented      => http::StatusCode::NOT_IMPLEMENTED,
        }
    }
}
