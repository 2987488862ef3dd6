use crate::error::ProxyError;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Response, StatusCode};

/// Body type of every response the proxy writes back to a client.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Response builder utilities shared by the forwarding and tunnel handlers
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Empty response with the given status
    pub fn empty(status: StatusCode) -> Response<ProxyBody> {
        let mut response = Response::new(empty());
        *response.status_mut() = status;
        response
    }

    /// Plain-text response carrying `message` as its body
    pub fn error(status: StatusCode, message: &str) -> Response<ProxyBody> {
        let mut response = Response::new(full(format!("{}\n", message)));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Maps a failed request onto the status its error class calls for
    pub fn from_error(error: &ProxyError) -> Response<ProxyBody> {
        Self::error(error.status_code(), &error.to_string())
    }
}
