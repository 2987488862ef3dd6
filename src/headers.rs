use hyper::HeaderMap;
use hyper::header::{
    CONNECTION, HeaderName, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING,
};
use log::trace;

static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
static PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Hop-by-hop and proxy negotiation headers. Never copied between the
/// client-proxy and proxy-origin segments, in either direction.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == KEEP_ALIVE
        || name == TRANSFER_ENCODING
        || name == TE
        || name == CONNECTION
        || name == TRAILER
        || name == PROXY_AUTHORIZATION
        || name == PROXY_AUTHENTICATE
        || name == PROXY_CONNECTION
}

/// Appends every header of `src` onto `dst`, skipping hop-by-hop headers.
///
/// Repeated headers keep their relative order.
pub fn copy_headers(src: &HeaderMap, dst: &mut HeaderMap) {
    for (name, value) in src.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        trace!("{}: {:?}", name, value);
        dst.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HOST, HeaderValue, LOCATION};

    fn header_map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        headers
    }

    #[test]
    fn test_hop_by_hop_headers_are_dropped() {
        let src = header_map(&[
            ("keep-alive", "timeout=5"),
            ("transfer-encoding", "chunked"),
            ("te", "trailers"),
            ("connection", "keep-alive"),
            ("trailer", "Expires"),
            ("proxy-authorization", "Basic Zm9vOmJhcg=="),
            ("proxy-authenticate", "Basic realm=\"proxy\""),
            ("proxy-connection", "keep-alive"),
            ("host", "example.test"),
        ]);

        let mut dst = HeaderMap::new();
        copy_headers(&src, &mut dst);

        assert_eq!(dst.len(), 1);
        assert_eq!(dst.get(HOST).unwrap(), "example.test");
    }

    #[test]
    fn test_repeated_headers_keep_order() {
        let src = header_map(&[
            ("x-forwarded-for", "10.0.0.1"),
            ("accept", "text/html"),
            ("x-forwarded-for", "10.0.0.2"),
            ("x-forwarded-for", "10.0.0.3"),
        ]);

        let mut dst = HeaderMap::new();
        copy_headers(&src, &mut dst);

        let values: Vec<_> = dst
            .get_all("x-forwarded-for")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(dst.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn test_copy_appends_to_existing_destination() {
        let src = header_map(&[("location", "/next")]);
        let mut dst = header_map(&[("location", "/first")]);

        copy_headers(&src, &mut dst);

        assert_eq!(dst.get_all(LOCATION).iter().count(), 2);
    }

    #[test]
    fn test_upgrade_is_not_in_the_fixed_set() {
        assert!(!is_hop_by_hop(&hyper::header::UPGRADE));
        assert!(is_hop_by_hop(&HeaderName::from_static("proxy-connection")));
    }
}
