use crate::common::{ProxyBody, ResponseBuilder, empty};
use crate::config::Config;
use crate::error::ProxyError;
use crate::headers::copy_headers;
use crate::tunnel::ConnectTunnel;
use crate::upstream::{UpstreamConnector, UpstreamDecision, UpstreamSelector};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::HOST;
use hyper::{HeaderMap, Method, Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::time::{Duration, timeout};

/// Relays plain (non-CONNECT) requests to their origin, directly or through
/// the upstream proxy.
///
/// The outbound client never follows redirects: a 3xx from the origin is
/// handed back to the client untouched.
pub struct HttpForwarder {
    client: Client<UpstreamConnector, Incoming>,
    selector: Arc<UpstreamSelector>,
    response_timeout: Duration,
}

impl HttpForwarder {
    pub fn new(selector: Arc<UpstreamSelector>, config: &Config) -> Self {
        let connector = UpstreamConnector::new(selector.clone(), config);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build(connector);

        Self {
            client,
            selector,
            response_timeout: config.response_timeout(),
        }
    }

    pub async fn forward(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        match self.process_request(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Forwarding failed: {}", e);
                ResponseBuilder::from_error(&e)
            }
        }
    }

    async fn process_request(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>, ProxyError> {
        let target_uri = extract_target_uri(&req)?;
        self.log_route(&target_uri);
        let is_head = req.method() == Method::HEAD;

        let (parts, body) = req.into_parts();
        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(target_uri.clone())
            .body(body)
            .map_err(|e| ProxyError::Http(e.to_string()))?;
        copy_headers(&parts.headers, outbound.headers_mut());

        let response = timeout(self.response_timeout, self.client.request(outbound))
            .await
            .map_err(|_| {
                ProxyError::Timeout(format!(
                    "no response from {} within {:?}",
                    target_uri, self.response_timeout
                ))
            })?
            .map_err(|e| ProxyError::Upstream(dispatch_error_text(&e)))?;

        info!("Response: {} for {}", response.status(), target_uri);

        let (parts, body) = response.into_parts();
        let mut headers = HeaderMap::new();
        copy_headers(&parts.headers, &mut headers);

        // Dropping the origin body here releases its connection.
        let body = if is_head {
            empty()
        } else {
            let target = target_uri.to_string();
            body.map_err(move |e| {
                warn!("Error streaming response body from {}: {}", target, e);
                e
            })
            .boxed()
        };

        let mut client_response = Response::new(body);
        *client_response.status_mut() = parts.status;
        *client_response.headers_mut() = headers;
        Ok(client_response)
    }

    /// Logs where `uri` is sent. Pooled connections skip the connector, so
    /// the decision is reported here for every request.
    fn log_route(&self, uri: &Uri) -> Option<UpstreamDecision> {
        let host = uri.authority()?.as_str();
        let decision = self.selector.select(host);
        match &decision {
            UpstreamDecision::Direct => debug!("{}: use no upstream proxy", host),
            UpstreamDecision::ViaProxy(proxy) => debug!("{}: use upstream proxy {}", host, proxy),
        }
        Some(decision)
    }
}

/// The client's error display hides the connector error behind "client error
/// (Connect)"; include the source so the 503 body names the real cause.
fn dispatch_error_text(e: &hyper_util::client::legacy::Error) -> String {
    match std::error::Error::source(e) {
        Some(source) => format!("{}: {}", e, source),
        None => e.to_string(),
    }
}

/// Absolute request targets are used as-is; origin-form targets are
/// completed from the `Host` header.
pub fn extract_target_uri<B>(req: &Request<B>) -> Result<Uri, ProxyError> {
    let original_uri = req.uri();

    if original_uri.scheme().is_some() && original_uri.authority().is_some() {
        return Ok(original_uri.clone());
    }

    let host = req
        .headers()
        .get(HOST)
        .ok_or_else(|| ProxyError::BadRequest(format!("cannot determine target of {}", original_uri)))?;
    let host = host
        .to_str()
        .map_err(|e| ProxyError::BadRequest(format!("Invalid Host header: {}", e)))?;

    let path_and_query = original_uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme("http")
        .authority(host)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::Uri(e.to_string()))
}

/// Top-level dispatch: CONNECT opens a tunnel, every other method is
/// forwarded.
pub struct ForwardProxy {
    forwarder: HttpForwarder,
    tunnel: ConnectTunnel,
}

impl ForwardProxy {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let selector = Arc::new(UpstreamSelector::from_config(config)?);
        let forwarder = HttpForwarder::new(selector, config);
        let tunnel = ConnectTunnel::new(config.dial_timeout());

        Ok(Self { forwarder, tunnel })
    }

    pub async fn route(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        info!("{} {}", req.method(), req.uri());

        if req.method() == Method::CONNECT {
            self.tunnel.handle_connect(req).await
        } else {
            self.forwarder.forward(req).await
        }
    }
}
