use crate::config::Config;
use crate::error::ProxyError;
use hyper::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use std::collections::BTreeSet;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tower::Service;
use url::Url;

/// Where an outbound request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamDecision {
    Direct,
    ViaProxy(Url),
}

/// Parses an upstream proxy address. Bare `host:port` means `http://host:port`.
pub fn parse_proxy_url(addr: &str) -> Result<Url, ProxyError> {
    let url = if addr.contains("://") {
        Url::parse(addr)?
    } else {
        Url::parse(&format!("http://{}", addr))?
    };

    if url.scheme() != "http" {
        return Err(ProxyError::Config(format!(
            "Unsupported upstream proxy scheme '{}', only http is supported",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ProxyError::Config(format!("Upstream proxy address {} has no host", addr)));
    }

    Ok(url)
}

/// Exact-match exclusion check. `host` is compared as written, port included,
/// so `orf.at:80` and `news.orf.at` are not matched by an `orf.at` entry.
pub fn select_route(host: &str, excluded_hosts: &BTreeSet<String>, upstream: &Url) -> UpstreamDecision {
    if excluded_hosts.contains(host) {
        UpstreamDecision::Direct
    } else {
        UpstreamDecision::ViaProxy(upstream.clone())
    }
}

/// Per-request routing policy built from the resolved [`Config`].
#[derive(Debug, Clone)]
pub struct UpstreamSelector {
    upstream: Option<Url>,
    excluded_hosts: BTreeSet<String>,
}

impl UpstreamSelector {
    pub fn new(upstream: Option<Url>, excluded_hosts: BTreeSet<String>) -> Self {
        Self {
            upstream,
            excluded_hosts,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        let upstream = config
            .upstream_proxy
            .as_deref()
            .map(parse_proxy_url)
            .transpose()?;
        Ok(Self::new(upstream, config.excluded_hosts.clone()))
    }

    /// Without an upstream proxy every request goes direct and the
    /// exclusion list is never consulted.
    pub fn select(&self, host: &str) -> UpstreamDecision {
        match &self.upstream {
            Some(upstream) => select_route(host, &self.excluded_hosts, upstream),
            None => UpstreamDecision::Direct,
        }
    }
}

/// Connection handed to the outbound client.
///
/// Marks itself as proxied when it leads to the upstream proxy, which makes
/// the client write absolute-form request targets.
pub struct UpstreamStream {
    io: TokioIo<TcpStream>,
    via_proxy: bool,
}

impl Connection for UpstreamStream {
    fn connected(&self) -> Connected {
        self.io.connected().proxy(self.via_proxy)
    }
}

impl Read for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl Write for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write_vectored(cx, bufs)
    }
}

/// Outbound connector that consults the [`UpstreamSelector`] for each new
/// connection and dials either the origin or the upstream proxy.
#[derive(Clone)]
pub struct UpstreamConnector {
    http: HttpConnector,
    selector: Arc<UpstreamSelector>,
}

impl UpstreamConnector {
    pub fn new(selector: Arc<UpstreamSelector>, config: &Config) -> Self {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(config.upstream_connect_timeout()));
        http.set_keepalive(config.tcp_keepalive());
        http.set_nodelay(true);

        Self { http, selector }
    }

    fn resolve(&self, dst: &Uri) -> Result<(Uri, bool), ProxyError> {
        if dst.scheme_str() != Some("http") {
            return Err(ProxyError::Upstream(format!(
                "unsupported protocol scheme in {}",
                dst
            )));
        }
        let host = dst
            .authority()
            .map(|a| a.as_str())
            .ok_or_else(|| ProxyError::Upstream(format!("no host in request URL {}", dst)))?;

        match self.selector.select(host) {
            UpstreamDecision::Direct => Ok((dst.clone(), false)),
            UpstreamDecision::ViaProxy(proxy) => {
                let proxy_uri = proxy
                    .as_str()
                    .parse::<Uri>()
                    .map_err(|e| ProxyError::Uri(e.to_string()))?;
                Ok((proxy_uri, true))
            }
        }
    }
}

impl Service<Uri> for UpstreamConnector {
    type Response = UpstreamStream;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<UpstreamStream, ProxyError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http
            .poll_ready(cx)
            .map_err(|e| ProxyError::Connection(e.to_string()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let resolved = self.resolve(&dst);
        let mut http = self.http.clone();

        Box::pin(async move {
            let (target, via_proxy) = resolved?;
            let io = http
                .call(target.clone())
                .await
                .map_err(|e| ProxyError::Connection(format!("dial {}: {}", target, e)))?;
            Ok(UpstreamStream { io, via_proxy })
        })
    }
}
