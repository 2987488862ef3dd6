use crate::config::Config;
use crate::deadline::DeadlineStream;
use crate::error::ProxyError;
use crate::forward_proxy::ForwardProxy;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, info, warn};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Listening side of the proxy: accepts connections and serves each one on
/// its own task through the shared [`ForwardProxy`].
pub struct ProxyServer {
    listener: TcpListener,
    router: Arc<ForwardProxy>,
    read_header_timeout: Duration,
    idle_timeout: Duration,
    write_timeout: Duration,
}

impl ProxyServer {
    pub async fn bind(config: Config) -> Result<Self, ProxyError> {
        config.validate()?;

        info!("Binding proxy listener to: {}", config.listen_addr);
        let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
        let router = Arc::new(ForwardProxy::new(&config)?);

        match config.upstream_proxy.as_deref() {
            Some(upstream) => info!(
                "Upstream proxy {} (excluded hosts: {:?})",
                upstream, config.excluded_hosts
            ),
            None => info!("No upstream proxy configured, all requests go direct"),
        }

        Ok(Self {
            listener,
            router,
            read_header_timeout: config.read_header_timeout(),
            idle_timeout: config.idle_timeout(),
            write_timeout: config.write_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `shutdown` resolves. Stopping only closes the listener;
    /// connections and tunnels already in flight run to completion.
    ///
    /// Client connections are closed after `idle_timeout` without traffic or
    /// when a response write stays blocked for `write_timeout`.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        info!("HTTP forward proxy listening on: http://{}", addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Proxy listener on {} closed", addr);
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };

            debug!("Connection established from: {}", remote_addr);
            let router = self.router.clone();
            let read_header_timeout = self.read_header_timeout;
            let io = DeadlineStream::new(stream, self.idle_timeout, self.write_timeout);

            tokio::spawn(async move {
                // A CONNECT handler disarms the deadlines before relaying.
                let deadlines = io.switch();
                let service = service_fn(move |mut req: Request<Incoming>| {
                    req.extensions_mut().insert(deadlines.clone());
                    let router = router.clone();
                    async move { Ok::<_, Infallible>(router.route(req).await) }
                });

                if let Err(e) = ServerBuilder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(read_header_timeout)
                    .title_case_headers(true)
                    .serve_connection(TokioIo::new(io), service)
                    .with_upgrades()
                    .await
                {
                    warn!("Error serving connection from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Serves on a background task and returns a handle to stop it.
    pub fn start(self) -> Result<ServerHandle, ProxyError> {
        let local_addr = self.local_addr()?;
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(self.run_until(async move { signal.cancelled().await }));

        Ok(ServerHandle {
            local_addr,
            shutdown,
            task,
        })
    }
}

/// Handle to a proxy started with [`ProxyServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), ProxyError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting new connections and waits for the accept loop to exit.
    pub async fn close(self) -> Result<(), ProxyError> {
        self.shutdown.cancel();
        self.task
            .await
            .map_err(|e| ProxyError::Hyper(format!("Server task error: {}", e)))?
    }
}
