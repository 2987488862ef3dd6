use crate::common::{ProxyBody, ResponseBuilder};
use crate::deadline::DeadlineSwitch;
use crate::error::ProxyError;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_util::io::InspectWriter;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONNECT_PORT: u16 = 443;

/// CONNECT handler: dials the requested `host:port`, acknowledges the client,
/// then splices the upgraded client connection onto the origin socket.
pub struct ConnectTunnel {
    dial_timeout: Duration,
}

impl ConnectTunnel {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }

    pub async fn handle_connect<B>(&self, mut req: Request<B>) -> Response<ProxyBody> {
        let (host, port) = match connect_target(&req) {
            Ok(target) => target,
            Err(e) => {
                warn!("Rejecting CONNECT {}: {}", req.uri(), e);
                return ResponseBuilder::from_error(&e);
            }
        };
        info!("CONNECT {}:{}", host, port);

        let origin = match self.dial(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{}", e);
                return ResponseBuilder::from_error(&e);
            }
        };

        // The connection can only be taken over if the serving transport
        // registered an upgrade for this request.
        let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
            warn!("CONNECT {}:{}: connection cannot be hijacked", host, port);
            return ResponseBuilder::from_error(&ProxyError::UpgradeUnavailable);
        };

        let deadlines = req.extensions_mut().remove::<DeadlineSwitch>();
        let target = format!("{}:{}", host, port);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    // tunnels stay open as long as both peers keep them open
                    if let Some(deadlines) = deadlines {
                        deadlines.disarm();
                    }
                    relay(upgraded, origin, target).await
                }
                Err(e) => warn!("Failed to upgrade connection for {}: {}", target, e),
            }
        });

        // 200 goes out first; the upgrade resolves once it has been written.
        ResponseBuilder::empty(StatusCode::OK)
    }

    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, ProxyError> {
        let addr = (host.trim_start_matches('[').trim_end_matches(']'), port);
        match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ProxyError::Connection(format!(
                "dial tcp {}:{}: {}",
                host, port, e
            ))),
            Err(_) => Err(ProxyError::Connection(format!(
                "dial tcp {}:{}: i/o timeout",
                host, port
            ))),
        }
    }
}

/// Splits the CONNECT authority into host and port, defaulting to 443.
pub fn connect_target<B>(req: &Request<B>) -> Result<(String, u16), ProxyError> {
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::BadRequest(format!("invalid CONNECT target {}", req.uri())))?;

    Ok((
        authority.host().to_string(),
        authority.port_u16().unwrap_or(DEFAULT_CONNECT_PORT),
    ))
}

/// Runs the two relay directions as independent tasks until both end.
///
/// Whichever direction finishes first cancels the other, so one side
/// disconnecting tears down the whole tunnel.
pub async fn relay(upgraded: Upgraded, origin: TcpStream, target: String) {
    let (client_read, client_write) = tokio::io::split(TokioIo::new(upgraded));
    let (origin_read, origin_write) = origin.into_split();
    let closed = CancellationToken::new();

    let client_to_origin = tokio::spawn(transfer(client_read, origin_write, closed.clone()));
    let origin_to_client = tokio::spawn(transfer(origin_read, client_write, closed));

    let (sent, received) = tokio::join!(client_to_origin, origin_to_client);
    info!(
        "Tunnel to {} closed: {} bytes sent, {} bytes received",
        target,
        sent.unwrap_or(0),
        received.unwrap_or(0)
    );
}

/// Copies `source` into `destination` until EOF, an error, or cancellation,
/// then shuts `destination` down and drops both ends.
///
/// Returns the number of bytes written to `destination`, however the copy
/// ended.
pub async fn transfer<R, W>(mut source: R, destination: W, closed: CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut relayed = 0u64;
    let mut destination =
        InspectWriter::new(destination, |chunk: &[u8]| relayed += chunk.len() as u64);

    tokio::select! {
        result = tokio::io::copy(&mut source, &mut destination) => {
            if let Err(e) = result {
                debug!("Tunnel transfer ended with error: {}", e);
            }
        }
        _ = closed.cancelled() => {}
    }

    closed.cancel();
    if let Err(e) = destination.shutdown().await {
        debug!("Tunnel shutdown error: {}", e);
    }
    drop(destination);
    relayed
}
