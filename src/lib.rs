pub mod config;
pub mod forward_proxy;
pub mod tunnel;
pub mod proxy;
pub mod error;
pub mod headers;
pub mod upstream;
pub mod logging;
pub mod common;
pub mod deadline;

pub use config::Config;
pub use error::ProxyError;
pub use forward_proxy::ForwardProxy;
pub use proxy::{ProxyServer, ServerHandle};
pub use upstream::{UpstreamDecision, UpstreamSelector};
