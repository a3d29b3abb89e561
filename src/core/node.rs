use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::network::destination::Destination;

use super::channel::FullDuplexChannel;
use super::registry::{caller_constructor, listener_constructor};

/// An inbound protocol handler bound to a TCP port. Constructed once at
/// startup; `listen` runs for the process lifetime, accepting connections
/// and handing each one a fresh channel via `node.accept_connection`.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn listen(self: Arc<Self>, node: Weak<Node>, port: u16) -> Result<()>;
}

/// Builds a concrete `Listener` from its protocol-specific config file.
/// Mirrors the reference implementation's synchronous `Create`.
pub trait ListenerConstructor: Send + Sync {
    fn create(&self, config_file: &str) -> Result<Arc<dyn Listener>>;
}

/// An outbound protocol driver. `call` dials the next hop (or the final
/// destination) and bridges it to `channel`'s forward/backward pipes.
#[async_trait]
pub trait Caller: Send + Sync {
    async fn call(self: Arc<Self>, channel: FullDuplexChannel, dest: Destination) -> Result<()>;
}

pub trait CallerConstructor: Send + Sync {
    fn create(&self, config_file: &str) -> Result<Arc<dyn Caller>>;
}

/// A node pairs one caller with the config needed to accept connections on
/// its listener's port. The listener itself is not stored on `Node` (that
/// would require a reference cycle); instead `main` holds both and calls
/// `node.start(listener)`.
pub struct Node {
    pub caller: Arc<dyn Caller>,
    pub config: NodeConfig,
}

impl Node {
    /// Look up both protocol constructors by name, build the caller, and
    /// return the node plus the still-unstarted listener. Fails with
    /// `UnknownProtocol` if either name has no registered constructor.
    pub fn new(config: NodeConfig) -> Result<(Arc<Node>, Arc<dyn Listener>)> {
        let caller_ctor = caller_constructor(&config.caller.protocol)?;
        let caller = caller_ctor.create(&config.caller.config)?;

        let listener_ctor = listener_constructor(&config.listener.protocol)?;
        let listener = listener_ctor.create(&config.listener.config)?;

        let node = Arc::new(Node { caller, config });
        Ok((node, listener))
    }

    /// Open a fresh channel for a newly accepted connection, spawn the
    /// caller to dial `dest` and bridge it to the channel, and return the
    /// channel so the listener can feed its forward pipe and drain its
    /// backward pipe.
    pub fn accept_connection(self: &Arc<Self>, dest: Destination) -> FullDuplexChannel {
        let channel = FullDuplexChannel::new();
        let caller = Arc::clone(&self.caller);
        let caller_channel = channel.clone();
        tokio::spawn(async move {
            if let Err(err) = caller.call(caller_channel, dest).await {
                tracing::warn!(error = %err, "caller failed");
            }
        });
        channel
    }

    pub async fn start(self: &Arc<Self>, listener: Arc<dyn Listener>) -> Result<()> {
        listener.listen(Arc::downgrade(self), self.config.port).await
    }
}
