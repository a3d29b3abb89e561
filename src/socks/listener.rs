use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::core::node::{Listener, ListenerConstructor, Node};
use crate::core::relay::{close_after_both, pump_input, pump_output};
use crate::error::{ProxyError, Result};

use super::config::{AuthMethod, SocksListenerConfig};
use super::wire;

/// RFC 1928 server: method negotiation, optional (placeholder) user/pass,
/// destination request, CONNECT only. BIND and UDP ASSOCIATE are parsed far
/// enough to stay in sync with the stream, then rejected.
pub struct SocksListener {
    config: SocksListenerConfig,
}

pub struct SocksListenerConstructor;

impl ListenerConstructor for SocksListenerConstructor {
    fn create(&self, config_file: &str) -> Result<Arc<dyn Listener>> {
        let config = SocksListenerConfig::load(config_file)?;
        Ok(Arc::new(SocksListener { config }))
    }
}

#[async_trait]
impl Listener for SocksListener {
    async fn listen(self: Arc<Self>, node: Weak<Node>, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "socks5 listener bound");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let this = Arc::clone(&self);
                    let node = node.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.handle_connection(stream, node).await {
                            tracing::warn!(%peer, error = %err, "socks5 connection dropped");
                        }
                    });
                }
                Err(err) => tracing::warn!(error = %err, "socks5 accept failed"),
            }
        }
    }
}

impl SocksListener {
    async fn handle_connection(&self, stream: TcpStream, node: Weak<Node>) -> Result<()> {
        let (mut read_half, mut write_half) = stream.into_split();

        let methods = wire::read_methods(&mut read_half).await?;
        let wanted = match self.config.auth {
            AuthMethod::NoAuth => wire::AUTH_NO_AUTH,
            AuthMethod::UserPass => wire::AUTH_USERPASS,
        };
        let selected = if methods.contains(&wanted) { wanted } else { wire::AUTH_NO_ACCEPTABLE };
        wire::write_method_selection(&mut write_half, selected).await?;
        if selected == wire::AUTH_NO_ACCEPTABLE {
            return Err(ProxyError::MalformedRequest("no acceptable socks5 auth method".into()));
        }

        if matches!(self.config.auth, AuthMethod::UserPass) {
            let (_username, _password) = wire::read_userpass(&mut read_half).await?;
            // Verifier is a placeholder that always succeeds (DESIGN.md open question (a)).
            wire::write_userpass_status(&mut write_half, true).await?;
        }

        let (command, dest) = wire::read_request(&mut read_half).await?;
        if command != wire::CMD_CONNECT {
            wire::write_reply(&mut write_half, wire::STATUS_COMMAND_NOT_SUPPORTED, &dest).await?;
            return Err(ProxyError::MalformedRequest(format!("unsupported socks5 command {command:#x}")));
        }
        wire::write_reply(&mut write_half, wire::STATUS_SUCCEEDED, &dest).await?;
        tracing::debug!(dest = %dest, "socks5 destination accepted");

        let node = node
            .upgrade()
            .ok_or_else(|| ProxyError::Config("node dropped before accept".into()))?;
        let channel = node.accept_connection(dest);

        let in_task = tokio::spawn(pump_input(read_half, channel.forward.clone()));
        let out_task = tokio::spawn(pump_output(write_half, channel.backward.clone()));
        close_after_both(in_task, out_task).await;
        Ok(())
    }
}
