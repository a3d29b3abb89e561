use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::account::set::TimedUserSet;
use crate::core::channel::Pop;
use crate::core::node::{Listener, ListenerConstructor, Node};
use crate::core::relay::{close_after_both, pump_input, pump_output};
use crate::cryption::{CfbDecryptor, CfbEncryptor, DecryptingReader, EncryptingWriter};
use crate::error::{ProxyError, Result};

use super::config::MaskListenerConfig;
use super::wire::{decode_request, response_key_iv};

/// The custom obfuscated inbound protocol (SPEC_FULL.md §4.1). Holds the
/// time-rotating user set that lets it identify a presenting client from
/// its request's 16-byte user hash alone, without a handshake.
pub struct MaskListener {
    user_set: Arc<TimedUserSet>,
}

pub struct MaskListenerConstructor;

impl ListenerConstructor for MaskListenerConstructor {
    fn create(&self, config_file: &str) -> Result<Arc<dyn Listener>> {
        let config: MaskListenerConfig = crate::config::load_json(config_file)?;
        let users = config.into_users()?;
        let user_set = TimedUserSet::new(users);
        Ok(Arc::new(MaskListener { user_set }))
    }
}

#[async_trait]
impl Listener for MaskListener {
    async fn listen(self: Arc<Self>, node: Weak<Node>, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(port, "mask listener bound");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let this = Arc::clone(&self);
                    let node = node.clone();
                    tokio::spawn(async move {
                        if let Err(err) = this.handle_connection(stream, node).await {
                            tracing::warn!(%peer, error = %err, "mask connection dropped");
                        }
                    });
                }
                Err(err) => tracing::warn!(error = %err, "mask accept failed"),
            }
        }
    }
}

impl MaskListener {
    #[cfg(test)]
    pub(crate) fn new_for_test(user_set: Arc<TimedUserSet>) -> Self {
        Self { user_set }
    }

    pub(crate) async fn handle_connection(&self, stream: TcpStream, node: Weak<Node>) -> Result<()> {
        let (mut read_half, write_half) = stream.into_split();

        // A miss here (`InvalidUser`) returns before any bytes are written
        // back, and before the destination is ever dialed.
        let (_user, request, _header_dec) = decode_request(&mut read_half, &self.user_set).await?;
        tracing::debug!(dest = %request.dest, "mask request decoded");

        let node = node
            .upgrade()
            .ok_or_else(|| ProxyError::Config("node dropped before accept".into()))?;
        let channel = node.accept_connection(request.dest.clone());

        // The forward payload is a distinct CFB stream keyed by
        // `(request_key, request_iv)`, not a continuation of the header's
        // command-key stream: the caller encrypts it that way (see
        // `mask::caller`), and it must be decrypted the same way here.
        let payload_dec = CfbDecryptor::new(&request.request_key, &request.request_iv);
        let dec_reader = DecryptingReader::new(read_half, payload_dec);
        let in_task = tokio::spawn(pump_input(dec_reader, channel.forward.clone()));

        let (key, iv) = response_key_iv(&request.request_key, &request.request_iv);
        let mut enc = CfbEncryptor::new(&key, &iv);
        let mut first = request.response_header.to_vec();
        if let Pop::Chunk(chunk) = channel.backward.pop().await {
            first.extend_from_slice(&chunk);
        }
        enc.encrypt_in_place(&mut first);

        let mut write_half = write_half;
        write_half.write_all(&first).await?;

        let enc_writer = EncryptingWriter::new(write_half, enc);
        let out_task = tokio::spawn(pump_output(enc_writer, channel.backward.clone()));

        close_after_both(in_task, out_task).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::net::TcpListener;

    use crate::account::id::UserId;
    use crate::account::user::User;
    use crate::config::{EndConfig, NodeConfig};
    use crate::core::channel::{FullDuplexChannel, Pop};
    use crate::core::node::{Caller, Node};
    use crate::identical::IdenticalCaller;
    use crate::mask::caller::MaskCaller;
    use crate::mask::config::NextNode;
    use crate::network::address::Address;
    use crate::network::destination::{Destination, Transport};

    use super::*;

    /// A bare TCP echo server: every byte read is written straight back.
    /// Stands in for the S1 scenario's origin server.
    async fn spawn_echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let (mut r, mut w) = stream.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr
    }

    /// Binds a `MaskListener` to an ephemeral port, driving `handle_connection`
    /// directly on every accepted socket instead of the real `listen` loop
    /// (which never returns), and hands its destination caller an
    /// `IdenticalCaller` so a decoded request dials straight through to the
    /// plain TCP destination it names.
    async fn spawn_mask_node(user_set: Arc<TimedUserSet>) -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let node = Arc::new(Node {
            caller: Arc::new(IdenticalCaller) as Arc<dyn Caller>,
            config: NodeConfig {
                listener: EndConfig { protocol: "mask".into(), config: String::new() },
                caller: EndConfig { protocol: "identical".into(), config: String::new() },
                port,
            },
        });
        let mask_listener = Arc::new(MaskListener::new_for_test(user_set));

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let mask_listener = Arc::clone(&mask_listener);
                let node = Arc::downgrade(&node);
                tokio::spawn(async move {
                    let _ = mask_listener.handle_connection(stream, node).await;
                });
            }
        });
        port
    }

    /// End-to-end round trip over real TCP sockets: a mask caller dials a
    /// mask listener sitting in front of an identical caller, which in turn
    /// dials a plain TCP echo server -- the same three-protocol shape as
    /// SPEC_FULL.md §8's S1 scenario, minus the SOCKS5 ingress hop (covered
    /// separately by `socks::listener`'s own tests).
    #[tokio::test]
    async fn mask_round_trip_through_identical_caller() {
        let id = UserId::parse("2418d087-648d-4990-86e8-19dca1d006d3").unwrap();
        let user = User::new(id.clone());
        let user_set = TimedUserSet::new_for_test(vec![user.clone()]);

        let echo_addr = spawn_echo_server().await;
        let mask_port = spawn_mask_node(user_set).await;

        let next_node = NextNode {
            address: "127.0.0.1".into(),
            port: mask_port,
            users: vec![Arc::new(user)],
        };
        let caller = Arc::new(MaskCaller::new_for_test(vec![next_node])) as Arc<dyn Caller>;

        let dest = Destination::new(
            Address::Ipv4(Ipv4Addr::new(127, 0, 0, 1)),
            echo_addr.port(),
            Transport::Tcp,
        );

        let channel = FullDuplexChannel::new();
        let driver_channel = channel.clone();
        tokio::spawn(async move {
            let _ = caller.call(driver_channel, dest).await;
        });

        channel.forward.push(b"hello mask".to_vec()).await;
        channel.forward.push(b" tunnel".to_vec()).await;
        channel.forward.close();

        let mut received = Vec::new();
        loop {
            match channel.backward.pop().await {
                Pop::Chunk(chunk) => {
                    received.extend_from_slice(&chunk);
                    if received.len() >= b"hello mask tunnel".len() {
                        break;
                    }
                }
                Pop::Closed => break,
            }
        }
        assert_eq!(received, b"hello mask tunnel");
    }
}
