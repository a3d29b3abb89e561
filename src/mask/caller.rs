use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::account::User;
use crate::core::channel::{FullDuplexChannel, Pop};
use crate::core::node::{Caller, CallerConstructor};
use crate::core::relay::{close_after_both, pump_input, pump_output};
use crate::cryption::{DecryptingReader, EncryptingWriter};
use crate::error::Result;
use crate::network::destination::Destination;

use super::config::{MaskCallerConfig, NextNode};
use super::wire::{decode_response_header, encode_request};

/// Dials a configured next hop using the mask protocol, presenting one of
/// that node's users chosen at random for each connection.
pub struct MaskCaller {
    next_nodes: Vec<NextNode>,
}

pub struct MaskCallerConstructor;

impl CallerConstructor for MaskCallerConstructor {
    fn create(&self, config_file: &str) -> Result<Arc<dyn Caller>> {
        let config: MaskCallerConfig = crate::config::load_json(config_file)?;
        let next_nodes = config.into_next_nodes()?;
        Ok(Arc::new(MaskCaller { next_nodes }))
    }
}

impl MaskCaller {
    #[cfg(test)]
    pub(crate) fn new_for_test(next_nodes: Vec<NextNode>) -> Self {
        Self { next_nodes }
    }

    fn pick_next_node(&self) -> (&NextNode, Arc<User>) {
        let mut rng = rand::thread_rng();
        let node = &self.next_nodes[rng.gen_range(0..self.next_nodes.len())];
        let user = Arc::clone(&node.users[rng.gen_range(0..node.users.len())]);
        (node, user)
    }
}

#[async_trait]
impl Caller for MaskCaller {
    async fn call(self: Arc<Self>, channel: FullDuplexChannel, dest: Destination) -> Result<()> {
        let (next_node, user) = self.pick_next_node();
        let addr = format!("{}:{}", next_node.address, next_node.port);
        let stream = TcpStream::connect(&addr).await?;
        tracing::info!(next = %addr, "mask caller connected");

        let (mut read_half, mut write_half) = stream.into_split();

        // Fuse the first forward chunk onto the request frame in one
        // socket write, saving a round trip for short messages. If the
        // forward pipe closes before ever producing a chunk, the inbound
        // side never sent anything -- treat this as a failed connection
        // rather than dialing the next hop with a bare, payload-less
        // header (SPEC_FULL.md §4.3 "Short-message optimization").
        let first_chunk = match channel.forward.pop().await {
            Pop::Chunk(chunk) => chunk,
            Pop::Closed => {
                channel.backward.close();
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "forward pipe closed before producing a first chunk",
                )
                .into());
            }
        };

        let (wire_bytes, request, mut payload_enc) = encode_request(user.id(), &dest);
        let mut first = wire_bytes;
        let mut enc_chunk = first_chunk;
        payload_enc.encrypt_in_place(&mut enc_chunk);
        first.extend_from_slice(&enc_chunk);
        write_half.write_all(&first).await?;

        let enc_writer = EncryptingWriter::new(write_half, payload_enc);
        let out_task = tokio::spawn(pump_output(enc_writer, channel.forward.clone()));

        let response_dec = decode_response_header(
            &mut read_half,
            &request.response_header,
            &request.request_key,
            &request.request_iv,
        )
        .await;

        let dec = match response_dec {
            Ok(dec) => dec,
            Err(err) => {
                // Tampered/absent response header: close without surfacing
                // anything to the inner listener, and stop the still-
                // running write side.
                channel.backward.close();
                out_task.abort();
                return Err(err);
            }
        };

        let dec_reader = DecryptingReader::new(read_half, dec);
        let in_task = tokio::spawn(pump_input(dec_reader, channel.backward.clone()));

        close_after_both(in_task, out_task).await;
        Ok(())
    }
}
