use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::core::channel::FullDuplexChannel;
use crate::core::node::{Caller, CallerConstructor};
use crate::core::relay::{close_after_both, pump_input, pump_output};
use crate::error::Result;
use crate::network::destination::Destination;

/// Raw TCP passthrough to the final destination -- the terminal caller of a
/// chain. No framing or encryption of its own; config file is accepted but
/// unused, matching the reference implementation.
pub struct IdenticalCaller;

pub struct IdenticalCallerConstructor;

impl CallerConstructor for IdenticalCallerConstructor {
    fn create(&self, _config_file: &str) -> Result<Arc<dyn Caller>> {
        Ok(Arc::new(IdenticalCaller))
    }
}

#[async_trait]
impl Caller for IdenticalCaller {
    async fn call(self: Arc<Self>, channel: FullDuplexChannel, dest: Destination) -> Result<()> {
        let stream = TcpStream::connect(format!("{dest}")).await?;
        tracing::info!(%dest, "identical caller connected");

        let (read_half, write_half) = stream.into_split();

        // R_out is this destination socket: read it into backward, pop
        // forward into it.
        let in_task = tokio::spawn(pump_input(read_half, channel.backward.clone()));
        let out_task = tokio::spawn(pump_output(write_half, channel.forward.clone()));
        close_after_both(in_task, out_task).await;
        Ok(())
    }
}
