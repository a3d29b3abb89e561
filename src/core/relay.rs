use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::channel::{HalfDuplexChannel, Pop};

/// Idle timeout on a transport socket read/write, distinct from (but
/// numerically equal to) the pipe's own idle timeout -- see SPEC_FULL.md
/// §4.3 "Half-duplex pipe contract".
pub const SOCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Reads from `reader`, pushing chunks into `channel` until EOF or error.
/// Returns `done=true` on clean EOF, `done=false` on I/O error or read
/// timeout (both close the pipe so the paired output task unwinds too).
pub async fn pump_input<R: AsyncRead + Unpin>(
    mut reader: R,
    channel: Arc<HalfDuplexChannel>,
) -> bool {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match tokio::time::timeout(SOCKET_IDLE_TIMEOUT, reader.read(&mut buf)).await {
            Ok(Ok(0)) => {
                channel.close();
                return true;
            }
            Ok(Ok(n)) => channel.push(buf[..n].to_vec()).await,
            Ok(Err(_)) => {
                channel.close();
                return false;
            }
            Err(_elapsed) => {
                channel.close();
                return false;
            }
        }
    }
}

/// Pops chunks from `channel` and writes them to `writer`. Returns
/// `done=true` when the pipe closes (including a pipe-idle timeout, which
/// is treated as a graceful close at this layer), `done=false` on a write
/// error or write timeout. Either way, the write half is shut down (FIN)
/// before this returns, so the peer is told promptly that this direction
/// has nothing more to send without waiting on the other direction.
pub async fn pump_output<W: AsyncWrite + Unpin>(
    mut writer: W,
    channel: Arc<HalfDuplexChannel>,
) -> bool {
    let done = loop {
        match channel.pop().await {
            Pop::Chunk(chunk) => {
                match tokio::time::timeout(SOCKET_IDLE_TIMEOUT, writer.write_all(&chunk)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break false,
                    Err(_elapsed) => break false,
                }
            }
            Pop::Closed => break true,
        }
    };
    let _ = writer.shutdown().await;
    done
}

/// Wait for both of one endpoint's relay tasks to finish. Each task already
/// shuts down its own write half on completion (see `pump_output`); once
/// both have returned, neither direction's bytes have been truncated by the
/// other's early close and the connection's tasks have fully unwound.
pub async fn close_after_both(
    task_a: tokio::task::JoinHandle<bool>,
    task_b: tokio::task::JoinHandle<bool>,
) {
    let _ = task_a.await;
    let _ = task_b.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::HalfDuplexChannel;
    use std::io::Cursor;

    #[tokio::test]
    async fn pump_input_preserves_order_and_length() {
        let channel = HalfDuplexChannel::new();
        let payload = vec![7u8; 5000];
        let reader = Cursor::new(payload.clone());

        let done = pump_input(reader, Arc::clone(&channel)).await;
        assert!(done);

        let mut collected = Vec::new();
        loop {
            match channel.pop().await {
                Pop::Chunk(c) => collected.extend_from_slice(&c),
                Pop::Closed => break,
            }
        }
        assert_eq!(collected, payload);
    }

    #[tokio::test]
    async fn pump_output_drains_until_closed() {
        let channel = HalfDuplexChannel::new();
        channel.push(b"hello ".to_vec()).await;
        channel.push(b"world".to_vec()).await;
        channel.close();

        let (mut client, server) = tokio::io::duplex(4096);
        let done = pump_output(server, channel).await;
        assert!(done);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
