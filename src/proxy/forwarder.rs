//! Data forwarding module
//!
//! This module handles data forwarding between two streams.

use futures::future::{select, Either};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Result;

/// Per-direction copy buffer size
const BUFFER_SIZE: usize = 8192;

/// Forward data between the client and target streams
///
/// Two copy tasks run concurrently, one per direction, each until its read
/// side reaches end-of-stream or errors. Whichever direction finishes
/// first ends the whole session: the other task is cancelled so both
/// connections close, and both tasks are joined before this returns.
pub async fn proxy_data<C, T>(client_stream: C, target_stream: T) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut client_reader, mut client_writer) = tokio::io::split(client_stream);
    let (mut target_reader, mut target_writer) = tokio::io::split(target_stream);

    // Data flow from client to target
    let client_to_target = tokio::spawn(async move {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total_bytes: u64 = 0;

        loop {
            match client_reader.read(&mut buffer).await {
                Ok(0) => break, // Connection closed
                Ok(n) => {
                    total_bytes += n as u64;
                    if target_writer.write_all(&buffer[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        // Propagate the end-of-stream before the session is torn down
        let _ = target_writer.shutdown().await;
        debug!("Client to target transferred {} bytes total", total_bytes);
    });

    // Data flow from target to client
    let target_to_client = tokio::spawn(async move {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total_bytes: u64 = 0;

        loop {
            match target_reader.read(&mut buffer).await {
                Ok(0) => break, // Connection closed
                Ok(n) => {
                    total_bytes += n as u64;
                    if client_writer.write_all(&buffer[..n]).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        let _ = client_writer.shutdown().await;
        debug!("Target to client transferred {} bytes total", total_bytes);
    });

    // The first direction to complete closes the session. Cancelling the
    // peer task drops its stream halves, which unblocks and closes both
    // connections; joining it afterwards guarantees nothing of the session
    // outlives this call.
    match select(client_to_target, target_to_client).await {
        Either::Left((_, target_to_client)) => {
            debug!("Client to target connection closed");
            target_to_client.abort();
            let _ = target_to_client.await;
        }
        Either::Right((_, client_to_target)) => {
            debug!("Target to client connection closed");
            client_to_target.abort();
            let _ = client_to_target.await;
        }
    }

    Ok(())
}
