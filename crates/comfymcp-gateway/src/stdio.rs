//! stdio transport: one JSON-RPC message per line in, one per line out.
//! stdout carries protocol traffic only; logs go to stderr.

use crate::rpc::McpHandler;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Serve until EOF or cancellation.
pub async fn serve_stdio<R, W>(handler: &McpHandler, reader: R, mut writer: W, cancel: CancellationToken) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    info!("stdio transport ready");
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(resp) = handler.handle_text(line).await {
            let mut out = serde_json::to_vec(&resp)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}
