//! Line-delimited JSON transport over a byte stream pair.
//!
//! Serves exactly one channel: each line read is one inbound frame, each
//! outbound frame is written as one line. End of input is a departure.
//! Used by `tallyd stdio` with stdin/stdout, and by tests with in-memory
//! duplex pipes.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::session::SessionFactory;

/// Tunables for the stdio transport.
#[derive(Clone, Copy, Debug)]
pub struct StdioConfig {
    /// Longest accepted input line in bytes.
    pub max_line_length: usize,
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
}

/// Serve one client over `reader`/`writer` until EOF or shutdown.
///
/// Reading and writing run concurrently so a response waiting for queue
/// space is always drained.
#[instrument(skip_all, fields(channel_id))]
pub async fn run_stdio<R, W>(
    reader: R,
    writer: W,
    sessions: &SessionFactory,
    config: StdioConfig,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(config.max_line_length));
    let mut out = FramedWrite::new(writer, LinesCodec::new());
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);

    let session = sessions.open(send_tx);
    let _ = tracing::Span::current().record("channel_id", session.channel_id().as_str());
    info!(endpoint_id = %session.endpoint_id(), mode = %sessions.mode(), "stdio client attached");

    let done = shutdown.child_token();

    let inbound = async {
        let result = loop {
            let line = tokio::select! {
                line = lines.next() => line,
                () = done.cancelled() => break Ok(()),
            };
            match line {
                None => {
                    info!("stdin closed");
                    break Ok(());
                }
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    tokio::select! {
                        _ = session.handle_text(&line) => {}
                        () = done.cancelled() => break Ok(()),
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(max = config.max_line_length, "input line too long, discarded");
                }
                Some(Err(LinesCodecError::Io(e))) => break Err(e),
            }
        };
        session.close();
        done.cancel();
        result
    };

    let outbound = async {
        let result = loop {
            tokio::select! {
                biased;
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break Ok(()) };
                    if let Err(e) = out.send(frame.as_str()).await {
                        break Err(into_io(e));
                    }
                }
                () = done.cancelled() => break Ok(()),
            }
        };
        done.cancel();
        result?;
        while let Ok(frame) = send_rx.try_recv() {
            out.send(frame.as_str()).await.map_err(into_io)?;
        }
        SinkExt::<&str>::flush(&mut out).await.map_err(into_io)
    };

    let (read_result, write_result) = tokio::join!(inbound, outbound);
    info!("stdio client detached");
    read_result.and(write_result)
}

fn into_io(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => io::Error::new(io::ErrorKind::InvalidData, "line too long"),
    }
}
