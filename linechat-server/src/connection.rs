//! Per-client connection handler.
//!
//! Each connection is split into a read loop, which feeds lines to a
//! [`Session`], and a writer task, which drains the session's outbound queue
//! into the socket. Whatever ends the read loop (EOF, I/O error, or the
//! session asking to close) goes through the same cleanup: unregister from
//! the hub, let the writer flush, shut down the write half.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::hub::{Hub, SessionId};
use crate::session::{Flow, Session};

const LINE_TOO_LONG: &str = "Input line was too long";

/// Max queued lines written before a flush.
const WRITE_BATCH: usize = 64;

/// Allocate an id no other connection in this process has used.
fn next_session_id() -> SessionId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("conn-{id}")
}

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, hub: Arc<Hub>, max_line_len: usize) -> Result<()> {
    let peer = stream.peer_addr().context("peer address unavailable")?;
    let session_id = next_session_id();
    tracing::info!(%session_id, %peer, "New connection");
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, session_id, hub, max_line_len).await
}

/// Handle any async byte stream (used by tests with in-memory pipes).
pub async fn handle_generic<S>(stream: S, hub: Arc<Hub>, max_line_len: usize) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session_id = next_session_id();
    tracing::info!(%session_id, "New connection (generic stream)");
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, session_id, hub, max_line_len).await
}

/// Result of reading one line under a length cap.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    /// A line (or a final unterminated fragment) is in the buffer.
    Line,
    /// The line exceeded the cap and was skipped; carries its length.
    TooLong(usize),
}

/// Read one line into `buf`, never buffering more than `max_line_len + 1`
/// bytes. An over-long line is consumed up to its newline and discarded.
async fn read_line_capped<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_line_len: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_line_len as u64 + 1;
    buf.clear();
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.len() <= max_line_len {
        return Ok(LineRead::Line);
    }

    let mut dropped = buf.len();
    let mut terminated = buf.last() == Some(&b'\n');
    while !terminated {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 {
            break;
        }
        dropped += n;
        terminated = buf.last() == Some(&b'\n');
    }
    buf.clear();
    Ok(LineRead::TooLong(dropped))
}

async fn handle_io<R, W>(
    mut reader: BufReader<R>,
    writer: W,
    session_id: SessionId,
    hub: Arc<Hub>,
    max_line_len: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    if !hub.register(session_id.clone(), tx.clone()) {
        anyhow::bail!("session id {session_id} already registered");
    }
    let write_handle = tokio::spawn(write_loop(writer, rx, session_id.clone()));

    let mut session = Session::new(session_id.clone(), tx, Arc::clone(&hub));
    let mut buf = Vec::new();

    let result = loop {
        match read_line_capped(&mut reader, &mut buf, max_line_len).await {
            Ok(LineRead::Eof) => break Ok(()),
            Ok(LineRead::Line) => {}
            Ok(LineRead::TooLong(len)) => {
                tracing::warn!(%session_id, len, "Line too long, dropping");
                session.send(LINE_TOO_LONG);
                continue;
            }
            Err(e) => break Err(e).context("read failed"),
        }

        let line = String::from_utf8_lossy(&buf);
        tracing::debug!(%session_id, "<- {}", line.trim_end());

        if session.handle_line(&line) == Flow::Close {
            tracing::info!(%session_id, "Closing connection at session request");
            break Ok(());
        }
    };

    if let Some(login) = hub.unregister(&session_id) {
        tracing::info!(%session_id, %login, "Logged out");
    }
    // The hub no longer holds a sender; dropping the session's lets the
    // writer see the end of the queue once the remaining lines are written.
    drop(session);
    if let Err(e) = write_handle.await {
        tracing::warn!(%session_id, "Writer task failed: {e}");
    }
    tracing::info!(%session_id, "Connection closed");
    result
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>, session_id: SessionId)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(line) = rx.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(%session_id, "Write error: {e}");
            return;
        }
        // Drain whatever else is queued before flushing.
        let mut batch_count = 0;
        while let Ok(queued) = rx.try_recv() {
            if let Err(e) = writer.write_all(queued.as_bytes()).await {
                tracing::warn!(%session_id, "Write error: {e}");
                return;
            }
            batch_count += 1;
            if batch_count >= WRITE_BATCH {
                break;
            }
        }
        if let Err(e) = writer.flush().await {
            tracing::warn!(%session_id, "Flush error: {e}");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(%session_id, "Shutdown error: {e}");
    }
}
