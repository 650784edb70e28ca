use super::codec;
use super::lifecycle::{Lifecycle, TransportState};
use super::{CloseHandlerFn, ErrorHandlerFn, MessageHandlerFn, Transport};
use crate::context::CancellationToken;
use crate::types::{JsonRpcMessage, McpError};
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::debug;

/// Newline-delimited JSON over a reader/writer pair, by default the process's
/// own stdin and stdout.
///
/// Blank lines are skipped. End of input or a failed read closes the
/// transport. A blocked read cannot be interrupted: closing stops dispatch,
/// but the read thread only exits once the reader yields another line or EOF.
pub struct StdioTransport<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    inner: Arc<StdioInner<R, W>>,
}

struct StdioInner<R, W> {
    reader: Mutex<Option<R>>,
    writer: Mutex<W>,
    lifecycle: Lifecycle,
}

impl StdioTransport<BufReader<Stdin>, Stdout> {
    pub fn new() -> Self {
        Self::with_io(BufReader::new(io::stdin()), io::stdout())
    }
}

impl Default for StdioTransport<BufReader<Stdin>, Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    pub fn with_io(reader: R, writer: W) -> Self {
        Self {
            inner: Arc::new(StdioInner {
                reader: Mutex::new(Some(reader)),
                writer: Mutex::new(writer),
                lifecycle: Lifecycle::new("stdio transport"),
            }),
        }
    }

    pub fn state(&self) -> TransportState {
        self.inner.lifecycle.state()
    }
}

impl<R, W> Transport for StdioTransport<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    fn start(&self, ctx: &CancellationToken) -> Result<(), McpError> {
        self.inner.lifecycle.begin_start()?;
        let reader = self
            .inner
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(reader) = reader else {
            self.inner.lifecycle.abort_start();
            return Err(McpError::AlreadyStarted);
        };

        let inner = self.inner.clone();
        let ctx = ctx.clone();
        let spawned = thread::Builder::new()
            .name("mcp-stdio-reader".into())
            .spawn(move || inner.read_loop(reader, ctx));
        if let Err(e) = spawned {
            self.inner.lifecycle.abort_start();
            return Err(McpError::Io(e));
        }
        Ok(())
    }

    fn send(&self, _ctx: &CancellationToken, message: &JsonRpcMessage) -> Result<(), McpError> {
        if self.inner.lifecycle.state() == TransportState::Closed {
            return Err(McpError::TransportClosed);
        }
        let serialized = codec::encode(message)?;
        let mut writer = self
            .inner
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        writer.write_all(serialized.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<(), McpError> {
        self.inner.close();
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandlerFn) {
        self.inner.lifecycle.set_message_handler(handler);
    }

    fn set_error_handler(&self, handler: ErrorHandlerFn) {
        self.inner.lifecycle.set_error_handler(handler);
    }

    fn set_close_handler(&self, handler: CloseHandlerFn) {
        self.inner.lifecycle.set_close_handler(handler);
    }
}

impl<R: BufRead, W> StdioInner<R, W> {
    fn close(&self) {
        if self.lifecycle.begin_close() {
            self.lifecycle.notify_closed();
        }
    }

    fn read_loop(&self, mut reader: R, ctx: CancellationToken) {
        let mut line = Vec::new();
        loop {
            if ctx.is_cancelled() {
                self.close();
                break;
            }
            if !self.lifecycle.is_running() {
                break;
            }

            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    debug!("stdio: end of input");
                    self.close();
                    break;
                }
                Ok(_) => {
                    // Decode bytes so a non-UTF-8 line is skipped like any other bad payload.
                    let payload = line.trim_ascii();
                    if payload.is_empty() {
                        continue;
                    }
                    debug!("stdio: received message: {}", String::from_utf8_lossy(payload));
                    match codec::decode(payload) {
                        Ok(message) => self.lifecycle.dispatch(&ctx, message),
                        Err(e) => self.lifecycle.report(McpError::Read(Box::new(e))),
                    }
                }
                Err(e) => {
                    if self.lifecycle.is_running() {
                        self.lifecycle.report(McpError::Read(Box::new(McpError::Io(e))));
                    }
                    self.close();
                    break;
                }
            }
        }
        debug!("stdio: read loop exited");
    }
}
