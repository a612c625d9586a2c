//! TCP control server.
//!
//! Clients receive a `Hello`, then send framed `Request` messages and get one
//! `Reply` per request. Connection threads only compile and enqueue through an
//! [`ExecutorHandle`]; the execution context never leaves the worker.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use mx_stream::{
    decode_payload, encode_message, ControlReply, ControlRequest, Hello, MessageHeader,
    MessageKind, ProtocolError, HEADER_LEN,
};
use thiserror::Error;

use crate::executor::ExecutorHandle;

/// Address the control server binds when none is given.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:35367";

const ACCEPT_POLL: Duration = Duration::from_millis(25);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control connection i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("expected a {expected:?} message, got {found:?}")]
    UnexpectedKind {
        expected: MessageKind,
        found: MessageKind,
    },
}

/// Accepts control connections until dropped.
pub struct ControlServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl ControlServer {
    pub fn bind<A, C>(
        addr: A,
        handle: ExecutorHandle<C>,
        build: Option<String>,
    ) -> anyhow::Result<Self>
    where
        A: ToSocketAddrs,
        C: 'static,
    {
        let listener = TcpListener::bind(addr).context("binding control socket")?;
        listener
            .set_nonblocking(true)
            .context("setting control listener non-blocking")?;
        let local_addr = listener.local_addr().context("reading control socket address")?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let build_info = build.unwrap_or_else(|| "dev".to_string());
        let flag = shutdown.clone();
        thread::Builder::new()
            .name("mx_control".to_string())
            .spawn(move || accept_loop(listener, handle, build_info, flag))
            .context("spawning control accept thread")?;
        log::info!("control server listening on {local_addr}");
        Ok(Self {
            local_addr,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn accept_loop<C: 'static>(
    listener: TcpListener,
    handle: ExecutorHandle<C>,
    build_info: String,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((conn, addr)) => {
                let handle = handle.clone();
                let build_info = build_info.clone();
                let spawned = thread::Builder::new()
                    .name(format!("mx_control {addr}"))
                    .spawn(move || {
                        match serve_connection(conn, &handle, &build_info) {
                            Ok(()) => log::info!("control client {addr} disconnected"),
                            Err(err) => log::warn!("control client {addr} dropped: {err}"),
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("could not serve control client {addr}: {err}");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                log::warn!("control accept error: {err}");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

fn serve_connection<C>(
    mut conn: TcpStream,
    handle: &ExecutorHandle<C>,
    build_info: &str,
) -> Result<(), ControlError> {
    conn.set_nonblocking(false)?;
    conn.set_nodelay(true)?;
    let hello = Hello::new("mx_engine", Some(build_info.to_string()));
    conn.write_all(&encode_message(MessageKind::Hello, &hello)?)?;
    log::info!("control client connected from {}", conn.peer_addr()?);

    while let Some((header, payload)) = read_frame(&mut conn)? {
        let reply = if header.kind == MessageKind::Request {
            match decode_payload::<ControlRequest>(&payload) {
                Ok(request) => dispatch(request, handle),
                Err(err) => ControlReply::Rejected {
                    error: err.to_string(),
                },
            }
        } else {
            ControlReply::Rejected {
                error: ControlError::UnexpectedKind {
                    expected: MessageKind::Request,
                    found: header.kind,
                }
                .to_string(),
            }
        };
        conn.write_all(&encode_message(MessageKind::Reply, &reply)?)?;
    }
    Ok(())
}

fn dispatch<C>(request: ControlRequest, handle: &ExecutorHandle<C>) -> ControlReply {
    log::debug!("control request: {request:?}");
    let outcome = match request {
        ControlRequest::RunStatement { source } => handle.run_statement(&source).map(|_| ()),
        ControlRequest::Pause => handle.pause(),
        ControlRequest::Resume => handle.resume(),
        ControlRequest::Stop => handle.stop(),
        ControlRequest::KeepOpen { enabled } => handle.keep_open(enabled),
        ControlRequest::QueryState => {
            return match handle.query(QUERY_TIMEOUT) {
                Ok(state) => ControlReply::State(state),
                Err(err) => ControlReply::Rejected {
                    error: err.to_string(),
                },
            }
        }
    };
    match outcome {
        Ok(()) => ControlReply::Ack,
        Err(err) => ControlReply::Rejected {
            error: err.to_string(),
        },
    }
}

/// Reads one framed message; `None` when the peer closed cleanly. Bodies over
/// [`mx_stream::MAX_PAYLOAD`] are refused from the header.
pub fn read_frame(
    stream: &mut impl Read,
) -> Result<Option<(MessageHeader, Vec<u8>)>, ControlError> {
    let mut header_bytes = [0u8; HEADER_LEN];
    match stream.read_exact(&mut header_bytes) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let header = MessageHeader::decode(&header_bytes)?;
    let mut payload = vec![0u8; header.length as usize];
    stream.read_exact(&mut payload)?;
    Ok(Some((header, payload)))
}
