// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Bus link over a local Unix datagram socket.
//!
//! Each datagram is one JSON [`InboundEnvelope`]. Replies are sent as JSON
//! [`ReplyEnvelope`]s to the envelope's `reply_to` path, or to the sender's
//! bound address if `reply_to` is missing.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use async_io::Async;
use futures::future::FutureExt;
use futures::{pin_mut, select};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::socket::{self as nix_socket, MsgFlags};

use super::envelope::{InboundEnvelope, ReplyEnvelope};
use super::{BusError, BusLink, InboundHandler, LinkConnector, MessageBus, Outcome, Topic};

/// Inbound messages above this size are dropped.
pub const DEFAULT_MAX_MESSAGE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct DatagramConnector {
    socket_path: PathBuf,
}

impl DatagramConnector {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

impl LinkConnector for DatagramConnector {
    fn connect(
        &self,
        relay_id: &str,
        handler: InboundHandler,
    ) -> Result<Box<dyn BusLink>, BusError> {
        let link = DatagramLink::bind(&self.socket_path, relay_id, handler)?;
        info!(
            "Listening for bus messages on {}.",
            self.socket_path.display()
        );
        Ok(Box::new(link))
    }
}

pub struct DatagramLink {
    relay_id: Arc<str>,
    socket_path: PathBuf,
    socket: Option<Arc<Async<UnixDatagram>>>,
    sender: Arc<UnixDatagram>,
    handler: InboundHandler,
    max_message: usize,
    halt_tx: Sender<()>,
    halt_rx: Receiver<()>,
    thread_handle: Option<JoinHandle<()>>,
    halted: bool,
}

impl DatagramLink {
    pub fn bind(
        socket_path: &Path,
        relay_id: &str,
        handler: InboundHandler,
    ) -> Result<Self, BusError> {
        prepare_socket_path(socket_path).map_err(BusError::Connect)?;
        let socket = Async::<UnixDatagram>::bind(socket_path).map_err(BusError::Connect)?;
        let sender = UnixDatagram::unbound().map_err(BusError::Connect)?;
        let (halt_tx, halt_rx) = async_channel::bounded(1);

        Ok(Self {
            relay_id: Arc::from(relay_id),
            socket_path: socket_path.to_path_buf(),
            socket: Some(Arc::new(socket)),
            sender: Arc::new(sender),
            handler,
            max_message: DEFAULT_MAX_MESSAGE,
            halt_tx,
            halt_rx,
            thread_handle: None,
            halted: false,
        })
    }

    pub fn max_message(mut self, bytes: usize) -> Self {
        self.max_message = bytes;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Create the parent directory and clear a socket left behind by a previous run.
fn prepare_socket_path(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!("Removing stale socket {}", path.display());
            fs::remove_file(path)
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl BusLink for DatagramLink {
    fn run(&mut self) -> Result<(), BusError> {
        if self.halted {
            return Err(BusError::Subscribe("link has been halted".into()));
        }
        let socket = self
            .socket
            .take()
            .ok_or_else(|| BusError::Subscribe("link is already running".into()))?;

        let dispatch = Dispatch {
            relay_id: self.relay_id.clone(),
            sender: self.sender.clone(),
            handler: self.handler.clone(),
        };
        let halt_rx = self.halt_rx.clone();
        let max_message = self.max_message;
        let handle = thread::Builder::new()
            .name("relayd-bus".into())
            .spawn(move || async_io::block_on(receive_loop(socket, dispatch, halt_rx, max_message)))
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn halt(&mut self) {
        if self.halted {
            return;
        }
        self.halted = true;
        self.halt_tx.close();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("Bus receive loop panicked");
            }
        }
        self.socket = None;
        match fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove bus socket {}: {e}",
                self.socket_path.display()
            ),
        }
        info!("Bus link halted.");
    }
}

impl Drop for DatagramLink {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Receive datagrams until the halt channel closes.
async fn receive_loop(
    socket: Arc<Async<UnixDatagram>>,
    dispatch: Dispatch,
    halt: Receiver<()>,
    max_message: usize,
) {
    debug!("Bus receive loop started");
    let mut buf = Vec::new();
    loop {
        let received = {
            let recv = next_datagram(&socket, &mut buf, max_message).fuse();
            let halted = halt.recv().fuse();
            pin_mut!(recv, halted);
            select! {
                received = recv => Some(received),
                _ = halted => None,
            }
        };
        match received {
            None => break,
            Some(Ok(Some((len, addr)))) => dispatch.deliver(&buf[..len], addr.as_pathname()),
            Some(Ok(None)) => {}
            Some(Err(e)) => warn!("Error receiving bus message: {e}"),
        }
    }
    debug!("Bus receive loop exiting");
}

/// Read the next datagram into `buf`, grown to its exact size.
/// Datagrams above `max_message` are consumed and dropped; `None` is returned for them.
async fn next_datagram(
    socket: &Async<UnixDatagram>,
    buf: &mut Vec<u8>,
    max_message: usize,
) -> io::Result<Option<(usize, SocketAddr)>> {
    // MSG_TRUNC makes the peek report the full length of the pending datagram
    let size = socket
        .read_with(|s| {
            nix_socket::recv(s.as_raw_fd(), &mut [], MsgFlags::MSG_PEEK | MsgFlags::MSG_TRUNC)
                .map_err(io::Error::from)
        })
        .await?;
    if size > max_message {
        socket.recv_from(&mut [0u8; 1]).await?;
        warn!("Dropping bus message of {size} bytes: too large (limit {max_message} bytes)");
        return Ok(None);
    }
    buf.resize(size.max(1), 0);
    let (len, addr) = socket.recv_from(buf).await?;
    Ok(Some((len, addr)))
}

struct Dispatch {
    relay_id: Arc<str>,
    sender: Arc<UnixDatagram>,
    handler: InboundHandler,
}

impl Dispatch {
    fn deliver(&self, datagram: &[u8], sender_path: Option<&Path>) {
        let envelope: InboundEnvelope = match serde_json::from_slice(datagram) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed bus message: {e}");
                return;
            }
        };
        let InboundEnvelope {
            topic,
            id,
            reply_to,
            payload,
        } = envelope;

        let topic: Topic = match topic.parse() {
            Ok(topic) => topic,
            Err(e) => {
                warn!("Dropping bus message {id:?}: {e}");
                return;
            }
        };
        let Some(reply_to) = reply_to.or_else(|| sender_path.map(Path::to_path_buf)) else {
            warn!("Dropping {topic} message {id:?}: no reply address");
            return;
        };

        debug!("Received {topic} message {id:?} ({} bytes)", payload.len());
        let reply = DatagramReply {
            relay_id: self.relay_id.clone(),
            id: id.clone(),
            reply_to,
            sender: self.sender.clone(),
        };
        if let Err(e) = (self.handler)(Arc::new(reply), topic, payload) {
            warn!("Dropping {topic} message {id:?}: {e}");
        }
    }
}

#[derive(Debug)]
struct DatagramReply {
    relay_id: Arc<str>,
    id: Option<String>,
    reply_to: PathBuf,
    sender: Arc<UnixDatagram>,
}

impl MessageBus for DatagramReply {
    fn reply(&self, topic: Topic, outcome: &Outcome) -> Result<(), BusError> {
        let reply = ReplyEnvelope::from_outcome(&self.relay_id, self.id.clone(), topic, outcome);
        let bytes = serde_json::to_vec(&reply)?;
        match self.sender.send_to(&bytes, &self.reply_to) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(Errno::EMSGSIZE as i32) => {
                warn!(
                    "Reply to {:?} is {} bytes, too large for one datagram; sending a failure instead",
                    self.id,
                    bytes.len()
                );
                let fallback = serde_json::to_vec(&reply.too_large(bytes.len()))?;
                self.sender
                    .send_to(&fallback, &self.reply_to)
                    .map_err(BusError::Publish)?;
                Ok(())
            }
            Err(e) => Err(BusError::Publish(e)),
        }
    }
}
