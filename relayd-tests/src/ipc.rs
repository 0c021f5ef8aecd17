// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::{
    fs, io,
    os::unix::net::UnixDatagram,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use anyhow::Context;
use relayd::bus::envelope::{InboundEnvelope, ReplyEnvelope};
use relayd::bus::Topic;

static PEER_COUNTER: AtomicU32 = AtomicU32::new(0);

/// The other end of a relay's datagram bus: sends envelopes, reads replies.
pub struct BusPeer {
    sock: UnixDatagram,
    path: PathBuf,
}

impl BusPeer {
    /// Bind a reply socket in the temp directory.
    pub fn bind() -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "relayd-peer-{}-{}.sock",
            std::process::id(),
            PEER_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        Self::bind_at(path)
    }

    pub fn bind_at(path: PathBuf) -> io::Result<Self> {
        let _ = fs::remove_file(&path);
        let sock = UnixDatagram::bind(&path)?;
        Ok(Self { sock, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn send_raw(&self, relay_socket: &Path, data: &[u8]) -> io::Result<()> {
        self.sock.send_to(data, relay_socket)?;
        Ok(())
    }

    pub fn send(&self, relay_socket: &Path, envelope: &InboundEnvelope) -> anyhow::Result<()> {
        let data = serde_json::to_vec(envelope)?;
        self.send_raw(relay_socket, &data)
            .with_context(|| format!("failed to send to {}", relay_socket.display()))
    }

    /// Send one request; replies come back to this peer's own address.
    pub fn request(
        &self,
        relay_socket: &Path,
        topic: Topic,
        id: &str,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let envelope = InboundEnvelope {
            topic: topic.as_str().to_string(),
            id: Some(id.to_string()),
            reply_to: None,
            payload: payload.to_vec(),
        };
        self.send(relay_socket, &envelope)
    }

    pub fn recv_raw(&self, read_timeout: Option<Duration>) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; 256 * 1024];
        self.sock.set_read_timeout(read_timeout)?;
        let n = self.sock.recv(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn recv_reply(&self, read_timeout: Option<Duration>) -> anyhow::Result<ReplyEnvelope> {
        let data = self.recv_raw(read_timeout).context("no reply from relay")?;
        serde_json::from_slice(&data).context("reply is not a valid envelope")
    }
}

impl Drop for BusPeer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
