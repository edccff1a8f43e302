//! Async UDP transport with length-bounded datagrams (spec §2, §6).
//!
//! Treated elsewhere in the design as a thin `send`/`recv` contract; this
//! module gives it one concrete, real implementation over
//! `tokio::net::UdpSocket` plus an in-memory fake used by the scenario
//! tests (teacher pattern: `src/test/mem_validator.rs` swaps a real
//! collaborator for an in-memory one under `#[cfg(test)]`-reachable code).

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::peer::PeerAddr;

#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, addr: &PeerAddr, bytes: &[u8]) -> std::io::Result<()>;
  async fn recv(&self) -> std::io::Result<(PeerAddr, Vec<u8>)>;
}

pub struct UdpTransport {
  socket: UdpSocket,
  max_datagram: usize,
}

impl UdpTransport {
  pub async fn bind(addr: SocketAddr, max_datagram: usize) -> std::io::Result<Self> {
    let socket = UdpSocket::bind(addr).await?;
    Ok(Self {
      socket,
      max_datagram,
    })
  }
}

#[async_trait]
impl Transport for UdpTransport {
  async fn send(&self, addr: &PeerAddr, bytes: &[u8]) -> std::io::Result<()> {
    let socket_addr: SocketAddr = addr.try_into().map_err(|_| {
      std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad peer address")
    })?;
    self.socket.send_to(bytes, socket_addr).await?;
    Ok(())
  }

  async fn recv(&self) -> std::io::Result<(PeerAddr, Vec<u8>)> {
    let mut buf = vec![0u8; self.max_datagram];
    let (len, from) = self.socket.recv_from(&mut buf).await?;
    buf.truncate(len);
    Ok((PeerAddr::from(from), buf))
  }
}

/// In-memory transport used by integration tests: every bound instance
/// shares a registry of mailboxes keyed by `PeerAddr`, so multiple
/// in-process `Node`s can exchange packets without touching a real
/// socket.
pub mod fake {
  use std::collections::HashMap;

  use tokio::sync::{mpsc, Mutex};

  use super::*;

  #[derive(Default)]
  pub struct Network {
    mailboxes: Mutex<HashMap<PeerAddr, mpsc::UnboundedSender<(PeerAddr, Vec<u8>)>>>,
  }

  impl Network {
    pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
    }

    pub async fn bind(self: &Arc<Self>, addr: PeerAddr) -> FakeTransport {
      let (tx, rx) = mpsc::unbounded_channel();
      self.mailboxes.lock().await.insert(addr.clone(), tx);
      FakeTransport {
        network: self.clone(),
        own_addr: addr,
        inbox: Mutex::new(rx),
      }
    }
  }

  pub struct FakeTransport {
    network: Arc<Network>,
    own_addr: PeerAddr,
    inbox: Mutex<mpsc::UnboundedReceiver<(PeerAddr, Vec<u8>)>>,
  }

  #[async_trait]
  impl Transport for FakeTransport {
    async fn send(&self, addr: &PeerAddr, bytes: &[u8]) -> std::io::Result<()> {
      let mailboxes = self.network.mailboxes.lock().await;
      if let Some(tx) = mailboxes.get(addr) {
        let _ = tx.send((self.own_addr.clone(), bytes.to_vec()));
      }
      Ok(())
    }

    async fn recv(&self) -> std::io::Result<(PeerAddr, Vec<u8>)> {
      self
        .inbox
        .lock()
        .await
        .recv()
        .await
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "network closed"))
    }
  }
}
