//! Accept loop
//!
//! Binds the listening socket and gives every accepted connection its own
//! named thread running [`handle_connection`].

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::connection::handle_connection;
use super::dispatch::Dispatcher;
use crate::error::Result;

pub struct Listener {
    listener: TcpListener,
    dispatcher: Dispatcher,
    max_payload: u64,
    shutdown: Arc<AtomicBool>,
}

/// Stops a running accept loop.
///
/// Connections already accepted keep running until they close.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept so it sees the flag.
        if let Err(e) = TcpStream::connect(self.addr) {
            tracing::debug!("Wake-up connect to {} failed: {}", self.addr, e);
        }
    }
}

impl Listener {
    pub fn bind(
        addr: impl ToSocketAddrs,
        dispatcher: Dispatcher,
        max_payload: u64,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            dispatcher,
            max_payload,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> Result<ListenerHandle> {
        Ok(ListenerHandle {
            addr: self.local_addr()?,
            shutdown: Arc::clone(&self.shutdown),
        })
    }

    /// Accept connections until [`ListenerHandle::shutdown`] is called.
    pub fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("Devserver listening on ws://{}", addr);

        for incoming in self.listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match incoming {
                Ok(stream) => self.spawn_session(stream),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => tracing::error!("Failed to accept connection: {}", e),
            }
        }

        tracing::info!("Listener on {} stopped", addr);
        Ok(())
    }

    /// Run the accept loop on a background thread.
    pub fn spawn(self) -> Result<(ListenerHandle, JoinHandle<Result<()>>)> {
        let handle = self.handle()?;
        let join = thread::Builder::new()
            .name("devserver-accept".to_string())
            .spawn(move || self.run())?;
        Ok((handle, join))
    }

    fn spawn_session(&self, stream: TcpStream) {
        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!("Accepted connection from {}", peer);
        }
        let dispatcher = self.dispatcher.clone();
        let max_payload = self.max_payload;
        let spawned = thread::Builder::new()
            .name("devserver-conn".to_string())
            .spawn(move || handle_connection(stream, dispatcher, max_payload));
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn connection thread: {}", e);
        }
    }
}
