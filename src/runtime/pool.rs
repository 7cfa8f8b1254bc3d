//! Acceptor thread plus a fixed pool of worker threads.
//!
//! The acceptor hands each accepted stream to the pool over a bounded
//! channel. Whichever worker receives it owns the connection exclusively
//! until its handler returns, so one slow peer only occupies one worker.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::protocols::mqtt::HandlerSettings;
use crate::runtime::process_connection;
use crate::runtime::sequential::Acceptor;

/// An accepted connection waiting for a worker.
struct Job {
    stream: TcpStream,
    peer: SocketAddr,
}

/// Fixed set of worker threads fed through a channel.
pub struct WorkerPool {
    sender: Option<SyncSender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `worker-{id}`.
    pub fn new(size: usize, settings: HandlerSettings) -> io::Result<Self> {
        let size = size.max(1);
        // Bounded: the acceptor blocks once every worker is busy and the
        // queue is full.
        let (sender, receiver) = mpsc::sync_channel::<Job>(size);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver, settings))?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a connection for the next free worker.
    ///
    /// Blocks while the queue is full. Fails only if every worker has exited.
    pub fn dispatch(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| io::Error::other("worker pool is shut down"))?;
        sender
            .send(Job { stream, peer })
            .map_err(|_| io::Error::other("all workers have exited"))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets workers finish queued jobs and exit.
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(worker_id: usize, receiver: Arc<Mutex<Receiver<Job>>>, settings: HandlerSettings) {
    loop {
        let job = {
            let guard = match receiver.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.recv()
        };

        match job {
            Ok(Job { stream, peer }) => {
                debug!(worker = worker_id, peer = %peer, "Dispatched connection");
                let _ = process_connection(stream, peer, &settings);
            }
            Err(_) => break,
        }
    }

    debug!(worker = worker_id, "Worker exiting");
}

/// Accept connections and dispatch them to `pool` until the process is
/// terminated.
pub fn serve(acceptor: &Acceptor, pool: &WorkerPool) -> io::Result<()> {
    loop {
        match acceptor.accept() {
            Ok((stream, peer)) => pool.dispatch(stream, peer)?,
            Err(e) => error!(error = %e, "Failed to accept connection"),
        }
    }
}
