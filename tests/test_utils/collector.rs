//! A loopback TCP collector that records every line it receives.

use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// A line together with the connection it arrived on, counted from zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Received {
    pub connection: usize,
    pub line: String,
}

pub struct LoopbackCollector {
    port: u16,
    lines: Receiver<Received>,
    connections: Arc<AtomicUsize>,
}

impl LoopbackCollector {
    /// Accept connections and keep them open.
    pub fn start() -> Self {
        Self::spawn(None)
    }

    /// Close the first connection after it has delivered `lines` lines.
    /// Later connections stay open.
    pub fn dropping_first_after(lines: usize) -> Self {
        Self::spawn(Some(lines))
    }

    fn spawn(drop_first_after: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let port = listener.local_addr().expect("listener address").port();
        let (tx, rx) = unbounded();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let connection = counter.fetch_add(1, Ordering::SeqCst);
                let limit = if connection == 0 { drop_first_after } else { None };
                let tx = tx.clone();
                thread::spawn(move || read_lines(stream, connection, limit, tx));
            }
        });
        Self {
            port,
            lines: rx,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn next(&self, timeout: Duration) -> Option<Received> {
        self.lines.recv_timeout(timeout).ok()
    }

    /// Collect `count` lines or panic after `timeout`.
    pub fn expect_lines(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::with_capacity(count);
        while lines.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next(remaining) {
                Some(received) => lines.push(received.line),
                None => panic!("received {lines:?}, expected {count} lines"),
            }
        }
        lines
    }

    /// Whether nothing arrives within `window`.
    pub fn stays_silent(&self, window: Duration) -> bool {
        self.next(window).is_none()
    }
}

fn read_lines(stream: TcpStream, connection: usize, limit: Option<usize>, tx: Sender<Received>) {
    let reader = BufReader::new(stream);
    for (index, line) in reader.lines().enumerate() {
        let Ok(line) = line else { return };
        if tx.send(Received { connection, line }).is_err() {
            return;
        }
        if limit.is_some_and(|limit| index + 1 >= limit) {
            return;
        }
    }
}
