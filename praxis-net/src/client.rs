//! Client-side connector.
//!
//! Used by headless participant clients and by integration tests. Maintains
//! the same two-worker structure as the server side: a sender thread that
//! drains a FIFO queue (pinging when idle, so the server's idle detection
//! never fires on a healthy connection) and a reader thread that answers
//! clock-sync probes immediately and forwards everything else to an inbox.

use std::io::{self, BufReader};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::framing::{read_message, write_message};
use crate::protocol::Message;
use crate::server::PING_INTERVAL;

enum ClientCmd {
    Send(Message),
    Stop,
}

/// A connection from a participant client to the coordinator.
pub struct ClientConnector {
    out_tx: Sender<ClientCmd>,
    inbox_rx: Receiver<Message>,
    stream: TcpStream,
}

impl ClientConnector {
    /// Connect to the coordinator. Clock-sync probes are answered
    /// automatically; every other inbound message lands in the inbox.
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let read_stream = stream.try_clone()?;
        let mut write_stream = stream.try_clone()?;

        let (out_tx, out_rx) = mpsc::channel();
        let (inbox_tx, inbox_rx) = mpsc::channel();
        thread::spawn(move || loop {
            match out_rx.recv_timeout(PING_INTERVAL) {
                Ok(ClientCmd::Send(message)) => {
                    if let Err(e) = write_message(&mut write_stream, &message) {
                        warn!("client send failed, terminating: {}", e);
                        break;
                    }
                }
                Ok(ClientCmd::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if write_message(&mut write_stream, &Message::Ping).is_err() {
                        break;
                    }
                }
            }
        });

        let sync_tx = out_tx.clone();
        thread::spawn(move || {
            let mut reader = BufReader::new(read_stream);
            loop {
                match read_message::<_, Message>(&mut reader) {
                    Ok(Message::Sync { ct: None }) => {
                        let ct = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs_f64())
                            .unwrap_or(0.0);
                        let _ = sync_tx.send(ClientCmd::Send(Message::Sync { ct: Some(ct) }));
                    }
                    Ok(message) => {
                        if inbox_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if e.kind() == io::ErrorKind::UnexpectedEof {
                            info!("server closed the connection");
                        } else {
                            warn!("client read failed: {}", e);
                        }
                        let _ = inbox_tx.send(Message::Disconnect);
                        break;
                    }
                }
            }
        });

        Ok(ClientConnector {
            out_tx,
            inbox_rx,
            stream,
        })
    }

    pub fn send(&self, message: Message) {
        let _ = self.out_tx.send(ClientCmd::Send(message));
    }

    pub fn login(&self, name: &str) {
        self.send(Message::Login {
            name: name.to_string(),
        });
    }

    /// Next inbound message, skipping keepalive pings.
    pub fn recv_message(&self, timeout: Duration) -> Option<Message> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let left = deadline.checked_duration_since(std::time::Instant::now())?;
            match self.inbox_rx.recv_timeout(left) {
                Ok(Message::Ping) => continue,
                Ok(message) => return Some(message),
                Err(_) => return None,
            }
        }
    }

    /// Tear the connection down; the server sees a disconnect.
    pub fn close(&self) {
        let _ = self.out_tx.send(ClientCmd::Stop);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
