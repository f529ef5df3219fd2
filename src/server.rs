//! TCP front end for kvdb.
//!
//! Accepts connections and runs one task per client. Each task owns a
//! [`Session`], decodes requests from the socket, and writes every reply back
//! in order. A request that cannot be decoded closes that connection and
//! nothing else.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kvdb::{Db, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Db::open("database.aof")?;
//!     Server::bind("127.0.0.1:6379", db).await?
//!         .run_until_ctrl_c()
//!         .await
//! }
//! ```

use crate::aof::Journal;
use crate::db::Db;
use crate::resp::{self, Invocation};
use crate::session::Session;
use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

pub struct Server {
    listener: TcpListener,
    db: Db,
    flush_interval: Option<Duration>,
}

impl Server {
    pub async fn bind(addr: &str, db: Db) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server { listener, db, flush_interval: None })
    }

    /// Sync the persistence log in the background every `interval`.
    pub fn with_flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients until `shutdown` resolves, then syncs the log.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, db, flush_interval } = self;
        tokio::pin!(shutdown);

        info!(addr = ?listener.local_addr().ok(), "listening");

        let flusher = match (flush_interval, db.journal()) {
            (Some(period), Some(journal)) => Some(tokio::spawn(flush_periodically(journal.clone(), period))),
            _ => None,
        };

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => handle_accept_result(accept_result, &db),
            }
        }

        if let Some(task) = flusher {
            task.abort();
        }
        if let Some(journal) = db.journal() {
            if let Err(err) = journal.flush() {
                warn!(error = %err, "failed to sync log on shutdown");
            }
        }

        info!("server shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, db: &Db) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, db),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, db: &Db) {
    let session = Session::new(db.clone());
    tokio::spawn(async move {
        debug!(peer = %peer, "client connected");
        match handle_connection(stream, session).await {
            Ok(()) => debug!(peer = %peer, "client disconnected"),
            Err(err) => warn!(peer = %peer, error = %err, "client connection closed with error"),
        }
    });
}

async fn handle_connection(mut stream: TcpStream, mut session: Session) -> Result<()> {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        // Answer every complete request already buffered
        while let Some((value, used)) = resp::parse(&buf)? {
            buf.drain(..used);
            if let Some(inv) = Invocation::from_value(value) {
                let reply = session.handle(inv);
                stream.write_all(&reply.to_bytes()).await?;
            }
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn flush_periodically(journal: Arc<dyn Journal>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(err) = journal.flush() {
            warn!(error = %err, "background log sync failed");
        }
    }
}

#[cfg(test)]
mod server_test {
    use super::*;
    use crate::resp::Value;
    use tokio::sync::oneshot;

    async fn start(db: Db) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let server = Server::bind("127.0.0.1:0", db).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));
        (addr, tx, handle)
    }

    async fn read_reply(stream: &mut TcpStream) -> Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            if let Some((value, _)) = resp::parse_reply(&buf).unwrap() {
                return value;
            }
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "server closed the connection");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn test_request_reply_over_tcp() {
        let (addr, stop, handle) = start(Db::in_memory()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream).await, Value::ok());

        stream.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream).await, Value::Bulk("bar".to_string()));

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (addr, stop, handle) = start(Db::in_memory()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";
        for byte in request.iter() {
            stream.write_all(&[*byte]).await.unwrap();
        }
        assert_eq!(read_reply(&mut stream).await, Value::Bulk("hello".to_string()));

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_closes_connection() {
        let db = Db::in_memory();
        let (addr, stop, handle) = start(db.clone()).await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"!nonsense\r\n").await.unwrap();
        let mut chunk = [0u8; 16];
        match bad.read(&mut chunk).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("expected the connection to close, read {} bytes", n),
        }

        // Other clients are unaffected
        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut good).await, Value::Simple("PONG".to_string()));

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_deeply_nested_request_closes_only_that_connection() {
        let (addr, stop, handle) = start(Db::in_memory()).await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        // The server may hang up before the whole frame is sent
        let _ = bad.write_all(&b"*1\r\n".repeat(200_000)).await;
        let mut chunk = [0u8; 16];
        match bad.read(&mut chunk).await {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("expected the connection to close, read {} bytes", n),
        }

        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(b"*2\r\n$4\r\nECHO\r\n$5\r\nstill\r\n").await.unwrap();
        assert_eq!(read_reply(&mut good).await, Value::Bulk("still".to_string()));

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
