//! A fake passive node that accepts connections but never answers `XADD`.
//!
//! It replies `+OK` to every command until the first `XADD`, which covers the
//! client's connection setup, then keeps the socket open in silence.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Listening fake passive node.
pub struct StalledPeer {
    pub redis_url: String,
}

impl StalledPeer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind stalled peer");
        let addr = listener.local_addr().expect("Failed to read stalled peer address");

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket));
            }
        });

        Self {
            redis_url: format!("redis://{}", addr),
        }
    }
}

async fn serve(mut socket: TcpStream) {
    let mut received = Vec::new();
    let mut answered = 0;
    let mut chunk = [0u8; 4096];

    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        received.extend_from_slice(&chunk[..n]);
        if received.windows(4).any(|w| w == b"XADD") {
            continue;
        }
        let commands = command_count(&received);
        while answered < commands {
            if socket.write_all(b"+OK\r\n").await.is_err() {
                return;
            }
            answered += 1;
        }
    }
}

/// Number of RESP command arrays started in `bytes`.
fn command_count(bytes: &[u8]) -> usize {
    (0..bytes.len())
        .filter(|&i| bytes[i] == b'*' && (i == 0 || (i >= 2 && &bytes[i - 2..i] == b"\r\n")))
        .count()
}
