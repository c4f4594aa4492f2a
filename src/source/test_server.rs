//! Local HTTP server replying with canned responses, for adapter tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Canned reply: status code and body
pub type Reply = (u16, String);

/// Serve `replies` in order, one per connection, repeating the last one.
///
/// Returns the base URL and a receiver of the raw requests.
pub async fn serve(replies: Vec<Reply>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut replies = replies.into_iter();
        let mut last: Reply = (200, String::new());

        while let Ok((mut stream, _)) = listener.accept().await {
            if let Some(reply) = replies.next() {
                last = reply;
            }
            let request = read_request(&mut stream).await;
            let _ = tx.send(request);

            let (status, body) = &last;
            let response = format!(
                "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{}/", addr), rx)
}

/// Serve the same reply to every connection
pub async fn serve_one(status: u16, body: &str) -> (String, mpsc::UnboundedReceiver<String>) {
    serve(vec![(status, body.to_string())]).await
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}
