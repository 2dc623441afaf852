use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::logging::log_dropped_event;

/// Read text frames from a WebSocket feed into `sender` until the server
/// closes the connection or the receiver goes away. Returns the number of
/// frames forwarded.
pub(crate) async fn read_ws_feed(url: &Url, sender: &mpsc::Sender<String>) -> Result<u64> {
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws.split();
    let mut forwarded = 0;

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                if sender.send(text).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if sender.send(text).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                Err(e) => {
                    log_dropped_event("ws", "invalid_utf8", &String::from_utf8_lossy(e.as_bytes()));
                }
            },
            Message::Ping(payload) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = write.close().await;
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn forwards_text_and_utf8_binary_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let _ = ws.send(Message::Text(r#"{"n":1}"#.to_string())).await;
            let _ = ws.send(Message::Binary(vec![0xff, 0xfe, b'{'])).await;
            let _ = ws.send(Message::Ping(vec![7])).await;
            let _ = ws.send(Message::Binary(br#"{"n":2}"#.to_vec())).await;
            let _ = ws.close(None).await;
            while let Some(Ok(_)) = ws.next().await {}
        });

        let url = Url::parse(&format!("ws://{}/ws/structured", addr)).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let forwarded = timeout(Duration::from_secs(5), read_ws_feed(&url, &tx))
            .await
            .expect("server closes the feed")
            .unwrap();

        assert_eq!(forwarded, 2);
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":1}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"n":2}"#);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_failure_is_an_error() {
        let (tx, _rx) = mpsc::channel(1);
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        assert!(read_ws_feed(&url, &tx).await.is_err());
    }
}
