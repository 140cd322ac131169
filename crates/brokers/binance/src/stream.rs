use futures_util::{SinkExt, StreamExt};
use spotlink_core::{GatewayError, ShutdownSignal, StreamClose, StreamHandler};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Drive one WebSocket connection until it closes or shutdown is triggered.
///
/// Frames are handed to `handler` in arrival order. Once connected, the
/// handler's `on_close` runs exactly once, whichever way the connection ends.
/// There is no reconnect: the caller decides what an ended stream means.
pub async fn run_stream<H: StreamHandler>(
    url: &str,
    handler: &mut H,
    mut shutdown: ShutdownSignal,
) -> Result<StreamClose, GatewayError> {
    let (ws, _response) = tokio::select! {
        biased;
        _ = shutdown.wait() => return Ok(StreamClose::new(None, "shutdown before connect")),
        connected = connect_async(url) => connected
            .map_err(|e| GatewayError::Transport(format!("connect failed: {}", e)))?,
    };
    handler.on_open();

    let (mut write, mut read) = ws.split();

    let outcome = loop {
        tokio::select! {
            _ = shutdown.wait() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client shutdown".into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!(error = %e, "Close frame not delivered");
                }
                break Ok(StreamClose::new(Some(1000), "client shutdown"));
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => handler.on_text(&text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => handler.on_text(text),
                    Err(e) => warn!(error = %e, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let close = match frame {
                        Some(f) => StreamClose::new(Some(u16::from(f.code)), f.reason.to_string()),
                        None => StreamClose::new(None, ""),
                    };
                    break Ok(close);
                }
                // Pings are answered by tungstenite while reading.
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(GatewayError::Transport(e.to_string())),
                None => break Ok(StreamClose::new(None, "stream ended")),
            }
        }
    };

    match outcome {
        Ok(close) => {
            handler.on_close(&close);
            Ok(close)
        }
        Err(e) => {
            handler.on_close(&StreamClose::new(None, e.to_string()));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotlink_core::shutdown_channel;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[derive(Default)]
    struct Recorder {
        opened: bool,
        frames: Vec<String>,
        closes: Vec<StreamClose>,
    }

    impl StreamHandler for Recorder {
        fn on_open(&mut self) {
            self.opened = true;
        }

        fn on_text(&mut self, text: &str) {
            self.frames.push(text.to_string());
        }

        fn on_close(&mut self, close: &StreamClose) {
            self.closes.push(close.clone());
        }
    }

    async fn local_server<F, Fut>(session: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            session(ws).await;
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order_then_close_recorded() {
        let url = local_server(|mut ws| async move {
            ws.send(Message::Text("one".into())).await.unwrap();
            ws.send(Message::Text("two".into())).await.unwrap();
            ws.send(Message::Binary(b"three".to_vec())).await.unwrap();
            ws.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "bye".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let (_trigger, signal) = shutdown_channel();
        let mut recorder = Recorder::default();
        let close = run_stream(&url, &mut recorder, signal).await.unwrap();

        assert!(recorder.opened);
        assert_eq!(recorder.frames, vec!["one", "two", "three"]);
        assert_eq!(close.code, Some(1001));
        assert_eq!(close.reason, "bye");
        assert_eq!(recorder.closes, vec![close]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_stream() {
        let url = local_server(|mut ws| async move {
            // Keep reading until the client's close frame arrives.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await;

        let (trigger, signal) = shutdown_channel();
        let handle = tokio::spawn(async move {
            let mut recorder = Recorder::default();
            let close = run_stream(&url, &mut recorder, signal).await;
            (close, recorder)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();

        let (close, recorder) = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(close.unwrap().code, Some(1000));
        assert_eq!(recorder.closes.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (_trigger, signal) = shutdown_channel();
        let mut recorder = Recorder::default();
        let result = run_stream(&format!("ws://{}", addr), &mut recorder, signal).await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert!(!recorder.opened);
    }

    #[tokio::test]
    async fn test_triggered_shutdown_skips_connect() {
        let (trigger, signal) = shutdown_channel();
        trigger.trigger();
        let mut recorder = Recorder::default();
        let close = run_stream("ws://127.0.0.1:9", &mut recorder, signal)
            .await
            .unwrap();
        assert_eq!(close.code, None);
        assert!(!recorder.opened);
        assert!(recorder.closes.is_empty());
    }
}
