//! axum WebSocket halves as session frame endpoints.

use async_trait::async_trait;
use axum::extract::ws::{self, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use interchat_core::{ConnectionError, Payload};
use interchat_room::{CloseFrame, Frame, FrameSink, FrameStream};

/// Write half of an upgraded socket.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WsSink {
    /// Wrap a split sink.
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

/// Read half of an upgraded socket.
pub struct WsStream {
    inner: SplitStream<WebSocket>,
}

impl WsStream {
    /// Wrap a split stream.
    pub fn new(inner: SplitStream<WebSocket>) -> Self {
        Self { inner }
    }
}

/// Split an upgraded socket into session endpoints.
pub fn split(socket: WebSocket) -> (WsSink, WsStream) {
    let (sink, stream) = socket.split();
    (WsSink::new(sink), WsStream::new(stream))
}

/// Outbound payloads that are valid UTF-8 go out as text, anything else as
/// binary.
pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Data(payload) => match std::str::from_utf8(&payload) {
            Ok(text) => Message::Text(text.into()),
            Err(_) => Message::Binary(payload),
        },
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close(close) => Message::Close(close.map(|c| ws::CloseFrame {
            code: c.code,
            reason: c.reason.into(),
        })),
    }
}

/// Text and binary messages are both opaque data.
pub fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Data(Payload::copy_from_slice(text.as_str().as_bytes())),
        Message::Binary(bytes) => Frame::Data(bytes),
        Message::Ping(bytes) => Frame::Ping(bytes),
        Message::Pong(bytes) => Frame::Pong(bytes),
        Message::Close(close) => {
            Frame::Close(close.map(|c| CloseFrame::new(c.code, c.reason.as_str())))
        }
    }
}

fn transport(e: &axum::Error) -> ConnectionError {
    ConnectionError::Transport(e.to_string())
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::closed(None, "sink closed"));
        }
        self.inner.send(to_message(frame)).await.map_err(|e| transport(&e))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await.map_err(|e| transport(&e))
    }
}

#[async_trait]
impl FrameStream for WsStream {
    async fn recv(&mut self) -> Option<Result<Frame, ConnectionError>> {
        self.inner
            .next()
            .await
            .map(|r| r.map(from_message).map_err(|e| transport(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interchat_core::close_code;

    #[test]
    fn utf8_payload_goes_out_as_text() {
        let msg = to_message(Frame::Data(Payload::from_static(b"hello")));
        assert_eq!(msg, Message::Text("hello".into()));
    }

    #[test]
    fn non_utf8_payload_goes_out_as_binary() {
        let bytes = Payload::from_static(&[0xff, 0xfe, 0x00]);
        let msg = to_message(Frame::Data(bytes.clone()));
        assert_eq!(msg, Message::Binary(bytes));
    }

    #[test]
    fn text_and_binary_are_both_data() {
        assert_eq!(
            from_message(Message::Text("hi".into())),
            Frame::Data(Payload::from_static(b"hi"))
        );
        assert_eq!(
            from_message(Message::Binary(Payload::from_static(b"\x00\x01"))),
            Frame::Data(Payload::from_static(b"\x00\x01"))
        );
    }

    #[test]
    fn close_frames_map_both_ways() {
        let frame = Frame::Close(Some(CloseFrame::new(close_code::GOING_AWAY, "bye")));
        let msg = to_message(frame.clone());
        assert_eq!(from_message(msg), frame);
        assert_eq!(from_message(Message::Close(None)), Frame::Close(None));
    }

    #[test]
    fn ping_and_pong_map_through() {
        assert_eq!(
            from_message(Message::Pong(Payload::new())),
            Frame::Pong(Payload::new())
        );
        assert_eq!(
            to_message(Frame::Ping(Payload::new())),
            Message::Ping(Payload::new())
        );
    }
}
