//! Event handlers
//!
//! The consumer loop calls [`EventHandler::handle`] once per record, on the
//! thread running the loop. Any `FnMut(&CapturedEvent)` closure is a handler.

use std::io::{self, Stdout, Write};

use log::warn;
use serde::Serialize;

use super::event::CapturedEvent;

/// Receives each decoded event in delivery order
pub trait EventHandler {
    fn handle(&mut self, event: &CapturedEvent);
}

impl<F: FnMut(&CapturedEvent)> EventHandler for F {
    fn handle(&mut self, event: &CapturedEvent) {
        self(event);
    }
}

/// Default handler: a header line followed by the raw captured bytes
///
/// ```text
/// [+] curl(4242), ts: 1000000, op: SSL_OP_WRITE, len: 4 -->
/// PING
/// ```
pub struct LogHandler<W: Write> {
    out: W,
}

impl LogHandler<Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> LogHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &CapturedEvent) -> io::Result<()> {
        writeln!(
            self.out,
            "[+] {}({}), ts: {}, op: {}, len: {} --> ",
            event.comm,
            event.pid,
            event.timestamp_ns,
            event.op_name(),
            event.len
        )?;
        self.out.write_all(&event.data)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> EventHandler for LogHandler<W> {
    fn handle(&mut self, event: &CapturedEvent) {
        if let Err(e) = self.write_event(event) {
            warn!("Failed to write event: {e}");
        }
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    comm: &'a str,
    pid: u32,
    tid: u32,
    timestamp_ns: u64,
    latency_ns: u64,
    op: &'static str,
    fd: Option<i32>,
    len: u32,
    captured_len: usize,
    truncated: bool,
    /// Captured bytes, hex encoded
    data_hex: String,
    /// Captured bytes when they are valid UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

impl<'a> From<&'a CapturedEvent> for JsonEvent<'a> {
    fn from(event: &'a CapturedEvent) -> Self {
        Self {
            comm: &event.comm,
            pid: event.pid,
            tid: event.tid,
            timestamp_ns: event.timestamp_ns,
            latency_ns: event.latency_ns,
            op: event.op_name(),
            fd: event.fd,
            len: event.len,
            captured_len: event.data.len(),
            truncated: event.is_truncated(),
            data_hex: hex::encode(&event.data),
            text: std::str::from_utf8(&event.data).ok(),
        }
    }
}

/// One JSON object per line
pub struct JsonHandler<W: Write> {
    out: W,
}

impl JsonHandler<Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &CapturedEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, &JsonEvent::from(event))?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> EventHandler for JsonHandler<W> {
    fn handle(&mut self, event: &CapturedEvent) {
        if let Err(e) = self.write_event(event) {
            warn!("Failed to write event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sslsniff_common::Direction;

    fn event() -> CapturedEvent {
        CapturedEvent {
            comm: "curl".to_string(),
            pid: 4242,
            tid: 4243,
            timestamp_ns: 1_000_000,
            latency_ns: 900,
            direction: Direction::Write,
            fd: Some(3),
            len: 4,
            data: b"PING".to_vec(),
        }
    }

    #[test]
    fn test_log_format() {
        let mut handler = LogHandler::new(Vec::new());
        handler.handle(&event());

        let out = String::from_utf8(handler.into_inner()).unwrap();
        assert_eq!(out, "[+] curl(4242), ts: 1000000, op: SSL_OP_WRITE, len: 4 --> \nPING\n");
    }

    #[test]
    fn test_log_writes_raw_bytes() {
        let mut handler = LogHandler::new(Vec::new());
        let binary = CapturedEvent { data: vec![0xff, 0x00, 0x80], len: 3, ..event() };
        handler.handle(&binary);

        let out = handler.into_inner();
        assert!(out.ends_with(&[0xff, 0x00, 0x80, b'\n']));
    }

    #[test]
    fn test_json_line() {
        let mut handler = JsonHandler::new(Vec::new());
        handler.handle(&CapturedEvent { len: 10, direction: Direction::Read, ..event() });

        let out = String::from_utf8(handler.into_inner()).unwrap();
        assert!(out.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(parsed["comm"], "curl");
        assert_eq!(parsed["op"], "SSL_OP_READ");
        assert_eq!(parsed["len"], 10);
        assert_eq!(parsed["captured_len"], 4);
        assert_eq!(parsed["truncated"], true);
        assert_eq!(parsed["fd"], 3);
        assert_eq!(parsed["data_hex"], "50494e47");
        assert_eq!(parsed["text"], "PING");
    }

    #[test]
    fn test_json_keeps_binary_payload_intact() {
        let mut handler = JsonHandler::new(Vec::new());
        let binary = CapturedEvent { data: vec![0xff, 0xfe, 0x41], len: 3, ..event() };
        handler.handle(&binary);

        let out = String::from_utf8(handler.into_inner()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(parsed["data_hex"], "fffe41");
        assert!(parsed.get("text").is_none());

        let decoded = hex::decode(parsed["data_hex"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, [0xff, 0xfe, 0x41]);
    }

    #[test]
    fn test_closure_handler() {
        let mut total = 0usize;
        {
            let mut handler = |e: &CapturedEvent| total += e.data.len();
            handler.handle(&event());
            handler.handle(&event());
        }
        assert_eq!(total, 8);
    }
}
