use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::OutboundMessage;

/// Buffered output path from the guest to the front end.
///
/// Program output accumulates in a pending buffer and is shipped as one
/// `stdout` message whenever it contains a line terminator or someone asks
/// for a flush. Diagnostics (`stderr`) and lifecycle messages (`system`)
/// flush the pending buffer first so output is never reordered around them.
///
/// The guest emits bytes one at a time, so the buffer holds raw bytes and is
/// only decoded (lossily) at flush time — a multi-byte UTF-8 sequence written
/// across several `put_byte` calls stays intact.
pub struct Console {
    pending: Vec<u8>,
    tx: UnboundedSender<OutboundMessage>,
}

impl Console {
    pub fn new(tx: UnboundedSender<OutboundMessage>) -> Self {
        Self {
            pending: Vec::new(),
            tx,
        }
    }

    /// Append one character of program output, flushing on newline.
    pub fn put_byte(&mut self, byte: u8) {
        self.pending.push(byte);
        if byte == b'\n' {
            self.flush();
        }
    }

    /// Append program output, flushing if it carries a line terminator.
    pub fn print(&mut self, text: &str) {
        self.pending.extend_from_slice(text.as_bytes());
        if text.contains('\n') {
            self.flush();
        }
    }

    /// Drain pending program output into a single `stdout` message.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.send(OutboundMessage::Stdout { text });
    }

    /// Emit on the error channel, flushing program output first.
    pub fn eprint(&mut self, text: &str) {
        self.flush();
        self.send(OutboundMessage::Stderr { text: text.into() });
    }

    /// Emit a host lifecycle message, flushing program output first.
    pub fn sysprint(&mut self, text: &str) {
        self.flush();
        self.send(OutboundMessage::System { text: text.into() });
    }

    /// Echo accepted input back to the front end.
    pub fn echo(&mut self, text: &str) {
        self.send(OutboundMessage::Stdin { text: text.into() });
    }

    fn send(&self, msg: OutboundMessage) {
        // The front end hanging up is not an error the guest can act on.
        if self.tx.send(msg).is_err() {
            tracing::trace!("outbound channel closed, dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn console() -> (Console, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Console::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn partial_line_is_held_back() {
        let (mut con, mut rx) = console();
        con.print("no newline yet");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn newline_flushes_accumulated_output() {
        let (mut con, mut rx) = console();
        con.print("abc");
        con.print("def\n");
        assert_eq!(
            drain(&mut rx),
            vec![OutboundMessage::Stdout {
                text: "abcdef\n".into()
            }]
        );
    }

    #[test]
    fn byte_at_a_time_flushes_on_newline_only() {
        let (mut con, mut rx) = console();
        for b in b"ok\n" {
            con.put_byte(*b);
        }
        assert_eq!(
            drain(&mut rx),
            vec![OutboundMessage::Stdout { text: "ok\n".into() }]
        );
    }

    #[test]
    fn eprint_flushes_pending_stdout_first() {
        let (mut con, mut rx) = console();
        con.print("partial");
        con.eprint("> ");
        assert_eq!(
            drain(&mut rx),
            vec![
                OutboundMessage::Stdout {
                    text: "partial".into()
                },
                OutboundMessage::Stderr { text: "> ".into() },
            ]
        );
    }

    #[test]
    fn explicit_flush_drains_to_empty() {
        let (mut con, mut rx) = console();
        con.print("tail");
        con.flush();
        con.flush();
        assert_eq!(
            drain(&mut rx),
            vec![OutboundMessage::Stdout {
                text: "tail".into()
            }]
        );
    }

    #[test]
    fn split_utf8_sequence_survives_buffering() {
        let (mut con, mut rx) = console();
        for b in "λ\n".as_bytes() {
            con.put_byte(*b);
        }
        assert_eq!(
            drain(&mut rx),
            vec![OutboundMessage::Stdout { text: "λ\n".into() }]
        );
    }
}
