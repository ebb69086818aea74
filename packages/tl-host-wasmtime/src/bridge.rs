use crate::error::HostResult;
use crate::guest::GuestControl;
use crate::protocol::InboundMessage;
use crate::scheduler::Scheduler;

/// Pending input bytes, appended by the bridge and consumed from the front
/// by the scheduler when the guest commits a read. Strictly FIFO.
#[derive(Debug, Default)]
pub struct InputBuffer {
    bytes: Vec<u8>,
}

impl InputBuffer {
    pub fn append(&mut self, text: &str) {
        self.bytes.extend_from_slice(text.as_bytes());
    }

    /// Remove the most recently appended byte, if any. Only unconsumed
    /// input can be taken back.
    pub fn pop_last(&mut self) -> bool {
        self.bytes.pop().is_some()
    }

    pub fn byte_at(&self, ix: usize) -> u8 {
        self.bytes[ix]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop `n` committed bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.bytes.drain(..n);
    }
}

/// Translates front-end events into input bytes and wakes the scheduler.
///
/// Wake-then-drain: every accepted event cranks immediately rather than
/// batching, so output latency is bounded by the guest, not the bridge.
pub struct MessageBridge<G: GuestControl> {
    guest: G,
    scheduler: Scheduler,
    input: InputBuffer,
}

impl<G: GuestControl> MessageBridge<G> {
    pub fn new(guest: G) -> Self {
        Self {
            guest,
            scheduler: Scheduler::new(),
            input: InputBuffer::default(),
        }
    }

    /// Run the loop up to its first suspend point (prints the initial
    /// prompt). Call once after instantiation.
    pub fn start(&mut self) -> HostResult<()> {
        self.scheduler.crank(&mut self.guest, &mut self.input)
    }

    pub fn handle(&mut self, msg: InboundMessage) -> HostResult<()> {
        match msg {
            InboundMessage::Keydown { key } => match key.as_str() {
                "Enter" => self.accept("\n"),
                "Backspace" => {
                    if self.input.pop_last() {
                        // Ask the front end to erase one visual character;
                        // bytes the guest already consumed are not affected.
                        self.guest.console().echo("\u{8}");
                    }
                    self.scheduler.crank(&mut self.guest, &mut self.input)
                }
                k if k.chars().count() == 1 => self.accept(k),
                other => {
                    tracing::debug!(key = other, "ignoring non-printable key");
                    Ok(())
                }
            },
            InboundMessage::Paste { text } => {
                if text.is_empty() {
                    return Ok(());
                }
                self.accept(&text)
            }
        }
    }

    fn accept(&mut self, text: &str) -> HostResult<()> {
        self.input.append(text);
        self.guest.console().echo(text);
        self.scheduler.crank(&mut self.guest, &mut self.input)
    }

    pub fn finished(&self) -> bool {
        self.scheduler.finished()
    }

    pub fn guest_mut(&mut self) -> &mut G {
        &mut self.guest
    }
}
