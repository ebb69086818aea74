use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::UnboundedSender;

use crate::console::Console;
use crate::error::HostResult;
use crate::guest::{GuestControl, ReadOutcome, StepOutcome};
use crate::protocol::OutboundMessage;

/// Scripted stand-in for the WASM guest.
///
/// Models the observable contract the scheduler relies on: a bounded input
/// buffer fed byte-by-byte, a read that either commits one newline-terminated
/// expression or loses its partial parse (the host re-feeds uncommitted
/// input), and an apply phase that produces one scripted result line per
/// expression.
pub struct MockGuest {
    console: Console,
    buffer: Vec<u8>,
    capacity: usize,
    consumed: Vec<u8>,
    results: HashMap<String, String>,
    error_lines: HashSet<String>,
    input_requests: HashSet<String>,
    halt_on: Option<String>,
    exprs: Vec<String>,
    pending: Option<i32>,
    errored: bool,
    running: bool,
}

impl MockGuest {
    pub fn new(tx: UnboundedSender<OutboundMessage>) -> Self {
        Self {
            console: Console::new(tx),
            buffer: Vec::new(),
            capacity: 256,
            consumed: Vec::new(),
            results: HashMap::new(),
            error_lines: HashSet::new(),
            input_requests: HashSet::new(),
            halt_on: None,
            exprs: Vec::new(),
            pending: None,
            errored: false,
            running: true,
        }
    }

    /// Cap the guest-side input buffer (default 256, like the real guest).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Script the value printed when `expr` is evaluated.
    pub fn with_result(mut self, expr: &str, value: &str) -> Self {
        self.results.insert(expr.into(), value.into());
        self
    }

    /// Make evaluating `expr` leave the error slot set.
    pub fn with_error_on(mut self, expr: &str) -> Self {
        self.error_lines.insert(expr.into());
        self
    }

    /// Make evaluating `expr` read one newline-terminated line of input
    /// mid-evaluation and print it back.
    pub fn with_input_request(mut self, expr: &str) -> Self {
        self.input_requests.insert(expr.into());
        self
    }

    /// Make evaluating `line` halt the guest.
    pub fn with_halt_on(mut self, line: &str) -> Self {
        self.halt_on = Some(line.into());
        self
    }

    /// Bytes committed by successful reads, in order.
    pub fn consumed(&self) -> &[u8] {
        &self.consumed
    }
}

impl GuestControl for MockGuest {
    fn clear_state(&mut self) -> HostResult<()> {
        self.errored = false;
        Ok(())
    }

    fn collect_garbage(&mut self) -> HostResult<()> {
        Ok(())
    }

    fn feed_byte(&mut self, byte: u8) -> HostResult<bool> {
        if self.buffer.len() >= self.capacity {
            return Ok(true);
        }
        self.buffer.push(byte);
        Ok(false)
    }

    fn read_expression(&mut self) -> HostResult<ReadOutcome> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            None => {
                // An aborted parse drains the guest buffer; the host holds
                // the uncommitted bytes and re-feeds them.
                self.buffer.clear();
                Ok(ReadOutcome::NeedMoreData)
            }
            Some(nl) => {
                let line: Vec<u8> = self.buffer.drain(..=nl).collect();
                let text = String::from_utf8_lossy(&line[..nl]).into_owned();
                self.consumed.extend_from_slice(&line);
                self.exprs.push(text);
                Ok(ReadOutcome::Expression(self.exprs.len() as i32 - 1))
            }
        }
    }

    fn begin_apply(&mut self, expr: i32) -> HostResult<()> {
        self.pending = Some(expr);
        Ok(())
    }

    fn apply_next(&mut self) -> HostResult<StepOutcome> {
        let Some(ix) = self.pending.take() else {
            return Ok(StepOutcome::Done);
        };
        let line = self.exprs[ix as usize].clone();
        if self.input_requests.contains(&line) {
            let Some(nl) = self.buffer.iter().position(|&b| b == b'\n') else {
                // An in-evaluation read loses its partial parse the same way
                // a top-level one does; the step re-runs on resume.
                self.buffer.clear();
                self.pending = Some(ix);
                return Ok(StepOutcome::NeedMoreData);
            };
            let taken: Vec<u8> = self.buffer.drain(..=nl).collect();
            let text = String::from_utf8_lossy(&taken[..nl]).into_owned();
            self.consumed.extend_from_slice(&taken);
            self.console.print(&format!("{text}\n"));
            return Ok(StepOutcome::Progress);
        }
        if self.halt_on.as_deref() == Some(line.as_str()) {
            self.running = false;
            self.console.sysprint("\nProcess exited with code 0");
        } else if self.error_lines.contains(&line) {
            self.errored = true;
        } else {
            let value = self.results.get(&line).cloned().unwrap_or(line);
            self.console.print(&format!("{value}\n"));
        }
        Ok(StepOutcome::Progress)
    }

    fn last_error(&mut self) -> HostResult<i32> {
        Ok(i32::from(self.errored))
    }

    fn print_value(&mut self, _value: i32) -> HostResult<()> {
        self.console.print("#error");
        Ok(())
    }

    fn running(&self) -> bool {
        self.running
    }

    fn console(&mut self) -> &mut Console {
        &mut self.console
    }
}
