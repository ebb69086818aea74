use crate::bridge::InputBuffer;
use crate::error::HostResult;
use crate::guest::{GuestControl, ReadOutcome, StepOutcome};

/// What the read–eval loop yielded control for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspend {
    /// The guest cannot proceed without more input; nothing was committed.
    MoreData,
    /// A guest read (top-level or in-evaluation) consumed the fed input;
    /// bytes fed so far are committed.
    EnoughData,
    /// The loop terminated. Terminal: the scheduler cannot be restarted.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    StartIteration,
    Reading,
    BeginApply(i32),
    Draining,
    Finished,
}

/// The read–eval–print loop as an explicit resumable state machine.
///
/// Each `step` runs until the guest either needs more input or the loop
/// terminates; a suspend is only ever issued at a point where the guest has
/// itself signaled "try again", so resumption re-invokes the same guest call
/// that yielded. The original host expressed this as a generator; the state
/// machine carries the continuation explicitly instead.
pub struct Scheduler {
    state: LoopState,
    /// Set while the drain loop is suspended on an in-evaluation read.
    apply_suspended: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: LoopState::StartIteration,
            apply_suspended: false,
        }
    }

    pub fn finished(&self) -> bool {
        self.state == LoopState::Finished
    }

    /// Advance the loop to its next suspend point.
    fn step<G: GuestControl>(&mut self, guest: &mut G) -> HostResult<Suspend> {
        loop {
            match self.state {
                LoopState::Finished => return Ok(Suspend::Finished),
                LoopState::StartIteration => {
                    if !guest.running() {
                        guest.console().sysprint("Program exited.\n");
                        self.state = LoopState::Finished;
                        return Ok(Suspend::Finished);
                    }
                    guest.clear_state()?;
                    guest.collect_garbage()?;
                    guest.console().eprint("> ");
                    self.state = LoopState::Reading;
                }
                LoopState::Reading => match guest.read_expression()? {
                    ReadOutcome::NeedMoreData => return Ok(Suspend::MoreData),
                    ReadOutcome::Expression(expr) => {
                        self.state = LoopState::BeginApply(expr);
                        return Ok(Suspend::EnoughData);
                    }
                },
                LoopState::BeginApply(expr) => {
                    guest.begin_apply(expr)?;
                    self.state = LoopState::Draining;
                }
                LoopState::Draining => {
                    loop {
                        let outcome = guest.apply_next()?;
                        if self.apply_suspended {
                            self.apply_suspended = false;
                            // The step only gets past the read that trapped
                            // by consuming the re-fed input, so progress here
                            // commits it just like a top-level read.
                            if outcome != StepOutcome::NeedMoreData {
                                return Ok(Suspend::EnoughData);
                            }
                        }
                        match outcome {
                            StepOutcome::Progress => continue,
                            StepOutcome::Done => break,
                            StepOutcome::NeedMoreData => {
                                self.apply_suspended = true;
                                return Ok(Suspend::MoreData);
                            }
                        }
                    }
                    let error = guest.last_error()?;
                    if error != 0 {
                        guest.console().eprint("Error: ");
                        guest.print_value(error)?;
                        guest.console().eprint("\n");
                    }
                    self.state = LoopState::StartIteration;
                }
            }
        }
    }

    /// Feed pending input to the guest and drive the loop until it stalls.
    ///
    /// The guest restarts an aborted parse from scratch, so every pass
    /// re-feeds the buffer from the front; bytes are only consumed from the
    /// buffer once a read commits (`EnoughData`). Stops when the guest wants
    /// more data and everything on hand has already been fed.
    pub fn crank<G: GuestControl>(
        &mut self,
        guest: &mut G,
        input: &mut InputBuffer,
    ) -> HostResult<()> {
        if self.finished() {
            return Ok(());
        }
        let mut first = true;
        while first || !input.is_empty() {
            first = false;
            let mut fed = 0;
            while fed < input.len() {
                if guest.feed_byte(input.byte_at(fed))? {
                    break; // guest buffer full
                }
                fed += 1;
            }
            match self.step(guest)? {
                Suspend::Finished => {
                    guest.console().sysprint("Main loop exited.\n");
                    return Ok(());
                }
                Suspend::MoreData => {
                    if fed == input.len() {
                        break;
                    }
                }
                Suspend::EnoughData => {
                    input.consume(fed);
                    // A committed read parks the loop just before
                    // evaluation; drive one more pass even if the buffer is
                    // now empty so the result is produced promptly.
                    first = true;
                }
            }
        }
        Ok(())
    }
}
