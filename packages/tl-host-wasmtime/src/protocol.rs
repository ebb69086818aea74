use serde::{Deserialize, Serialize};

/// Front end → host. One JSON object per line on stdin, tagged by `type`.
///
/// Unknown discriminants fail to parse; the stdio loop logs and drops them
/// without surfacing an error to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// A single key press. `key` is either one printable character or a
    /// named key (`Enter`, `Backspace`); other named keys are ignored.
    Keydown { key: String },
    /// An arbitrary-length string appended to the input verbatim.
    Paste { text: String },
}

/// Host → front end. One JSON object per line on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Echo of accepted input, for local echo rendering.
    Stdin { text: String },
    /// Batched program output, emitted at line boundaries or explicit flush.
    Stdout { text: String },
    /// Prompts and error reports, flushed immediately.
    Stderr { text: String },
    /// Host lifecycle messages, not program output.
    System { text: String },
}
