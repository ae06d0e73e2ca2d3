//! Error types for plan loading and execution

use crate::buffer::BufferKind;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading or executing a collective plan
///
/// Every execution-time variant names the rank, threadblock, and step it
/// arose from; errors propagate to the nearest iteration boundary and
/// terminate the run. Nothing is silently recovered.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or unparsable attribute, out-of-range value, misordered id
    #[error("plan load error: {0}")]
    PlanLoad(String),

    /// Structurally invalid plan: self-loop peers, op ordering, size limits
    #[error("plan shape error: {0}")]
    PlanShape(String),

    /// The plan document is not well-formed XML
    #[error("xml error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// A receiving endpoint never found its sender's pending mailbox
    #[error("rendezvous timed out: rank {rank} threadblock {tbid} waiting for link {send_rank} -> {recv_rank} on channel {chan}")]
    RendezvousTimeout {
        rank: usize,
        tbid: usize,
        send_rank: usize,
        recv_rank: usize,
        chan: u32,
    },

    /// A declared (threadblock, step) dependency never completed in time
    #[error("dependency unmet: rank {rank} threadblock {tbid} step {step} waited on threadblock {dep_tbid} step {dep_step}")]
    DependencyTimeout {
        rank: usize,
        tbid: usize,
        step: usize,
        dep_tbid: usize,
        dep_step: usize,
    },

    /// A mailbox receive exhausted its polling budget
    #[error("receive timed out: rank {rank} threadblock {tbid} step {step}")]
    ReceiveTimeout { rank: usize, tbid: usize, step: usize },

    /// Instruction offsets extend past the buffer length
    #[error("buffer bounds: rank {rank} threadblock {tbid} step {step}: {kind} buffer holds {len} chunks, instruction spans offset {offset} count {count}")]
    BufferBounds {
        rank: usize,
        tbid: usize,
        step: usize,
        kind: BufferKind,
        offset: i64,
        count: usize,
        len: usize,
    },

    /// Received message metadata disagrees with the receiver's instruction
    #[error("message mismatch: rank {rank} threadblock {tbid} step {step}: {detail}")]
    MessageMismatch {
        rank: usize,
        tbid: usize,
        step: usize,
        detail: String,
    },

    /// A buffer does not have the size a data hook expects
    #[error("buffer size mismatch: rank {rank} {kind} buffer holds {actual} chunks, expected {expected}")]
    BufferSizeMismatch {
        rank: usize,
        kind: BufferKind,
        expected: usize,
        actual: usize,
    },

    /// The output buffer disagrees with the expected chunk
    #[error("data mismatch: rank {rank} output index {index}: expected {expected:?}, got {actual:?}")]
    DataMismatch {
        rank: usize,
        index: usize,
        expected: String,
        actual: String,
    },

    /// A mailbox still holds messages after an iteration
    #[error("residual message in mailbox {send_rank} -> {recv_rank} on channel {chan}")]
    ResidualMessage {
        send_rank: usize,
        recv_rank: usize,
        chan: u32,
    },

    /// A sender requested a mailbox that no receiver ever picked up
    #[error("pending connection never paired: {send_rank} -> {recv_rank} on channel {chan}")]
    ResidualPendingConnection {
        send_rank: usize,
        recv_rank: usize,
        chan: u32,
    },

    /// A rank appears more than once as sender or receiver within a channel
    #[error("invalid channel layout: rank {rank} appears more than once as {role} in channel {chan}")]
    InvalidChannelLayout {
        rank: usize,
        role: &'static str,
        chan: u32,
    },
}

impl Error {
    /// Create a plan load error
    pub fn plan_load(msg: impl Into<String>) -> Self {
        Self::PlanLoad(msg.into())
    }

    /// Create a plan shape error
    pub fn plan_shape(msg: impl Into<String>) -> Self {
        Self::PlanShape(msg.into())
    }
}
