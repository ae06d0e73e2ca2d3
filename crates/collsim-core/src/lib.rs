//! Functional simulator and correctness verifier engine for GPU
//! collective-communication plans.
//!
//! A plan describes, for every rank and threadblock, an ordered list of
//! copy/send/recv steps over three symbolic buffers. The engine
//! instantiates each rank's threadblocks as concurrent workers, wires
//! point-to-point mailboxes between them through a two-phase rendezvous,
//! interprets the steps against the buffers, and exposes data init/check
//! hooks for the collective verifiers built on top.
//!
//! ## Concurrency model
//!
//! Plain threads, fanned out twice: one worker per rank, and inside each,
//! one worker per threadblock. Within a threadblock, steps execute in index
//! order; across threadblocks, ordering is only what the plan's explicit
//! `(threadblock, step)` dependency edges require. Every potentially
//! blocking wait polls with a bounded budget ([`MAX_TRIES`] attempts of
//! [`SLEEP_TIME`] each, ~100 ms total), so plan bugs surface as timeout
//! errors instead of deadlocks.

pub mod buffer;
pub mod error;
pub mod group;
pub mod instruction;
pub mod mailbox;
pub mod plan;
pub mod rank;
pub mod threadblock;

pub use buffer::{BufferKind, BufferSet, Chunk};
pub use error::{Error, Result};
pub use group::CommGroup;
pub use instruction::{Instruction, OpKind, MAX_CHUNKS_PER_STEP, MAX_STEPS_PER_THREADBLOCK};
pub use mailbox::{ChannelKey, Mailbox, MailboxManager, Message, MAX_TRIES, SLEEP_TIME};
pub use plan::{GpuPlan, Plan, ThreadBlockPlan, MAX_CHANNELS, MAX_NODES_PER_RANK, MAX_THREADBLOCKS_PER_RANK};
pub use rank::{GpuRank, StepId};
pub use threadblock::ThreadBlock;
