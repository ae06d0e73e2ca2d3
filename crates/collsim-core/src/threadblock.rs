//! Threadblock endpoint resolution and the per-step instruction interpreter

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::buffer::{BufferKind, Chunk};
use crate::error::{Error, Result};
use crate::instruction::{Instruction, OpKind};
use crate::mailbox::{ChannelKey, Mailbox, MailboxManager, Message, MAX_TRIES, SLEEP_TIME};
use crate::plan::ThreadBlockPlan;
use crate::rank::{GpuRank, StepId};

/// One concurrent worker within a rank: an ordered instruction list plus at
/// most one send and one receive mailbox endpoint on a single channel.
#[derive(Debug)]
pub struct ThreadBlock {
    tbid: usize,
    send_peer: Option<usize>,
    recv_peer: Option<usize>,
    chan: u32,
    send_mailbox: Option<Arc<Mailbox>>,
    recv_mailbox: Option<Arc<Mailbox>>,
    instructions: Vec<Instruction>,
}

impl ThreadBlock {
    /// Resolve the mailbox endpoints against the manager and take over the
    /// instruction list. Runs concurrently with every other threadblock in
    /// the group so the two endpoints of a link can arrive in either order.
    pub(crate) fn connect(
        plan: &ThreadBlockPlan,
        rank_id: usize,
        manager: &MailboxManager,
    ) -> Result<Self> {
        let send_mailbox = match plan.send_peer {
            Some(peer) => {
                let key = ChannelKey {
                    send_rank: rank_id,
                    recv_rank: peer,
                    chan: plan.chan,
                };
                let (mailbox, created) = manager.send_mailbox(key);
                tracing::debug!(
                    rank = rank_id,
                    tbid = plan.tbid,
                    peer,
                    chan = plan.chan,
                    created,
                    "send endpoint ready"
                );
                Some(mailbox)
            }
            None => None,
        };
        let recv_mailbox = match plan.recv_peer {
            Some(peer) => {
                let key = ChannelKey {
                    send_rank: peer,
                    recv_rank: rank_id,
                    chan: plan.chan,
                };
                let mailbox = manager.recv_mailbox(key).ok_or(Error::RendezvousTimeout {
                    rank: rank_id,
                    tbid: plan.tbid,
                    send_rank: peer,
                    recv_rank: rank_id,
                    chan: plan.chan,
                })?;
                tracing::debug!(
                    rank = rank_id,
                    tbid = plan.tbid,
                    peer,
                    chan = plan.chan,
                    "recv endpoint ready"
                );
                Some(mailbox)
            }
            None => None,
        };
        Ok(Self {
            tbid: plan.tbid,
            send_peer: plan.send_peer,
            recv_peer: plan.recv_peer,
            chan: plan.chan,
            send_mailbox,
            recv_mailbox,
            instructions: plan.instructions.clone(),
        })
    }

    pub fn tbid(&self) -> usize {
        self.tbid
    }

    pub fn send_peer(&self) -> Option<usize> {
        self.send_peer
    }

    pub fn recv_peer(&self) -> Option<usize> {
        self.recv_peer
    }

    pub fn chan(&self) -> u32 {
        self.chan
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Run every step in index order, preceded by a uniformly random jitter
    /// in `[0, MAX_TRIES * SLEEP_TIME]` that breaks startup synchronization
    /// between workers and shakes out ordering races.
    pub(crate) fn execute_instructions(&self, rank: &GpuRank) -> Result<()> {
        let max_jitter_us = SLEEP_TIME.as_micros() as u64 * MAX_TRIES as u64;
        let jitter_us = rand::thread_rng().gen_range(0..=max_jitter_us);
        std::thread::sleep(Duration::from_micros(jitter_us));

        for step in 0..self.instructions.len() {
            self.execute_step(step, rank)?;
        }
        Ok(())
    }

    /// Execute one step: wait for its declared dependency, dispatch on the
    /// op, then publish completion when other steps depend on this one.
    pub(crate) fn execute_step(&self, step: usize, rank: &GpuRank) -> Result<()> {
        let inst = &self.instructions[step];
        if let Some((dep_tbid, dep_step)) = inst.dependency() {
            self.wait_for_dependency(rank, step, dep_tbid, dep_step)?;
        }

        match inst.op {
            OpKind::Nop => {}
            OpKind::Copy => {
                let chunks = self.read_range(rank, inst.src_buf, inst.src_off, inst.num_chunks, step)?;
                self.write_range(rank, inst.dst_buf, inst.dst_off, &chunks, step)?;
            }
            OpKind::Send => {
                let chunks = self.read_range(rank, inst.src_buf, inst.src_off, inst.num_chunks, step)?;
                self.enqueue(
                    Message {
                        chunks,
                        src_buf: inst.src_buf,
                        src_off: inst.src_off,
                        dst_buf: inst.dst_buf,
                        dst_off: inst.dst_off,
                    },
                    step,
                )?;
            }
            OpKind::Recv => {
                self.receive_into_destination(inst, rank, step)?;
            }
            OpKind::Rcs => {
                let mut msg = self.receive_into_destination(inst, rank, step)?;
                // Forwarded payload is re-read from the destination just
                // written, not taken from the received message: a combine
                // step slots in between the write and this read.
                msg.chunks =
                    self.read_range(rank, inst.dst_buf, inst.dst_off, msg.chunks.len(), step)?;
                msg.src_buf = msg.dst_buf;
                msg.src_off = msg.dst_off;
                self.enqueue(msg, step)?;
            }
        }

        if inst.has_dep {
            rank.publish_completed(StepId {
                tbid: self.tbid,
                step,
            });
            tracing::trace!(rank = rank.rank_id(), tbid = self.tbid, step, "step published");
        }
        Ok(())
    }

    /// Poll the rank's completed-steps set for `(dep_tbid, dep_step)` with
    /// the engine-wide bounded budget.
    fn wait_for_dependency(
        &self,
        rank: &GpuRank,
        step: usize,
        dep_tbid: usize,
        dep_step: usize,
    ) -> Result<()> {
        let id = StepId {
            tbid: dep_tbid,
            step: dep_step,
        };
        for _ in 0..MAX_TRIES {
            if rank.completed_contains(id) {
                return Ok(());
            }
            std::thread::sleep(SLEEP_TIME);
        }
        Err(Error::DependencyTimeout {
            rank: rank.rank_id(),
            tbid: self.tbid,
            step,
            dep_tbid,
            dep_step,
        })
    }

    /// Dequeue one message, assert its metadata equals the instruction, and
    /// write the payload into the destination buffer. Returns the message
    /// so `rcs` can forward from the destination.
    fn receive_into_destination(
        &self,
        inst: &Instruction,
        rank: &GpuRank,
        step: usize,
    ) -> Result<Message> {
        let Some(mailbox) = &self.recv_mailbox else {
            return Err(Error::plan_shape(format!(
                "threadblock {} has no recv endpoint for step {step}",
                self.tbid
            )));
        };
        let msg = mailbox.receive().ok_or(Error::ReceiveTimeout {
            rank: rank.rank_id(),
            tbid: self.tbid,
            step,
        })?;

        if msg.src_buf != inst.src_buf
            || msg.src_off != inst.src_off
            || msg.dst_buf != inst.dst_buf
            || msg.dst_off != inst.dst_off
            || msg.chunks.len() != inst.num_chunks
        {
            return Err(Error::MessageMismatch {
                rank: rank.rank_id(),
                tbid: self.tbid,
                step,
                detail: format!(
                    "instruction expects {}@{} -> {}@{} count {}, message carries {}@{} -> {}@{} count {}",
                    inst.src_buf,
                    inst.src_off,
                    inst.dst_buf,
                    inst.dst_off,
                    inst.num_chunks,
                    msg.src_buf,
                    msg.src_off,
                    msg.dst_buf,
                    msg.dst_off,
                    msg.chunks.len()
                ),
            });
        }
        self.write_range(rank, inst.dst_buf, inst.dst_off, &msg.chunks, step)?;
        Ok(msg)
    }

    fn enqueue(&self, msg: Message, step: usize) -> Result<()> {
        let Some(mailbox) = &self.send_mailbox else {
            return Err(Error::plan_shape(format!(
                "threadblock {} has no send endpoint for step {step}",
                self.tbid
            )));
        };
        mailbox.send(msg);
        Ok(())
    }

    fn read_range(
        &self,
        rank: &GpuRank,
        kind: BufferKind,
        offset: i64,
        count: usize,
        step: usize,
    ) -> Result<Vec<Chunk>> {
        rank.buffers()
            .read_range(kind, offset, count)
            .ok_or_else(|| self.bounds_error(rank, kind, offset, count, step))
    }

    fn write_range(
        &self,
        rank: &GpuRank,
        kind: BufferKind,
        offset: i64,
        chunks: &[Chunk],
        step: usize,
    ) -> Result<()> {
        if rank.buffers().write_range(kind, offset, chunks) {
            Ok(())
        } else {
            Err(self.bounds_error(rank, kind, offset, chunks.len(), step))
        }
    }

    fn bounds_error(
        &self,
        rank: &GpuRank,
        kind: BufferKind,
        offset: i64,
        count: usize,
        step: usize,
    ) -> Error {
        Error::BufferBounds {
            rank: rank.rank_id(),
            tbid: self.tbid,
            step,
            kind,
            offset,
            count,
            len: rank.buffers().len(kind),
        }
    }
}
