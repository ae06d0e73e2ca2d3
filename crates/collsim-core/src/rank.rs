//! One simulated GPU participant in the collective

use std::collections::HashSet;
use std::thread;

use parking_lot::Mutex;

use crate::buffer::{BufferKind, BufferSet, Chunk};
use crate::error::{Error, Result};
use crate::mailbox::MailboxManager;
use crate::plan::GpuPlan;
use crate::threadblock::ThreadBlock;

/// A completed (threadblock, step) pair that sibling threadblocks wait on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId {
    pub tbid: usize,
    pub step: usize,
}

/// One rank: three symbolic buffers, a set of threadblocks, and the
/// registry of completed steps that carries cross-threadblock dependencies.
#[derive(Debug)]
pub struct GpuRank {
    rank_id: usize,
    buffers: BufferSet,
    threadblocks: Vec<ThreadBlock>,
    completed: Mutex<HashSet<StepId>>,
}

impl GpuRank {
    /// Build one rank: allocate the buffers declared in the plan and
    /// connect every threadblock concurrently, so that mailbox rendezvous
    /// can match endpoints across threadblocks and across ranks.
    pub(crate) fn from_plan(plan: &GpuPlan, manager: &MailboxManager) -> Result<Self> {
        let buffers = BufferSet::new(plan.i_chunks, plan.o_chunks, plan.s_chunks);
        let threadblocks = thread::scope(|scope| {
            let handles: Vec<_> = plan
                .threadblocks
                .iter()
                .map(|tb_plan| scope.spawn(move || ThreadBlock::connect(tb_plan, plan.rank_id, manager)))
                .collect();
            handles
                .into_iter()
                .map(join_worker)
                .collect::<Result<Vec<_>>>()
        })?;
        tracing::debug!(
            rank = plan.rank_id,
            threadblocks = threadblocks.len(),
            "rank initialized"
        );
        Ok(Self {
            rank_id: plan.rank_id,
            buffers,
            threadblocks,
            completed: Mutex::new(HashSet::new()),
        })
    }

    /// Run one worker per threadblock and join them all; the rank completes
    /// when every threadblock completes. The completed-steps registry is
    /// reset first so each iteration carries its own dependency edges.
    pub(crate) fn execute(&self) -> Result<()> {
        self.completed.lock().clear();
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .threadblocks
                .iter()
                .map(|tb| scope.spawn(move || tb.execute_instructions(self)))
                .collect();
            handles.into_iter().try_for_each(join_worker)
        })
    }

    pub fn rank_id(&self) -> usize {
        self.rank_id
    }

    pub fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    pub fn threadblock(&self, tbid: usize) -> Option<&ThreadBlock> {
        self.threadblocks.get(tbid)
    }

    pub fn num_threadblocks(&self) -> usize {
        self.threadblocks.len()
    }

    pub(crate) fn publish_completed(&self, id: StepId) {
        self.completed.lock().insert(id);
    }

    pub(crate) fn completed_contains(&self, id: StepId) -> bool {
        self.completed.lock().contains(&id)
    }

    /// Fill the input buffer: `input[i] = init_fn(rank_id, i)`
    pub fn init_data<F>(&self, init_fn: &F, input_len: usize) -> Result<()>
    where
        F: Fn(usize, usize) -> Chunk,
    {
        let actual = self.buffers.len(BufferKind::Input);
        if actual != input_len {
            return Err(Error::BufferSizeMismatch {
                rank: self.rank_id,
                kind: BufferKind::Input,
                expected: input_len,
                actual,
            });
        }
        self.buffers
            .fill_with(BufferKind::Input, |i| init_fn(self.rank_id, i));
        Ok(())
    }

    /// Compare the output buffer against the expectation hook; the first
    /// mismatching index fails the whole run.
    pub fn check_data<F>(&self, check_fn: &F, output_len: usize) -> Result<()>
    where
        F: Fn(usize, usize) -> Chunk,
    {
        let actual = self.buffers.len(BufferKind::Output);
        if actual != output_len {
            return Err(Error::BufferSizeMismatch {
                rank: self.rank_id,
                kind: BufferKind::Output,
                expected: output_len,
                actual,
            });
        }
        let output = self.buffers.snapshot(BufferKind::Output);
        for (index, chunk) in output.iter().enumerate() {
            let expected = check_fn(self.rank_id, index);
            if *chunk != expected {
                return Err(Error::DataMismatch {
                    rank: self.rank_id,
                    index,
                    expected,
                    actual: chunk.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Join a worker, propagating its result; a panicking worker is a bug and
/// its panic is resumed on the joining thread.
pub(crate) fn join_worker<T>(handle: thread::ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
