//! The root aggregate: owns every rank and the mailbox manager

use std::thread;

use crate::buffer::Chunk;
use crate::error::Result;
use crate::mailbox::MailboxManager;
use crate::plan::Plan;
use crate::rank::{join_worker, GpuRank};

/// A communication group built from a validated plan.
///
/// The group exclusively owns the mailbox manager and all ranks; ranks own
/// their threadblocks and buffers. One full verification iteration is
/// `init_data -> execute -> check_data -> no_pending_messages`.
#[derive(Debug)]
pub struct CommGroup {
    collective: String,
    num_channels: u32,
    num_chunks: usize,
    ranks: Vec<GpuRank>,
    manager: MailboxManager,
}

impl CommGroup {
    /// Build every rank concurrently, then require a fully paired,
    /// well-formed channel layout.
    ///
    /// Ranks must initialize in parallel: a receiving endpoint on one rank
    /// polls for the pending registration of a sending endpoint on another.
    #[tracing::instrument(skip(plan), fields(ranks = plan.num_ranks()))]
    pub fn from_plan(plan: &Plan) -> Result<Self> {
        let manager = MailboxManager::new();
        let ranks = thread::scope(|scope| {
            let manager = &manager;
            let handles: Vec<_> = plan
                .gpus
                .iter()
                .map(|gpu| scope.spawn(move || GpuRank::from_plan(gpu, manager)))
                .collect();
            handles
                .into_iter()
                .map(join_worker)
                .collect::<Result<Vec<_>>>()
        })?;
        manager.no_pending_connections()?;
        manager.valid_channel_layout()?;
        tracing::info!(
            ranks = ranks.len(),
            channels = plan.num_channels,
            chunks = plan.num_chunks,
            collective = %plan.collective,
            "communication group built"
        );
        Ok(Self {
            collective: plan.collective.clone(),
            num_channels: plan.num_channels,
            num_chunks: plan.num_chunks,
            ranks,
            manager,
        })
    }

    /// Run one worker per rank, each driving its threadblocks; join all.
    pub fn execute(&self) -> Result<()> {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .ranks
                .iter()
                .map(|rank| scope.spawn(move || rank.execute()))
                .collect();
            handles.into_iter().try_for_each(join_worker)
        })
    }

    /// Fan the init hook out to every rank
    pub fn init_data<F>(&self, init_fn: &F, input_len: usize) -> Result<()>
    where
        F: Fn(usize, usize) -> Chunk,
    {
        for rank in &self.ranks {
            rank.init_data(init_fn, input_len)?;
        }
        Ok(())
    }

    /// Fan the check hook out to every rank
    pub fn check_data<F>(&self, check_fn: &F, output_len: usize) -> Result<()>
    where
        F: Fn(usize, usize) -> Chunk,
    {
        for rank in &self.ranks {
            rank.check_data(check_fn, output_len)?;
        }
        Ok(())
    }

    /// Collective name declared by the plan's root `coll` attribute
    pub fn collective(&self) -> &str {
        &self.collective
    }

    pub fn num_ranks(&self) -> usize {
        self.ranks.len()
    }

    pub fn rank(&self, rank_id: usize) -> Option<&GpuRank> {
        self.ranks.get(rank_id)
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn mailbox_manager(&self) -> &MailboxManager {
        &self.manager
    }
}
