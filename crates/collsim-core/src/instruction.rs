//! The plan step value type interpreted by threadblocks

use std::fmt;

use crate::buffer::BufferKind;
use crate::error::{Error, Result};

/// Largest chunk count a single non-nop instruction may move
pub const MAX_CHUNKS_PER_STEP: usize = 71;

/// Largest number of instructions one threadblock may carry
pub const MAX_STEPS_PER_THREADBLOCK: usize = 256;

/// Operation kinds a plan step can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Intra-rank buffer-to-buffer copy
    Copy,
    /// Snapshot a source range and enqueue it on the send mailbox
    Send,
    /// Dequeue one message and write it to the destination range
    Recv,
    /// Receive-copy-send: receive into the destination, then forward the
    /// destination range on the send mailbox
    Rcs,
    /// No effect
    Nop,
}

impl OpKind {
    /// Parse the wire name used by plan documents
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cpy" => Ok(Self::Copy),
            "s" => Ok(Self::Send),
            "r" => Ok(Self::Recv),
            "rcs" => Ok(Self::Rcs),
            "nop" => Ok(Self::Nop),
            other => Err(Error::plan_load(format!("unknown operation `{other}`"))),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Send => write!(f, "send"),
            Self::Recv => write!(f, "recv"),
            Self::Rcs => write!(f, "rcs"),
            Self::Nop => write!(f, "nop"),
        }
    }
}

/// One plan step.
///
/// `dep_tbid`/`dep_step` name a step of a sibling threadblock that must
/// complete before this one runs; both are negative when the step has no
/// dependency. `has_dep` marks steps that *other* steps wait on, i.e. steps
/// whose completion must be published to the rank's completed-steps set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub step: usize,
    pub op: OpKind,
    pub src_buf: BufferKind,
    pub src_off: i64,
    pub dst_buf: BufferKind,
    pub dst_off: i64,
    pub num_chunks: usize,
    pub dep_tbid: i64,
    pub dep_step: i64,
    pub has_dep: bool,
}

impl Instruction {
    /// Enforce the parse-time invariants:
    /// chunk counts in `1..=MAX_CHUNKS_PER_STEP` unless the op is a nop,
    /// identical source and destination for `rcs`, and dependency fields
    /// that are either both non-negative or both negative.
    pub fn validate(&self) -> Result<()> {
        if self.op != OpKind::Nop
            && !(1..=MAX_CHUNKS_PER_STEP).contains(&self.num_chunks)
        {
            return Err(Error::plan_load(format!(
                "step {}: chunk count must be between 1 and {MAX_CHUNKS_PER_STEP}, got {}",
                self.step, self.num_chunks
            )));
        }
        if self.op == OpKind::Rcs
            && (self.src_buf != self.dst_buf || self.src_off != self.dst_off)
        {
            return Err(Error::plan_shape(format!(
                "step {}: rcs requires matching source and destination, got {}@{} -> {}@{}",
                self.step, self.src_buf, self.src_off, self.dst_buf, self.dst_off
            )));
        }
        if (self.dep_tbid < 0) != (self.dep_step < 0) {
            return Err(Error::plan_load(format!(
                "step {}: dependency fields must be declared together, got depid {} deps {}",
                self.step, self.dep_tbid, self.dep_step
            )));
        }
        Ok(())
    }

    /// The sibling step this instruction waits on, if any
    pub fn dependency(&self) -> Option<(usize, usize)> {
        if self.dep_tbid >= 0 && self.dep_step >= 0 {
            Some((self.dep_tbid as usize, self.dep_step as usize))
        } else {
            None
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Inst {{ step: {}, op: {}, src_buf: {}, src_off: {}, dst_buf: {}, dst_off: {}, num_chunks: {}, dep_tbid: {}, dep_step: {}, has_dep: {} }}",
            self.step,
            self.op,
            self.src_buf,
            self.src_off,
            self.dst_buf,
            self.dst_off,
            self.num_chunks,
            self.dep_tbid,
            self.dep_step,
            self.has_dep
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_inst(num_chunks: usize) -> Instruction {
        Instruction {
            step: 0,
            op: OpKind::Copy,
            src_buf: BufferKind::Input,
            src_off: 0,
            dst_buf: BufferKind::Output,
            dst_off: 0,
            num_chunks,
            dep_tbid: -1,
            dep_step: -1,
            has_dep: false,
        }
    }

    #[test]
    fn test_op_kind_wire_names() {
        assert_eq!(OpKind::parse("cpy").unwrap(), OpKind::Copy);
        assert_eq!(OpKind::parse("s").unwrap(), OpKind::Send);
        assert_eq!(OpKind::parse("r").unwrap(), OpKind::Recv);
        assert_eq!(OpKind::parse("rcs").unwrap(), OpKind::Rcs);
        assert_eq!(OpKind::parse("nop").unwrap(), OpKind::Nop);
        assert!(OpKind::parse("reduce").is_err());
    }

    #[test]
    fn test_chunk_count_bounds() {
        assert!(copy_inst(1).validate().is_ok());
        assert!(copy_inst(MAX_CHUNKS_PER_STEP).validate().is_ok());
        assert!(copy_inst(0).validate().is_err());
        assert!(copy_inst(MAX_CHUNKS_PER_STEP + 1).validate().is_err());
    }

    #[test]
    fn test_nop_skips_chunk_count_check() {
        let mut inst = copy_inst(0);
        inst.op = OpKind::Nop;
        assert!(inst.validate().is_ok());
    }

    #[test]
    fn test_rcs_requires_matching_source_and_destination() {
        let mut inst = copy_inst(1);
        inst.op = OpKind::Rcs;
        assert!(inst.validate().is_err());

        inst.dst_buf = BufferKind::Input;
        assert!(inst.validate().is_ok());

        inst.dst_off = 3;
        assert!(inst.validate().is_err());
    }

    #[test]
    fn test_dependency_fields_declared_together() {
        let mut inst = copy_inst(1);
        inst.dep_tbid = 2;
        assert!(inst.validate().is_err());

        inst.dep_step = 0;
        assert!(inst.validate().is_ok());
        assert_eq!(inst.dependency(), Some((2, 0)));

        inst.dep_tbid = -1;
        inst.dep_step = -1;
        assert!(inst.validate().is_ok());
        assert_eq!(inst.dependency(), None);
    }
}
