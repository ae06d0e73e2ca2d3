//! Plan documents: the XML schedule tree parsed into validated plain data
//!
//! A plan describes one collective as `rank x threadblock x step`:
//!
//! ```text
//! <algo coll="allgather" ngpus="2" nchannels="1" nchunksperloop="2" outofplace="1">
//!   <gpu id="0" i_chunks="1" o_chunks="2" s_chunks="0">
//!     <tb id="0" send="1" recv="1" chan="0">
//!       <step s="0" type="cpy" srcbuf="i" srcoff="0" dstbuf="o" dstoff="0"
//!             cnt="1" depid="-1" deps="-1" hasdep="0"/>
//!     </tb>
//!   </gpu>
//! </algo>
//! ```
//!
//! Attribute presence is strict: a missing attribute is a fatal load error.
//! Unknown attributes are ignored; unknown ops, buffers, and every ordering
//! or bound violation are fatal.

use std::fmt::Display;
use std::str::FromStr;

use crate::buffer::BufferKind;
use crate::error::{Error, Result};
use crate::instruction::{Instruction, OpKind, MAX_STEPS_PER_THREADBLOCK};

/// Largest number of channels a plan may declare
pub const MAX_CHANNELS: u32 = 32;

/// Largest number of threadblocks one rank may declare
pub const MAX_THREADBLOCKS_PER_RANK: usize = 77;

/// Largest number of XML nodes under one rank (the rank node itself, one
/// per threadblock, one per step)
pub const MAX_NODES_PER_RANK: usize = 4096;

/// A fully validated plan document
#[derive(Debug, Clone)]
pub struct Plan {
    /// Collective name from the root `coll` attribute, verifier-visible
    pub collective: String,
    pub num_channels: u32,
    pub num_chunks: usize,
    pub gpus: Vec<GpuPlan>,
}

/// One rank's slice of the plan
#[derive(Debug, Clone)]
pub struct GpuPlan {
    pub rank_id: usize,
    pub i_chunks: usize,
    pub o_chunks: usize,
    pub s_chunks: usize,
    pub threadblocks: Vec<ThreadBlockPlan>,
}

/// One threadblock's slice of the plan. Peers are `None` when the wire
/// value is negative (the threadblock never sends or never receives).
#[derive(Debug, Clone)]
pub struct ThreadBlockPlan {
    pub tbid: usize,
    pub send_peer: Option<usize>,
    pub recv_peer: Option<usize>,
    pub chan: u32,
    pub instructions: Vec<Instruction>,
}

impl Plan {
    /// Parse and validate a plan document from XML text
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        Self::from_root(doc.root_element())
    }

    fn from_root(root: roxmltree::Node<'_, '_>) -> Result<Self> {
        let collective = attr(root, "coll")?.to_string();
        let num_ranks: usize = parse_attr(root, "ngpus")?;
        let num_channels: u32 = parse_attr(root, "nchannels")?;
        if num_channels > MAX_CHANNELS {
            return Err(Error::plan_shape(format!(
                "number of channels exceeds the limit of {MAX_CHANNELS}, got {num_channels}"
            )));
        }
        let num_chunks: usize = parse_attr(root, "nchunksperloop")?;
        if !num_chunks.is_power_of_two() {
            return Err(Error::plan_shape(format!(
                "number of chunks must be a power of two, got {num_chunks}"
            )));
        }
        let out_of_place: i64 = parse_attr(root, "outofplace")?;
        if out_of_place != 1 {
            return Err(Error::plan_shape(
                "only out-of-place collectives are supported".to_string(),
            ));
        }

        let gpu_nodes: Vec<_> = root
            .children()
            .filter(|node| node.has_tag_name("gpu"))
            .collect();
        if gpu_nodes.len() != num_ranks {
            return Err(Error::plan_load(format!(
                "expected {num_ranks} gpu nodes, found {}",
                gpu_nodes.len()
            )));
        }
        let gpus = gpu_nodes
            .iter()
            .enumerate()
            .map(|(position, node)| GpuPlan::from_node(*node, position, num_ranks, num_channels))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            collective,
            num_channels,
            num_chunks,
            gpus,
        })
    }

    pub fn num_ranks(&self) -> usize {
        self.gpus.len()
    }
}

impl GpuPlan {
    fn from_node(
        node: roxmltree::Node<'_, '_>,
        position: usize,
        num_ranks: usize,
        num_channels: u32,
    ) -> Result<Self> {
        let rank_id: usize = parse_attr(node, "id")?;
        if rank_id != position {
            return Err(Error::plan_load(format!(
                "gpu ids must be dense and ordered: found id {rank_id} at position {position}"
            )));
        }
        let i_chunks: usize = parse_attr(node, "i_chunks")?;
        let o_chunks: usize = parse_attr(node, "o_chunks")?;
        let s_chunks: usize = parse_attr(node, "s_chunks")?;

        let tb_nodes: Vec<_> = node
            .children()
            .filter(|child| child.has_tag_name("tb"))
            .collect();
        if tb_nodes.len() > MAX_THREADBLOCKS_PER_RANK {
            return Err(Error::plan_shape(format!(
                "number of threadblocks exceeds the limit of {MAX_THREADBLOCKS_PER_RANK} in rank {rank_id}"
            )));
        }
        let threadblocks = tb_nodes
            .iter()
            .enumerate()
            .map(|(tb_position, tb_node)| {
                ThreadBlockPlan::from_node(*tb_node, tb_position, rank_id, num_ranks, num_channels)
            })
            .collect::<Result<Vec<_>>>()?;

        let node_count = 1
            + threadblocks.len()
            + threadblocks
                .iter()
                .map(|tb| tb.instructions.len())
                .sum::<usize>();
        if node_count > MAX_NODES_PER_RANK {
            return Err(Error::plan_shape(format!(
                "number of nodes ({node_count}) exceeds the limit of {MAX_NODES_PER_RANK} in rank {rank_id}"
            )));
        }

        Ok(Self {
            rank_id,
            i_chunks,
            o_chunks,
            s_chunks,
            threadblocks,
        })
    }
}

impl ThreadBlockPlan {
    fn from_node(
        node: roxmltree::Node<'_, '_>,
        position: usize,
        rank_id: usize,
        num_ranks: usize,
        num_channels: u32,
    ) -> Result<Self> {
        let tbid: usize = parse_attr(node, "id")?;
        if tbid != position {
            return Err(Error::plan_load(format!(
                "threadblock ids must be dense and ordered in rank {rank_id}: found id {tbid} at position {position}"
            )));
        }
        let send_peer = parse_peer(node, "send", rank_id, tbid, num_ranks)?;
        let recv_peer = parse_peer(node, "recv", rank_id, tbid, num_ranks)?;
        let chan: u32 = parse_attr(node, "chan")?;
        if chan >= num_channels {
            return Err(Error::plan_load(format!(
                "threadblock {tbid} in rank {rank_id} uses channel {chan}, but the plan declares {num_channels} channels"
            )));
        }

        let instructions = load_instructions(node, rank_id, tbid)?;
        check_op_ordering(&instructions, rank_id, tbid)?;
        if instructions
            .iter()
            .any(|inst| matches!(inst.op, OpKind::Send | OpKind::Rcs))
            && send_peer.is_none()
        {
            return Err(Error::plan_shape(format!(
                "threadblock {tbid} in rank {rank_id} has send instructions but no send peer"
            )));
        }
        if instructions
            .iter()
            .any(|inst| matches!(inst.op, OpKind::Recv | OpKind::Rcs))
            && recv_peer.is_none()
        {
            return Err(Error::plan_shape(format!(
                "threadblock {tbid} in rank {rank_id} has recv instructions but no recv peer"
            )));
        }

        Ok(Self {
            tbid,
            send_peer,
            recv_peer,
            chan,
            instructions,
        })
    }
}

fn load_instructions(
    tb_node: roxmltree::Node<'_, '_>,
    rank_id: usize,
    tbid: usize,
) -> Result<Vec<Instruction>> {
    let step_nodes: Vec<_> = tb_node
        .children()
        .filter(|child| child.has_tag_name("step"))
        .collect();
    if step_nodes.len() > MAX_STEPS_PER_THREADBLOCK {
        return Err(Error::plan_shape(format!(
            "number of instructions exceeds the limit of {MAX_STEPS_PER_THREADBLOCK} in threadblock {tbid} of rank {rank_id}"
        )));
    }
    step_nodes
        .iter()
        .enumerate()
        .map(|(position, node)| {
            let inst = instruction_from_node(*node)?;
            if inst.step != position {
                return Err(Error::plan_load(format!(
                    "steps must be dense and ordered in threadblock {tbid} of rank {rank_id}: found step {} at position {position}",
                    inst.step
                )));
            }
            inst.validate()?;
            Ok(inst)
        })
        .collect()
}

fn instruction_from_node(node: roxmltree::Node<'_, '_>) -> Result<Instruction> {
    let op = OpKind::parse(attr(node, "type")?)?;
    let raw_count: i64 = parse_attr(node, "cnt")?;
    // Nops never move data; their count attribute is carried but unused.
    let num_chunks = if op == OpKind::Nop {
        raw_count.max(0) as usize
    } else {
        usize::try_from(raw_count).unwrap_or(usize::MAX)
    };
    Ok(Instruction {
        step: parse_attr(node, "s")?,
        op,
        src_buf: BufferKind::parse(attr(node, "srcbuf")?)?,
        src_off: parse_attr(node, "srcoff")?,
        dst_buf: BufferKind::parse(attr(node, "dstbuf")?)?,
        dst_off: parse_attr(node, "dstoff")?,
        num_chunks,
        dep_tbid: parse_attr(node, "depid")?,
        dep_step: parse_attr(node, "deps")?,
        has_dep: parse_attr::<i64>(node, "hasdep")? != 0,
    })
}

/// Threadblocks follow a recv-combine-send pipeline shape: receives cluster
/// before any rcs, sends after none.
fn check_op_ordering(instructions: &[Instruction], rank_id: usize, tbid: usize) -> Result<()> {
    let first_recv = instructions
        .iter()
        .position(|inst| inst.op == OpKind::Recv);
    let last_send = instructions
        .iter()
        .rposition(|inst| inst.op == OpKind::Send);
    let first_rcs = instructions.iter().position(|inst| inst.op == OpKind::Rcs);
    let last_rcs = instructions.iter().rposition(|inst| inst.op == OpKind::Rcs);

    if let (Some(recv), Some(rcs)) = (first_recv, last_rcs) {
        if recv < rcs {
            return Err(Error::plan_shape(format!(
                "a recv instruction cannot precede an rcs instruction in threadblock {tbid} of rank {rank_id}"
            )));
        }
    }
    if let (Some(send), Some(rcs)) = (last_send, first_rcs) {
        if send > rcs {
            return Err(Error::plan_shape(format!(
                "a send instruction cannot follow an rcs instruction in threadblock {tbid} of rank {rank_id}"
            )));
        }
    }
    Ok(())
}

fn parse_peer(
    node: roxmltree::Node<'_, '_>,
    name: &str,
    rank_id: usize,
    tbid: usize,
    num_ranks: usize,
) -> Result<Option<usize>> {
    let peer: i64 = parse_attr(node, name)?;
    if peer < 0 {
        return Ok(None);
    }
    let peer = peer as usize;
    if peer == rank_id {
        return Err(Error::plan_shape(format!(
            "threadblock {tbid} in rank {rank_id} cannot {name} to itself"
        )));
    }
    if peer >= num_ranks {
        return Err(Error::plan_load(format!(
            "threadblock {tbid} in rank {rank_id} names {name} peer {peer}, but the plan declares {num_ranks} ranks"
        )));
    }
    Ok(Some(peer))
}

fn attr<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        Error::plan_load(format!(
            "missing attribute `{name}` on <{}>",
            node.tag_name().name()
        ))
    })
}

fn parse_attr<T>(node: roxmltree::Node<'_, '_>, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let value = attr(node, name)?;
    value.parse().map_err(|err| {
        Error::plan_load(format!(
            "invalid attribute `{name}`=\"{value}\" on <{}>: {err}",
            node.tag_name().name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;

    const NOP_STEP: &str = r#"<step s="0" type="nop" srcbuf="i" srcoff="0" dstbuf="i" dstoff="0" cnt="0" depid="-1" deps="-1" hasdep="0"/>"#;

    fn minimal_plan(tb_body: &str) -> String {
        format!(
            r#"<algo name="test" coll="allgather" ngpus="2" nchannels="1" nchunksperloop="2" outofplace="1">
  <gpu id="0" i_chunks="1" o_chunks="2" s_chunks="0">
    <tb id="0" send="-1" recv="-1" chan="0">{tb_body}</tb>
  </gpu>
  <gpu id="1" i_chunks="1" o_chunks="2" s_chunks="0"/>
</algo>"#
        )
    }

    #[test]
    fn test_parse_minimal_plan() {
        let plan = Plan::parse(&minimal_plan(NOP_STEP)).unwrap();
        assert_eq!(plan.collective, "allgather");
        assert_eq!(plan.num_ranks(), 2);
        assert_eq!(plan.num_chunks, 2);
        assert_eq!(plan.num_channels, 1);
        let tb = &plan.gpus[0].threadblocks[0];
        assert_eq!(tb.send_peer, None);
        assert_eq!(tb.recv_peer, None);
        assert_eq!(tb.instructions[0].op, OpKind::Nop);
        assert_eq!(tb.instructions[0].src_buf, BufferKind::Input);
    }

    #[test]
    fn test_missing_attribute_is_fatal() {
        let xml = minimal_plan(NOP_STEP).replace(" i_chunks=\"1\"", "");
        let err = Plan::parse(&xml).unwrap_err();
        assert!(matches!(err, Error::PlanLoad(msg) if msg.contains("i_chunks")));
    }

    #[test]
    fn test_unknown_attributes_are_ignored() {
        let xml = minimal_plan(NOP_STEP)
            .replace("<algo name=", "<algo proto=\"Simple\" name=");
        assert!(Plan::parse(&xml).is_ok());
    }

    #[test]
    fn test_non_power_of_two_chunks_rejected() {
        let xml = minimal_plan(NOP_STEP).replace("nchunksperloop=\"2\"", "nchunksperloop=\"6\"");
        assert!(matches!(Plan::parse(&xml), Err(Error::PlanShape(_))));
    }

    #[test]
    fn test_in_place_collective_rejected() {
        let xml = minimal_plan(NOP_STEP).replace("outofplace=\"1\"", "outofplace=\"0\"");
        assert!(matches!(Plan::parse(&xml), Err(Error::PlanShape(_))));
    }

    #[test]
    fn test_too_many_channels_rejected() {
        let xml = minimal_plan(NOP_STEP).replace("nchannels=\"1\"", "nchannels=\"33\"");
        assert!(matches!(Plan::parse(&xml), Err(Error::PlanShape(_))));
    }

    #[test]
    fn test_misordered_gpu_ids_rejected() {
        let xml = minimal_plan(NOP_STEP)
            .replace("<gpu id=\"0\"", "<gpu id=\"1\"")
            .replace("<gpu id=\"1\" i_chunks=\"1\" o_chunks=\"2\" s_chunks=\"0\"/>", "<gpu id=\"0\" i_chunks=\"1\" o_chunks=\"2\" s_chunks=\"0\"/>");
        assert!(matches!(Plan::parse(&xml), Err(Error::PlanLoad(_))));
    }

    #[test]
    fn test_self_loop_peer_rejected() {
        let xml = minimal_plan(NOP_STEP).replace("send=\"-1\"", "send=\"0\"");
        let err = Plan::parse(&xml).unwrap_err();
        assert!(matches!(err, Error::PlanShape(msg) if msg.contains("itself")));
    }

    #[test]
    fn test_misordered_steps_rejected() {
        let body = NOP_STEP.replace("s=\"0\"", "s=\"1\"");
        assert!(matches!(
            Plan::parse(&minimal_plan(&body)),
            Err(Error::PlanLoad(_))
        ));
    }

    #[test]
    fn test_send_after_rcs_rejected() {
        let body = concat!(
            r#"<step s="0" type="rcs" srcbuf="o" srcoff="0" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>"#,
            r#"<step s="1" type="s" srcbuf="i" srcoff="0" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>"#,
        );
        let xml = minimal_plan(body).replace("send=\"-1\" recv=\"-1\"", "send=\"1\" recv=\"1\"");
        let err = Plan::parse(&xml).unwrap_err();
        assert!(matches!(err, Error::PlanShape(msg) if msg.contains("cannot follow an rcs")));
    }

    #[test]
    fn test_recv_before_rcs_rejected() {
        let body = concat!(
            r#"<step s="0" type="r" srcbuf="i" srcoff="0" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>"#,
            r#"<step s="1" type="rcs" srcbuf="o" srcoff="1" dstbuf="o" dstoff="1" cnt="1" depid="-1" deps="-1" hasdep="0"/>"#,
        );
        let xml = minimal_plan(body).replace("send=\"-1\" recv=\"-1\"", "send=\"1\" recv=\"1\"");
        let err = Plan::parse(&xml).unwrap_err();
        assert!(matches!(err, Error::PlanShape(msg) if msg.contains("cannot precede an rcs")));
    }

    #[test]
    fn test_send_instruction_requires_send_peer() {
        let body = r#"<step s="0" type="s" srcbuf="i" srcoff="0" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>"#;
        let err = Plan::parse(&minimal_plan(body)).unwrap_err();
        assert!(matches!(err, Error::PlanShape(msg) if msg.contains("no send peer")));
    }

    #[test]
    fn test_chunk_count_out_of_range_rejected() {
        let body = r#"<step s="0" type="cpy" srcbuf="i" srcoff="0" dstbuf="o" dstoff="0" cnt="72" depid="-1" deps="-1" hasdep="0"/>"#;
        assert!(matches!(
            Plan::parse(&minimal_plan(body)),
            Err(Error::PlanLoad(_))
        ));
    }
}
