//! End-to-end alltoallv verification through the shared harness

use std::io::Write;

use collsim_core::{CommGroup, Plan};
use collsim_verify::traffic::TrafficMatrix;

/// Two-rank alltoallv with uniform traffic `[[1, 1], [1, 1]]`: each rank
/// keeps one chunk and exchanges one over channel 0.
const UNIFORM_PLAN: &str = r#"<algo name="a2av" coll="allreduce" ngpus="2" nchannels="1" nchunksperloop="2" outofplace="1">
  <gpu id="0" i_chunks="2" o_chunks="2" s_chunks="0">
    <tb id="0" send="1" recv="1" chan="0">
      <step s="0" type="cpy" srcbuf="i" srcoff="0" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>
      <step s="1" type="s" srcbuf="i" srcoff="1" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>
      <step s="2" type="r" srcbuf="i" srcoff="0" dstbuf="o" dstoff="1" cnt="1" depid="-1" deps="-1" hasdep="0"/>
    </tb>
  </gpu>
  <gpu id="1" i_chunks="2" o_chunks="2" s_chunks="0">
    <tb id="0" send="0" recv="0" chan="0">
      <step s="0" type="cpy" srcbuf="i" srcoff="1" dstbuf="o" dstoff="1" cnt="1" depid="-1" deps="-1" hasdep="0"/>
      <step s="1" type="s" srcbuf="i" srcoff="0" dstbuf="o" dstoff="1" cnt="1" depid="-1" deps="-1" hasdep="0"/>
      <step s="2" type="r" srcbuf="i" srcoff="1" dstbuf="o" dstoff="0" cnt="1" depid="-1" deps="-1" hasdep="0"/>
    </tb>
  </gpu>
</algo>"#;

#[test]
fn test_uniform_traffic_round_trip() {
    let plan = Plan::parse(UNIFORM_PLAN).unwrap();
    let group = CommGroup::from_plan(&plan).unwrap();

    let num_ranks = group.num_ranks();
    let chunk_factor = group.num_chunks() / num_ranks;
    let matrix = TrafficMatrix::from_csv("1,1\n1,1\n", num_ranks).unwrap();
    matrix.validate_totals(chunk_factor).unwrap();
    let expected = matrix.expected_outputs(chunk_factor);
    assert_eq!(expected, vec!["0_0", "1_0", "0_1", "1_1"]);

    collsim_verify::run_iterations(
        &group,
        3,
        group.num_chunks(),
        group.num_chunks(),
        |rank, i| format!("{rank}_{i}"),
        |rank, i| expected[rank * num_ranks * chunk_factor + i].clone(),
    )
    .unwrap();
}

#[test]
fn test_unbalanced_traffic_rejected_before_running() {
    let matrix = TrafficMatrix::from_csv("1,2\n3,0\n", 2).unwrap();
    let err = matrix.validate_totals(1).unwrap_err();
    assert!(err.to_string().contains("row sum") || err.to_string().contains("column sum"));
}

#[test]
fn test_load_group_checks_collective_tag() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(UNIFORM_PLAN.as_bytes()).unwrap();

    let err = collsim_verify::load_group(file.path(), "allgather").unwrap_err();
    assert!(err.to_string().contains("unsupported collective"));

    let (group, chunk_factor) = collsim_verify::load_group(file.path(), "allreduce").unwrap();
    assert_eq!(group.num_ranks(), 2);
    assert_eq!(chunk_factor, 1);
}

#[test]
fn test_wrong_expectation_fails_check() {
    let plan = Plan::parse(UNIFORM_PLAN).unwrap();
    let group = CommGroup::from_plan(&plan).unwrap();

    let err = collsim_verify::run_iterations(
        &group,
        1,
        group.num_chunks(),
        group.num_chunks(),
        |rank, i| format!("{rank}_{i}"),
        |_rank, _i| "bogus".to_string(),
    )
    .unwrap_err();
    assert!(err
        .downcast_ref::<collsim_core::Error>()
        .is_some_and(|e| matches!(e, collsim_core::Error::DataMismatch { .. })));
}
