mod common;

use common::*;
use trace_slicer::bytecode::{InstructionIndex, InstructionKind, JumpCondition, MethodBuilder};
use trace_slicer::cfg::visualization::generate_control_dependence_dot;
use trace_slicer::cfg::{CfgOptions, ReachabilityAnalyser, WorklistOptions};
use trace_slicer::{Cfg, ControlDependences};

fn at(index: usize) -> InstructionIndex {
    InstructionIndex::new(index)
}

fn ats(list: &[usize]) -> Vec<InstructionIndex> {
    list.iter().map(|&i| at(i)).collect()
}

#[test]
fn test_branching_cfg_shape() {
    let (program, _) = branching(true);
    let main = program.method(MAIN).unwrap();
    let cfg = Cfg::build(main, CfgOptions::default());

    // Every instruction including the abnormal termination label
    assert_eq!(cfg.node_count(), 17);
    assert_eq!(cfg.successors(at(4)), ats(&[5, 9]));
    assert_eq!(cfg.successors(at(8)), ats(&[12]));
    assert_eq!(cfg.predecessors(at(12)), ats(&[8, 11]));
    assert!(cfg.successors(at(15)).is_empty());
    assert_eq!(cfg.entry_node(), cfg.node_of(at(0)));
}

#[test]
fn test_excluding_labels_skips_bookkeeping() {
    let (program, _) = branching(true);
    let main = program.method(MAIN).unwrap();
    let cfg = Cfg::build(
        main,
        CfgOptions {
            exclude_labels: true,
            ..CfgOptions::default()
        },
    );

    // Labels 0, 9, 12, 16 and the goto at 8 are gone
    assert_eq!(cfg.node_count(), 12);
    assert_eq!(cfg.node_of(at(9)), None);
    assert_eq!(cfg.successors(at(7)), ats(&[13]));
    assert_eq!(cfg.successors(at(4)), ats(&[5, 10]));
    assert_eq!(cfg.lookup(at(9)), cfg.node_of(at(10)));
    assert_eq!(cfg.entry_node(), cfg.node_of(at(1)));
}

#[test]
fn test_try_catch_edges() {
    let (program, _) = exceptional();
    let main = program.method(MAIN).unwrap();

    let plain = Cfg::build(main, CfgOptions::default());
    assert_eq!(plain.successors(at(2)), ats(&[3]));
    assert!(plain.predecessors(at(5)).is_empty());

    let with_handlers = Cfg::build(
        main,
        CfgOptions {
            add_try_catch_edges: true,
            ..CfgOptions::default()
        },
    );
    assert_eq!(with_handlers.successors(at(2)), ats(&[3, 5]));
    assert_eq!(with_handlers.predecessors(at(5)), ats(&[1, 2]));
}

#[test]
fn test_subroutine_returns_to_the_call_site() {
    let mut method = MethodBuilder::new("Main", "jsr", "()V");
    let sub = method.new_label();
    let after = method.new_label();
    method.push(InstructionKind::Nop); // 1
    method.subroutine(sub); // 2
    method.jump(JumpCondition::Always, after); // 3
    method.place(sub); // 4
    method.push(InstructionKind::Store { local: 1, wide: false }); // 5
    method.push(InstructionKind::Ret { local: 1 }); // 6
    method.place(after); // 7
    method.push(InstructionKind::Return { slots: 0 }); // 8
    let method = method.build().unwrap();

    let cfg = Cfg::build(&method, CfgOptions::default());
    assert_eq!(cfg.successors(at(2)), ats(&[4]));
    assert_eq!(cfg.successors(at(6)), ats(&[3]));
}

#[test]
fn test_branch_dependences() {
    let (program, _) = branching(true);
    let main = program.method(MAIN).unwrap();
    let mut analyser = ReachabilityAnalyser::new(WorklistOptions::seeded(1));
    let dependences = ControlDependences::compute(main, &mut analyser);

    assert_eq!(dependences.dependents(at(4)), Some(ats(&[5, 6, 7, 8, 9, 10, 11]).as_slice()));
    assert!(dependences.depends_on(at(10), at(4)));
    assert!(!dependences.depends_on(at(13), at(4)));
    // The branch is the only instruction with more than one successor
    assert_eq!(dependences.iter().count(), 1);
    assert_eq!(dependences.dependents(at(100)), None);
}

#[test]
fn test_catch_block_dependences() {
    let (program, _) = exceptional();
    let main = program.method(MAIN).unwrap();
    let mut analyser = ReachabilityAnalyser::new(WorklistOptions::seeded(1));
    let dependences = ControlDependences::compute(main, &mut analyser);

    // 7 and 8 also run when nothing is thrown
    assert_eq!(dependences.dependents(at(5)), Some(ats(&[6]).as_slice()));
}

#[test]
fn test_dot_output() {
    let (program, _) = branching(true);
    let main = program.method(MAIN).unwrap();
    let cfg = Cfg::build(main, CfgOptions::default());
    let dot = cfg.to_dot(main);
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("->"));

    let mut analyser = ReachabilityAnalyser::new(WorklistOptions::seeded(1));
    let dependences = ControlDependences::compute(main, &mut analyser);
    let dot = generate_control_dependence_dot(&dependences, main);
    assert!(dot.contains("digraph"));
}

#[test]
fn test_straight_line_code_is_a_chain() {
    let (program, _) = straight_line();
    let main = program.method(MAIN).unwrap();
    let cfg = Cfg::build(main, CfgOptions::default());

    for index in 0..15 {
        assert_eq!(cfg.successors(at(index)), ats(&[index + 1]));
    }
    assert!(cfg.successors(at(15)).is_empty());
    // The abnormal termination label is never reached without handlers
    assert!(cfg.predecessors(at(16)).is_empty());
    assert_eq!(cfg.graph().edge_count(), 15);
}
