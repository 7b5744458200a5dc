//! Programs and traces shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::rc::Rc;
use trace_slicer::bytecode::{
    InstructionIndex, InstructionKind, InvokeKind, JumpCondition, MethodId, StackOp,
};
use trace_slicer::dependence::{DataDependenceType, DependencesVisitor, Variable};
use trace_slicer::trace::{InstanceInfo, InstructionInstance};
use trace_slicer::{MethodBuilder, Program, ProgramBuilder, RecordedTrace, Result};

pub const MAIN: MethodId = MethodId(0);
pub const SQUARE: MethodId = MethodId(1);

/// Append `indices` of `method`, all at `depth`
pub fn run(trace: &mut RecordedTrace, method: MethodId, indices: &[usize], depth: usize) {
    for &index in indices {
        trace.push(method, InstructionIndex::new(index), depth);
    }
}

pub fn indices(method: MethodId, list: &[usize]) -> Vec<(MethodId, InstructionIndex)> {
    list.iter()
        .map(|&index| (method, InstructionIndex::new(index)))
        .collect()
}

/// ```text
/// 1: a = 1
/// 2: b = 2
/// 3: b = b + 3
/// 4: c = a + 5
/// 5: d = c
/// 6: return
/// ```
pub fn straight_line() -> (Program, RecordedTrace) {
    let mut main = MethodBuilder::new("Main", "main", "()V");
    main.local(1, "a").local(2, "b").local(3, "c").local(4, "d");
    main.line(1);
    main.push(InstructionKind::Constant { slots: 1 }); // 1
    main.push(InstructionKind::Store { local: 1, wide: false }); // 2
    main.line(2);
    main.push(InstructionKind::Constant { slots: 1 }); // 3
    main.push(InstructionKind::Store { local: 2, wide: false }); // 4
    main.line(3);
    main.push(InstructionKind::Load { local: 2, wide: false }); // 5
    main.push(InstructionKind::Constant { slots: 1 }); // 6
    main.push(InstructionKind::Arithmetic { pops: 2, pushes: 1 }); // 7
    main.push(InstructionKind::Store { local: 2, wide: false }); // 8
    main.line(4);
    main.push(InstructionKind::Load { local: 1, wide: false }); // 9
    main.push(InstructionKind::Constant { slots: 1 }); // 10
    main.push(InstructionKind::Arithmetic { pops: 2, pushes: 1 }); // 11
    main.push(InstructionKind::Store { local: 3, wide: false }); // 12
    main.line(5);
    main.push(InstructionKind::Load { local: 3, wide: false }); // 13
    main.push(InstructionKind::Store { local: 4, wide: false }); // 14
    main.line(6);
    main.push(InstructionKind::Return { slots: 0 }); // 15

    let mut builder = ProgramBuilder::new();
    builder.method(main).unwrap();
    let program = builder.build().unwrap();

    let mut trace = RecordedTrace::new();
    run(&mut trace, MAIN, &(0..=15).collect::<Vec<_>>(), 1);
    (program, trace)
}

/// ```text
/// 1: x = <input>
/// 2: if (x != 0) {
/// 3:     y = square(x);
///    } else {
/// 4:     y = 0;
///    }
/// 5: z = y
/// 6: return
///
/// 10: square(v) { return v * v; }
/// ```
///
/// The trace takes the `then` branch when `taken` is true.
pub fn branching(taken: bool) -> (Program, RecordedTrace) {
    let mut main = MethodBuilder::new("Main", "main", "()V");
    main.local(1, "x").local(2, "y").local(3, "z");
    let otherwise = main.new_label();
    let end = main.new_label();
    main.line(1);
    main.push(InstructionKind::Constant { slots: 1 }); // 1
    main.push(InstructionKind::Store { local: 1, wide: false }); // 2
    main.line(2);
    main.push(InstructionKind::Load { local: 1, wide: false }); // 3
    main.jump(JumpCondition::Unary, otherwise); // 4
    main.line(3);
    main.push(InstructionKind::Load { local: 1, wide: false }); // 5
    main.invoke(InvokeKind::Static, "Main", "square", "(I)I"); // 6
    main.push(InstructionKind::Store { local: 2, wide: false }); // 7
    main.jump(JumpCondition::Always, end); // 8
    main.line(4);
    main.place(otherwise); // 9
    main.push(InstructionKind::Constant { slots: 1 }); // 10
    main.push(InstructionKind::Store { local: 2, wide: false }); // 11
    main.line(5);
    main.place(end); // 12
    main.push(InstructionKind::Load { local: 2, wide: false }); // 13
    main.push(InstructionKind::Store { local: 3, wide: false }); // 14
    main.line(6);
    main.push(InstructionKind::Return { slots: 0 }); // 15

    let mut square = MethodBuilder::new("Main", "square", "(I)I");
    square.local(0, "v");
    square.line(10);
    square.push(InstructionKind::Load { local: 0, wide: false }); // 1
    square.push(InstructionKind::Load { local: 0, wide: false }); // 2
    square.push(InstructionKind::Arithmetic { pops: 2, pushes: 1 }); // 3
    square.push(InstructionKind::Return { slots: 1 }); // 4

    let mut builder = ProgramBuilder::new();
    builder.method(main).unwrap();
    builder.method(square).unwrap();
    let program = builder.build().unwrap();

    let mut trace = RecordedTrace::new();
    if taken {
        run(&mut trace, MAIN, &[0, 1, 2, 3, 4, 5, 6], 1);
        run(&mut trace, SQUARE, &[0, 1, 2, 3, 4], 2);
        run(&mut trace, MAIN, &[7, 8, 12, 13, 14, 15], 1);
    } else {
        run(&mut trace, MAIN, &[0, 1, 2, 3, 4, 9, 10, 11, 12, 13, 14, 15], 1);
    }
    (program, trace)
}

/// ```text
/// 1: o = new Box()
/// 2: o.value = 7
/// 3: r = o.value
/// 4: return
/// ```
///
/// The box gets object id 7.
pub fn heap() -> (Program, RecordedTrace) {
    let mut builder = ProgramBuilder::new();
    let value = builder.field("Box", "value", "I");

    let mut main = MethodBuilder::new("Main", "main", "()V");
    main.local(1, "o").local(2, "r");
    main.line(1);
    main.push(InstructionKind::New); // 1
    main.push(InstructionKind::Stack { op: StackOp::Dup }); // 2
    main.invoke(InvokeKind::Special, "Box", "<init>", "()V"); // 3
    main.push(InstructionKind::Store { local: 1, wide: false }); // 4
    main.line(2);
    main.push(InstructionKind::Load { local: 1, wide: false }); // 5
    main.push(InstructionKind::Constant { slots: 1 }); // 6
    main.push(InstructionKind::PutField { field: value, is_static: false }); // 7
    main.line(3);
    main.push(InstructionKind::Load { local: 1, wide: false }); // 8
    main.push(InstructionKind::GetField { field: value, is_static: false }); // 9
    main.push(InstructionKind::Store { local: 2, wide: false }); // 10
    main.line(4);
    main.push(InstructionKind::Return { slots: 0 }); // 11
    builder.method(main).unwrap();
    let program = builder.build().unwrap();

    let object = InstanceInfo::Object { id: 7 };
    let mut trace = RecordedTrace::new();
    run(&mut trace, MAIN, &[0], 1);
    trace.push_with_info(MAIN, InstructionIndex::new(1), 1, InstanceInfo::Created { id: 7 });
    run(&mut trace, MAIN, &[2, 3, 4, 5, 6], 1);
    trace.push_with_info(MAIN, InstructionIndex::new(7), 1, object);
    run(&mut trace, MAIN, &[8], 1);
    trace.push_with_info(MAIN, InstructionIndex::new(9), 1, object);
    run(&mut trace, MAIN, &[10, 11], 1);
    (program, trace)
}

/// A data dependence as reported, by instance number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEdge {
    pub from: u64,
    pub to: u64,
    pub variable: Variable,
    pub kind: DataDependenceType,
}

/// Records every event it receives
#[derive(Debug, Default)]
pub struct RecordingVisitor {
    pub data: Vec<DataEdge>,
    pub control: Vec<(u64, u64)>,
    pub executions: Vec<u64>,
    pub entries: Vec<(MethodId, usize)>,
    pub leaves: Vec<(MethodId, usize)>,
    pub untraced: Vec<u64>,
    pub created: Vec<(u64, u64)>,
    /// Pending entries announced, by reader, variable and kind
    pub pending: Vec<(u64, Variable, DataDependenceType)>,
    pub discarded: Vec<(u64, Variable, DataDependenceType)>,
    pub end: Option<u64>,
    pub interrupted: bool,
}

impl RecordingVisitor {
    /// Data edges through local variable `index`
    pub fn local_edges(&self, index: usize) -> Vec<&DataEdge> {
        self.data
            .iter()
            .filter(|edge| matches!(edge.variable, Variable::LocalVariable { index: i, .. } if i == index))
            .collect()
    }

    pub fn pending_of(&self, kind: DataDependenceType) -> usize {
        self.pending.iter().filter(|entry| entry.2 == kind).count()
    }

    pub fn discarded_of(&self, kind: DataDependenceType) -> usize {
        self.discarded.iter().filter(|entry| entry.2 == kind).count()
    }

    /// Pending entries whose announcements and discards do not cancel out
    pub fn unbalanced_pending(&self) -> Vec<(u64, Variable, DataDependenceType)> {
        let mut balance: HashMap<(u64, Variable, DataDependenceType), i64> = HashMap::new();
        for &entry in &self.pending {
            *balance.entry(entry).or_default() += 1;
        }
        for &entry in &self.discarded {
            *balance.entry(entry).or_default() -= 1;
        }
        balance
            .into_iter()
            .filter(|&(_, count)| count != 0)
            .map(|(entry, _)| entry)
            .collect()
    }
}

impl DependencesVisitor<InstructionInstance> for RecordingVisitor {
    fn visit_data_dependence(
        &mut self,
        from: &Rc<InstructionInstance>,
        to: &Rc<InstructionInstance>,
        _used: &[Variable],
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        self.data.push(DataEdge {
            from: from.instance_nr,
            to: to.instance_nr,
            variable,
            kind,
        });
        Ok(())
    }

    fn visit_pending_data_dependence(
        &mut self,
        from: &Rc<InstructionInstance>,
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        self.pending.push((from.instance_nr, variable, kind));
        Ok(())
    }

    fn discard_pending_data_dependence(
        &mut self,
        from: &Rc<InstructionInstance>,
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        self.discarded.push((from.instance_nr, variable, kind));
        Ok(())
    }

    fn visit_control_dependence(
        &mut self,
        from: &Rc<InstructionInstance>,
        to: &Rc<InstructionInstance>,
    ) -> Result<()> {
        self.control.push((from.instance_nr, to.instance_nr));
        Ok(())
    }

    fn visit_instruction_execution(&mut self, instance: &Rc<InstructionInstance>) -> Result<()> {
        self.executions.push(instance.instance_nr);
        Ok(())
    }

    fn visit_method_entry(&mut self, method: MethodId, depth: usize) -> Result<()> {
        self.entries.push((method, depth));
        Ok(())
    }

    fn visit_method_leave(&mut self, method: MethodId, depth: usize) -> Result<()> {
        self.leaves.push((method, depth));
        Ok(())
    }

    fn visit_untraced_call(&mut self, caller: &Rc<InstructionInstance>) -> Result<()> {
        self.untraced.push(caller.instance_nr);
        Ok(())
    }

    fn visit_object_creation(&mut self, object: u64, creator: &Rc<InstructionInstance>) -> Result<()> {
        self.created.push((object, creator.instance_nr));
        Ok(())
    }

    fn visit_end(&mut self, instances: u64) -> Result<()> {
        self.end = Some(instances);
        Ok(())
    }

    fn interrupted(&mut self) -> Result<()> {
        self.interrupted = true;
        Ok(())
    }
}

/// Instance number of the `position`-th record (forward order) of a trace of `len` records
pub fn nr(len: usize, position: usize) -> u64 {
    (len - 1 - position) as u64
}

pub const FAIL: MethodId = MethodId(1);

/// ```text
/// 1: try { fail(); }
/// 2: catch (e) { }
/// 3: return
///
/// 10: fail() { throw new Error(); }
/// ```
pub fn exceptional() -> (Program, RecordedTrace) {
    let mut main = MethodBuilder::new("Main", "main", "()V");
    main.local(1, "e");
    let start = main.new_label();
    let end = main.new_label();
    let handler = main.new_label();
    let after = main.new_label();
    main.line(1);
    main.place(start); // 1
    main.invoke(InvokeKind::Static, "Main", "fail", "()V"); // 2
    main.place(end); // 3
    main.jump(JumpCondition::Always, after); // 4
    main.line(2);
    main.place_handler(handler); // 5
    main.push(InstructionKind::Store { local: 1, wide: false }); // 6
    main.line(3);
    main.place(after); // 7
    main.push(InstructionKind::Return { slots: 0 }); // 8
    main.try_catch(start, end, handler);

    let mut fail = MethodBuilder::new("Main", "fail", "()V");
    fail.line(10);
    fail.push(InstructionKind::New); // 1
    fail.push(InstructionKind::Throw); // 2

    let mut builder = ProgramBuilder::new();
    builder.method(main).unwrap();
    builder.method(fail).unwrap();
    let program = builder.build().unwrap();

    let mut trace = RecordedTrace::new();
    run(&mut trace, MAIN, &[0, 1, 2], 1);
    run(&mut trace, FAIL, &[0], 2);
    trace.push_with_info(FAIL, InstructionIndex::new(1), 2, InstanceInfo::Created { id: 3 });
    run(&mut trace, FAIL, &[2, 3], 2);
    run(&mut trace, MAIN, &[5, 6, 7, 8], 1);
    (program, trace)
}
