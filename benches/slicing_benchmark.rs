use criterion::{black_box, criterion_group, criterion_main, Criterion};
use trace_slicer::bytecode::{InstructionIndex, InstructionKind, JumpCondition, MethodId};
use trace_slicer::dependence::ExtractorOptions;
use trace_slicer::{
    MethodBuilder, Program, ProgramBuilder, RecordedTrace, SliceInstructionsCollector, Slicer,
    SlicingCriterion,
};

/// `for (i = n; i != 0; i--) sum += i;` unrolled into a trace of `iterations` rounds
fn counting_loop(iterations: usize) -> (Program, RecordedTrace) {
    let mut method = MethodBuilder::new("Bench", "sum", "()V");
    method.local(1, "i").local(2, "sum");
    let head = method.new_label();
    let exit = method.new_label();
    method.line(1);
    method.push(InstructionKind::Constant { slots: 1 }); // 1
    method.push(InstructionKind::Store { local: 1, wide: false }); // 2
    method.push(InstructionKind::Constant { slots: 1 }); // 3
    method.push(InstructionKind::Store { local: 2, wide: false }); // 4
    method.line(2);
    method.place(head); // 5
    method.push(InstructionKind::Load { local: 1, wide: false }); // 6
    method.jump(JumpCondition::Unary, exit); // 7
    method.line(3);
    method.push(InstructionKind::Load { local: 2, wide: false }); // 8
    method.push(InstructionKind::Load { local: 1, wide: false }); // 9
    method.push(InstructionKind::Arithmetic { pops: 2, pushes: 1 }); // 10
    method.push(InstructionKind::Store { local: 2, wide: false }); // 11
    method.push(InstructionKind::Increment { local: 1 }); // 12
    method.jump(JumpCondition::Always, head); // 13
    method.line(4);
    method.place(exit); // 14
    method.push(InstructionKind::Return { slots: 0 }); // 15

    let mut builder = ProgramBuilder::new();
    builder.method(method).unwrap();
    let program = builder.build().unwrap();

    let main = MethodId::new(0);
    let mut trace = RecordedTrace::new();
    let mut run = |indices: &[usize]| {
        for &index in indices {
            trace.push(main, InstructionIndex::new(index), 1);
        }
    };
    run(&[0, 1, 2, 3, 4]);
    for _ in 0..iterations {
        run(&[5, 6, 7, 8, 9, 10, 11, 12, 13]);
    }
    run(&[5, 6, 7, 14, 15]);
    (program, trace)
}

fn slice_once(program: &Program, trace: &RecordedTrace, options: ExtractorOptions) -> usize {
    let criterion = SlicingCriterion::parse("Bench.sum:4").unwrap();
    let mut collector = SliceInstructionsCollector::new();
    {
        let mut slicer = Slicer::new(program).with_options(options);
        slicer.add_slice_visitor(&mut collector);
        slicer.process(trace.backward(), &[criterion]).unwrap();
    }
    collector.len()
}

fn slicing_benchmark(c: &mut Criterion) {
    let (program, trace) = counting_loop(10_000);

    c.bench_function("slice_loop_single_threaded", |b| {
        b.iter(|| black_box(slice_once(&program, &trace, ExtractorOptions::default())));
    });

    let threaded = ExtractorOptions {
        multithreaded: true,
        ..ExtractorOptions::default()
    };
    c.bench_function("slice_loop_multithreaded", |b| {
        b.iter(|| black_box(slice_once(&program, &trace, threaded)));
    });
}

criterion_group!(benches, slicing_benchmark);
criterion_main!(benches);
