mod common;

use common::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use trace_slicer::bytecode::InstructionIndex;
use trace_slicer::dependence::{
    DependenceExtractor, ExtractorOptions, ProgressMonitor, VisitorCapabilities,
};
use trace_slicer::slicing::{SliceInstructionsCollector, Slicer, SlicingCriterion};
use trace_slicer::trace::InstructionInstance;
use trace_slicer::{Error, FlagWatchdog, Program, RecordedTrace};

fn threaded() -> ExtractorOptions {
    ExtractorOptions {
        multithreaded: true,
        block_size: 3,
        buffered_blocks: 2,
        ..ExtractorOptions::default()
    }
}

fn events(program: &Program, trace: &RecordedTrace, options: ExtractorOptions) -> RecordingVisitor {
    let mut visitor = RecordingVisitor::default();
    {
        let mut extractor = DependenceExtractor::<InstructionInstance>::new(program).with_options(options);
        extractor.add_visitor(&mut visitor, VisitorCapabilities::all());
        extractor.process(trace.backward()).unwrap();
    }
    visitor
}

fn sliced(
    program: &Program,
    trace: &RecordedTrace,
    criterion: &str,
    options: ExtractorOptions,
) -> Vec<(u64, u32)> {
    let criterion = SlicingCriterion::parse(criterion).unwrap();
    let mut collector = SliceInstructionsCollector::new();
    {
        let mut slicer = Slicer::new(program).with_options(options);
        slicer.add_slice_visitor(&mut collector);
        slicer.process(trace.backward(), &[criterion]).unwrap();
    }
    collector
        .instances()
        .map(|(instance, distance)| (instance.instance_nr, distance))
        .collect()
}

#[test]
fn test_threaded_walk_reports_the_same_events() {
    for (program, trace) in [branching(true), heap(), exceptional()] {
        let single = events(&program, &trace, ExtractorOptions::default());
        let multi = events(&program, &trace, threaded());

        assert_eq!(single.data, multi.data);
        assert_eq!(single.control, multi.control);
        assert_eq!(single.executions, multi.executions);
        assert_eq!(single.entries, multi.entries);
        assert_eq!(single.leaves, multi.leaves);
        assert_eq!(single.end, multi.end);
    }
}

#[test]
fn test_threaded_slice_matches() {
    let (program, trace) = branching(true);
    assert_eq!(
        sliced(&program, &trace, "Main.main:5:z", ExtractorOptions::default()),
        sliced(&program, &trace, "Main.main:5:z", threaded())
    );

    let (program, trace) = straight_line();
    assert_eq!(
        sliced(&program, &trace, "Main.main:5:d", ExtractorOptions::default()),
        sliced(&program, &trace, "Main.main:5:d", threaded())
    );
}

fn broken_trace() -> (Program, RecordedTrace) {
    let (program, mut trace) = straight_line();
    trace.push(MAIN, InstructionIndex::new(15), 0);
    (program, trace)
}

#[test]
fn test_malformed_trace_is_an_error() {
    let (program, trace) = broken_trace();
    let mut visitor = RecordingVisitor::default();
    let mut extractor = DependenceExtractor::<InstructionInstance>::new(&program);
    extractor.add_visitor(&mut visitor, VisitorCapabilities::all());
    assert!(matches!(
        extractor.process(trace.backward()),
        Err(Error::Trace { .. })
    ));
}

#[test]
fn test_producer_failure_reaches_the_consumer() {
    let (program, trace) = broken_trace();
    let mut visitor = RecordingVisitor::default();
    let mut extractor = DependenceExtractor::<InstructionInstance>::new(&program).with_options(threaded());
    extractor.add_visitor(&mut visitor, VisitorCapabilities::all());
    assert!(matches!(
        extractor.process(trace.backward()),
        Err(Error::ProducerFailure { .. })
    ));
}

#[test]
fn test_watchdog_interrupts_the_walk() {
    for options in [ExtractorOptions::default(), threaded()] {
        let (program, trace) = straight_line();
        let flag = Arc::new(AtomicBool::new(true));
        let mut visitor = RecordingVisitor::default();
        let result = {
            let mut extractor = DependenceExtractor::<InstructionInstance>::new(&program)
                .with_options(options)
                .with_watchdog(FlagWatchdog::new(flag).polling_every(1).in_arc());
            extractor.add_visitor(&mut visitor, VisitorCapabilities::all());
            extractor.process(trace.backward())
        };

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(visitor.interrupted);
        assert_eq!(visitor.end, None);
    }
}

#[derive(Default)]
struct RecordingMonitor {
    updates: Vec<f64>,
}

impl ProgressMonitor for RecordingMonitor {
    fn start(&mut self) {}

    fn update(&mut self, percentage: f64) {
        self.updates.push(percentage);
    }

    fn end(&mut self) {}
}

fn progress(program: &Program, trace: &RecordedTrace, options: ExtractorOptions) -> Vec<f64> {
    let mut monitor = RecordingMonitor::default();
    {
        let flag = Arc::new(AtomicBool::new(false));
        let mut extractor = DependenceExtractor::<InstructionInstance>::new(program)
            .with_options(options)
            .with_watchdog(FlagWatchdog::new(flag).polling_every(1).in_arc());
        extractor.add_progress_monitor(&mut monitor);
        extractor.process(trace.backward()).unwrap();
    }
    monitor.updates
}

#[test]
fn test_threaded_progress_follows_the_walk() {
    let (program, trace) = branching(true);
    let single = progress(&program, &trace, ExtractorOptions::default());
    let multi = progress(&program, &trace, threaded());

    assert_eq!(single.len(), trace.len());
    assert_eq!(single.len(), multi.len());
    for (walked, piped) in single.iter().zip(&multi) {
        assert!((walked - piped).abs() < 1e-9, "{} != {}", walked, piped);
    }
}
