use crate::bytecode::{MethodId, MethodRef, Program};
use crate::cfg::WorklistOptions;
use crate::dependence::{ExtractorOptions, ProgressMonitor};
use crate::error::{Error as SlicerError, Result as SlicerResult};
use crate::slicing::{SliceInstructionsCollector, Slicer, SlicingCriterion, UntracedCallVisitor};
use crate::trace::{InstructionInstance, TraceBundle};
use log::warn;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Arguments of the `slice` subcommand
#[derive(Debug, Clone, Default)]
pub struct SliceArgs {
    pub input_path: PathBuf,
    pub criteria: Vec<String>,
    pub output_path: Option<PathBuf>,
    pub multithreaded: bool,
    pub progress: bool,
    pub warn_untraced: bool,
    pub seed: Option<u64>,
    pub show_instances: bool,
}

/// Renders backward pass progress as a terminal progress bar
struct ProgressBarMonitor {
    bar: indicatif::ProgressBar,
}

impl ProgressBarMonitor {
    fn new() -> Self {
        let bar = indicatif::ProgressBar::new(100);
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% of trace")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        Self { bar }
    }
}

impl ProgressMonitor for ProgressBarMonitor {
    fn start(&mut self) {
        self.bar.set_position(0);
    }

    fn update(&mut self, percentage: f64) {
        self.bar.set_position(percentage.clamp(0.0, 100.0) as u64);
    }

    fn end(&mut self) {
        self.bar.finish_with_message("Backward pass completed");
    }
}

/// Logs calls into untraced methods, once per calling method and target
#[derive(Debug, Default)]
struct UntracedCallWarner {
    calls: usize,
    warned: HashSet<(MethodId, MethodRef)>,
}

impl UntracedCallVisitor for UntracedCallWarner {
    fn visit_untraced_call(
        &mut self,
        caller: &InstructionInstance,
        target: &MethodRef,
    ) -> SlicerResult<()> {
        self.calls += 1;
        if self.warned.insert((caller.method, target.clone())) {
            warn!("untraced call to {} at {}", target, caller);
        }
        Ok(())
    }
}

/// Compute a dynamic slice of a trace bundle and print it
pub fn slice(args: &SliceArgs) -> SlicerResult<()> {
    let bundle = TraceBundle::load(&args.input_path)?;
    let criteria = args
        .criteria
        .iter()
        .map(|text| SlicingCriterion::parse_all(text))
        .collect::<SlicerResult<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    let options = ExtractorOptions {
        multithreaded: args.multithreaded,
        worklist: args
            .seed
            .map(WorklistOptions::seeded)
            .unwrap_or_default(),
        ..ExtractorOptions::default()
    };

    let mut collector = SliceInstructionsCollector::new();
    let mut untraced = UntracedCallWarner::default();
    let mut progress = ProgressBarMonitor::new();

    let start = std::time::Instant::now();
    {
        let mut slicer = Slicer::new(&bundle.program).with_options(options);
        slicer.add_slice_visitor(&mut collector);
        if args.warn_untraced {
            slicer.add_untraced_call_visitor(&mut untraced);
        }
        if args.progress {
            slicer.add_progress_monitor(&mut progress);
        }
        slicer.process(bundle.trace.backward(), &criteria)?;
    }
    let elapsed = start.elapsed();
    eprintln!(
        "Sliced {} trace records in {:.2}ms: {} instances, {} instructions",
        bundle.trace.len(),
        elapsed.as_secs_f64() * 1000.0,
        collector.len(),
        collector.instructions().len()
    );
    if untraced.calls > 0 {
        eprintln!(
            "{} untraced calls to {} distinct targets",
            untraced.calls,
            untraced.warned.len()
        );
    }

    let output = if args.show_instances {
        format_instances(&bundle.program, &collector)?
    } else {
        format_instructions(&bundle.program, &collector)?
    };

    match &args.output_path {
        Some(path) => std::fs::write(path, output)
            .map_err(|e| SlicerError::Io(format!("Failed to write {}: {}", path.display(), e))),
        None => {
            print!("{}", output);
            Ok(())
        }
    }
}

/// Unique sliced instructions, grouped by method
pub fn format_instructions(
    program: &Program,
    collector: &SliceInstructionsCollector,
) -> SlicerResult<String> {
    let mut output = String::new();
    let mut current = None;
    for (method_id, index) in collector.instructions() {
        let method = program.method(method_id)?;
        if current != Some(method_id) {
            let _ = writeln!(output, "{}", method);
            current = Some(method_id);
        }
        let instruction = program.instruction(method_id, index)?;
        let _ = writeln!(
            output,
            "  {:>4}  line {:<5} {}",
            index.value(),
            instruction.line,
            instruction.kind
        );
    }
    Ok(output)
}

/// Every sliced instance in walk order, with its distance
pub fn format_instances(
    program: &Program,
    collector: &SliceInstructionsCollector,
) -> SlicerResult<String> {
    let mut output = String::new();
    for (instance, distance) in collector.instances() {
        let method = program.method(instance.method)?;
        let instruction = program.instruction(instance.method, instance.index)?;
        let _ = writeln!(
            output,
            "#{:<8} {}:{} {} (distance {})",
            instance.instance_nr,
            method.qualified_name(),
            instance.index,
            instruction.kind,
            distance
        );
    }
    Ok(output)
}
