//! The backward dependence walk
//!
//! One instance at a time, newest first: track call frames, simulate the
//! instruction, then report control and data dependences to the visitors
//! registered for them.

use super::simulation::{simulate, CallFrame, DynamicInformation};
use super::{
    DataDependenceType, DependencesVisitor, ProgressMonitor, Variable, VisitorCapabilities,
};
use crate::bytecode::{InstructionKind, LabelKind, MethodId, Program};
use crate::cfg::{ControlDependenceCache, WorklistOptions};
use crate::error::{Error, Result};
use crate::trace::pipeline::{self, PipelineOptions, DEFAULT_BLOCK_SIZE, DEFAULT_BUFFERED_BLOCKS};
use crate::trace::{BackwardTrace, InstructionInstance, TracedInstance};
use crate::watchdog::{DynWatchdog, LazyWatchdog};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

const RAW: DataDependenceType = DataDependenceType::ReadAfterWrite;
const WAR: DataDependenceType = DataDependenceType::WriteAfterRead;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorOptions {
    /// Read the trace on a separate producer thread
    pub multithreaded: bool,
    /// Instances per handoff block in multithreaded mode
    pub block_size: usize,
    /// Blocks buffered between producer and consumer
    pub buffered_blocks: usize,
    pub worklist: WorklistOptions,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            multithreaded: false,
            block_size: DEFAULT_BLOCK_SIZE,
            buffered_blocks: DEFAULT_BUFFERED_BLOCKS,
            worklist: WorklistOptions::default(),
        }
    }
}

impl ExtractorOptions {
    pub fn pipeline(&self) -> PipelineOptions {
        PipelineOptions {
            block_size: self.block_size,
            buffered_blocks: self.buffered_blocks,
        }
    }
}

/// Event kinds with their own visitor list
#[derive(Debug, Clone, Copy)]
enum Hook {
    DataRaw,
    DataWar,
    Control,
    Execution,
    PendingControl,
    PendingRaw,
    PendingWar,
    MethodEntryLeave,
    Untraced,
    Creation,
}

const HOOK_COUNT: usize = 10;

impl Hook {
    const ALL: [Hook; HOOK_COUNT] = [
        Hook::DataRaw,
        Hook::DataWar,
        Hook::Control,
        Hook::Execution,
        Hook::PendingControl,
        Hook::PendingRaw,
        Hook::PendingWar,
        Hook::MethodEntryLeave,
        Hook::Untraced,
        Hook::Creation,
    ];

    fn capability(self) -> VisitorCapabilities {
        match self {
            Hook::DataRaw => VisitorCapabilities::DATA_DEPENDENCES_RAW,
            Hook::DataWar => VisitorCapabilities::DATA_DEPENDENCES_WAR,
            Hook::Control => VisitorCapabilities::CONTROL_DEPENDENCES,
            Hook::Execution => VisitorCapabilities::INSTRUCTION_EXECUTIONS,
            Hook::PendingControl => VisitorCapabilities::PENDING_CONTROL_DEPENDENCES,
            Hook::PendingRaw => VisitorCapabilities::PENDING_DATA_DEPENDENCES_RAW,
            Hook::PendingWar => VisitorCapabilities::PENDING_DATA_DEPENDENCES_WAR,
            Hook::MethodEntryLeave => VisitorCapabilities::METHOD_ENTRY_LEAVE,
            Hook::Untraced => VisitorCapabilities::UNTRACED_METHOD_CALLS,
            Hook::Creation => VisitorCapabilities::OBJECT_CREATION,
        }
    }
}

/// Registered visitors and, per hook, the indices of those that want it
struct VisitorTable<'v, I> {
    visitors: Vec<(&'v mut dyn DependencesVisitor<I>, VisitorCapabilities)>,
    hooks: [Vec<usize>; HOOK_COUNT],
}

impl<'v, I> VisitorTable<'v, I> {
    fn prepare(&mut self) {
        for hook in Hook::ALL {
            self.hooks[hook as usize] = self
                .visitors
                .iter()
                .enumerate()
                .filter(|(_, (_, capabilities))| capabilities.intersects(hook.capability()))
                .map(|(index, _)| index)
                .collect();
        }
    }

    fn has(&self, hook: Hook) -> bool {
        !self.hooks[hook as usize].is_empty()
    }

    fn each<F>(&mut self, hook: Hook, mut f: F) -> Result<()>
    where
        F: FnMut(&mut (dyn DependencesVisitor<I> + 'v)) -> Result<()>,
    {
        for &index in &self.hooks[hook as usize] {
            f(&mut *self.visitors[index].0)?;
        }
        Ok(())
    }

    fn all<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut (dyn DependencesVisitor<I> + 'v)) -> Result<()>,
    {
        for (visitor, _) in &mut self.visitors {
            f(&mut **visitor)?;
        }
        Ok(())
    }
}

/// Maps owned by one backward walk
struct WalkState<I> {
    frames: Vec<CallFrame<I>>,
    next_frame_id: u64,
    last_writer: HashMap<Variable, Rc<I>>,
    last_readers: HashMap<Variable, Vec<Rc<I>>>,
    /// Heap variables in the two maps above, by object
    heap_index: HashMap<u64, HashSet<Variable>>,
}

impl<I> WalkState<I> {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_frame_id: 1,
            last_writer: HashMap::new(),
            last_readers: HashMap::new(),
            heap_index: HashMap::new(),
        }
    }

    fn new_frame(&mut self, method: Option<MethodId>, depth: usize) -> CallFrame<I> {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        CallFrame::new(method, id, depth)
    }

    fn index_heap(&mut self, variable: Variable) {
        if let Some(object) = variable.heap_object() {
            self.heap_index.entry(object).or_default().insert(variable);
        }
    }
}

/// Backward walk over a trace, reporting dependences to visitors
pub struct DependenceExtractor<'v, I> {
    program: &'v Program,
    options: ExtractorOptions,
    watchdog: DynWatchdog,
    cache: ControlDependenceCache,
    visitors: VisitorTable<'v, I>,
    progress_monitors: Vec<&'v mut dyn ProgressMonitor>,
    tracks_control: bool,
}

impl<'v, I: TracedInstance> DependenceExtractor<'v, I> {
    pub fn new(program: &'v Program) -> Self {
        let options = ExtractorOptions::default();
        Self {
            program,
            options,
            watchdog: LazyWatchdog.in_arc(),
            cache: ControlDependenceCache::new(options.worklist),
            visitors: VisitorTable {
                visitors: Vec::new(),
                hooks: Default::default(),
            },
            progress_monitors: Vec::new(),
            tracks_control: false,
        }
    }

    pub fn with_options(mut self, options: ExtractorOptions) -> Self {
        self.options = options;
        self.cache = ControlDependenceCache::new(options.worklist);
        self
    }

    pub fn with_watchdog(mut self, watchdog: DynWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Register a visitor for the events in `capabilities`
    pub fn add_visitor(
        &mut self,
        visitor: &'v mut dyn DependencesVisitor<I>,
        capabilities: VisitorCapabilities,
    ) -> &mut Self {
        self.visitors.visitors.push((visitor, capabilities));
        self
    }

    pub fn add_progress_monitor(&mut self, monitor: &'v mut dyn ProgressMonitor) -> &mut Self {
        self.progress_monitors.push(monitor);
        self
    }

    /// Control dependences computed so far
    pub fn control_dependences(&self) -> &ControlDependenceCache {
        &self.cache
    }

    /// Walk `trace` and return the number of instances processed
    pub fn process<T>(&mut self, trace: T) -> Result<u64>
    where
        T: BackwardTrace + Send,
    {
        self.visitors.prepare();
        self.tracks_control =
            self.visitors.has(Hook::Control) || self.visitors.has(Hook::PendingControl);
        info!(
            "starting backward walk with {} visitors{}",
            self.visitors.visitors.len(),
            if self.options.multithreaded {
                " (multithreaded)"
            } else {
                ""
            }
        );

        for monitor in &mut self.progress_monitors {
            monitor.start();
        }
        let result = if self.options.multithreaded {
            let watchdog = Arc::clone(&self.watchdog);
            pipeline::run(trace, self.options.pipeline(), &*watchdog, |piped| {
                self.walk(piped)
            })
        } else {
            let mut trace = trace;
            self.walk(&mut trace)
        };
        for monitor in &mut self.progress_monitors {
            monitor.end();
        }

        match &result {
            Ok(count) => info!("backward walk finished after {} instances", count),
            Err(err) if err.is_interrupted() => self.notify_interrupted(),
            Err(_) => {}
        }
        result
    }

    fn notify_interrupted(&mut self) {
        info!("backward walk interrupted");
        for (visitor, _) in &mut self.visitors.visitors {
            if let Err(err) = visitor.interrupted() {
                debug!("visitor failed to handle interruption: {}", err);
            }
        }
    }

    fn walk<T>(&mut self, trace: &mut T) -> Result<u64>
    where
        T: BackwardTrace + ?Sized,
    {
        let mut state = WalkState::new();

        for (position, method) in trace.initial_stack_methods().into_iter().enumerate() {
            let depth = position + 1;
            let mut frame = state.new_frame(Some(method), depth);
            frame.interrupted_control_flow = true;
            state.frames.push(frame);
            self.visitors
                .each(Hook::MethodEntryLeave, |v| v.visit_method_leave(method, depth))?;
        }

        let poll_every = self.watchdog.poll_every().max(1) as u64;
        let mut count: u64 = 0;
        while let Some(next) = trace.next() {
            self.step(&mut state, next?)?;
            count += 1;
            if count % poll_every == 0 {
                let percentage = trace.percentage_done();
                for monitor in &mut self.progress_monitors {
                    monitor.update(percentage);
                }
                if self.watchdog.should_stop() {
                    return Err(Error::Interrupted);
                }
            }
        }

        self.finish(&mut state)?;
        self.visitors.all(|v| v.visit_end(count))?;
        Ok(count)
    }

    fn step(&mut self, state: &mut WalkState<I>, mut raw: InstructionInstance) -> Result<()> {
        let program = self.program;
        let instruction = program.instruction(raw.method, raw.index)?;
        let depth = raw.stack_depth;
        if depth == 0 {
            return Err(Error::trace(format!("{} has stack depth 0", raw)));
        }

        let mut popped = self.transition(state, &raw)?;
        let current = depth - 1;
        raw.frame = state.frames[current].id;
        let instance = Rc::new(I::from(raw));
        let base = instance.instance();

        let traced_callee = match (&instruction.kind, popped.first()) {
            (InstructionKind::Invoke { target, .. }, Some(callee)) => match callee.method {
                Some(method) => program.method(method)?.is_invoked_by(target),
                None => false,
            },
            _ => false,
        };
        if instruction.kind.is_invoke() && !traced_callee {
            self.visitors
                .each(Hook::Untraced, |v| v.visit_untraced_call(&instance))?;
        }

        let raises = state.frames[current].exception_pending && instruction.kind.can_raise();
        if raises {
            state.frames[current].exception_pending = false;
        }

        let mut info = {
            let (lower, upper) = state.frames.split_at_mut(current);
            let callee = if traced_callee {
                popped.first_mut()
            } else {
                None
            };
            simulate(program, instruction, base, &mut upper[0], lower.last_mut(), callee)?
        };

        let label = instruction.kind.label_kind();
        if label == Some(LabelKind::MethodEntry) {
            state.frames[current].finished = true;
        }

        self.visitors
            .each(Hook::Execution, |v| v.visit_instruction_execution(&instance))?;

        if self.tracks_control {
            self.report_control_dependences(state, &mut popped, &instance)?;
        }

        if raises {
            self.exception_thrown(state, current, &instance, &mut info)?;
        }

        if self.tracks_control {
            state.frames[current]
                .interesting
                .entry(base.index)
                .or_default()
                .push(Rc::clone(&instance));
            self.visitors
                .each(Hook::PendingControl, |v| v.visit_pending_control_dependence(&instance))?;
        }

        self.data_dependences(state, &instance, &info)?;
        if let Some(object) = info.created {
            self.object_created(state, object, &instance)?;
        }

        let frame = &mut state.frames[current];
        if let Some(exception) = info.caught_exception {
            frame.at_catch_block_start = Some((Rc::clone(&instance), exception));
            frame.exception_pending = true;
        }
        if label == Some(LabelKind::AbnormalTermination) {
            frame.abnormal_termination = true;
            frame.exception_pending = true;
        }

        for frame in popped {
            self.cleanup_frame(state, frame)?;
        }
        Ok(())
    }

    /// Bring the frame stack to the instance's depth; returns the frames left
    fn transition(
        &mut self,
        state: &mut WalkState<I>,
        raw: &InstructionInstance,
    ) -> Result<Vec<CallFrame<I>>> {
        let depth = raw.stack_depth;
        let mut popped = Vec::new();

        if depth < state.frames.len() {
            popped = state.frames.split_off(depth);
            if popped.len() > 1 {
                debug!("{}: left {} frames at once", raw, popped.len());
            }
            for frame in popped.iter().rev() {
                if let Some(method) = frame.method {
                    let frame_depth = frame.depth;
                    self.visitors
                        .each(Hook::MethodEntryLeave, |v| v.visit_method_entry(method, frame_depth))?;
                }
            }
        }

        if state.frames.len() + 1 < depth {
            debug!(
                "{}: stack depth grew from {} to {}",
                raw,
                state.frames.len(),
                depth
            );
            while state.frames.len() + 1 < depth {
                let mut frame = state.new_frame(None, state.frames.len() + 1);
                frame.interrupted_control_flow = true;
                state.frames.push(frame);
            }
        }

        if state.frames.len() == depth {
            let top = &mut state.frames[depth - 1];
            match top.method {
                Some(method) if method == raw.method && !top.finished => return Ok(popped),
                None => {
                    top.method = Some(raw.method);
                    self.visitors
                        .each(Hook::MethodEntryLeave, |v| v.visit_method_leave(raw.method, depth))?;
                    return Ok(popped);
                }
                Some(_) => {
                    // Another activation at the same depth, called from untraced code
                    if let Some(vacated) = state.frames.pop() {
                        if let Some(method) = vacated.method {
                            self.visitors.each(Hook::MethodEntryLeave, |v| {
                                v.visit_method_entry(method, depth)
                            })?;
                        }
                        self.cleanup_frame(state, vacated)?;
                    }
                }
            }
        }

        let frame = state.new_frame(Some(raw.method), depth);
        state.frames.push(frame);
        self.visitors
            .each(Hook::MethodEntryLeave, |v| v.visit_method_leave(raw.method, depth))?;
        Ok(popped)
    }

    fn report_control_dependences(
        &mut self,
        state: &mut WalkState<I>,
        popped: &mut [CallFrame<I>],
        instance: &Rc<I>,
    ) -> Result<()> {
        let base = instance.instance();
        let program = self.program;

        // Callee instances not decided by any branch ran because of the call
        if let Some(callee) = popped.first_mut() {
            let mut decided: Vec<Rc<I>> = callee.interesting.drain().flat_map(|(_, v)| v).collect();
            decided.sort_by_key(|i| i.instance().instance_nr);
            for from in &decided {
                self.visitors
                    .each(Hook::Control, |v| v.visit_control_dependence(from, instance))?;
            }
        }

        let method = program.method(base.method)?;
        let map = self.cache.dependents(method, base.index)?;
        let dependents = map.dependents(base.index).unwrap_or_default();
        let frame = &mut state.frames[base.stack_depth - 1];
        for dependent in dependents {
            if let Some(matched) = frame.interesting.remove(dependent) {
                for from in &matched {
                    self.visitors
                        .each(Hook::Control, |v| v.visit_control_dependence(from, instance))?;
                }
            }
        }
        Ok(())
    }

    /// `instance` raised an exception; link it to the nearest open handler
    ///
    /// The thrower defines the stack entry the handler received, so readers
    /// of the exception depend on it directly. The handler label depends on
    /// the thrower unless some other instance already decided it.
    fn exception_thrown(
        &mut self,
        state: &mut WalkState<I>,
        current: usize,
        instance: &Rc<I>,
        info: &mut DynamicInformation,
    ) -> Result<()> {
        let handler = state.frames[..=current]
            .iter_mut()
            .enumerate()
            .rev()
            .find_map(|(depth, frame)| frame.at_catch_block_start.take().map(|h| (depth, h)));
        let Some((depth, (catch, exception))) = handler else {
            return Ok(());
        };
        info.define_exception(exception);

        if !self.tracks_control {
            return Ok(());
        }
        let frame = &mut state.frames[depth];
        let index = catch.instance().index;
        let mut undecided = false;
        if let Some(waiting) = frame.interesting.get_mut(&index) {
            if let Some(position) = waiting.iter().position(|i| Rc::ptr_eq(i, &catch)) {
                waiting.swap_remove(position);
                undecided = true;
            }
            if waiting.is_empty() {
                frame.interesting.remove(&index);
            }
        }
        if undecided {
            self.visitors
                .each(Hook::Control, |v| v.visit_control_dependence(&catch, instance))?;
        }
        Ok(())
    }

    fn data_dependences(
        &mut self,
        state: &mut WalkState<I>,
        instance: &Rc<I>,
        info: &DynamicInformation,
    ) -> Result<()> {
        for &variable in &info.defined {
            if let Some(readers) = state.last_readers.remove(&variable) {
                let used = info.used_for(&variable);
                for reader in &readers {
                    self.visitors.each(Hook::DataRaw, |v| {
                        v.visit_data_dependence(reader, instance, used, variable, RAW)
                    })?;
                    self.visitors.each(Hook::PendingRaw, |v| {
                        v.discard_pending_data_dependence(reader, variable, RAW)
                    })?;
                }
            }
            // Every stack entry is read once per write
            if !variable.is_stack_entry() {
                if let Some(previous) = state.last_writer.insert(variable, Rc::clone(instance)) {
                    self.visitors.each(Hook::PendingWar, |v| {
                        v.discard_pending_data_dependence(&previous, variable, WAR)
                    })?;
                }
                self.visitors.each(Hook::PendingWar, |v| {
                    v.visit_pending_data_dependence(instance, variable, WAR)
                })?;
            }
            state.index_heap(variable);
        }

        for &variable in &info.used {
            if !variable.is_stack_entry() {
                if let Some(writer) = state.last_writer.get(&variable) {
                    if !Rc::ptr_eq(writer, instance) {
                        self.visitors.each(Hook::DataWar, |v| {
                            v.visit_data_dependence(writer, instance, &[], variable, WAR)
                        })?;
                    }
                }
            }
            let readers = state.last_readers.entry(variable).or_default();
            if !readers.last().is_some_and(|last| Rc::ptr_eq(last, instance)) {
                readers.push(Rc::clone(instance));
                self.visitors.each(Hook::PendingRaw, |v| {
                    v.visit_pending_data_dependence(instance, variable, RAW)
                })?;
            }
            state.index_heap(variable);
        }
        Ok(())
    }

    /// No dependence crosses the allocation of an object
    fn object_created(&mut self, state: &mut WalkState<I>, object: u64, instance: &Rc<I>) -> Result<()> {
        if let Some(variables) = state.heap_index.remove(&object) {
            let mut variables: Vec<Variable> = variables.into_iter().collect();
            variables.sort();
            for variable in variables {
                // These readers observed the default value the allocation set
                if let Some(readers) = state.last_readers.remove(&variable) {
                    for reader in &readers {
                        self.visitors.each(Hook::DataRaw, |v| {
                            v.visit_data_dependence(reader, instance, &[], variable, RAW)
                        })?;
                        self.visitors.each(Hook::PendingRaw, |v| {
                            v.discard_pending_data_dependence(reader, variable, RAW)
                        })?;
                    }
                }
                if let Some(writer) = state.last_writer.remove(&variable) {
                    self.visitors.each(Hook::PendingWar, |v| {
                        v.discard_pending_data_dependence(&writer, variable, WAR)
                    })?;
                }
            }
        }
        self.visitors
            .each(Hook::Creation, |v| v.visit_object_creation(object, instance))
    }

    fn cleanup_frame(&mut self, state: &mut WalkState<I>, frame: CallFrame<I>) -> Result<()> {
        for variable in frame.variables() {
            self.discard(state, variable)?;
        }
        Ok(())
    }

    fn discard(&mut self, state: &mut WalkState<I>, variable: Variable) -> Result<()> {
        if let Some(readers) = state.last_readers.remove(&variable) {
            for reader in &readers {
                self.visitors.each(Hook::PendingRaw, |v| {
                    v.discard_pending_data_dependence(reader, variable, RAW)
                })?;
            }
        }
        if let Some(writer) = state.last_writer.remove(&variable) {
            self.visitors.each(Hook::PendingWar, |v| {
                v.discard_pending_data_dependence(&writer, variable, WAR)
            })?;
        }
        Ok(())
    }

    /// Close the activations still open when the trace ran out
    fn finish(&mut self, state: &mut WalkState<I>) -> Result<()> {
        while let Some(frame) = state.frames.pop() {
            if let Some(method) = frame.method {
                let depth = frame.depth;
                self.visitors
                    .each(Hook::MethodEntryLeave, |v| v.visit_method_entry(method, depth))?;
            }
            self.cleanup_frame(state, frame)?;
        }

        let mut remaining: Vec<Variable> = state
            .last_readers
            .keys()
            .chain(state.last_writer.keys())
            .copied()
            .collect();
        remaining.sort();
        remaining.dedup();
        for variable in remaining {
            self.discard(state, variable)?;
        }
        state.heap_index.clear();
        Ok(())
    }
}
