//! Backward dynamic slicing
//!
//! The [`Slicer`] registers itself as a dependence visitor and follows
//! read-after-write and control dependences from the criterion instances.
//! Every instance reached this way is reported to the registered
//! [`SliceVisitor`]s together with its distance, the number of dependence
//! edges between it and the nearest criterion instance.
//!
//! Bookkeeping instances (labels and unconditional jumps) can be reached but
//! are never reported; dependences flowing through them are reported from the
//! instances they were reached from.

pub mod collector;
pub mod criterion;

pub use collector::SliceInstructionsCollector;
pub use criterion::{CriterionInstance, CriterionMatch, SlicingCriterion, VariableSpec};

use crate::bytecode::{Instruction, InstructionKind, MethodId, MethodRef, Program};
use crate::dependence::{
    DataDependenceType, DependenceExtractor, DependencesVisitor, ExtractorOptions,
    ProgressMonitor, Variable, VisitorCapabilities,
};
use crate::error::{Error, Result};
use crate::trace::{BackwardTrace, InstructionInstance, TracedInstance};
use crate::watchdog::{DynWatchdog, LazyWatchdog};
use log::{debug, info};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;
use std::sync::Arc;

/// Receives the slice as it is discovered
pub trait SliceVisitor {
    /// A criterion instance
    fn visit_matched_instance(&mut self, instance: &InstructionInstance) -> Result<()>;

    /// `to` is on the slice because `from` depends on it, through `variable`
    /// for data dependences
    fn visit_slice_dependence(
        &mut self,
        from: &InstructionInstance,
        to: &InstructionInstance,
        variable: Option<Variable>,
        distance: u32,
    ) -> Result<()>;
}

/// Notified of calls into methods that were not traced
pub trait UntracedCallVisitor {
    fn visit_untraced_call(&mut self, caller: &InstructionInstance, target: &MethodRef)
        -> Result<()>;
}

#[derive(Debug)]
struct SliceState {
    on_slice: bool,
    distance: u32,
    all_data_interesting: bool,
    interesting_variable: Option<Variable>,
    more_interesting_variables: HashSet<Variable>,
    /// For bookkeeping instances: the instances they were reached from
    predecessors: Vec<Rc<SlicerInstance>>,
}

impl Default for SliceState {
    fn default() -> Self {
        Self {
            on_slice: false,
            distance: u32::MAX,
            all_data_interesting: false,
            interesting_variable: None,
            more_interesting_variables: HashSet::new(),
            predecessors: Vec::new(),
        }
    }
}

impl SliceState {
    fn is_interesting(&self, variable: Variable) -> bool {
        self.all_data_interesting
            || self.interesting_variable == Some(variable)
            || self.more_interesting_variables.contains(&variable)
    }
}

/// Instruction instance with the slicer's per-instance state
#[derive(Debug)]
pub struct SlicerInstance {
    base: InstructionInstance,
    state: RefCell<SliceState>,
}

impl SlicerInstance {
    pub fn on_slice(&self) -> bool {
        self.state.borrow().on_slice
    }

    /// Distance to the nearest criterion instance, once on the slice
    pub fn distance(&self) -> Option<u32> {
        let state = self.state.borrow();
        state.on_slice.then_some(state.distance)
    }
}

impl From<InstructionInstance> for SlicerInstance {
    fn from(base: InstructionInstance) -> Self {
        Self {
            base,
            state: RefCell::new(SliceState::default()),
        }
    }
}

impl TracedInstance for SlicerInstance {
    fn instance(&self) -> &InstructionInstance {
        &self.base
    }
}

/// Computes backward dynamic slices of a trace
pub struct Slicer<'a> {
    program: &'a Program,
    options: ExtractorOptions,
    watchdog: DynWatchdog,
    slice_visitors: Vec<&'a mut dyn SliceVisitor>,
    untraced_call_visitors: Vec<&'a mut dyn UntracedCallVisitor>,
    progress_monitors: Vec<&'a mut dyn ProgressMonitor>,
}

impl<'a> Slicer<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            options: ExtractorOptions::default(),
            watchdog: LazyWatchdog.in_arc(),
            slice_visitors: Vec::new(),
            untraced_call_visitors: Vec::new(),
            progress_monitors: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: ExtractorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_watchdog(mut self, watchdog: DynWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn add_slice_visitor(&mut self, visitor: &'a mut dyn SliceVisitor) -> &mut Self {
        self.slice_visitors.push(visitor);
        self
    }

    pub fn add_untraced_call_visitor(
        &mut self,
        visitor: &'a mut dyn UntracedCallVisitor,
    ) -> &mut Self {
        self.untraced_call_visitors.push(visitor);
        self
    }

    pub fn add_progress_monitor(&mut self, monitor: &'a mut dyn ProgressMonitor) -> &mut Self {
        self.progress_monitors.push(monitor);
        self
    }

    /// Slice `trace` for `criteria`, reporting to the registered visitors
    pub fn process<T>(&mut self, trace: T, criteria: &[SlicingCriterion]) -> Result<()>
    where
        T: BackwardTrace + Send,
    {
        if criteria.is_empty() {
            return Err(Error::InvalidCriterion {
                criterion: String::new(),
                message: "no slicing criterion given".to_string(),
            });
        }
        let criteria = criteria
            .iter()
            .map(|criterion| criterion.instance(self.program))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "slicing for {}",
            criteria
                .iter()
                .map(|c| c.criterion().to_string())
                .collect::<Vec<_>>()
                .join("; ")
        );

        let mut capabilities = VisitorCapabilities::DATA_DEPENDENCES_RAW
            | VisitorCapabilities::CONTROL_DEPENDENCES
            | VisitorCapabilities::INSTRUCTION_EXECUTIONS
            | VisitorCapabilities::METHOD_ENTRY_LEAVE;
        if !self.untraced_call_visitors.is_empty() {
            capabilities |= VisitorCapabilities::UNTRACED_METHOD_CALLS;
        }

        let mut computation = SliceComputation {
            program: self.program,
            criteria,
            slice_visitors: &mut self.slice_visitors,
            untraced_call_visitors: &mut self.untraced_call_visitors,
            pending_locals: Vec::new(),
            entered: None,
        };

        let mut extractor = DependenceExtractor::new(self.program)
            .with_options(self.options)
            .with_watchdog(Arc::clone(&self.watchdog));
        extractor.add_visitor(&mut computation, capabilities);
        for monitor in &mut self.progress_monitors {
            extractor.add_progress_monitor(&mut **monitor);
        }
        extractor.process(trace)?;
        Ok(())
    }
}

struct SliceComputation<'s, 'a> {
    program: &'a Program,
    criteria: Vec<CriterionInstance<'a>>,
    slice_visitors: &'s mut Vec<&'a mut dyn SliceVisitor>,
    untraced_call_visitors: &'s mut Vec<&'a mut dyn UntracedCallVisitor>,
    /// Criterion locals whose last write has not been seen yet, per stack depth
    pending_locals: Vec<BTreeSet<usize>>,
    /// Pending locals of the activation the walk just stepped out of
    entered: Option<(MethodId, BTreeSet<usize>)>,
}

impl SliceComputation<'_, '_> {
    fn mark_matched(
        &mut self,
        instance: &SlicerInstance,
        instruction: &Instruction,
        all_data: bool,
    ) -> Result<()> {
        {
            let mut state = instance.state.borrow_mut();
            state.on_slice = true;
            state.distance = 0;
            state.all_data_interesting |= all_data;
        }
        if !instruction.kind.is_bookkeeping() {
            for visitor in self.slice_visitors.iter_mut() {
                visitor.visit_matched_instance(&instance.base)?;
            }
        }
        Ok(())
    }

    /// Whether this write or call resolves pending criterion locals
    fn resolves_pending(
        &mut self,
        instance: &SlicerInstance,
        instruction: &InstructionKind,
    ) -> Result<bool> {
        let depth = instance.base.stack_depth;
        let entered = self.entered.take();
        match instruction {
            InstructionKind::Store { local, .. } | InstructionKind::Increment { local } => {
                Ok(self.pending_locals[depth].remove(local))
            }
            InstructionKind::Invoke { target, kind } => match entered {
                Some((method, mut pending)) if self.program.method(method)?.is_invoked_by(target) => {
                    let parameters = self
                        .program
                        .call_layout(target)?
                        .parameter_slots(kind.has_receiver());
                    let before = pending.len();
                    pending.retain(|slot| *slot >= parameters);
                    Ok(pending.len() != before)
                }
                _ => Ok(false),
            },
            _ => Ok(false),
        }
    }

    /// Put `to` on the slice because `from` depends on it
    fn propagate(
        &mut self,
        from: &Rc<SlicerInstance>,
        to: &Rc<SlicerInstance>,
        to_instruction: &Instruction,
        variable: Option<Variable>,
    ) -> Result<()> {
        let from_state = from.state.borrow();
        let mut to_state = to.state.borrow_mut();
        to_state.on_slice = true;

        if to_instruction.kind.is_bookkeeping() {
            to_state.distance = to_state.distance.min(from_state.distance);
            let reached_from = if from_state.predecessors.is_empty() {
                vec![Rc::clone(from)]
            } else {
                from_state.predecessors.clone()
            };
            for source in reached_from {
                if !to_state.predecessors.iter().any(|p| Rc::ptr_eq(p, &source)) {
                    to_state.predecessors.push(source);
                }
            }
            return Ok(());
        }

        let sources = if from_state.predecessors.is_empty() {
            vec![Rc::clone(from)]
        } else {
            from_state.predecessors.clone()
        };
        drop(from_state);
        for source in &sources {
            let distance = source.state.borrow().distance.saturating_add(1);
            to_state.distance = to_state.distance.min(distance);
            for visitor in self.slice_visitors.iter_mut() {
                visitor.visit_slice_dependence(&source.base, &to.base, variable, distance)?;
            }
        }
        Ok(())
    }
}

impl DependencesVisitor<SlicerInstance> for SliceComputation<'_, '_> {
    fn visit_instruction_execution(&mut self, instance: &Rc<SlicerInstance>) -> Result<()> {
        let program = self.program;
        let base = &instance.base;
        let depth = base.stack_depth;
        if self.pending_locals.len() <= depth {
            self.pending_locals.resize_with(depth + 1, BTreeSet::new);
        }
        let instruction = program.instruction(base.method, base.index)?;

        for position in 0..self.criteria.len() {
            let matched = self.criteria[position].matches(base)?;
            if !matched.matched() {
                continue;
            }
            let criterion = &self.criteria[position];
            if criterion.has_local_variables() {
                if matched == CriterionMatch::RunStart {
                    let slots = criterion.local_variables(base.method).to_vec();
                    debug!("criterion {} waits for locals {:?}", base, slots);
                    self.pending_locals[depth].extend(slots);
                }
            } else {
                let all_data = criterion.match_all_data();
                self.mark_matched(instance, instruction, all_data)?;
            }
        }

        if self.resolves_pending(instance, &instruction.kind)? {
            self.mark_matched(instance, instruction, true)?;
        }
        Ok(())
    }

    fn visit_control_dependence(
        &mut self,
        from: &Rc<SlicerInstance>,
        to: &Rc<SlicerInstance>,
    ) -> Result<()> {
        if Rc::ptr_eq(from, to) || !from.on_slice() {
            return Ok(());
        }
        let program = self.program;
        let to_instruction = program.instruction(to.base.method, to.base.index)?;
        self.propagate(from, to, to_instruction, None)?;

        // A call is only needed for having reached the callee, not for its arguments
        let calls_from = match &to_instruction.kind {
            InstructionKind::Invoke { target, .. } => {
                program.method(from.base.method)?.is_invoked_by(target)
            }
            _ => false,
        };
        if !calls_from {
            to.state.borrow_mut().all_data_interesting = true;
        }
        Ok(())
    }

    fn visit_data_dependence(
        &mut self,
        from: &Rc<SlicerInstance>,
        to: &Rc<SlicerInstance>,
        used: &[Variable],
        variable: Variable,
        kind: DataDependenceType,
    ) -> Result<()> {
        if kind != DataDependenceType::ReadAfterWrite || Rc::ptr_eq(from, to) {
            return Ok(());
        }
        {
            let state = from.state.borrow();
            if !state.on_slice || !state.is_interesting(variable) {
                return Ok(());
            }
        }
        let program = self.program;
        let to_instruction = program.instruction(to.base.method, to.base.index)?;
        self.propagate(from, to, to_instruction, Some(variable))?;

        let mut state = to.state.borrow_mut();
        let mut used = used.iter().copied();
        if let Some(first) = used.next() {
            match state.interesting_variable {
                None => state.interesting_variable = Some(first),
                Some(known) if known == first => {}
                Some(_) => {
                    state.more_interesting_variables.insert(first);
                }
            }
            state.more_interesting_variables.extend(used);
        }
        Ok(())
    }

    fn visit_method_entry(&mut self, method: MethodId, depth: usize) -> Result<()> {
        if let Some(pending) = self.pending_locals.get_mut(depth) {
            if !pending.is_empty() {
                self.entered = Some((method, std::mem::take(pending)));
            }
        }
        Ok(())
    }

    fn visit_method_leave(&mut self, _method: MethodId, depth: usize) -> Result<()> {
        if let Some(pending) = self.pending_locals.get_mut(depth) {
            pending.clear();
        }
        Ok(())
    }

    fn visit_untraced_call(&mut self, caller: &Rc<SlicerInstance>) -> Result<()> {
        let program = self.program;
        let instruction = program.instruction(caller.base.method, caller.base.index)?;
        if let InstructionKind::Invoke { target, .. } = &instruction.kind {
            for visitor in self.untraced_call_visitors.iter_mut() {
                visitor.visit_untraced_call(&caller.base, target)?;
            }
        }
        Ok(())
    }

    fn visit_end(&mut self, instances: u64) -> Result<()> {
        let unresolved: usize = self.pending_locals.iter().map(BTreeSet::len).sum();
        if unresolved > 0 {
            debug!(
                "{} criterion locals were never written in the trace",
                unresolved
            );
        }
        debug!("slicing finished after {} instances", instances);
        Ok(())
    }
}
