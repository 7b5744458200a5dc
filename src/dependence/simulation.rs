//! Backward instruction simulation
//!
//! Walking backward, the operand stack height of a frame is only known
//! relative to the point where the walk entered the frame. Each simulated
//! instruction with `pops` inputs and `pushes` outputs at height `h` writes
//! the stack entries `[h - pushes, h)` and reads `[h - pushes, h - pushes + pops)`;
//! the height before it executed is `h - pushes + pops`.

use super::Variable;
use crate::bytecode::{
    FieldId, Instruction, InstructionIndex, InstructionKind, JumpCondition, LabelKind, MethodId,
    Program,
};
use crate::error::Result;
use crate::trace::{InstanceInfo, InstructionInstance};
use log::trace;
use std::collections::HashMap;
use std::rc::Rc;

/// State of one method activation during the backward walk
#[derive(Debug)]
pub struct CallFrame<I> {
    /// `None` for a depth the trace skipped
    pub method: Option<MethodId>,
    pub id: u64,
    pub depth: usize,
    op_stack: i32,
    /// One past the highest local slot touched
    local_extent: usize,
    /// Lowest and one past the highest stack offset touched
    stack_extent: Option<(i32, i32)>,
    /// The walk started inside this activation
    pub interrupted_control_flow: bool,
    /// The activation ended by an exception
    pub abnormal_termination: bool,
    /// The walk passed the activation's entry label
    pub finished: bool,
    /// The next instance of this frame threw an exception
    pub(crate) exception_pending: bool,
    /// Catch label instance and the exception variable it defined
    pub(crate) at_catch_block_start: Option<(Rc<I>, Variable)>,
    /// Instances still looking for their control dependence, by instruction
    pub(crate) interesting: HashMap<InstructionIndex, Vec<Rc<I>>>,
}

impl<I> CallFrame<I> {
    pub fn new(method: Option<MethodId>, id: u64, depth: usize) -> Self {
        Self {
            method,
            id,
            depth,
            op_stack: 0,
            local_extent: 0,
            stack_extent: None,
            interrupted_control_flow: false,
            abnormal_termination: false,
            finished: false,
            exception_pending: false,
            at_catch_block_start: None,
            interesting: HashMap::new(),
        }
    }

    /// Current operand stack height, relative to the frame's last instruction
    pub fn op_stack(&self) -> i32 {
        self.op_stack
    }

    pub fn local(&mut self, index: usize) -> Variable {
        self.local_extent = self.local_extent.max(index + 1);
        Variable::LocalVariable {
            frame: self.id,
            index,
        }
    }

    pub fn stack(&mut self, offset: i32) -> Variable {
        self.stack_extent = Some(match self.stack_extent {
            Some((low, high)) => (low.min(offset), high.max(offset + 1)),
            None => (offset, offset + 1),
        });
        Variable::StackEntry {
            frame: self.id,
            offset,
        }
    }

    /// Every local and stack variable this frame touched
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        let locals = (0..self.local_extent).map(move |index| Variable::LocalVariable {
            frame: self.id,
            index,
        });
        let (low, high) = self.stack_extent.unwrap_or((0, 0));
        let stack = (low..high).map(move |offset| Variable::StackEntry {
            frame: self.id,
            offset,
        });
        locals.chain(stack)
    }
}

/// Effect of one instance on the tracked variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicInformation {
    pub defined: Vec<Variable>,
    pub used: Vec<Variable>,
    /// Inputs of single definitions, where narrower than `used`
    definition_uses: HashMap<Variable, Vec<Variable>>,
    /// Object or array allocated by this instance
    pub created: Option<u64>,
    /// Set on the entry of an exception handler: the stack entry holding the exception
    pub caught_exception: Option<Variable>,
}

impl DynamicInformation {
    /// Variables read to produce `definition`
    pub fn used_for(&self, definition: &Variable) -> &[Variable] {
        self.definition_uses
            .get(definition)
            .map(Vec::as_slice)
            .unwrap_or(&self.used)
    }

    pub fn annotate_definition(&mut self, definition: Variable, used: Vec<Variable>) {
        self.definition_uses.insert(definition, used);
    }

    /// This instance threw the exception a handler received in `exception`
    pub fn define_exception(&mut self, exception: Variable) {
        let used = self.used.clone();
        self.defined.push(exception);
        self.annotate_definition(exception, used);
    }
}

/// Simulate `instruction` backward in `frame`
///
/// `caller` is the frame one level up, if any. `callee` is the frame the
/// walk just left when `instruction` is a call whose target was traced.
pub fn simulate<I>(
    program: &Program,
    instruction: &Instruction,
    instance: &InstructionInstance,
    frame: &mut CallFrame<I>,
    caller: Option<&mut CallFrame<I>>,
    callee: Option<&mut CallFrame<I>>,
) -> Result<DynamicInformation> {
    let mut info = DynamicInformation::default();

    match &instruction.kind {
        InstructionKind::Label { kind } => {
            // The handler finds the exception on the stack; its thrower defines it
            if *kind == LabelKind::CatchBlock {
                let top = frame.op_stack - 1;
                info.caught_exception = Some(frame.stack(top));
                frame.op_stack = top;
            }
        }
        InstructionKind::Nop => {}
        InstructionKind::Constant { slots } => transfer(frame, &mut info, 0, *slots),
        InstructionKind::Load { local, wide } => {
            let width = width(*wide);
            transfer(frame, &mut info, 0, width);
            for slot in *local..*local + width {
                info.used.push(frame.local(slot));
            }
        }
        InstructionKind::Store { local, wide } => {
            let width = width(*wide);
            transfer(frame, &mut info, width, 0);
            for slot in *local..*local + width {
                info.defined.push(frame.local(slot));
            }
        }
        InstructionKind::Increment { local } => {
            let variable = frame.local(*local);
            info.defined.push(variable);
            info.used.push(variable);
        }
        InstructionKind::Arithmetic { pops, pushes } => transfer(frame, &mut info, *pops, *pushes),
        InstructionKind::Stack { op } => {
            let (pops, pushes) = op.effect();
            transfer(frame, &mut info, pops, pushes);
        }
        InstructionKind::TypeCheck | InstructionKind::ArrayLength => {
            transfer(frame, &mut info, 1, 1)
        }
        InstructionKind::Jump { condition, .. } => {
            let pops = match condition {
                JumpCondition::Always => 0,
                JumpCondition::Unary => 1,
                JumpCondition::Binary => 2,
            };
            transfer(frame, &mut info, pops, 0);
        }
        InstructionKind::Subroutine { .. } => transfer(frame, &mut info, 0, 1),
        InstructionKind::Ret { local } => info.used.push(frame.local(*local)),
        InstructionKind::TableSwitch { .. }
        | InstructionKind::LookupSwitch { .. }
        | InstructionKind::Throw
        | InstructionKind::Monitor => transfer(frame, &mut info, 1, 0),
        InstructionKind::Return { slots } => {
            let slots = *slots as i32;
            let base = frame.op_stack;
            let returned: Vec<Variable> = (0..slots).map(|i| frame.stack(base + i)).collect();
            frame.op_stack = base + slots;
            info.used.extend(returned.iter().copied());

            match caller {
                Some(caller) => {
                    let target = caller.op_stack - slots;
                    for (i, value) in returned.into_iter().enumerate() {
                        let slot = caller.stack(target + i as i32);
                        info.defined.push(slot);
                        info.annotate_definition(slot, vec![value]);
                    }
                }
                None if slots > 0 => {
                    trace!("{}: return without a caller frame", instance);
                }
                None => {}
            }
        }
        InstructionKind::GetField { field, is_static } => {
            let pops = usize::from(!*is_static);
            transfer(frame, &mut info, pops, field_width(program, *field));
            if let Some(variable) = field_variable(instance, *field, *is_static) {
                info.used.push(variable);
            }
        }
        InstructionKind::PutField { field, is_static } => {
            let pops = field_width(program, *field) + usize::from(!*is_static);
            transfer(frame, &mut info, pops, 0);
            if let Some(variable) = field_variable(instance, *field, *is_static) {
                info.defined.push(variable);
            }
        }
        InstructionKind::ArrayLoad { wide } => {
            transfer(frame, &mut info, 2, width(*wide));
            if let Some(variable) = element_variable(instance) {
                info.used.push(variable);
            }
        }
        InstructionKind::ArrayStore { wide } => {
            transfer(frame, &mut info, 2 + width(*wide), 0);
            if let Some(variable) = element_variable(instance) {
                info.defined.push(variable);
            }
        }
        InstructionKind::New => {
            transfer(frame, &mut info, 0, 1);
            info.created = created_object(instance);
        }
        InstructionKind::NewArray { dimensions } => {
            transfer(frame, &mut info, *dimensions, 1);
            info.created = created_object(instance);
        }
        InstructionKind::Invoke { target, kind } => {
            let layout = program.call_layout(target)?;
            let parameters = layout.parameter_slots(kind.has_receiver());
            match callee {
                Some(callee) => {
                    // The callee's return already defined the returned slots
                    let returned = if callee.abnormal_termination {
                        0
                    } else {
                        layout.return_slots
                    };
                    let arguments = frame.op_stack - returned as i32;
                    for i in 0..parameters {
                        let argument = frame.stack(arguments + i as i32);
                        let parameter = callee.local(i);
                        info.used.push(argument);
                        info.defined.push(parameter);
                        info.annotate_definition(parameter, vec![argument]);
                    }
                    frame.op_stack = arguments + parameters as i32;
                }
                None => transfer(frame, &mut info, parameters, layout.return_slots),
            }
        }
    }

    Ok(info)
}

fn width(wide: bool) -> usize {
    if wide {
        2
    } else {
        1
    }
}

fn transfer<I>(frame: &mut CallFrame<I>, info: &mut DynamicInformation, pops: usize, pushes: usize) {
    let offset = frame.op_stack - pushes as i32;
    for i in 0..pushes {
        info.defined.push(frame.stack(offset + i as i32));
    }
    for i in 0..pops {
        info.used.push(frame.stack(offset + i as i32));
    }
    frame.op_stack = offset + pops as i32;
}

fn field_width(program: &Program, field: FieldId) -> usize {
    program
        .field(field)
        .map_or(1, |f| width(f.is_wide()))
}

fn field_variable(instance: &InstructionInstance, field: FieldId, is_static: bool) -> Option<Variable> {
    if is_static {
        return Some(Variable::ObjectField { object: 0, field });
    }
    match instance.info {
        InstanceInfo::Object { id } => Some(Variable::ObjectField { object: id, field }),
        _ => {
            trace!("{}: field access without an object id", instance);
            None
        }
    }
}

fn element_variable(instance: &InstructionInstance) -> Option<Variable> {
    match instance.info {
        InstanceInfo::ArrayElement { array, index } => Some(Variable::ArrayElement { array, index }),
        _ => {
            trace!("{}: array access without an element id", instance);
            None
        }
    }
}

fn created_object(instance: &InstructionInstance) -> Option<u64> {
    match instance.info {
        InstanceInfo::Created { id } => Some(id),
        _ => {
            trace!("{}: allocation without an object id", instance);
            None
        }
    }
}
