//! Static validation of Wasm modules.
//!
//! The specification that is taken as the basis is [wasm-core-1-20191205](https://www.w3.org/TR/2019/REC-wasm-core-1-20191205/),
//! restricted to the MVP feature set.
//!
//! Validation is split into two layers. [validate_definitions] checks the
//! module-level rules, which are plain table scans: index ranges, size
//! limits, export uniqueness, and initializer-expression typing.
//! [validate_code] checks each function body by walking its opcode stream
//! with a shadow operand stack and a shadow control stack, which encodes the
//! whole Wasm type system including the stack-polymorphic typing of
//! unreachable code. The basic code validation algorithm is a transcript of
//! the validation algorithm described in the appendix of the linked
//! specification.

use crate::{
    constants::*,
    decode::{OpCodeIterator, ParseResult},
    types::*,
};
use anyhow::{anyhow, bail, ensure};
use std::{borrow::Borrow, collections::BTreeSet, rc::Rc};
use tracing::trace;

/// Result type of validation.
pub type ValidateResult<A> = anyhow::Result<A>;

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
/// A possibly known operand type. Unknown types appear on the stack after we
/// enter an unreachable part of the code. That part must still be
/// type-checked, but the operands at that point are arbitrary.
pub(crate) enum MaybeKnown {
    Unknown,
    Known(ValueType),
}

use MaybeKnown::*;

impl MaybeKnown {
    pub(crate) fn is_unknown(self) -> bool { self == MaybeKnown::Unknown }
}

impl std::fmt::Display for MaybeKnown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unknown => f.write_str("any"),
            Known(ty) => write!(f, "{}", ty),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// The kind of structured control region a control frame belongs to. An `if`
/// is pushed as [IfThen](FrameKind::IfThen) and only becomes
/// [IfElse](FrameKind::IfElse) when an explicit `else` is seen, so whether a
/// result-yielding `if` is missing its `else` is decided at `end` time.
pub(crate) enum FrameKind {
    Function,
    Block,
    IfThen,
    IfElse,
    Loop,
}

#[derive(Debug)]
/// A single control frame. This indicates what the types are for jumping to
/// the label of this frame, or normally exiting it, as well as where the
/// frame started on the operand stack.
pub(crate) struct ControlFrame {
    pub(crate) kind:        FrameKind,
    /// Label type of the frame, the type that a branch to this frame must
    /// supply. For a loop this is empty since a branch jumps back to the
    /// head of the loop, consuming nothing.
    pub(crate) label_type:  BlockType,
    /// End type of the frame, the type produced when the frame is exited in
    /// a normal way.
    pub(crate) end_type:    BlockType,
    /// Height of the operand stack at the entry of this frame. The operand
    /// stack never shrinks below this height while the frame is live.
    pub(crate) height:      usize,
    /// Whether we are in the unreachable part of this frame, i.e., after an
    /// unconditional jump or a trap instruction.
    pub(crate) unreachable: bool,
}

#[derive(Debug, Default)]
/// The operand stack containing either known or unknown types.
///
/// The default instance produces an empty operand stack.
pub(crate) struct OperandStack {
    pub(crate) stack: Vec<MaybeKnown>,
}

#[derive(Debug, Default)]
/// The stack of control frames, innermost last.
///
/// The default instance produces an empty control stack.
pub(crate) struct ControlStack {
    pub(crate) stack: Vec<ControlFrame>,
}

impl ControlStack {
    /// Get the frame at branch depth `n`, `0` being the innermost.
    pub fn get(&self, n: u32) -> Option<&ControlFrame> {
        let n = n as usize;
        if n >= self.stack.len() {
            None
        } else {
            self.stack.get(self.stack.len() - n - 1)
        }
    }

    /// Get the label type of the frame at branch depth `n`. This is the type
    /// a branch to that frame must supply.
    pub fn get_label(&self, n: u32) -> Option<BlockType> {
        self.get(n).map(|frame| frame.label_type)
    }
}

#[derive(Debug)]
/// The validation state of a single function body, i.e., the shadow operand
/// stack and the shadow control stack. This is the same state as described
/// by the validation algorithm of the Wasm specification appendix.
pub struct ValidationState {
    pub(crate) opds:  OperandStack,
    pub(crate) ctrls: ControlStack,
}

impl ValidationState {
    /// A fresh state for a function with the given return type. The bottom
    /// of the control stack is the function frame itself.
    fn new(return_type: BlockType) -> Self {
        let mut state = ValidationState {
            opds:  OperandStack::default(),
            ctrls: ControlStack::default(),
        };
        state.push_ctrl(FrameKind::Function, return_type, return_type);
        state
    }

    /// Check whether we are done, meaning that the control stack is
    /// exhausted.
    pub fn done(&self) -> bool { self.ctrls.stack.is_empty() }

    /// Push a new type to the operand stack.
    fn push_opd(&mut self, m_type: MaybeKnown) { self.opds.stack.push(m_type) }

    /// Pop a type from the operand stack and, if successful, return it.
    ///
    /// The innermost frame's entry height acts as a floor. Popping below the
    /// floor fails while the frame is reachable; in unreachable code such
    /// pops yield [Unknown] instead.
    fn pop_opd(&mut self) -> ValidateResult<MaybeKnown> {
        match self.ctrls.stack.last() {
            None => bail!("control stack exhausted"),
            Some(frame) => {
                if self.opds.stack.len() == frame.height {
                    if frame.unreachable {
                        Ok(Unknown)
                    } else {
                        bail!("invalid stack access")
                    }
                } else {
                    self.opds.stack.pop().ok_or_else(|| anyhow!("invalid stack access"))
                }
            }
        }
    }

    /// Pop an operand from the stack, checking that it is as expected.
    ///
    /// Two operand types match if they are equal or either is unknown. If
    /// successful, return the more precise type of the two.
    fn pop_expect_opd(
        &mut self,
        expect: MaybeKnown,
        context: &'static str,
    ) -> ValidateResult<MaybeKnown> {
        let actual = self.pop_opd()?;
        if actual.is_unknown() {
            return Ok(expect);
        }
        if expect.is_unknown() {
            return Ok(actual);
        }
        ensure!(
            actual == expect,
            "type mismatch: expected {} but got {} in {} operand",
            expect,
            actual,
            context
        );
        Ok(actual)
    }

    /// Push zero or one operands to the stack.
    fn push_opds(&mut self, tys: BlockType) {
        if let BlockType::ValueType(ty) = tys {
            self.push_opd(Known(ty))
        }
    }

    /// Pop zero or one operands from the stack, checking the expected type.
    fn pop_opds(&mut self, expected: BlockType, context: &'static str) -> ValidateResult<()> {
        if let BlockType::ValueType(ty) = expected {
            self.pop_expect_opd(Known(ty), context)?;
        }
        Ok(())
    }

    /// Push a new control frame with the given label and end types.
    ///
    /// The label type is what a branch to this frame must supply, the end
    /// type what falling out of the frame produces. For blocks and ifs the
    /// two coincide; for loops the label type is empty.
    fn push_ctrl(&mut self, kind: FrameKind, label_type: BlockType, end_type: BlockType) {
        let frame = ControlFrame {
            kind,
            label_type,
            end_type,
            height: self.opds.stack.len(),
            unreachable: false,
        };
        self.ctrls.stack.push(frame)
    }

    /// Pop the innermost control frame, checking its end type off the
    /// operand stack first, and return the end type together with the kind
    /// of the popped frame.
    fn pop_ctrl(&mut self, context: &'static str) -> ValidateResult<(BlockType, FrameKind)> {
        // We first look at the last frame without removing it, so that
        // pop_expect_opd can still see whether the stack is in the
        // unreachable state.
        match self.ctrls.stack.last().map(|frame| (frame.end_type, frame.height, frame.kind)) {
            None => bail!("control stack exhausted"),
            Some((end_type, height, kind)) => {
                if let BlockType::ValueType(ty) = end_type {
                    self.pop_expect_opd(Known(ty), context)?;
                }
                ensure!(
                    self.opds.stack.len() == height,
                    "stack was not empty at end of control structure"
                );
                // Only pop after we've made sure the stack is properly
                // cleared.
                self.ctrls.stack.pop();
                Ok((end_type, kind))
            }
        }
    }

    /// Enter the unreachable part of the innermost frame. The operand stack
    /// is cut back down to the frame's floor, and further pops within the
    /// frame yield unknown operands.
    fn mark_unreachable(&mut self) -> ValidateResult<()> {
        match self.ctrls.stack.last_mut() {
            None => bail!("control stack exhausted"),
            Some(frame) => {
                self.opds.stack.truncate(frame.height);
                frame.unreachable = true;
                Ok(())
            }
        }
    }

    /// Validate a constant instruction producing the given type.
    fn const_op(&mut self, ty: ValueType) { self.push_opd(Known(ty)) }

    /// Validate a unary numeric instruction.
    fn unary_op(
        &mut self,
        name: &'static str,
        operand: ValueType,
        result: ValueType,
    ) -> ValidateResult<()> {
        self.pop_expect_opd(Known(operand), name)?;
        self.push_opd(Known(result));
        Ok(())
    }

    /// Validate a binary numeric instruction. Both operands have the same
    /// type; comparisons produce `i32`.
    fn binary_op(
        &mut self,
        name: &'static str,
        operand: ValueType,
        result: ValueType,
    ) -> ValidateResult<()> {
        self.pop_expect_opd(Known(operand), name)?;
        self.pop_expect_opd(Known(operand), name)?;
        self.push_opd(Known(result));
        Ok(())
    }
}

/// The local types, at indices start, start+1,..<end (not including end).
pub(crate) struct LocalsRange {
    pub(crate) start: LocalIndex,
    pub(crate) end:   LocalIndex,
    pub(crate) ty:    ValueType,
}

/// Make a locals structure used to validate a function body. Note that
/// function parameters define the initial locals.
fn make_locals(ty: &FunctionType, locals: &[Local]) -> ValidateResult<Vec<LocalsRange>> {
    let mut out = Vec::with_capacity(ty.parameters.len() + locals.len());
    let mut start = 0;
    for &ty in ty.parameters.iter() {
        let end = start + 1;
        out.push(LocalsRange {
            start,
            end,
            ty,
        });
        start = end;
    }
    for local in locals.iter() {
        let end = start.checked_add(local.multiplicity).ok_or_else(|| anyhow!("too many locals"))?;
        out.push(LocalsRange {
            start,
            end,
            ty: local.ty,
        });
        start = end;
    }
    Ok(out)
}

/// The trait used to parametrize the function validator so that it does not
/// depend on the concrete representation of the surrounding module.
pub trait HasValidationContext {
    /// Get the local of a function at the given index. Note that function
    /// parameters define the initial locals.
    fn get_local(&self, idx: LocalIndex) -> ValidateResult<ValueType>;

    /// Get a global's value type together with its mutability. `true` for
    /// mutable, `false` for constant.
    fn get_global(&self, idx: GlobalIndex) -> ValidateResult<(ValueType, bool)>;

    /// Return whether the module has a default memory.
    fn memory_exists(&self) -> bool;

    /// Return whether the module has a default table.
    fn table_exists(&self) -> bool;

    /// Get the type of the function at the given index.
    fn get_func(&self, idx: FuncIndex) -> ValidateResult<&Rc<FunctionType>>;

    /// Get the type at the given index.
    fn get_type(&self, idx: TypeIndex) -> ValidateResult<&Rc<FunctionType>>;

    /// Return the return type of the function being validated.
    fn return_type(&self) -> BlockType;
}

/// Context for the validation of a single defined function.
pub(crate) struct FunctionContext<'a> {
    module:      &'a Module,
    return_type: BlockType,
    locals:      Vec<LocalsRange>,
}

impl<'a> FunctionContext<'a> {
    pub(crate) fn new(module: &'a Module, function: &FunctionDef) -> ValidateResult<Self> {
        let ty = module
            .get_type(function.type_idx)
            .ok_or_else(|| anyhow!("function has a type that does not exist"))?;
        let locals = make_locals(ty, &function.locals)?;
        Ok(Self {
            module,
            return_type: BlockType::from(ty.result),
            locals,
        })
    }
}

impl<'a> HasValidationContext for FunctionContext<'a> {
    fn get_local(&self, idx: LocalIndex) -> ValidateResult<ValueType> {
        let res = self.locals.binary_search_by(|locals| {
            if locals.end <= idx {
                std::cmp::Ordering::Less
            } else if idx < locals.start {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        match res {
            Ok(i) => Ok(self.locals[i].ty),
            Err(_) => bail!("local index out of range"),
        }
    }

    fn get_global(&self, idx: GlobalIndex) -> ValidateResult<(ValueType, bool)> {
        match self.module.get_global(idx) {
            Some(global) => Ok((global.value_type, global.mutable)),
            None => bail!("global index out of range"),
        }
    }

    fn memory_exists(&self) -> bool { self.module.memory_exists() }

    fn table_exists(&self) -> bool { self.module.table_exists() }

    fn get_func(&self, idx: FuncIndex) -> ValidateResult<&Rc<FunctionType>> {
        self.module.get_func_type(idx).ok_or_else(|| anyhow!("function index out of range"))
    }

    fn get_type(&self, idx: TypeIndex) -> ValidateResult<&Rc<FunctionType>> {
        self.module.get_type(idx).ok_or_else(|| anyhow!("type index out of range"))
    }

    fn return_type(&self) -> BlockType { self.return_type }
}

/// Validate a load instruction with the given natural alignment (as a base-2
/// logarithm) and result type.
fn load_op(
    state: &mut ValidationState,
    context: &impl HasValidationContext,
    name: &'static str,
    memarg: &MemArg,
    natural_align: u32,
    result: ValueType,
) -> ValidateResult<()> {
    state.pop_expect_opd(Known(ValueType::I32), name)?;
    ensure!(memarg.align <= natural_align, "{} alignment greater than natural alignment", name);
    ensure!(context.memory_exists(), "{} in module without default memory", name);
    ensure!(memarg.offset <= u64::from(u32::MAX), "{} offset too large", name);
    state.push_opd(Known(result));
    Ok(())
}

/// Validate a store instruction. The value is the top-of-stack operand, the
/// address sits below it.
fn store_op(
    state: &mut ValidationState,
    context: &impl HasValidationContext,
    name: &'static str,
    memarg: &MemArg,
    natural_align: u32,
    value: ValueType,
) -> ValidateResult<()> {
    state.pop_expect_opd(Known(value), name)?;
    state.pop_expect_opd(Known(ValueType::I32), name)?;
    ensure!(memarg.align <= natural_align, "{} alignment greater than natural alignment", name);
    ensure!(context.memory_exists(), "{} in module without default memory", name);
    ensure!(memarg.offset <= u64::from(u32::MAX), "{} offset too large", name);
    Ok(())
}

/// Validate a single opcode, updating the validation state.
fn validate_opcode(
    context: &impl HasValidationContext,
    state: &mut ValidationState,
    opcode: &OpCode,
) -> ValidateResult<()> {
    use ValueType::*;
    trace!(?opcode, operands = state.opds.stack.len(), frames = state.ctrls.stack.len());
    match opcode {
        OpCode::End => {
            let (res, kind) = state.pop_ctrl("end result")?;
            if kind == FrameKind::IfThen && !res.is_empty() {
                bail!("else-less if may not yield a result");
            }
            // The result of the outermost, function frame is not an operand
            // of anything.
            if !state.done() {
                state.push_opds(res);
            }
        }
        OpCode::Nop => {
            // do nothing.
        }
        OpCode::Unreachable => {
            state.mark_unreachable()?;
        }
        OpCode::Block(ty) => {
            state.push_ctrl(FrameKind::Block, *ty, *ty);
        }
        OpCode::Loop(ty) => {
            state.push_ctrl(FrameKind::Loop, BlockType::EmptyType, *ty);
        }
        OpCode::If {
            ty,
        } => {
            state.pop_expect_opd(Known(I32), "if condition")?;
            state.push_ctrl(FrameKind::IfThen, *ty, *ty);
        }
        OpCode::Else => {
            let (res, kind) = state.pop_ctrl("if result")?;
            ensure!(kind == FrameKind::IfThen, "else only allowed in if context");
            state.push_ctrl(FrameKind::IfElse, res, res);
        }
        OpCode::Br(depth) => {
            let label_type = state
                .ctrls
                .get_label(*depth)
                .ok_or_else(|| anyhow!("invalid branch depth ({})", depth))?;
            state.pop_opds(label_type, "br argument")?;
            state.mark_unreachable()?;
        }
        OpCode::BrIf(depth) => {
            let label_type = state
                .ctrls
                .get_label(*depth)
                .ok_or_else(|| anyhow!("invalid branch depth ({})", depth))?;
            state.pop_expect_opd(Known(I32), "br_if condition")?;
            state.pop_opds(label_type, "br_if argument")?;
            // The branch may not be taken, so the argument is also the type
            // that falls through.
            state.push_opds(label_type);
        }
        OpCode::BrTable {
            labels,
            default,
        } => {
            state.pop_expect_opd(Known(I32), "br_table index")?;
            let default_type = state
                .ctrls
                .get_label(*default)
                .ok_or_else(|| anyhow!("invalid branch depth ({})", default))?;
            // Target label types must agree structurally, not merely under
            // the relaxed operand match.
            for &label in labels.iter() {
                let target_type = state
                    .ctrls
                    .get_label(label)
                    .ok_or_else(|| anyhow!("invalid branch depth ({})", label))?;
                ensure!(
                    target_type == default_type,
                    "br_table target argument must match default target argument"
                );
            }
            state.pop_opds(default_type, "br_table argument")?;
            state.mark_unreachable()?;
        }
        OpCode::Return => {
            state.pop_opds(context.return_type(), "ret")?;
            state.mark_unreachable()?;
        }
        OpCode::Call(idx) => {
            let func = context.get_func(*idx)?;
            for &ty in func.parameters.iter().rev() {
                state.pop_expect_opd(Known(ty), "call arguments")?;
            }
            if let Some(ty) = func.result {
                state.push_opd(Known(ty));
            }
        }
        OpCode::CallIndirect(ty_idx) => {
            let func = context.get_type(*ty_idx)?;
            ensure!(
                context.table_exists(),
                "call_indirect is only valid if there is a default function table"
            );
            state.pop_expect_opd(Known(I32), "call_indirect function index")?;
            for &ty in func.parameters.iter().rev() {
                state.pop_expect_opd(Known(ty), "call_indirect arguments")?;
            }
            if let Some(ty) = func.result {
                state.push_opd(Known(ty));
            }
        }
        OpCode::Drop => {
            state.pop_opd()?;
        }
        OpCode::Select => {
            state.pop_expect_opd(Known(I32), "select condition")?;
            let t1 = state.pop_opd()?;
            let t2 = state.pop_expect_opd(t1, "select operands")?;
            state.push_opd(t2);
        }
        OpCode::LocalGet(idx) => {
            let ty = context.get_local(*idx)?;
            state.push_opd(Known(ty));
        }
        OpCode::LocalSet(idx) => {
            let ty = context.get_local(*idx)?;
            state.pop_expect_opd(Known(ty), "set_local")?;
        }
        OpCode::LocalTee(idx) => {
            let ty = context.get_local(*idx)?;
            state.pop_expect_opd(Known(ty), "tee_local")?;
            state.push_opd(Known(ty));
        }
        OpCode::GlobalGet(idx) => {
            let ty = context.get_global(*idx)?.0;
            state.push_opd(Known(ty));
        }
        OpCode::GlobalSet(idx) => {
            let (ty, mutable) = context.get_global(*idx)?;
            ensure!(mutable, "attempting to mutate immutable global");
            state.pop_expect_opd(Known(ty), "set_global")?;
        }
        OpCode::I32Load(memarg) => load_op(state, context, "i32.load", memarg, 2, I32)?,
        OpCode::I64Load(memarg) => load_op(state, context, "i64.load", memarg, 3, I64)?,
        OpCode::F32Load(memarg) => load_op(state, context, "f32.load", memarg, 2, F32)?,
        OpCode::F64Load(memarg) => load_op(state, context, "f64.load", memarg, 3, F64)?,
        OpCode::I32Load8S(memarg) => load_op(state, context, "i32.load8_s", memarg, 0, I32)?,
        OpCode::I32Load8U(memarg) => load_op(state, context, "i32.load8_u", memarg, 0, I32)?,
        OpCode::I32Load16S(memarg) => load_op(state, context, "i32.load16_s", memarg, 1, I32)?,
        OpCode::I32Load16U(memarg) => load_op(state, context, "i32.load16_u", memarg, 1, I32)?,
        OpCode::I64Load8S(memarg) => load_op(state, context, "i64.load8_s", memarg, 0, I64)?,
        OpCode::I64Load8U(memarg) => load_op(state, context, "i64.load8_u", memarg, 0, I64)?,
        OpCode::I64Load16S(memarg) => load_op(state, context, "i64.load16_s", memarg, 1, I64)?,
        OpCode::I64Load16U(memarg) => load_op(state, context, "i64.load16_u", memarg, 1, I64)?,
        OpCode::I64Load32S(memarg) => load_op(state, context, "i64.load32_s", memarg, 2, I64)?,
        OpCode::I64Load32U(memarg) => load_op(state, context, "i64.load32_u", memarg, 2, I64)?,
        OpCode::I32Store(memarg) => store_op(state, context, "i32.store", memarg, 2, I32)?,
        OpCode::I64Store(memarg) => store_op(state, context, "i64.store", memarg, 3, I64)?,
        OpCode::F32Store(memarg) => store_op(state, context, "f32.store", memarg, 2, F32)?,
        OpCode::F64Store(memarg) => store_op(state, context, "f64.store", memarg, 3, F64)?,
        OpCode::I32Store8(memarg) => store_op(state, context, "i32.store8", memarg, 0, I32)?,
        OpCode::I32Store16(memarg) => store_op(state, context, "i32.store16", memarg, 1, I32)?,
        OpCode::I64Store8(memarg) => store_op(state, context, "i64.store8", memarg, 0, I64)?,
        OpCode::I64Store16(memarg) => store_op(state, context, "i64.store16", memarg, 1, I64)?,
        OpCode::I64Store32(memarg) => store_op(state, context, "i64.store32", memarg, 2, I64)?,
        OpCode::MemorySize => {
            ensure!(
                context.memory_exists(),
                "current_memory is only valid if there is a default memory"
            );
            state.push_opd(Known(I32));
        }
        OpCode::MemoryGrow => {
            ensure!(
                context.memory_exists(),
                "grow_memory is only valid if there is a default memory"
            );
            state.pop_expect_opd(Known(I32), "grow_memory")?;
            state.push_opd(Known(I32));
        }
        OpCode::I32Const(_) => state.const_op(I32),
        OpCode::I64Const(_) => state.const_op(I64),
        OpCode::F32Const(_) => state.const_op(F32),
        OpCode::F64Const(_) => state.const_op(F64),

        OpCode::I32Eqz => state.unary_op("i32.eqz", I32, I32)?,
        OpCode::I32Eq => state.binary_op("i32.eq", I32, I32)?,
        OpCode::I32Ne => state.binary_op("i32.ne", I32, I32)?,
        OpCode::I32LtS => state.binary_op("i32.lt_s", I32, I32)?,
        OpCode::I32LtU => state.binary_op("i32.lt_u", I32, I32)?,
        OpCode::I32GtS => state.binary_op("i32.gt_s", I32, I32)?,
        OpCode::I32GtU => state.binary_op("i32.gt_u", I32, I32)?,
        OpCode::I32LeS => state.binary_op("i32.le_s", I32, I32)?,
        OpCode::I32LeU => state.binary_op("i32.le_u", I32, I32)?,
        OpCode::I32GeS => state.binary_op("i32.ge_s", I32, I32)?,
        OpCode::I32GeU => state.binary_op("i32.ge_u", I32, I32)?,
        OpCode::I64Eqz => state.unary_op("i64.eqz", I64, I32)?,
        OpCode::I64Eq => state.binary_op("i64.eq", I64, I32)?,
        OpCode::I64Ne => state.binary_op("i64.ne", I64, I32)?,
        OpCode::I64LtS => state.binary_op("i64.lt_s", I64, I32)?,
        OpCode::I64LtU => state.binary_op("i64.lt_u", I64, I32)?,
        OpCode::I64GtS => state.binary_op("i64.gt_s", I64, I32)?,
        OpCode::I64GtU => state.binary_op("i64.gt_u", I64, I32)?,
        OpCode::I64LeS => state.binary_op("i64.le_s", I64, I32)?,
        OpCode::I64LeU => state.binary_op("i64.le_u", I64, I32)?,
        OpCode::I64GeS => state.binary_op("i64.ge_s", I64, I32)?,
        OpCode::I64GeU => state.binary_op("i64.ge_u", I64, I32)?,
        OpCode::F32Eq => state.binary_op("f32.eq", F32, I32)?,
        OpCode::F32Ne => state.binary_op("f32.ne", F32, I32)?,
        OpCode::F32Lt => state.binary_op("f32.lt", F32, I32)?,
        OpCode::F32Gt => state.binary_op("f32.gt", F32, I32)?,
        OpCode::F32Le => state.binary_op("f32.le", F32, I32)?,
        OpCode::F32Ge => state.binary_op("f32.ge", F32, I32)?,
        OpCode::F64Eq => state.binary_op("f64.eq", F64, I32)?,
        OpCode::F64Ne => state.binary_op("f64.ne", F64, I32)?,
        OpCode::F64Lt => state.binary_op("f64.lt", F64, I32)?,
        OpCode::F64Gt => state.binary_op("f64.gt", F64, I32)?,
        OpCode::F64Le => state.binary_op("f64.le", F64, I32)?,
        OpCode::F64Ge => state.binary_op("f64.ge", F64, I32)?,

        OpCode::I32Clz => state.unary_op("i32.clz", I32, I32)?,
        OpCode::I32Ctz => state.unary_op("i32.ctz", I32, I32)?,
        OpCode::I32Popcnt => state.unary_op("i32.popcnt", I32, I32)?,
        OpCode::I32Add => state.binary_op("i32.add", I32, I32)?,
        OpCode::I32Sub => state.binary_op("i32.sub", I32, I32)?,
        OpCode::I32Mul => state.binary_op("i32.mul", I32, I32)?,
        OpCode::I32DivS => state.binary_op("i32.div_s", I32, I32)?,
        OpCode::I32DivU => state.binary_op("i32.div_u", I32, I32)?,
        OpCode::I32RemS => state.binary_op("i32.rem_s", I32, I32)?,
        OpCode::I32RemU => state.binary_op("i32.rem_u", I32, I32)?,
        OpCode::I32And => state.binary_op("i32.and", I32, I32)?,
        OpCode::I32Or => state.binary_op("i32.or", I32, I32)?,
        OpCode::I32Xor => state.binary_op("i32.xor", I32, I32)?,
        OpCode::I32Shl => state.binary_op("i32.shl", I32, I32)?,
        OpCode::I32ShrS => state.binary_op("i32.shr_s", I32, I32)?,
        OpCode::I32ShrU => state.binary_op("i32.shr_u", I32, I32)?,
        OpCode::I32Rotl => state.binary_op("i32.rotl", I32, I32)?,
        OpCode::I32Rotr => state.binary_op("i32.rotr", I32, I32)?,
        OpCode::I64Clz => state.unary_op("i64.clz", I64, I64)?,
        OpCode::I64Ctz => state.unary_op("i64.ctz", I64, I64)?,
        OpCode::I64Popcnt => state.unary_op("i64.popcnt", I64, I64)?,
        OpCode::I64Add => state.binary_op("i64.add", I64, I64)?,
        OpCode::I64Sub => state.binary_op("i64.sub", I64, I64)?,
        OpCode::I64Mul => state.binary_op("i64.mul", I64, I64)?,
        OpCode::I64DivS => state.binary_op("i64.div_s", I64, I64)?,
        OpCode::I64DivU => state.binary_op("i64.div_u", I64, I64)?,
        OpCode::I64RemS => state.binary_op("i64.rem_s", I64, I64)?,
        OpCode::I64RemU => state.binary_op("i64.rem_u", I64, I64)?,
        OpCode::I64And => state.binary_op("i64.and", I64, I64)?,
        OpCode::I64Or => state.binary_op("i64.or", I64, I64)?,
        OpCode::I64Xor => state.binary_op("i64.xor", I64, I64)?,
        OpCode::I64Shl => state.binary_op("i64.shl", I64, I64)?,
        OpCode::I64ShrS => state.binary_op("i64.shr_s", I64, I64)?,
        OpCode::I64ShrU => state.binary_op("i64.shr_u", I64, I64)?,
        OpCode::I64Rotl => state.binary_op("i64.rotl", I64, I64)?,
        OpCode::I64Rotr => state.binary_op("i64.rotr", I64, I64)?,

        OpCode::F32Abs => state.unary_op("f32.abs", F32, F32)?,
        OpCode::F32Neg => state.unary_op("f32.neg", F32, F32)?,
        OpCode::F32Ceil => state.unary_op("f32.ceil", F32, F32)?,
        OpCode::F32Floor => state.unary_op("f32.floor", F32, F32)?,
        OpCode::F32Trunc => state.unary_op("f32.trunc", F32, F32)?,
        OpCode::F32Nearest => state.unary_op("f32.nearest", F32, F32)?,
        OpCode::F32Sqrt => state.unary_op("f32.sqrt", F32, F32)?,
        OpCode::F32Add => state.binary_op("f32.add", F32, F32)?,
        OpCode::F32Sub => state.binary_op("f32.sub", F32, F32)?,
        OpCode::F32Mul => state.binary_op("f32.mul", F32, F32)?,
        OpCode::F32Div => state.binary_op("f32.div", F32, F32)?,
        OpCode::F32Min => state.binary_op("f32.min", F32, F32)?,
        OpCode::F32Max => state.binary_op("f32.max", F32, F32)?,
        OpCode::F32Copysign => state.binary_op("f32.copysign", F32, F32)?,
        OpCode::F64Abs => state.unary_op("f64.abs", F64, F64)?,
        OpCode::F64Neg => state.unary_op("f64.neg", F64, F64)?,
        OpCode::F64Ceil => state.unary_op("f64.ceil", F64, F64)?,
        OpCode::F64Floor => state.unary_op("f64.floor", F64, F64)?,
        OpCode::F64Trunc => state.unary_op("f64.trunc", F64, F64)?,
        OpCode::F64Nearest => state.unary_op("f64.nearest", F64, F64)?,
        OpCode::F64Sqrt => state.unary_op("f64.sqrt", F64, F64)?,
        OpCode::F64Add => state.binary_op("f64.add", F64, F64)?,
        OpCode::F64Sub => state.binary_op("f64.sub", F64, F64)?,
        OpCode::F64Mul => state.binary_op("f64.mul", F64, F64)?,
        OpCode::F64Div => state.binary_op("f64.div", F64, F64)?,
        OpCode::F64Min => state.binary_op("f64.min", F64, F64)?,
        OpCode::F64Max => state.binary_op("f64.max", F64, F64)?,
        OpCode::F64Copysign => state.binary_op("f64.copysign", F64, F64)?,

        OpCode::I32WrapI64 => state.unary_op("i32.wrap/i64", I64, I32)?,
        OpCode::I32TruncF32S => state.unary_op("i32.trunc_s/f32", F32, I32)?,
        OpCode::I32TruncF32U => state.unary_op("i32.trunc_u/f32", F32, I32)?,
        OpCode::I32TruncF64S => state.unary_op("i32.trunc_s/f64", F64, I32)?,
        OpCode::I32TruncF64U => state.unary_op("i32.trunc_u/f64", F64, I32)?,
        OpCode::I64ExtendI32S => state.unary_op("i64.extend_s/i32", I32, I64)?,
        OpCode::I64ExtendI32U => state.unary_op("i64.extend_u/i32", I32, I64)?,
        OpCode::I64TruncF32S => state.unary_op("i64.trunc_s/f32", F32, I64)?,
        OpCode::I64TruncF32U => state.unary_op("i64.trunc_u/f32", F32, I64)?,
        OpCode::I64TruncF64S => state.unary_op("i64.trunc_s/f64", F64, I64)?,
        OpCode::I64TruncF64U => state.unary_op("i64.trunc_u/f64", F64, I64)?,
        OpCode::F32ConvertI32S => state.unary_op("f32.convert_s/i32", I32, F32)?,
        OpCode::F32ConvertI32U => state.unary_op("f32.convert_u/i32", I32, F32)?,
        OpCode::F32ConvertI64S => state.unary_op("f32.convert_s/i64", I64, F32)?,
        OpCode::F32ConvertI64U => state.unary_op("f32.convert_u/i64", I64, F32)?,
        OpCode::F32DemoteF64 => state.unary_op("f32.demote/f64", F64, F32)?,
        OpCode::F64ConvertI32S => state.unary_op("f64.convert_s/i32", I32, F64)?,
        OpCode::F64ConvertI32U => state.unary_op("f64.convert_u/i32", I32, F64)?,
        OpCode::F64ConvertI64S => state.unary_op("f64.convert_s/i64", I64, F64)?,
        OpCode::F64ConvertI64U => state.unary_op("f64.convert_u/i64", I64, F64)?,
        OpCode::F64PromoteF32 => state.unary_op("f64.promote/f32", F32, F64)?,
        OpCode::I32ReinterpretF32 => state.unary_op("i32.reinterpret/f32", F32, I32)?,
        OpCode::I64ReinterpretF64 => state.unary_op("i64.reinterpret/f64", F64, I64)?,
        OpCode::F32ReinterpretI32 => state.unary_op("f32.reinterpret/i32", I32, F32)?,
        OpCode::F64ReinterpretI64 => state.unary_op("f64.reinterpret/i64", I64, F64)?,
    }
    Ok(())
}

/// Validate a single function body. In order that this function is as
/// flexible as possible it takes as input just an iterator over opcodes. The
/// walk terminates at the first opcode it fails to read. Validation ensures
/// that the iterator is exhausted exactly when the function's own `end` pops
/// the last control frame.
pub fn validate<O: Borrow<OpCode>>(
    context: &impl HasValidationContext,
    mut opcodes: impl Iterator<Item = ParseResult<O>>,
) -> ValidateResult<()> {
    let mut state = ValidationState::new(context.return_type());
    while !state.done() {
        match opcodes.next() {
            Some(opcode) => validate_opcode(context, &mut state, opcode?.borrow())?,
            None => break,
        }
    }
    ensure!(state.done(), "end of code reached before end of function");
    ensure!(opcodes.next().is_none(), "function end reached before end of code");
    Ok(())
}

/// Opcode-by-opcode validation of a single function body, for drivers that
/// decode the instruction stream themselves. The stream owns the validation
/// state of the function; feed each decoded opcode to [opcode](Self::opcode)
/// and call [finish](Self::finish) when the code bytes are exhausted.
pub struct CodeValidationStream<'a> {
    context: FunctionContext<'a>,
    state:   ValidationState,
}

impl<'a> CodeValidationStream<'a> {
    pub fn new(module: &'a Module, function: &FunctionDef) -> ValidateResult<Self> {
        let context = FunctionContext::new(module, function)?;
        let state = ValidationState::new(context.return_type());
        Ok(Self {
            context,
            state,
        })
    }

    /// Validate the next opcode of the function body.
    pub fn opcode(&mut self, opcode: &OpCode) -> ValidateResult<()> {
        ensure!(!self.state.done(), "function end reached before end of code");
        validate_opcode(&self.context, &mut self.state, opcode)
    }

    /// Whether the function's control structure has been fully unwound, that
    /// is, the `end` matching the function itself has been seen.
    pub fn done(&self) -> bool { self.state.done() }

    /// Check that the control structure of the function was fully unwound.
    pub fn finish(&self) -> ValidateResult<()> {
        ensure!(self.state.done(), "end of code reached before end of function");
        Ok(())
    }
}

/// Validate the size constraints of a table or memory against the given
/// ceiling.
pub(crate) fn validate_limits(
    limits: &Limits,
    ceiling: u64,
    context: &'static str,
) -> ValidateResult<()> {
    let max = limits.max.unwrap_or(ceiling);
    ensure!(limits.min <= max, "disjoint size bounds in {}", context);
    ensure!(max <= ceiling, "maximum size exceeds limit in {}", context);
    Ok(())
}

/// Validate an initializer expression against the expected type. The only
/// globals an initializer may refer to are imported immutable ones.
pub fn validate_initializer(
    module: &Module,
    expr: &InitExpr,
    expected: ValueType,
    context: &'static str,
) -> ValidateResult<()> {
    let actual = match expr {
        InitExpr::I32Const(_) => ValueType::I32,
        InitExpr::I64Const(_) => ValueType::I64,
        InitExpr::F32Const(_) => ValueType::F32,
        InitExpr::F64Const(_) => ValueType::F64,
        InitExpr::GetGlobal(idx) => {
            let global = module
                .get_global(*idx)
                .ok_or_else(|| anyhow!("global index out of range in {}", context))?;
            ensure!(
                (*idx as usize) < module.num_imported_globals(),
                "global variable initializer expression may only access imported globals"
            );
            ensure!(
                !global.mutable,
                "global variable initializer expression may only access immutable globals"
            );
            global.value_type
        }
    };
    ensure!(
        expected == actual,
        "type mismatch: expected {} but got {} in {}",
        expected,
        actual,
        context
    );
    Ok(())
}

/// Validate everything except the function bodies: referential integrity of
/// all indices, size limits, export uniqueness, the start function's shape,
/// and the typing of initializer expressions.
///
/// Later checks depend on indices whose validity is established by earlier
/// ones, so the order of the checks is fixed.
pub fn validate_definitions(module: &Module) -> ValidateResult<()> {
    // Function types themselves are well-formed by construction of the AST.
    for import in module.imports.iter() {
        match &import.description {
            ImportDescription::Func {
                type_idx,
            } => {
                ensure!(
                    module.get_type(*type_idx).is_some(),
                    "function import refers to a non-existent type"
                );
            }
            ImportDescription::Table(table) => {
                validate_limits(&table.limits, MAX_IMPORTED_TABLE_ELEMS, "imported table")?;
            }
            ImportDescription::Memory(memory) => {
                validate_limits(&memory.limits, MAX_MEMORY_PAGES, "imported memory")?;
            }
            ImportDescription::Global(global) => {
                ensure!(!global.mutable, "mutable globals cannot be imported");
            }
        }
    }

    for func in module.funcs.iter() {
        ensure!(
            module.get_type(func.type_idx).is_some(),
            "function refers to a type that does not exist"
        );
    }

    for global in module.globals.iter() {
        validate_initializer(
            module,
            &global.init,
            global.ty.value_type,
            "global initializer expression",
        )?;
    }

    for table in module.tables.iter() {
        validate_limits(&table.limits, MAX_TABLE_ELEMS, "table")?;
    }
    ensure!(module.num_tables() <= 1, "too many tables");

    for memory in module.memories.iter() {
        validate_limits(&memory.limits, MAX_MEMORY_PAGES, "memory")?;
    }
    ensure!(module.num_memories() <= 1, "too many memories");

    let mut export_names = BTreeSet::new();
    for export in module.exports.iter() {
        match export.description {
            ExportDescription::Func {
                index,
            } => {
                ensure!(
                    (index as usize) < module.num_funcs(),
                    "trying to export a function that does not exist"
                );
            }
            ExportDescription::Table {
                index,
            } => {
                ensure!(
                    (index as usize) < module.num_tables(),
                    "trying to export a table that does not exist"
                );
            }
            ExportDescription::Memory {
                index,
            } => {
                ensure!(
                    (index as usize) < module.num_memories(),
                    "trying to export a memory that does not exist"
                );
            }
            ExportDescription::Global {
                index,
            } => {
                let global = module
                    .get_global(index)
                    .ok_or_else(|| anyhow!("trying to export a global that does not exist"))?;
                ensure!(!global.mutable, "mutable globals cannot be exported");
            }
        }
        ensure!(export_names.insert(&export.name), "duplicate export {}", export.name);
    }

    if let Some(start) = module.start {
        let ty = module
            .get_func_type(start)
            .ok_or_else(|| anyhow!("start function index out of range"))?;
        ensure!(
            ty.parameters.is_empty() && ty.result.is_none(),
            "start function must not have any parameters or results"
        );
    }

    for segment in module.data.iter() {
        ensure!(
            (segment.memory_idx as usize) < module.num_memories(),
            "data segment refers to a non-existent memory"
        );
        validate_initializer(
            module,
            &segment.offset,
            ValueType::I32,
            "data segment base initializer",
        )?;
    }

    for segment in module.elements.iter() {
        ensure!(
            (segment.table_idx as usize) < module.num_tables(),
            "element segment refers to a non-existent table"
        );
        validate_initializer(
            module,
            &segment.offset,
            ValueType::I32,
            "element segment base initializer",
        )?;
        for &init in segment.inits.iter() {
            ensure!(
                (init as usize) < module.num_funcs(),
                "element segment refers to a non-existent function"
            );
        }
    }
    Ok(())
}

/// Validate the body of every function defined by the module.
pub fn validate_code(module: &Module) -> ValidateResult<()> {
    for function in module.funcs.iter() {
        let start = function.code.offset;
        let end = start
            .checked_add(function.code.num_bytes)
            .ok_or_else(|| anyhow!("function code is outside of the code blob"))?;
        let body = module
            .code
            .get(start..end)
            .ok_or_else(|| anyhow!("function code is outside of the code blob"))?;
        let context = FunctionContext::new(module, function)?;
        validate(&context, OpCodeIterator::new(body))?;
    }
    Ok(())
}

/// Validate the whole module, definitions first, then the code of every
/// function.
pub fn validate_module(module: &Module) -> ValidateResult<()> {
    validate_definitions(module)?;
    validate_code(module)
}
