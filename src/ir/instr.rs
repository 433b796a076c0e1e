//! The instruction data model.
//!
//! Instructions form a tagged union rather than a class hierarchy; every
//! consumer (canonicalizer, printers, use-count walker) dispatches with an
//! exhaustive `match`. Shared attributes (type, bci, pin flag, use count,
//! list link, successor list, state snapshot) live in [`Instruction`], the
//! per-variant payload in [`InstrKind`].

use crate::ci::{BasicType, ClassInfo, IntrinsicId};
use crate::ir::state::ValueStack;
use crate::ir::{BlockId, InstrId};
use displaydoc::Display;
use std::sync::Arc;

/// Semantic value type of an instruction, carrying its stack word size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum ValueType {
    /// void
    Void,
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// object
    Object,
    /// address
    Address,
    /// illegal
    Illegal,
}

impl ValueType {
    /// Number of stack words the type occupies.
    pub fn size(self) -> usize {
        match self {
            ValueType::Long | ValueType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_double_word(self) -> bool {
        self.size() == 2
    }

    pub fn is_single_word(self) -> bool {
        self.size() == 1
    }

    pub fn is_float_kind(self) -> bool {
        matches!(self, ValueType::Float | ValueType::Double)
    }

    pub fn of(basic: BasicType) -> ValueType {
        match basic {
            BasicType::Void => ValueType::Void,
            BasicType::Boolean
            | BasicType::Byte
            | BasicType::Char
            | BasicType::Short
            | BasicType::Int => ValueType::Int,
            BasicType::Long => ValueType::Long,
            BasicType::Float => ValueType::Float,
            BasicType::Double => ValueType::Double,
            BasicType::Object | BasicType::Array => ValueType::Object,
            BasicType::Illegal => ValueType::Illegal,
        }
    }
}

/// A compile-time constant value.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Str(Arc<str>),
    Class(Arc<ClassInfo>),
    /// A bytecode return address pushed by jsr.
    Address(i32),
}

impl ConstValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConstValue::Int(_) => ValueType::Int,
            ConstValue::Long(_) => ValueType::Long,
            ConstValue::Float(_) => ValueType::Float,
            ConstValue::Double(_) => ValueType::Double,
            ConstValue::Null | ConstValue::Str(_) | ConstValue::Class(_) => ValueType::Object,
            ConstValue::Address(_) => ValueType::Address,
        }
    }
}

/// Condition code of a two-way branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Cond {
    /// eq
    Eq,
    /// ne
    Ne,
    /// lt
    Lt,
    /// le
    Le,
    /// gt
    Gt,
    /// ge
    Ge,
}

impl Cond {
    /// The condition that holds after swapping the operands.
    pub fn mirror(self) -> Cond {
        match self {
            Cond::Eq => Cond::Eq,
            Cond::Ne => Cond::Ne,
            Cond::Lt => Cond::Gt,
            Cond::Le => Cond::Ge,
            Cond::Gt => Cond::Lt,
            Cond::Ge => Cond::Le,
        }
    }

    /// The logical negation of the condition.
    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }

    /// Evaluates the condition on two constant operands.
    pub fn is_true(self, x: i64, y: i64) -> bool {
        match self {
            Cond::Eq => x == y,
            Cond::Ne => x != y,
            Cond::Lt => x < y,
            Cond::Le => x <= y,
            Cond::Gt => x > y,
            Cond::Ge => x >= y,
        }
    }
}

/// The operation-specific payload of an instruction.
#[derive(Clone, Debug)]
pub enum InstrKind {
    Constant(ConstValue),
    LoadLocal {
        index: usize,
    },
    StoreLocal {
        index: usize,
        value: InstrId,
    },
    LoadField {
        obj: InstrId,
        offset: i32,
        field_type: BasicType,
        is_static: bool,
        loaded: bool,
        initialized: bool,
    },
    StoreField {
        obj: InstrId,
        offset: i32,
        field_type: BasicType,
        value: InstrId,
        is_static: bool,
        loaded: bool,
        initialized: bool,
    },
    LoadIndexed {
        array: InstrId,
        index: InstrId,
        elem_type: BasicType,
    },
    StoreIndexed {
        array: InstrId,
        index: InstrId,
        elem_type: BasicType,
        value: InstrId,
    },
    ArrayLength {
        array: InstrId,
    },
    /// Integer/long/float/double add, sub, mul, div, rem; `op` is the
    /// bytecode.
    ArithmeticOp {
        op: u8,
        x: InstrId,
        y: InstrId,
    },
    ShiftOp {
        op: u8,
        x: InstrId,
        y: InstrId,
    },
    LogicOp {
        op: u8,
        x: InstrId,
        y: InstrId,
    },
    /// Three-way comparison (lcmp, fcmpl, fcmpg, dcmpl, dcmpg).
    CompareOp {
        op: u8,
        x: InstrId,
        y: InstrId,
    },
    NegateOp {
        x: InstrId,
    },
    Convert {
        op: u8,
        value: InstrId,
    },
    NewInstance {
        class: Arc<ClassInfo>,
    },
    NewTypeArray {
        length: InstrId,
        elem_type: BasicType,
    },
    NewObjectArray {
        class: Arc<ClassInfo>,
        length: InstrId,
    },
    NewMultiArray {
        class: Arc<ClassInfo>,
        dims: Vec<InstrId>,
    },
    CheckCast {
        class: Arc<ClassInfo>,
        obj: InstrId,
    },
    InstanceOf {
        class: Arc<ClassInfo>,
        obj: InstrId,
    },
    NullCheck {
        obj: InstrId,
    },
    Invoke {
        op: u8,
        recv: Option<InstrId>,
        args: Vec<InstrId>,
        target_final: bool,
        target_loaded: bool,
    },
    IntrinsicCall {
        id: IntrinsicId,
        args: Vec<InstrId>,
    },
    MonitorEnter {
        obj: InstrId,
        monitor_no: usize,
    },
    MonitorExit {
        obj: InstrId,
        monitor_no: usize,
    },
    /// Join-point placeholder for the stack value at `index` in a merged
    /// entry state.
    Phi {
        index: usize,
        stack_size: usize,
    },
    /// Mid-block call of a subroutine; the following instruction is the
    /// continuation marker.
    Jsr {
        subroutine: BlockId,
    },
    JsrContinuation,
    // Block-ending instructions. Successors live in `Instruction::sux`; for
    // a two-way branch index 0 is the taken side, index 1 the fallthrough,
    // for switches the default target comes last.
    Goto,
    If {
        x: InstrId,
        cond: Cond,
        unordered_is_true: bool,
        y: InstrId,
    },
    TableSwitch {
        tag: InstrId,
        lo_key: i32,
    },
    LookupSwitch {
        tag: InstrId,
        keys: Vec<i32>,
    },
    Return {
        result: Option<InstrId>,
        /// Number of the lock released on return, -1 if the method is not
        /// synchronized.
        monitor_no: i32,
    },
    Throw {
        exception: InstrId,
    },
    Ret {
        index: usize,
    },
}

impl InstrKind {
    pub fn is_block_end(&self) -> bool {
        matches!(
            self,
            InstrKind::Goto
                | InstrKind::If { .. }
                | InstrKind::TableSwitch { .. }
                | InstrKind::LookupSwitch { .. }
                | InstrKind::Return { .. }
                | InstrKind::Throw { .. }
                | InstrKind::Ret { .. }
        )
    }

    /// Whether the instruction splits the abstract state: a snapshot is
    /// attached when it is appended, and cached values must not live across
    /// it.
    pub fn is_state_split(&self) -> bool {
        self.is_block_end()
            || matches!(
                self,
                InstrKind::Invoke { .. }
                    | InstrKind::IntrinsicCall { .. }
                    | InstrKind::MonitorEnter { .. }
                    | InstrKind::MonitorExit { .. }
                    | InstrKind::CheckCast { .. }
                    | InstrKind::InstanceOf { .. }
                    | InstrKind::NewInstance { .. }
                    | InstrKind::NewTypeArray { .. }
                    | InstrKind::NewObjectArray { .. }
                    | InstrKind::NewMultiArray { .. }
                    | InstrKind::Jsr { .. }
                    | InstrKind::JsrContinuation
            )
    }

    /// Whether this instruction can raise an exception in compiled code.
    pub fn can_trap(&self) -> bool {
        match self {
            InstrKind::LoadField { .. }
            | InstrKind::StoreField { .. }
            | InstrKind::LoadIndexed { .. }
            | InstrKind::StoreIndexed { .. }
            | InstrKind::ArrayLength { .. }
            | InstrKind::MonitorEnter { .. }
            | InstrKind::MonitorExit { .. }
            | InstrKind::CheckCast { .. }
            | InstrKind::InstanceOf { .. }
            | InstrKind::Invoke { .. }
            | InstrKind::NullCheck { .. }
            | InstrKind::Throw { .. } => true,
            InstrKind::ArithmeticOp { op, .. } => crate::bytecodes::can_trap(*op),
            _ => false,
        }
    }

    /// Instructions that are pinned from the moment they are created:
    /// state splits, stores, trapping arithmetic, unresolved field accesses,
    /// null checks and phis.
    pub fn initially_pinned(&self) -> bool {
        if self.is_state_split() {
            return true;
        }
        match self {
            InstrKind::StoreLocal { .. }
            | InstrKind::StoreField { .. }
            | InstrKind::StoreIndexed { .. }
            | InstrKind::NullCheck { .. }
            | InstrKind::Phi { .. } => true,
            InstrKind::ArithmeticOp { op, .. } => crate::bytecodes::can_trap(*op),
            InstrKind::LoadField { loaded, initialized, .. } => !loaded || !initialized,
            _ => false,
        }
    }

    pub fn is_commutative(&self) -> bool {
        match self {
            InstrKind::LogicOp { .. } => true,
            InstrKind::ArithmeticOp { op, .. } => {
                use crate::bytecodes::*;
                matches!(*op, IADD | LADD | FADD | DADD | IMUL | LMUL | FMUL | DMUL)
            }
            _ => false,
        }
    }

    /// The input values of the instruction, in evaluation order.
    pub fn inputs(&self) -> Vec<InstrId> {
        match self {
            InstrKind::Constant(_)
            | InstrKind::LoadLocal { .. }
            | InstrKind::NewInstance { .. }
            | InstrKind::Phi { .. }
            | InstrKind::Jsr { .. }
            | InstrKind::JsrContinuation
            | InstrKind::Goto
            | InstrKind::Ret { .. } => Vec::new(),
            InstrKind::StoreLocal { value, .. }
            | InstrKind::Convert { value, .. } => vec![*value],
            InstrKind::LoadField { obj, .. }
            | InstrKind::CheckCast { obj, .. }
            | InstrKind::InstanceOf { obj, .. }
            | InstrKind::NullCheck { obj }
            | InstrKind::MonitorEnter { obj, .. }
            | InstrKind::MonitorExit { obj, .. } => vec![*obj],
            InstrKind::StoreField { obj, value, .. } => vec![*obj, *value],
            InstrKind::LoadIndexed { array, index, .. } => vec![*array, *index],
            InstrKind::StoreIndexed { array, index, value, .. } => vec![*array, *index, *value],
            InstrKind::ArrayLength { array } => vec![*array],
            InstrKind::ArithmeticOp { x, y, .. }
            | InstrKind::ShiftOp { x, y, .. }
            | InstrKind::LogicOp { x, y, .. }
            | InstrKind::CompareOp { x, y, .. }
            | InstrKind::If { x, y, .. } => vec![*x, *y],
            InstrKind::NegateOp { x } => vec![*x],
            InstrKind::NewTypeArray { length, .. } | InstrKind::NewObjectArray { length, .. } => {
                vec![*length]
            }
            InstrKind::NewMultiArray { dims, .. } => dims.clone(),
            InstrKind::Invoke { recv, args, .. } => {
                recv.iter().copied().chain(args.iter().copied()).collect()
            }
            InstrKind::IntrinsicCall { args, .. } => args.clone(),
            InstrKind::TableSwitch { tag, .. } | InstrKind::LookupSwitch { tag, .. } => vec![*tag],
            InstrKind::Return { result, .. } => result.iter().copied().collect(),
            InstrKind::Throw { exception } => vec![*exception],
        }
    }

    /// Rewrites every input value through `f`.
    pub fn replace_inputs(&mut self, f: &mut dyn FnMut(InstrId) -> InstrId) {
        match self {
            InstrKind::Constant(_)
            | InstrKind::LoadLocal { .. }
            | InstrKind::NewInstance { .. }
            | InstrKind::Phi { .. }
            | InstrKind::Jsr { .. }
            | InstrKind::JsrContinuation
            | InstrKind::Goto
            | InstrKind::Ret { .. } => {}
            InstrKind::StoreLocal { value, .. } | InstrKind::Convert { value, .. } => {
                *value = f(*value);
            }
            InstrKind::LoadField { obj, .. }
            | InstrKind::CheckCast { obj, .. }
            | InstrKind::InstanceOf { obj, .. }
            | InstrKind::NullCheck { obj }
            | InstrKind::MonitorEnter { obj, .. }
            | InstrKind::MonitorExit { obj, .. } => *obj = f(*obj),
            InstrKind::StoreField { obj, value, .. } => {
                *obj = f(*obj);
                *value = f(*value);
            }
            InstrKind::LoadIndexed { array, index, .. } => {
                *array = f(*array);
                *index = f(*index);
            }
            InstrKind::StoreIndexed { array, index, value, .. } => {
                *array = f(*array);
                *index = f(*index);
                *value = f(*value);
            }
            InstrKind::ArrayLength { array } => *array = f(*array),
            InstrKind::ArithmeticOp { x, y, .. }
            | InstrKind::ShiftOp { x, y, .. }
            | InstrKind::LogicOp { x, y, .. }
            | InstrKind::CompareOp { x, y, .. }
            | InstrKind::If { x, y, .. } => {
                *x = f(*x);
                *y = f(*y);
            }
            InstrKind::NegateOp { x } => *x = f(*x),
            InstrKind::NewTypeArray { length, .. } | InstrKind::NewObjectArray { length, .. } => {
                *length = f(*length);
            }
            InstrKind::NewMultiArray { dims, .. } => {
                for dim in dims {
                    *dim = f(*dim);
                }
            }
            InstrKind::Invoke { recv, args, .. } => {
                if let Some(r) = recv {
                    *r = f(*r);
                }
                for arg in args {
                    *arg = f(*arg);
                }
            }
            InstrKind::IntrinsicCall { args, .. } => {
                for arg in args {
                    *arg = f(*arg);
                }
            }
            InstrKind::TableSwitch { tag, .. } | InstrKind::LookupSwitch { tag, .. } => {
                *tag = f(*tag);
            }
            InstrKind::Return { result, .. } => {
                if let Some(r) = result {
                    *r = f(*r);
                }
            }
            InstrKind::Throw { exception } => *exception = f(*exception),
        }
    }
}

/// Structural identity of an instruction for value numbering. Kinds without
/// a key are exempt from reuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKey {
    IntConstant(i32),
    Op2 { op: u8, x: InstrId, y: InstrId },
    Convert { op: u8, value: InstrId },
    FieldLoad { obj: InstrId, offset: i32 },
    IndexedLoad { array: InstrId, index: InstrId, elem_type: BasicType },
}

impl InstrKind {
    pub fn value_key(&self) -> Option<ValueKey> {
        match *self {
            InstrKind::Constant(ConstValue::Int(value)) => Some(ValueKey::IntConstant(value)),
            InstrKind::ArithmeticOp { op, x, y }
            | InstrKind::ShiftOp { op, x, y }
            | InstrKind::LogicOp { op, x, y }
            | InstrKind::CompareOp { op, x, y } => Some(ValueKey::Op2 { op, x, y }),
            InstrKind::Convert { op, value } => Some(ValueKey::Convert { op, value }),
            InstrKind::LoadField { obj, offset, loaded: true, .. } => {
                Some(ValueKey::FieldLoad { obj, offset })
            }
            InstrKind::LoadIndexed { array, index, elem_type } => {
                Some(ValueKey::IndexedLoad { array, index, elem_type })
            }
            _ => None,
        }
    }
}

/// An instruction node: shared attributes plus the operation payload.
#[derive(Debug)]
pub struct Instruction {
    pub ty: ValueType,
    /// Originating bytecode index, -1 while the instruction is synthesized
    /// but not yet anchored in a block.
    pub bci: i32,
    /// Pinned instructions must be executed in their original order and may
    /// not be eliminated even when unused.
    pub pinned: bool,
    pub use_count: u32,
    /// Next instruction in the block's list, `None` for the block end.
    pub next: Option<InstrId>,
    /// Replacement installed by inlining argument substitution.
    pub subst: Option<InstrId>,
    /// State snapshot for state-splitting instructions.
    pub state: Option<ValueStack>,
    /// Ordered successors for block-ending instructions.
    pub sux: Vec<BlockId>,
    pub kind: InstrKind,
}
