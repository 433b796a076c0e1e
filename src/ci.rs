//! The metadata layer consumed by the front end: methods, classes, constant
//! pools, field references and exception handler tables.
//!
//! Everything here is read-only from the compiler's point of view. The
//! embedding driver (or a test fixture) resolves classes and members up
//! front and hands the results over as plain data.

use crate::Bailout;
use displaydoc::Display;
use std::sync::Arc;

/// Basic (storage-level) type of a field, array element or return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum BasicType {
    /// boolean
    Boolean,
    /// char
    Char,
    /// float
    Float,
    /// double
    Double,
    /// byte
    Byte,
    /// short
    Short,
    /// int
    Int,
    /// long
    Long,
    /// object
    Object,
    /// array
    Array,
    /// void
    Void,
    /// illegal
    Illegal,
}

impl BasicType {
    /// Decodes the array type operand of a `newarray` instruction.
    pub fn from_newarray_code(code: i32) -> BasicType {
        match code {
            4 => BasicType::Boolean,
            5 => BasicType::Char,
            6 => BasicType::Float,
            7 => BasicType::Double,
            8 => BasicType::Byte,
            9 => BasicType::Short,
            10 => BasicType::Int,
            11 => BasicType::Long,
            _ => unreachable!("invalid newarray type code {code}"),
        }
    }
}

/// A resolved (or known-unresolved) class.
#[derive(Debug, PartialEq)]
pub struct ClassInfo {
    pub name: String,
    pub loaded: bool,
    pub initialized: bool,
}

impl ClassInfo {
    pub fn resolved(name: &str) -> Arc<ClassInfo> {
        Arc::new(ClassInfo { name: name.to_string(), loaded: true, initialized: true })
    }
}

/// One entry of a method's exception handler table. A `type_index` of zero
/// guards every exception type.
#[derive(Clone, Debug)]
pub struct ExceptionHandler {
    pub start: i32,
    pub limit: i32,
    pub target: i32,
    pub type_index: u16,
}

impl ExceptionHandler {
    /// Whether the handler's protected range covers the given bci.
    pub fn covers(&self, bci: i32) -> bool {
        self.start <= bci && bci < self.limit
    }

    pub fn is_catch_all(&self) -> bool {
        self.type_index == 0
    }
}

/// Intrinsic methods the compiler recognizes by identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum IntrinsicId {
    /// hash_code
    HashCode,
    /// dsin
    Dsin,
    /// dcos
    Dcos,
    /// dsqrt
    Dsqrt,
    /// arraycopy
    Arraycopy,
    /// compare_to
    CompareTo,
}

/// A resolved field reference. Whether an access is static is decided by the
/// accessing opcode, not by the reference.
#[derive(Clone, Debug)]
pub struct FieldRef {
    pub holder: Arc<ClassInfo>,
    pub offset: i32,
    pub field_type: BasicType,
    pub loaded: bool,
    pub initialized: bool,
}

/// A typed constant pool entry.
#[derive(Clone, Debug)]
pub enum PoolEntry {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Class(Arc<ClassInfo>),
    Field(FieldRef),
    Method(Arc<Method>),
    Unresolved,
}

/// The constant pool of a method's defining class, pre-resolved into typed
/// entries.
#[derive(Debug, Default)]
pub struct ConstantPool {
    pub entries: Vec<PoolEntry>,
}

impl ConstantPool {
    pub fn entry_at(&self, index: usize) -> &PoolEntry {
        &self.entries[index]
    }

    /// The field reference at `index`. Anything else at that slot means the
    /// bytecode was not verified.
    pub fn field_at(&self, index: usize) -> &FieldRef {
        match &self.entries[index] {
            PoolEntry::Field(field) => field,
            other => unreachable!("constant pool entry {index} is {other:?}, not a field"),
        }
    }

    /// The method reference at `index`.
    pub fn method_at(&self, index: usize) -> &Arc<Method> {
        match &self.entries[index] {
            PoolEntry::Method(method) => method,
            other => unreachable!("constant pool entry {index} is {other:?}, not a method"),
        }
    }

    /// The class reference at `index`.
    pub fn class_at(&self, index: usize) -> &Arc<ClassInfo> {
        match &self.entries[index] {
            PoolEntry::Class(class) => class,
            other => unreachable!("constant pool entry {index} is {other:?}, not a class"),
        }
    }

    /// The loadable constant at `index`, or a bail-out for entries the
    /// compiler refuses to materialize.
    pub fn constant_at(&self, index: usize) -> Result<&PoolEntry, Bailout> {
        match &self.entries[index] {
            entry @ (PoolEntry::Int(_)
            | PoolEntry::Long(_)
            | PoolEntry::Float(_)
            | PoolEntry::Double(_)
            | PoolEntry::Str(_)) => Ok(entry),
            _ => Err(Bailout::UnresolvedConstant),
        }
    }
}

/// A method as seen by the compiler: code, frame geometry, flags, handler
/// table and the constant pool to resolve against.
#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub holder: Arc<ClassInfo>,
    pub code: Arc<[u8]>,
    pub max_locals: usize,
    /// Argument size in stack words, including the receiver slot for
    /// instance methods.
    pub arg_size: usize,
    pub return_type: BasicType,
    pub is_static: bool,
    pub is_synchronized: bool,
    pub is_native: bool,
    pub is_strict: bool,
    pub is_final_method: bool,
    pub is_loaded: bool,
    pub intrinsic: Option<IntrinsicId>,
    pub exception_handlers: Vec<ExceptionHandler>,
    pub constants: Arc<ConstantPool>,
}

impl Method {
    /// Argument size in stack words without the receiver slot.
    pub fn arg_size_no_receiver(&self) -> usize {
        self.arg_size - usize::from(!self.is_static)
    }

    pub fn has_exception_handlers(&self) -> bool {
        !self.exception_handlers.is_empty()
    }
}
