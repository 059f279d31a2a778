//! AST definition of Wasm modules, as well as supporting datatypes.
//! Based on the [W3C Wasm specification](https://www.w3.org/TR/2019/REC-wasm-core-1-20191205/#syntax-module).
//!
//! The main type is [Module](./struct.Module.html), the already-decoded
//! structure a validator operates on. Some of the properties that are stated
//! as validity conditions in the Wasm specification are already guaranteed
//! by the AST definition itself, e.g., value types are well-formed by
//! construction. The remaining conditions are checked by the
//! [validate](../validate/index.html) module.

use anyhow::bail;
use derive_more::Display;
use std::{convert::TryFrom, rc::Rc};

#[derive(Debug, PartialOrd, Ord, PartialEq, Eq, Clone, Display)]
/// A webassembly Name. We choose to have it be an owned value rather than a
/// reference into the original module bytes so that modules can be
/// constructed and inspected independently of their serialization.
#[display(fmt = "{}", name)]
pub struct Name {
    /// Names in Wasm are utf8 encoded.
    pub name: String,
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str { &self.name }
}

impl<'a> From<&'a str> for Name {
    fn from(s: &'a str) -> Self {
        Self {
            name: s.to_string(),
        }
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str { &self.name }
}

/// Indices
pub type TypeIndex = u32;
pub type FuncIndex = u32;
pub type TableIndex = u32;
pub type MemIndex = u32;
pub type GlobalIndex = u32;
pub type LocalIndex = u32;
pub type LabelIndex = u32;

/// Wasm MVP value types. We use a low-level encoding where the tags are as
/// specified by the Wasm specification and match the binary serialization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display)]
#[repr(u8)]
pub enum ValueType {
    #[display(fmt = "i32")]
    I32 = 0x7F,
    #[display(fmt = "i64")]
    I64 = 0x7E,
    #[display(fmt = "f32")]
    F32 = 0x7D,
    #[display(fmt = "f64")]
    F64 = 0x7C,
}

/// Try to decode a value type from a single byte, the bytes being as
/// specified by the Wasm specification.
impl TryFrom<u8> for ValueType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x7F => Ok(ValueType::I32),
            0x7E => Ok(ValueType::I64),
            0x7D => Ok(ValueType::F32),
            0x7C => Ok(ValueType::F64),
            _ => bail!("invalid value type ({:#04x})", value),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(from: ValueType) -> Self { from as u8 }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// The result type of a block or function. We only support the empty type
/// and a single value type. Type indices are not supported in the MVP
/// version of Wasm.
pub enum BlockType {
    EmptyType,
    ValueType(ValueType),
}

impl From<Option<ValueType>> for BlockType {
    fn from(opt: Option<ValueType>) -> Self {
        match opt {
            Some(x) => BlockType::ValueType(x),
            None => BlockType::EmptyType,
        }
    }
}

impl BlockType {
    #[cfg_attr(not(feature = "fuzz-coverage"), inline(always))]
    pub fn is_empty(self) -> bool {
        match self {
            BlockType::EmptyType => true,
            BlockType::ValueType(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A function type with at most one return value. The MVP version of Wasm
/// does not support multiple return values, and thus we don't either.
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub result:     Option<ValueType>,
}

impl FunctionType {
    /// A function type with no arguments and no results.
    pub fn empty() -> Self {
        Self {
            parameters: Vec::new(),
            result:     None,
        }
    }
}

#[derive(Debug, Copy, Clone)]
/// Size constraints of a table or memory. The bounds are 64-bit so that
/// declared sizes can be checked against ceilings larger than `u32::MAX`.
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
}

#[derive(Debug, Copy, Clone)]
/// A table type. The only element type in the MVP is `anyfunc`, so only the
/// size constraints are recorded.
pub struct TableType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy)]
/// The type of a global, i.e., its value type together with its mutability.
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable:    bool,
}

#[derive(Debug, Clone, Copy)]
/// An initializer expression, the limited constant-expression grammar used
/// for global initializers and segment base offsets.
pub enum InitExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    GetGlobal(GlobalIndex),
}

#[derive(Debug)]
/// A single global definition, with its initializer expression.
pub struct GlobalDef {
    pub ty:   GlobalType,
    pub init: InitExpr,
}

#[derive(Debug)]
/// A single import description.
pub enum ImportDescription {
    /// Import a function with the given type.
    Func {
        type_idx: TypeIndex,
    },
    /// Import a table with the given size constraints.
    Table(TableType),
    /// Import a linear memory with the given size constraints.
    Memory(MemoryType),
    /// Import a global of the given type.
    Global(GlobalType),
}

#[derive(Debug)]
/// Import of an item from another module.
pub struct Import {
    /// The name of the module the item is imported from.
    pub mod_name:    Name,
    /// The name of the item that is to be imported.
    pub item_name:   Name,
    /// And the description of the item.
    pub description: ImportDescription,
}

#[derive(Debug, Clone, Copy)]
/// A local variable declaration in a function.
pub struct Local {
    /// The number of variables of this type.
    pub multiplicity: u32,
    /// The type of the local.
    pub ty:           ValueType,
}

#[derive(Debug, Clone, Copy)]
/// A byte range into the module's code blob.
pub struct CodeRange {
    pub offset:    usize,
    pub num_bytes: usize,
}

#[derive(Debug)]
/// A function defined by the module itself.
pub struct FunctionDef {
    /// Index into the type section of the function's signature.
    pub type_idx: TypeIndex,
    /// Declaration of the locals. This does not include parameters.
    pub locals:   Vec<Local>,
    /// The range of the function's body inside the module's code blob.
    pub code:     CodeRange,
}

#[derive(Debug)]
/// An exported item description.
pub enum ExportDescription {
    Func {
        index: FuncIndex,
    },
    Table {
        index: TableIndex,
    },
    Memory {
        index: MemIndex,
    },
    Global {
        index: GlobalIndex,
    },
}

#[derive(Debug)]
/// An exported item.
pub struct Export {
    /// Name of the exported item.
    pub name:        Name,
    /// And its description.
    pub description: ExportDescription,
}

#[derive(Debug)]
/// An element segment, describing how to initialize a part of the table.
pub struct ElementSegment {
    /// The table the segment applies to.
    pub table_idx: TableIndex,
    /// The offset at which to start the initialization. Must be of type
    /// `i32`.
    pub offset:    InitExpr,
    /// Functions to place in the table, starting at the offset.
    pub inits:     Vec<FuncIndex>,
}

#[derive(Debug)]
/// A data segment, describing how to initialize a part of the memory.
pub struct DataSegment {
    /// The memory the segment applies to.
    pub memory_idx: MemIndex,
    /// The offset at which to start the initialization. Must be of type
    /// `i32`.
    pub offset:     InitExpr,
    /// The bytes to initialize with.
    pub init:       Vec<u8>,
}

#[derive(Debug, Default)]
/// An already-decoded Wasm module. The `Default` instance produces the empty
/// module.
///
/// For functions, tables, memories, and globals the index space merges
/// imports and own definitions, imports coming first, as specified by the
/// Wasm specification. The lookup helpers below resolve indices in those
/// merged spaces.
pub struct Module {
    /// Function signatures. We use an `Rc` so that signatures can be shared
    /// with the function bodies without cloning the parameter vectors.
    pub types:    Vec<Rc<FunctionType>>,
    pub imports:  Vec<Import>,
    /// Functions defined by the module itself.
    pub funcs:    Vec<FunctionDef>,
    /// Tables defined by the module itself.
    pub tables:   Vec<TableType>,
    /// Memories defined by the module itself.
    pub memories: Vec<MemoryType>,
    /// Globals defined by the module itself.
    pub globals:  Vec<GlobalDef>,
    pub exports:  Vec<Export>,
    pub start:    Option<FuncIndex>,
    pub elements: Vec<ElementSegment>,
    pub data:     Vec<DataSegment>,
    /// The raw bytes of all function bodies. Each [FunctionDef] refers into
    /// this blob via its [CodeRange].
    pub code:     Vec<u8>,
}

impl Module {
    pub fn get_type(&self, idx: TypeIndex) -> Option<&Rc<FunctionType>> {
        self.types.get(idx as usize)
    }

    /// The number of imported functions.
    pub fn num_imported_funcs(&self) -> usize {
        self.imports
            .iter()
            .filter(|i| matches!(i.description, ImportDescription::Func { .. }))
            .count()
    }

    /// The total number of functions, imported and defined.
    pub fn num_funcs(&self) -> usize { self.num_imported_funcs() + self.funcs.len() }

    /// The total number of tables, imported and defined.
    pub fn num_tables(&self) -> usize {
        let imported = self
            .imports
            .iter()
            .filter(|i| matches!(i.description, ImportDescription::Table(_)))
            .count();
        imported + self.tables.len()
    }

    /// The total number of memories, imported and defined.
    pub fn num_memories(&self) -> usize {
        let imported = self
            .imports
            .iter()
            .filter(|i| matches!(i.description, ImportDescription::Memory(_)))
            .count();
        imported + self.memories.len()
    }

    /// The number of imported globals.
    pub fn num_imported_globals(&self) -> usize {
        self.imports
            .iter()
            .filter(|i| matches!(i.description, ImportDescription::Global(_)))
            .count()
    }

    /// The total number of globals, imported and defined.
    pub fn num_globals(&self) -> usize { self.num_imported_globals() + self.globals.len() }

    /// Whether the module has a default memory, imported or defined.
    pub fn memory_exists(&self) -> bool { self.num_memories() > 0 }

    /// Whether the module has a default table, imported or defined.
    pub fn table_exists(&self) -> bool { self.num_tables() > 0 }

    /// Resolve a function index to its type index, imports first.
    pub fn func_type_idx(&self, idx: FuncIndex) -> Option<TypeIndex> {
        let mut remaining = idx as usize;
        for import in self.imports.iter() {
            if let ImportDescription::Func {
                type_idx,
            } = import.description
            {
                if remaining == 0 {
                    return Some(type_idx);
                }
                remaining -= 1;
            }
        }
        self.funcs.get(remaining).map(|f| f.type_idx)
    }

    /// Resolve a function index to its signature, imports first.
    pub fn get_func_type(&self, idx: FuncIndex) -> Option<&Rc<FunctionType>> {
        self.func_type_idx(idx).and_then(|ty_idx| self.get_type(ty_idx))
    }

    /// Resolve a global index to its type, imports first.
    pub fn get_global(&self, idx: GlobalIndex) -> Option<GlobalType> {
        let mut remaining = idx as usize;
        for import in self.imports.iter() {
            if let ImportDescription::Global(ty) = import.description {
                if remaining == 0 {
                    return Some(ty);
                }
                remaining -= 1;
            }
        }
        self.globals.get(remaining).map(|g| g.ty)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
/// The immediate memory argument. Since all operations are on memory index 0
/// the index is implicit.
pub struct MemArg {
    /// The static offset into the linear memory. Decoded as a 64-bit
    /// integer; the validator rejects offsets that do not fit in 32 bits.
    pub offset: u64,
    /// The alignment hint, as the base-2 logarithm of the alignment in
    /// bytes.
    pub align:  u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpCode {
    // Control instructions
    End,
    Nop,
    Unreachable,
    Block(BlockType),
    Loop(BlockType),
    If {
        ty: BlockType,
    },
    Else,
    Br(LabelIndex),
    BrIf(LabelIndex),
    BrTable {
        labels:  Vec<LabelIndex>,
        default: LabelIndex,
    },
    Return,
    Call(FuncIndex),
    CallIndirect(TypeIndex),

    // Parametric instructions
    Drop,
    Select,

    // Variable instructions
    LocalGet(LocalIndex),
    LocalSet(LocalIndex),
    LocalTee(LocalIndex),
    GlobalGet(GlobalIndex),
    GlobalSet(GlobalIndex),

    // Memory instructions
    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I64Load8S(MemArg),
    I64Load8U(MemArg),
    I64Load16S(MemArg),
    I64Load16U(MemArg),
    I64Load32S(MemArg),
    I64Load32U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    I64Store8(MemArg),
    I64Store16(MemArg),
    I64Store32(MemArg),
    MemorySize,
    MemoryGrow,

    // Numeric instructions
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),

    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
}
