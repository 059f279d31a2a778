//! The operation decoder: decoding of function-body bytes into typed
//! [OpCode](../types/enum.OpCode.html) values, which drive the
//! [validate](../validate/index.html) module.
//!
//! Only the instruction stream is decoded here. Decoding of the module
//! envelope (sections, name tables) is the responsibility of the embedder;
//! the validator operates on an already-decoded
//! [Module](../types/struct.Module.html) plus the raw bytes of each function
//! body.

use crate::types::*;
use anyhow::{bail, ensure};
use std::{
    convert::TryFrom,
    io::{Cursor, Read},
};

/// Auxiliary type alias used by all the decoding functions.
pub type ParseResult<A> = anyhow::Result<A>;

/// The byte used to signal the end of an instruction sequence.
pub const END: u8 = 0x0B;

/// A trait for decoding immediates from the instruction stream. The
/// implementation is responsible for advancing the cursor in-line with the
/// data it has read.
pub trait Decodable: Sized {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self>;
}

/// A helper trait for more convenient use. The roles of input and output
/// types are reversed compared to [Decodable], which means the decoded type
/// can typically be inferred from the use site.
pub(crate) trait GetDecodable {
    fn next<A: Decodable>(&mut self) -> ParseResult<A>;
}

impl<'a> GetDecodable for Cursor<&'a [u8]> {
    #[cfg_attr(not(feature = "fuzz-coverage"), inline(always))]
    fn next<A: Decodable>(&mut self) -> ParseResult<A> { A::decode(self) }
}

/// Decode a single byte.
impl Decodable for u8 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let mut buf = [0u8; 1];
        cursor.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

/// Implementation for u32 according to the Wasm specification.
impl Decodable for u32 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        // 5 is ceil(32 / 7)
        let res = leb128::read::unsigned(&mut cursor.take(5))?;
        Ok(u32::try_from(res)?)
    }
}

/// Implementation for u64 according to the Wasm specification.
impl Decodable for u64 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        // 10 is ceil(64 / 7)
        let res = leb128::read::unsigned(&mut cursor.take(10))?;
        Ok(res)
    }
}

/// Implementation for i32 according to the Wasm specification.
impl Decodable for i32 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let res = leb128::read::signed(&mut cursor.take(5))?;
        Ok(i32::try_from(res)?)
    }
}

/// Implementation for i64 according to the Wasm specification.
impl Decodable for i64 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let res = leb128::read::signed(&mut cursor.take(10))?;
        Ok(res)
    }
}

/// Float immediates are stored as little-endian IEEE754 bit patterns.
impl Decodable for f32 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let mut buf = [0u8; 4];
        cursor.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

impl Decodable for f64 {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let mut buf = [0u8; 8];
        cursor.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }
}

/// The MVP only has the empty block type and the four value types. Type
/// indices are not supported.
impl Decodable for BlockType {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        match u8::decode(cursor)? {
            0x40 => Ok(BlockType::EmptyType),
            byte => match ValueType::try_from(byte) {
                Ok(ty) => Ok(BlockType::ValueType(ty)),
                Err(_) => bail!("invalid result type ({:#04x})", byte),
            },
        }
    }
}

impl Decodable for MemArg {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let align = cursor.next()?;
        let offset = cursor.next()?;
        Ok(MemArg {
            offset,
            align,
        })
    }
}

/// Decode a vector of branch labels, as a length followed by that many
/// labels. The initial allocation is capped so that malicious lengths do not
/// force a large allocation up-front.
impl Decodable for Vec<LabelIndex> {
    fn decode(cursor: &mut Cursor<&[u8]>) -> ParseResult<Self> {
        let len = u32::decode(cursor)?;
        let mut out = Vec::with_capacity(std::cmp::min(len as usize, 1024));
        for _ in 0..len {
            out.push(cursor.next()?)
        }
        Ok(out)
    }
}

/// Read a single byte and compare it to the given one, failing if they do
/// not match.
fn expect_byte(cursor: &mut Cursor<&[u8]>, byte: u8) -> ParseResult<()> {
    let b = u8::decode(cursor)?;
    ensure!(b == byte, "Unexpected byte {:#04x}. Expected {:#04x}", b, byte);
    Ok(())
}

/// Decode an initializer expression of the kind used for global initializers
/// and segment base offsets: a single constant instruction followed by the
/// `end` delimiter.
pub fn decode_init_expr(cursor: &mut Cursor<&[u8]>) -> ParseResult<InitExpr> {
    let expr = match decode_opcode(cursor)? {
        OpCode::I32Const(n) => InitExpr::I32Const(n),
        OpCode::I64Const(n) => InitExpr::I64Const(n),
        OpCode::F32Const(x) => InitExpr::F32Const(x),
        OpCode::F64Const(x) => InitExpr::F64Const(x),
        OpCode::GlobalGet(idx) => InitExpr::GetGlobal(idx),
        _ => bail!("invalid initializer expression"),
    };
    expect_byte(cursor, END)?;
    Ok(expr)
}

/// Decode the next opcode directly from the cursor.
pub fn decode_opcode(cursor: &mut Cursor<&[u8]>) -> ParseResult<OpCode> {
    match u8::decode(cursor)? {
        END => Ok(OpCode::End),
        0x00 => Ok(OpCode::Unreachable),
        0x01 => Ok(OpCode::Nop),
        0x02 => {
            let bt = cursor.next()?;
            Ok(OpCode::Block(bt))
        }
        0x03 => {
            let bt = cursor.next()?;
            Ok(OpCode::Loop(bt))
        }
        0x04 => {
            let ty = cursor.next()?;
            Ok(OpCode::If {
                ty,
            })
        }
        0x05 => Ok(OpCode::Else),
        0x0C => {
            let l = cursor.next()?;
            Ok(OpCode::Br(l))
        }
        0x0D => {
            let l = cursor.next()?;
            Ok(OpCode::BrIf(l))
        }
        0x0E => {
            let labels = cursor.next()?;
            let default = cursor.next()?;
            Ok(OpCode::BrTable {
                labels,
                default,
            })
        }
        0x0F => Ok(OpCode::Return),
        0x10 => {
            let idx = cursor.next()?;
            Ok(OpCode::Call(idx))
        }
        0x11 => {
            let ty = cursor.next()?;
            expect_byte(cursor, 0x00)?;
            Ok(OpCode::CallIndirect(ty))
        }
        // parametric instructions
        0x1A => Ok(OpCode::Drop),
        0x1B => Ok(OpCode::Select),
        // variable instructions
        0x20 => {
            let idx = cursor.next()?;
            Ok(OpCode::LocalGet(idx))
        }
        0x21 => {
            let idx = cursor.next()?;
            Ok(OpCode::LocalSet(idx))
        }
        0x22 => {
            let idx = cursor.next()?;
            Ok(OpCode::LocalTee(idx))
        }
        0x23 => {
            let idx = cursor.next()?;
            Ok(OpCode::GlobalGet(idx))
        }
        0x24 => {
            let idx = cursor.next()?;
            Ok(OpCode::GlobalSet(idx))
        }
        // memory instructions
        0x28 => Ok(OpCode::I32Load(cursor.next()?)),
        0x29 => Ok(OpCode::I64Load(cursor.next()?)),
        0x2A => Ok(OpCode::F32Load(cursor.next()?)),
        0x2B => Ok(OpCode::F64Load(cursor.next()?)),
        0x2C => Ok(OpCode::I32Load8S(cursor.next()?)),
        0x2D => Ok(OpCode::I32Load8U(cursor.next()?)),
        0x2E => Ok(OpCode::I32Load16S(cursor.next()?)),
        0x2F => Ok(OpCode::I32Load16U(cursor.next()?)),
        0x30 => Ok(OpCode::I64Load8S(cursor.next()?)),
        0x31 => Ok(OpCode::I64Load8U(cursor.next()?)),
        0x32 => Ok(OpCode::I64Load16S(cursor.next()?)),
        0x33 => Ok(OpCode::I64Load16U(cursor.next()?)),
        0x34 => Ok(OpCode::I64Load32S(cursor.next()?)),
        0x35 => Ok(OpCode::I64Load32U(cursor.next()?)),
        0x36 => Ok(OpCode::I32Store(cursor.next()?)),
        0x37 => Ok(OpCode::I64Store(cursor.next()?)),
        0x38 => Ok(OpCode::F32Store(cursor.next()?)),
        0x39 => Ok(OpCode::F64Store(cursor.next()?)),
        0x3A => Ok(OpCode::I32Store8(cursor.next()?)),
        0x3B => Ok(OpCode::I32Store16(cursor.next()?)),
        0x3C => Ok(OpCode::I64Store8(cursor.next()?)),
        0x3D => Ok(OpCode::I64Store16(cursor.next()?)),
        0x3E => Ok(OpCode::I64Store32(cursor.next()?)),
        0x3F => {
            expect_byte(cursor, 0x00)?;
            Ok(OpCode::MemorySize)
        }
        0x40 => {
            expect_byte(cursor, 0x00)?;
            Ok(OpCode::MemoryGrow)
        }
        // constants
        0x41 => {
            let n = cursor.next()?;
            Ok(OpCode::I32Const(n))
        }
        0x42 => {
            let n = cursor.next()?;
            Ok(OpCode::I64Const(n))
        }
        0x43 => {
            let x = cursor.next()?;
            Ok(OpCode::F32Const(x))
        }
        0x44 => {
            let x = cursor.next()?;
            Ok(OpCode::F64Const(x))
        }
        // numeric instructions
        0x45 => Ok(OpCode::I32Eqz),
        0x46 => Ok(OpCode::I32Eq),
        0x47 => Ok(OpCode::I32Ne),
        0x48 => Ok(OpCode::I32LtS),
        0x49 => Ok(OpCode::I32LtU),
        0x4A => Ok(OpCode::I32GtS),
        0x4B => Ok(OpCode::I32GtU),
        0x4C => Ok(OpCode::I32LeS),
        0x4D => Ok(OpCode::I32LeU),
        0x4E => Ok(OpCode::I32GeS),
        0x4F => Ok(OpCode::I32GeU),

        0x50 => Ok(OpCode::I64Eqz),
        0x51 => Ok(OpCode::I64Eq),
        0x52 => Ok(OpCode::I64Ne),
        0x53 => Ok(OpCode::I64LtS),
        0x54 => Ok(OpCode::I64LtU),
        0x55 => Ok(OpCode::I64GtS),
        0x56 => Ok(OpCode::I64GtU),
        0x57 => Ok(OpCode::I64LeS),
        0x58 => Ok(OpCode::I64LeU),
        0x59 => Ok(OpCode::I64GeS),
        0x5A => Ok(OpCode::I64GeU),

        0x5B => Ok(OpCode::F32Eq),
        0x5C => Ok(OpCode::F32Ne),
        0x5D => Ok(OpCode::F32Lt),
        0x5E => Ok(OpCode::F32Gt),
        0x5F => Ok(OpCode::F32Le),
        0x60 => Ok(OpCode::F32Ge),

        0x61 => Ok(OpCode::F64Eq),
        0x62 => Ok(OpCode::F64Ne),
        0x63 => Ok(OpCode::F64Lt),
        0x64 => Ok(OpCode::F64Gt),
        0x65 => Ok(OpCode::F64Le),
        0x66 => Ok(OpCode::F64Ge),

        0x67 => Ok(OpCode::I32Clz),
        0x68 => Ok(OpCode::I32Ctz),
        0x69 => Ok(OpCode::I32Popcnt),
        0x6A => Ok(OpCode::I32Add),
        0x6B => Ok(OpCode::I32Sub),
        0x6C => Ok(OpCode::I32Mul),
        0x6D => Ok(OpCode::I32DivS),
        0x6E => Ok(OpCode::I32DivU),
        0x6F => Ok(OpCode::I32RemS),
        0x70 => Ok(OpCode::I32RemU),
        0x71 => Ok(OpCode::I32And),
        0x72 => Ok(OpCode::I32Or),
        0x73 => Ok(OpCode::I32Xor),
        0x74 => Ok(OpCode::I32Shl),
        0x75 => Ok(OpCode::I32ShrS),
        0x76 => Ok(OpCode::I32ShrU),
        0x77 => Ok(OpCode::I32Rotl),
        0x78 => Ok(OpCode::I32Rotr),

        0x79 => Ok(OpCode::I64Clz),
        0x7A => Ok(OpCode::I64Ctz),
        0x7B => Ok(OpCode::I64Popcnt),
        0x7C => Ok(OpCode::I64Add),
        0x7D => Ok(OpCode::I64Sub),
        0x7E => Ok(OpCode::I64Mul),
        0x7F => Ok(OpCode::I64DivS),
        0x80 => Ok(OpCode::I64DivU),
        0x81 => Ok(OpCode::I64RemS),
        0x82 => Ok(OpCode::I64RemU),
        0x83 => Ok(OpCode::I64And),
        0x84 => Ok(OpCode::I64Or),
        0x85 => Ok(OpCode::I64Xor),
        0x86 => Ok(OpCode::I64Shl),
        0x87 => Ok(OpCode::I64ShrS),
        0x88 => Ok(OpCode::I64ShrU),
        0x89 => Ok(OpCode::I64Rotl),
        0x8A => Ok(OpCode::I64Rotr),

        0x8B => Ok(OpCode::F32Abs),
        0x8C => Ok(OpCode::F32Neg),
        0x8D => Ok(OpCode::F32Ceil),
        0x8E => Ok(OpCode::F32Floor),
        0x8F => Ok(OpCode::F32Trunc),
        0x90 => Ok(OpCode::F32Nearest),
        0x91 => Ok(OpCode::F32Sqrt),
        0x92 => Ok(OpCode::F32Add),
        0x93 => Ok(OpCode::F32Sub),
        0x94 => Ok(OpCode::F32Mul),
        0x95 => Ok(OpCode::F32Div),
        0x96 => Ok(OpCode::F32Min),
        0x97 => Ok(OpCode::F32Max),
        0x98 => Ok(OpCode::F32Copysign),

        0x99 => Ok(OpCode::F64Abs),
        0x9A => Ok(OpCode::F64Neg),
        0x9B => Ok(OpCode::F64Ceil),
        0x9C => Ok(OpCode::F64Floor),
        0x9D => Ok(OpCode::F64Trunc),
        0x9E => Ok(OpCode::F64Nearest),
        0x9F => Ok(OpCode::F64Sqrt),
        0xA0 => Ok(OpCode::F64Add),
        0xA1 => Ok(OpCode::F64Sub),
        0xA2 => Ok(OpCode::F64Mul),
        0xA3 => Ok(OpCode::F64Div),
        0xA4 => Ok(OpCode::F64Min),
        0xA5 => Ok(OpCode::F64Max),
        0xA6 => Ok(OpCode::F64Copysign),

        0xA7 => Ok(OpCode::I32WrapI64),
        0xA8 => Ok(OpCode::I32TruncF32S),
        0xA9 => Ok(OpCode::I32TruncF32U),
        0xAA => Ok(OpCode::I32TruncF64S),
        0xAB => Ok(OpCode::I32TruncF64U),
        0xAC => Ok(OpCode::I64ExtendI32S),
        0xAD => Ok(OpCode::I64ExtendI32U),
        0xAE => Ok(OpCode::I64TruncF32S),
        0xAF => Ok(OpCode::I64TruncF32U),
        0xB0 => Ok(OpCode::I64TruncF64S),
        0xB1 => Ok(OpCode::I64TruncF64U),
        0xB2 => Ok(OpCode::F32ConvertI32S),
        0xB3 => Ok(OpCode::F32ConvertI32U),
        0xB4 => Ok(OpCode::F32ConvertI64S),
        0xB5 => Ok(OpCode::F32ConvertI64U),
        0xB6 => Ok(OpCode::F32DemoteF64),
        0xB7 => Ok(OpCode::F64ConvertI32S),
        0xB8 => Ok(OpCode::F64ConvertI32U),
        0xB9 => Ok(OpCode::F64ConvertI64S),
        0xBA => Ok(OpCode::F64ConvertI64U),
        0xBB => Ok(OpCode::F64PromoteF32),
        0xBC => Ok(OpCode::I32ReinterpretF32),
        0xBD => Ok(OpCode::I64ReinterpretF64),
        0xBE => Ok(OpCode::F32ReinterpretI32),
        0xBF => Ok(OpCode::F64ReinterpretI64),
        byte => bail!("unknown opcode ({:#04x})", byte),
    }
}

/// An iterator over the opcodes of a function body. The iterator yields
/// opcodes until the underlying byte range is exhausted; the validator is
/// responsible for checking that the stream terminates together with the
/// function's control structure.
pub struct OpCodeIterator<'a> {
    state: Cursor<&'a [u8]>,
}

impl<'a> OpCodeIterator<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            state: Cursor::new(bytes),
        }
    }
}

impl<'a> Iterator for OpCodeIterator<'a> {
    type Item = ParseResult<OpCode>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.position() == self.state.get_ref().len() as u64 {
            None
        } else {
            Some(decode_opcode(&mut self.state))
        }
    }
}
