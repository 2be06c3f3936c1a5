//! Location Evaluator (spec.md §4.6): a partial evaluator for the DWARF
//! expression byte-code that only ever produces one of three shapes —
//! an absolute constant, a bare register, or a register-relative offset —
//! and rejects anything that would need more than that.

use gimli::Reader as _;
use smallvec::SmallVec;

use crate::error::ErrorKind;

use super::{DwarfError, Slice};

/// Fixed-depth operand stack; spec.md §4.6 requires depth ≥ 8 and every
/// opcode this evaluator accepts keeps the stack far shallower than that in
/// practice (no opcode here pushes more than it pops plus one).
const STACK_DEPTH: usize = 8;

/// The result of evaluating a DWARF expression: one of three shapes, never
/// more expressive than that (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// A fixed address or constant.
    Abs(i64),
    /// A bare DWARF register number, with no offset.
    Reg(u16),
    /// `register + offset`.
    RegRel(u16, i64),
}

impl Location {
    fn add(self, rhs: i64) -> Result<Location, DwarfError> {
        match self {
            Location::Abs(a) => Ok(Location::Abs(a + rhs)),
            Location::RegRel(r, a) => Ok(Location::RegRel(r, a + rhs)),
            Location::Reg(_) => Err(invalid()),
        }
    }

    fn sub(self, other: Location) -> Result<Location, DwarfError> {
        match (self, other) {
            (Location::Abs(a), Location::Abs(b)) => Ok(Location::Abs(a - b)),
            (Location::RegRel(r, a), Location::Abs(b)) => Ok(Location::RegRel(r, a - b)),
            (Location::RegRel(r1, a), Location::RegRel(r2, b)) if r1 == r2 => Ok(Location::Abs(a - b)),
            _ => Err(invalid()),
        }
    }
}

fn invalid() -> DwarfError {
    DwarfError::new(ErrorKind::UnsupportedForm)
}

/// Evaluates one DWARF expression, given an optional already-evaluated
/// frame-base location for `DW_OP_fbreg` to build on.
///
/// Stops and returns `Invalid` ([`ErrorKind::UnsupportedForm`]) the moment an
/// opcode this evaluator does not model is seen (memory dereference, TLS,
/// call, implicit-value, stack-value), or when an arithmetic combination
/// would fall outside the three-variant result type.
///
/// The opcode dispatch and operand stack are custom: `gimli::Evaluation`
/// is callback-driven (it suspends to ask its caller for register/memory
/// contents and yields location pieces, not a single `Location`) and
/// doesn't fit collapsing straight down to one of three shapes. Every
/// fixed-width and LEB128 operand read goes through `gimli`'s own
/// [`gimli::Reader`] decoder on an [`Slice`] cursor instead of hand-parsing.
pub fn evaluate(expr: &[u8], frame_base: Option<Location>) -> Result<Location, DwarfError> {
    let mut stack: SmallVec<[Location; STACK_DEPTH]> = SmallVec::new();
    let mut pos = 0usize;

    macro_rules! push {
        ($v:expr) => {{
            if stack.len() == STACK_DEPTH {
                return Err(invalid());
            }
            stack.push($v);
        }};
    }
    macro_rules! pop {
        () => {
            stack.pop().ok_or_else(invalid)?
        };
    }
    macro_rules! pop_abs {
        () => {
            match pop!() {
                Location::Abs(v) => v,
                _ => return Err(invalid()),
            }
        };
    }

    while pos < expr.len() {
        let op = expr[pos];
        pos += 1;

        match op {
            // DW_OP_regN (0x50..=0x6f)
            0x50..=0x6f => push!(Location::Reg((op - 0x50) as u16)),
            // DW_OP_bregN (0x70..=0x8f)
            0x70..=0x8f => {
                let (offset, len) = read_sleb128(&expr[pos..])?;
                pos += len;
                push!(Location::RegRel((op - 0x70) as u16, offset));
            }
            // DW_OP_litN (0x30..=0x4f)
            0x30..=0x4f => push!(Location::Abs((op - 0x30) as i64)),
            // DW_OP_regx
            0x90 => {
                let (reg, len) = read_uleb128(&expr[pos..])?;
                pos += len;
                push!(Location::Reg(reg as u16));
            }
            // DW_OP_bregx
            0x92 => {
                let (reg, len) = read_uleb128(&expr[pos..])?;
                pos += len;
                let (offset, len) = read_sleb128(&expr[pos..])?;
                pos += len;
                push!(Location::RegRel(reg as u16, offset));
            }
            // DW_OP_addr
            0x03 => {
                push!(Location::Abs(read_u64(expr, pos)? as i64));
                pos += 8;
            }
            // DW_OP_const1u/const1s
            0x08 => { push!(Location::Abs(read_u8(expr, pos)? as i64)); pos += 1; }
            0x09 => { push!(Location::Abs(read_u8(expr, pos)? as i8 as i64)); pos += 1; }
            // const2u/const2s
            0x0a => { push!(Location::Abs(read_u16(expr, pos)? as i64)); pos += 2; }
            0x0b => { push!(Location::Abs(read_u16(expr, pos)? as i16 as i64)); pos += 2; }
            // const4u/const4s
            0x0c => { push!(Location::Abs(read_u32(expr, pos)? as i64)); pos += 4; }
            0x0d => { push!(Location::Abs(read_u32(expr, pos)? as i32 as i64)); pos += 4; }
            // const8u/const8s
            0x0e => { push!(Location::Abs(read_u64(expr, pos)? as i64)); pos += 8; }
            0x0f => { push!(Location::Abs(read_u64(expr, pos)? as i64)); pos += 8; }
            // constu/consts
            0x10 => { let (v, len) = read_uleb128(&expr[pos..])?; pos += len; push!(Location::Abs(v as i64)); }
            0x11 => { let (v, len) = read_sleb128(&expr[pos..])?; pos += len; push!(Location::Abs(v)); }
            // DW_OP_fbreg
            0x91 => {
                let (offset, len) = read_sleb128(&expr[pos..])?;
                pos += len;
                let base = frame_base.ok_or_else(invalid)?;
                let promoted = match base {
                    Location::Reg(r) => Location::RegRel(r, 0),
                    other => other,
                };
                push!(promoted.add(offset)?);
            }
            // DW_OP_plus
            0x22 => { let b = pop!(); let a = pop!(); push!(a.add(match b { Location::Abs(v) => v, _ => return Err(invalid()) })?); }
            // DW_OP_plus_uconst
            0x23 => { let (v, len) = read_uleb128(&expr[pos..])?; pos += len; let a = pop!(); push!(a.add(v as i64)?); }
            // DW_OP_minus
            0x1c => { let b = pop!(); let a = pop!(); push!(a.sub(b)?); }
            // DW_OP_mul/div/mod/shl/shr/shra/and/or/xor on Abs only
            0x1e | 0x1b | 0x1a | 0x24 | 0x25 | 0x26 | 0x1f | 0x21 | 0xa7 => {
                let b = pop_abs!();
                let a = pop_abs!();
                let r = match op {
                    0x1e => a.wrapping_mul(b),
                    0x1b => if b == 0 { return Err(invalid()) } else { a.wrapping_div(b) },
                    0x1a => if b == 0 { return Err(invalid()) } else { a.wrapping_rem(b) },
                    0x24 => a << (b & 63),
                    0x25 => ((a as u64) >> (b & 63)) as i64,
                    0x26 => a >> (b & 63),
                    0x1f => a & b,
                    0x21 => a | b,
                    0xa7 => a ^ b,
                    _ => unreachable!(),
                };
                push!(Location::Abs(r));
            }
            // DW_OP_abs/neg/not
            0x19 => { let a = pop_abs!(); push!(Location::Abs(a.abs())); }
            0x1d => { let a = pop_abs!(); push!(Location::Abs(-a)); }
            0x20 => { let a = pop_abs!(); push!(Location::Abs(!a)); }
            // comparisons -> 0/1
            0x29..=0x2e => {
                let b = pop_abs!();
                let a = pop_abs!();
                let r = match op {
                    0x29 => a == b,
                    0x2a => a >= b,
                    0x2b => a > b,
                    0x2c => a <= b,
                    0x2d => a < b,
                    0x2e => a != b,
                    _ => unreachable!(),
                };
                push!(Location::Abs(r as i64));
            }
            // stack manipulation
            0x12 => { let a = *stack.last().ok_or_else(invalid)?; push!(a); } // dup
            0x13 => { pop!(); } // drop
            0x14 => { // over
                let idx = stack.len().checked_sub(2).ok_or_else(invalid)?;
                push!(stack[idx]);
            }
            0x15 => { // pick
                let n = read_u8(expr, pos)? as usize;
                pos += 1;
                let idx = stack.len().checked_sub(1 + n).ok_or_else(invalid)?;
                push!(stack[idx]);
            }
            0x16 => { // swap
                let b = pop!();
                let a = pop!();
                push!(b);
                push!(a);
            }
            0x17 => { // rot
                let c = pop!();
                let b = pop!();
                let a = pop!();
                push!(c);
                push!(a);
                push!(b);
            }
            // control
            0x2f => { let len = read_i16(expr, pos)?; pos += 2; pos = apply_skip(pos, len)?; } // skip
            0x28 => { // bra
                let len = read_i16(expr, pos)?;
                pos += 2;
                if pop_abs!() != 0 {
                    pos = apply_skip(pos, len)?;
                }
            }
            0x96 => {} // nop
            _ => return Err(invalid()),
        }
    }

    stack.pop().ok_or_else(invalid)
}

fn apply_skip(pos: usize, len: i16) -> Result<usize, DwarfError> {
    let next = pos as i64 + len as i64;
    if next < 0 {
        return Err(invalid());
    }
    Ok(next as usize)
}

/// Wraps `expr[pos..]` as a [`Slice`] so every multi-byte or LEB128 read
/// below goes through `gimli`'s own [`gimli::Reader`] decoder instead of
/// hand-parsing, the same way [`super::reader`] does for `.debug_info`.
fn cursor_at(expr: &[u8], pos: usize) -> Slice<'_> {
    gimli::EndianSlice::new(&expr[pos..], gimli::RunTimeEndian::Little)
}

/// Runs `read` over a cursor at `pos` and returns its value plus how many
/// bytes it consumed, so callers can advance their own `pos` without
/// `Slice` borrowing the whole evaluator loop.
fn read_with<T>(expr: &[u8], pos: usize, read: impl FnOnce(&mut Slice<'_>) -> gimli::Result<T>) -> Result<T, DwarfError> {
    let mut cursor = cursor_at(expr, pos);
    read(&mut cursor).map_err(|_| invalid())
}

fn read_u8(expr: &[u8], pos: usize) -> Result<u8, DwarfError> {
    read_with(expr, pos, |c| c.read_u8())
}

fn read_u16(expr: &[u8], pos: usize) -> Result<u16, DwarfError> {
    read_with(expr, pos, |c| c.read_u16())
}

fn read_i16(expr: &[u8], pos: usize) -> Result<i16, DwarfError> {
    Ok(read_u16(expr, pos)? as i16)
}

fn read_u32(expr: &[u8], pos: usize) -> Result<u32, DwarfError> {
    read_with(expr, pos, |c| c.read_u32())
}

fn read_u64(expr: &[u8], pos: usize) -> Result<u64, DwarfError> {
    read_with(expr, pos, |c| c.read_u64())
}

fn read_uleb128(expr: &[u8]) -> Result<(u64, usize), DwarfError> {
    let mut cursor = cursor_at(expr, 0);
    let before = cursor.len();
    let value = cursor.read_uleb128().map_err(|_| invalid())?;
    Ok((value, before - cursor.len()))
}

fn read_sleb128(expr: &[u8]) -> Result<(i64, usize), DwarfError> {
    let mut cursor = cursor_at(expr, 0);
    let before = cursor.len();
    let value = cursor.read_sleb128().map_err(|_| invalid())?;
    Ok((value, before - cursor.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_register_evaluates_to_reg() {
        let expr = [0x50]; // DW_OP_reg0
        assert_eq!(evaluate(&expr, None).unwrap(), Location::Reg(0));
    }

    #[test]
    fn breg_with_offset_evaluates_to_regrel() {
        // DW_OP_breg5 16 (sleb128 16 = 0x10)
        let expr = [0x75, 0x10];
        assert_eq!(evaluate(&expr, None).unwrap(), Location::RegRel(5, 16));
    }

    #[test]
    fn fbreg_promotes_bare_register_frame_base() {
        let frame_base = Some(Location::Reg(6)); // rbp
        let expr = [0x91, 0x7c]; // DW_OP_fbreg -4 (sleb128 0x7c = -4)
        assert_eq!(evaluate(&expr, frame_base).unwrap(), Location::RegRel(6, -4));
    }

    #[test]
    fn addr_is_absolute() {
        let mut expr = vec![0x03];
        expr.extend_from_slice(&0x1000u64.to_le_bytes());
        assert_eq!(evaluate(&expr, None).unwrap(), Location::Abs(0x1000));
    }

    #[test]
    fn dereference_opcode_is_rejected() {
        let expr = [0x06]; // DW_OP_deref
        assert!(evaluate(&expr, None).is_err());
    }

    #[test]
    fn regrel_minus_regrel_same_register_is_abs() {
        let a = Location::RegRel(1, 10);
        let b = Location::RegRel(1, 4);
        assert_eq!(a.sub(b).unwrap(), Location::Abs(6));
    }
}
