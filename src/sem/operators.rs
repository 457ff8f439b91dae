//! Operator dispatch table.
//!
//! Maps a source operator token plus its operand type signature to the
//! opcode to emit and the type the operation leaves on the stack. An absent
//! entry is an undefined operator.

use super::RunType;
use crate::asm::wasm::Opcode;
use crate::syntax::tree::OpSelection;

fn select(opcode: Opcode, result: RunType) -> Option<OpSelection> {
    Some(OpSelection { opcode, result })
}

/// Dispatch for binary operators. Both operands must share one type; there
/// is no implicit coercion.
pub fn binary(text: &str, lhs: RunType, rhs: RunType) -> Option<OpSelection> {
    use Opcode::*;
    use RunType::*;

    if lhs != rhs {
        return None;
    }
    let ty = lhs;

    let (opcode, result) = match (text, ty) {
        ("+", I32) => (I32Add, I32),
        ("+", I64) => (I64Add, I64),
        ("+", F32) => (F32Add, F32),
        ("+", F64) => (F64Add, F64),
        ("-", I32) => (I32Sub, I32),
        ("-", I64) => (I64Sub, I64),
        ("-", F32) => (F32Sub, F32),
        ("-", F64) => (F64Sub, F64),
        ("*", I32) => (I32Mul, I32),
        ("*", I64) => (I64Mul, I64),
        ("*", F32) => (F32Mul, F32),
        ("*", F64) => (F64Mul, F64),
        ("/", I32) => (I32DivS, I32),
        ("/", I64) => (I64DivS, I64),
        ("/", F32) => (F32Div, F32),
        ("/", F64) => (F64Div, F64),
        ("%", I32) => (I32RemS, I32),
        ("%", I64) => (I64RemS, I64),

        ("&", I32) => (I32And, I32),
        ("&", I64) => (I64And, I64),
        ("|", I32) => (I32Or, I32),
        ("|", I64) => (I64Or, I64),
        ("^", I32) => (I32Xor, I32),
        ("^", I64) => (I64Xor, I64),

        ("<<", I32) => (I32Shl, I32),
        ("<<", I64) => (I64Shl, I64),
        (">>", I32) => (I32ShrS, I32),
        (">>", I64) => (I64ShrS, I64),
        (">>>", I32) => (I32ShrU, I32),
        (">>>", I64) => (I64ShrU, I64),
        ("rotate_left", I32) => (I32Rotl, I32),
        ("rotate_left", I64) => (I64Rotl, I64),
        ("rotate_right", I32) => (I32Rotr, I32),
        ("rotate_right", I64) => (I64Rotr, I64),

        // Comparisons leave an i32 truth value.
        ("==", I32) => (I32Eq, I32),
        ("==", I64) => (I64Eq, I32),
        ("==", F32) => (F32Eq, I32),
        ("==", F64) => (F64Eq, I32),
        ("!=", I32) => (I32Ne, I32),
        ("!=", I64) => (I64Ne, I32),
        ("!=", F32) => (F32Ne, I32),
        ("!=", F64) => (F64Ne, I32),
        ("<", I32) => (I32LtS, I32),
        ("<", I64) => (I64LtS, I32),
        ("<", F32) => (F32Lt, I32),
        ("<", F64) => (F64Lt, I32),
        (">", I32) => (I32GtS, I32),
        (">", I64) => (I64GtS, I32),
        (">", F32) => (F32Gt, I32),
        (">", F64) => (F64Gt, I32),
        ("<=", I32) => (I32LeS, I32),
        ("<=", I64) => (I64LeS, I32),
        ("<=", F32) => (F32Le, I32),
        ("<=", F64) => (F64Le, I32),
        (">=", I32) => (I32GeS, I32),
        (">=", I64) => (I64GeS, I32),
        (">=", F32) => (F32Ge, I32),
        (">=", F64) => (F64Ge, I32),

        ("min", F32) => (F32Min, F32),
        ("min", F64) => (F64Min, F64),
        ("max", F32) => (F32Max, F32),
        ("max", F64) => (F64Max, F64),
        ("copy_sign", F32) => (F32Copysign, F32),
        ("copy_sign", F64) => (F64Copysign, F64),

        _ => return None,
    };

    select(opcode, result)
}

/// Dispatch for unary operators, keyed by the operand's run type.
pub fn unary(text: &str, operand: RunType) -> Option<OpSelection> {
    use Opcode::*;
    use RunType::*;

    let (opcode, result) = match (text, operand) {
        ("sqrt", F32) => (F32Sqrt, F32),
        ("sqrt", F64) => (F64Sqrt, F64),
        ("abs", F32) => (F32Abs, F32),
        ("abs", F64) => (F64Abs, F64),
        ("ceil", F32) => (F32Ceil, F32),
        ("ceil", F64) => (F64Ceil, F64),
        ("floor", F32) => (F32Floor, F32),
        ("floor", F64) => (F64Floor, F64),
        ("nearest", F32) => (F32Nearest, F32),
        ("nearest", F64) => (F64Nearest, F64),
        ("truncate", F32) => (F32Trunc, F32),
        ("truncate", F64) => (F64Trunc, F64),

        ("leading_zeros", I32) => (I32Clz, I32),
        ("leading_zeros", I64) => (I64Clz, I64),
        ("trailing_zeros", I32) => (I32Ctz, I32),
        ("trailing_zeros", I64) => (I64Ctz, I64),
        ("popcount", I32) => (I32Popcnt, I32),
        ("popcount", I64) => (I64Popcnt, I64),

        ("to_i32", I64) => (I32WrapI64, I32),
        ("to_i32", F32) => (I32TruncSF32, I32),
        ("to_i32", F64) => (I32TruncSF64, I32),
        ("to_i64", I32) => (I64ExtendSI32, I64),
        ("to_i64", F32) => (I64TruncSF32, I64),
        ("to_i64", F64) => (I64TruncSF64, I64),
        ("to_f32", I32) => (F32ConvertSI32, F32),
        ("to_f32", I64) => (F32ConvertSI64, F32),
        ("to_f32", F64) => (F32DemoteF64, F32),
        ("to_f64", I32) => (F64ConvertSI32, F64),
        ("to_f64", I64) => (F64ConvertSI64, F64),
        ("to_f64", F32) => (F64PromoteF32, F64),

        ("allocate_pages", I32) => (GrowMemory, I32),

        _ => return None,
    };

    select(opcode, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_selection() {
        let op = binary("+", RunType::I32, RunType::I32).unwrap();
        assert_eq!(op.opcode, Opcode::I32Add);
        assert_eq!(op.result, RunType::I32);

        let op = binary("/", RunType::F64, RunType::F64).unwrap();
        assert_eq!(op.opcode, Opcode::F64Div);
    }

    #[test]
    fn comparisons_produce_i32() {
        let op = binary("<", RunType::F64, RunType::F64).unwrap();
        assert_eq!(op.opcode, Opcode::F64Lt);
        assert_eq!(op.result, RunType::I32);

        let op = binary("==", RunType::I64, RunType::I64).unwrap();
        assert_eq!(op.result, RunType::I32);
    }

    #[test]
    fn mixed_operands_are_undefined() {
        assert_eq!(binary("+", RunType::I32, RunType::I64), None);
        assert_eq!(binary("%", RunType::F32, RunType::F32), None);
        assert_eq!(binary("min", RunType::I32, RunType::I32), None);
        assert_eq!(binary("+", RunType::Void, RunType::Void), None);
    }

    #[test]
    fn float_to_i32_uses_the_wide_truncate() {
        // The f64 operand truncates with the f64 opcode.
        let op = unary("to_i32", RunType::F64).unwrap();
        assert_eq!(op.opcode, Opcode::I32TruncSF64);

        let op = unary("to_i32", RunType::F32).unwrap();
        assert_eq!(op.opcode, Opcode::I32TruncSF32);
    }

    #[test]
    fn widening_uses_extend_from_i32() {
        let op = unary("to_i64", RunType::I32).unwrap();
        assert_eq!(op.opcode, Opcode::I64ExtendSI32);
    }

    #[test]
    fn bit_counting_stays_integral() {
        let op = unary("popcount", RunType::I64).unwrap();
        assert_eq!(op.opcode, Opcode::I64Popcnt);
        assert_eq!(op.result, RunType::I64);
        assert_eq!(unary("popcount", RunType::F32), None);
        assert_eq!(unary("sqrt", RunType::I32), None);
    }

    #[test]
    fn page_allocation() {
        let op = unary("allocate_pages", RunType::I32).unwrap();
        assert_eq!(op.opcode, Opcode::GrowMemory);
        assert_eq!(unary("allocate_pages", RunType::I64), None);
    }
}
