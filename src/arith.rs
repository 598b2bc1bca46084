//! Scalar and lane-wise evaluation of the arithmetic/bitwise/comparison/
//! logical opcodes. Shared by the invocation interpreter's `step()`
//! and the pipeline stage's one-shot evaluation of `OpSpecConstantOp`
//! instructions, so a spec constant computed at pipeline-creation time and
//! the same opcode executed at shader runtime behave identically.
use spirv_headers::Op;

use crate::error::{Error, Result};
use crate::object::Object;
use crate::ty::{ScalarType, Type};

fn lanes(ty: &Type) -> usize {
    match ty {
        Type::Vector(v) => v.nscalar as usize,
        _ => 1,
    }
}

fn structural(op: Op, ty: &Type) -> Error {
    Error::StructuralError(format!("{:?} is not defined for {:?}", op, ty))
}

/// Evaluate a two-operand opcode lane by lane, producing an object of
/// `result_ty`. `operand_ty` is the type of `a`/`b` (may differ from
/// `result_ty` for comparisons, which always yield bool/bvec).
pub fn eval_binary(op: Op, result_ty: &Type, operand_ty: &Type, a: &Object, b: &Object) -> Result<Object> {
    let n = lanes(operand_ty);
    let scalar = operand_ty.scalar_type().ok_or_else(|| structural(op, operand_ty))?;
    let mut out = Object::new_zeroed(result_ty.clone());
    for lane in 0..n {
        match scalar {
            ScalarType::Signed(_) => {
                let x = a.get::<i64>(lane);
                let y = b.get::<i64>(lane);
                write_int_or_bool(op, &mut out, lane, int_binary(op, x, y)?, cmp_int(op, x, y))?;
            }
            ScalarType::Unsigned(_) | ScalarType::Boolean => {
                let x = a.get::<u64>(lane);
                let y = b.get::<u64>(lane);
                write_int_or_bool(op, &mut out, lane, uint_binary(op, x, y)?, cmp_uint(op, x, y))?;
            }
            ScalarType::Float(nbyte) if nbyte == 4 => {
                let x = a.get::<f32>(lane);
                let y = b.get::<f32>(lane);
                write_float_or_bool(op, &mut out, lane, float_binary(op, x as f64, y as f64)? as f32, cmp_float(op, x as f64, y as f64))?;
            }
            ScalarType::Float(_) => {
                let x = a.get::<f64>(lane);
                let y = b.get::<f64>(lane);
                write_float64_or_bool(op, &mut out, lane, float_binary(op, x, y)?, cmp_float(op, x, y))?;
            }
        }
    }
    Ok(out)
}

pub fn eval_unary(op: Op, result_ty: &Type, operand_ty: &Type, a: &Object) -> Result<Object> {
    let n = lanes(operand_ty);
    let scalar = operand_ty.scalar_type().ok_or_else(|| structural(op, operand_ty))?;
    let mut out = Object::new_zeroed(result_ty.clone());
    for lane in 0..n {
        match (op, scalar) {
            (Op::SNegate, ScalarType::Signed(_)) => out.set::<i64>(lane, -a.get::<i64>(lane)),
            (Op::Not, _) => out.set::<u64>(lane, !a.get::<u64>(lane)),
            (Op::LogicalNot, _) => out.set::<u32>(lane, (a.get::<u32>(lane) == 0) as u32),
            (Op::FNegate, ScalarType::Float(4)) => out.set::<f32>(lane, -a.get::<f32>(lane)),
            (Op::FNegate, ScalarType::Float(_)) => out.set::<f64>(lane, -a.get::<f64>(lane)),
            (Op::IsNan, ScalarType::Float(4)) => out.set::<u32>(lane, a.get::<f32>(lane).is_nan() as u32),
            (Op::IsNan, ScalarType::Float(_)) => out.set::<u32>(lane, a.get::<f64>(lane).is_nan() as u32),
            (Op::IsInf, ScalarType::Float(4)) => out.set::<u32>(lane, a.get::<f32>(lane).is_infinite() as u32),
            (Op::IsInf, ScalarType::Float(_)) => out.set::<u32>(lane, a.get::<f64>(lane).is_infinite() as u32),
            _ => return Err(structural(op, operand_ty)),
        }
    }
    Ok(out)
}

fn int_binary(op: Op, x: i64, y: i64) -> Result<Option<i64>> {
    Ok(Some(match op {
        Op::IAdd => x.wrapping_add(y),
        Op::ISub => x.wrapping_sub(y),
        Op::IMul => x.wrapping_mul(y),
        Op::SDiv if y != 0 => x.wrapping_div(y),
        Op::SRem if y != 0 => x.wrapping_rem(y),
        Op::SMod if y != 0 => {
            let r = x.wrapping_rem(y);
            if r != 0 && (r < 0) != (y < 0) { r.wrapping_add(y) } else { r }
        }
        Op::BitwiseAnd => x & y,
        Op::BitwiseOr => x | y,
        Op::BitwiseXor => x ^ y,
        Op::ShiftLeftLogical => x.wrapping_shl(y as u32),
        Op::ShiftRightArithmetic => x.wrapping_shr(y as u32),
        _ if is_cmp(op) => return Ok(None),
        _ => return Err(Error::StructuralError(format!("{:?} undefined for signed integers", op))),
    }))
}
fn uint_binary(op: Op, x: u64, y: u64) -> Result<Option<u64>> {
    Ok(Some(match op {
        Op::IAdd => x.wrapping_add(y),
        Op::ISub => x.wrapping_sub(y),
        Op::IMul => x.wrapping_mul(y),
        Op::UDiv if y != 0 => x.wrapping_div(y),
        Op::UMod if y != 0 => x.wrapping_rem(y),
        Op::BitwiseAnd => x & y,
        Op::BitwiseOr => x | y,
        Op::BitwiseXor => x ^ y,
        Op::ShiftLeftLogical => x.wrapping_shl(y as u32),
        Op::ShiftRightLogical => x.wrapping_shr(y as u32),
        Op::LogicalAnd => ((x != 0) && (y != 0)) as u64,
        Op::LogicalOr => ((x != 0) || (y != 0)) as u64,
        Op::LogicalEqual => (x == y) as u64,
        Op::LogicalNotEqual => (x != y) as u64,
        _ if is_cmp(op) => return Ok(None),
        _ => return Err(Error::StructuralError(format!("{:?} undefined for unsigned integers", op))),
    }))
}
fn float_binary(op: Op, x: f64, y: f64) -> Result<f64> {
    Ok(match op {
        Op::FAdd => x + y,
        Op::FSub => x - y,
        Op::FMul => x * y,
        Op::FDiv => x / y,
        Op::FRem => x % y,
        _ if is_cmp(op) => 0.0,
        _ => return Err(Error::StructuralError(format!("{:?} undefined for floats", op))),
    })
}

fn is_cmp(op: Op) -> bool {
    matches!(
        op,
        Op::IEqual | Op::INotEqual | Op::SLessThan | Op::SGreaterThan | Op::SLessThanEqual
            | Op::SGreaterThanEqual | Op::ULessThan | Op::UGreaterThan | Op::ULessThanEqual
            | Op::UGreaterThanEqual | Op::FOrdEqual | Op::FOrdNotEqual | Op::FOrdLessThan
            | Op::FOrdGreaterThan | Op::FOrdLessThanEqual | Op::FOrdGreaterThanEqual
            | Op::FUnordEqual | Op::FUnordNotEqual | Op::FUnordLessThan | Op::FUnordGreaterThan
            | Op::FUnordLessThanEqual | Op::FUnordGreaterThanEqual
    )
}
fn cmp_int(op: Op, x: i64, y: i64) -> Option<bool> {
    Some(match op {
        Op::IEqual => x == y,
        Op::INotEqual => x != y,
        Op::SLessThan => x < y,
        Op::SGreaterThan => x > y,
        Op::SLessThanEqual => x <= y,
        Op::SGreaterThanEqual => x >= y,
        _ => return None,
    })
}
fn cmp_uint(op: Op, x: u64, y: u64) -> Option<bool> {
    Some(match op {
        Op::IEqual => x == y,
        Op::INotEqual => x != y,
        Op::ULessThan => x < y,
        Op::UGreaterThan => x > y,
        Op::ULessThanEqual => x <= y,
        Op::UGreaterThanEqual => x >= y,
        _ => return None,
    })
}
fn cmp_float(op: Op, x: f64, y: f64) -> Option<bool> {
    Some(match op {
        Op::FOrdEqual => x == y,
        Op::FOrdNotEqual => x != y,
        Op::FOrdLessThan => x < y,
        Op::FOrdGreaterThan => x > y,
        Op::FOrdLessThanEqual => x <= y,
        Op::FOrdGreaterThanEqual => x >= y,
        // Unordered compares are true whenever either operand is NaN; since
        // this crate doesn't track signaling vs. quiet NaN, treat the same
        // as the ordered form plus the any-NaN case.
        Op::FUnordEqual => x.is_nan() || y.is_nan() || x == y,
        Op::FUnordNotEqual => x.is_nan() || y.is_nan() || x != y,
        Op::FUnordLessThan => x.is_nan() || y.is_nan() || x < y,
        Op::FUnordGreaterThan => x.is_nan() || y.is_nan() || x > y,
        Op::FUnordLessThanEqual => x.is_nan() || y.is_nan() || x <= y,
        Op::FUnordGreaterThanEqual => x.is_nan() || y.is_nan() || x >= y,
        _ => return None,
    })
}

fn write_int_or_bool(op: Op, out: &mut Object, lane: usize, v: Option<i64>, cmp: Option<bool>) -> Result<()> {
    if let Some(v) = v {
        out.set::<i64>(lane, v);
        Ok(())
    } else if let Some(b) = cmp {
        out.set::<u32>(lane, b as u32);
        Ok(())
    } else {
        Err(Error::StructuralError(format!("{:?} division by zero", op)))
    }
}
fn write_float_or_bool(_op: Op, out: &mut Object, lane: usize, v: f32, cmp: Option<bool>) -> Result<()> {
    if let Some(b) = cmp {
        out.set::<u32>(lane, b as u32);
    } else {
        out.set::<f32>(lane, v);
    }
    Ok(())
}
fn write_float64_or_bool(_op: Op, out: &mut Object, lane: usize, v: f64, cmp: Option<bool>) -> Result<()> {
    if let Some(b) = cmp {
        out.set::<u32>(lane, b as u32);
    } else {
        out.set::<f64>(lane, v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::VectorType;

    #[test]
    fn scalar_iadd() {
        let ty = Type::int(4, true);
        let mut a = Object::new_zeroed(ty.clone());
        a.set::<i64>(0, 3);
        let mut b = Object::new_zeroed(ty.clone());
        b.set::<i64>(0, 4);
        let out = eval_binary(Op::IAdd, &ty, &ty, &a, &b).unwrap();
        assert_eq!(out.get::<i64>(0), 7);
    }

    #[test]
    fn vector_fadd() {
        let ty = Type::Vector(VectorType::new(ScalarType::float(4), 2));
        let mut a = Object::new_zeroed(ty.clone());
        a.set::<f32>(0, 1.0);
        a.set::<f32>(1, 2.0);
        let mut b = Object::new_zeroed(ty.clone());
        b.set::<f32>(0, 10.0);
        b.set::<f32>(1, 20.0);
        let out = eval_binary(Op::FAdd, &ty, &ty, &a, &b).unwrap();
        assert_eq!(out.get::<f32>(0), 11.0);
        assert_eq!(out.get::<f32>(1), 22.0);
    }

    #[test]
    fn sdiv_by_zero_is_structural() {
        let ty = Type::int(4, true);
        let mut a = Object::new_zeroed(ty.clone());
        a.set::<i64>(0, 1);
        let b = Object::new_zeroed(ty.clone());
        let err = eval_binary(Op::SDiv, &ty, &ty, &a, &b).unwrap_err();
        assert!(matches!(err, Error::StructuralError(_)));
    }

    #[test]
    fn comparison_yields_bool() {
        let ty = Type::int(4, true);
        let bool_ty = Type::bool();
        let mut a = Object::new_zeroed(ty.clone());
        a.set::<i64>(0, 5);
        let mut b = Object::new_zeroed(ty.clone());
        b.set::<i64>(0, 3);
        let out = eval_binary(Op::SGreaterThan, &bool_ty, &ty, &a, &b).unwrap();
        assert_eq!(out.get::<u32>(0), 1);
    }
}
