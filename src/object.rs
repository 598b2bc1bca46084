//! Typed values with raw byte backing.
use std::fmt;
use byteorder::{ByteOrder, NativeEndian};

use crate::memory::Memory;
use crate::ty::{ScalarType, Type};

/// A `(Type, byte[])` pair sized exactly `ty.nbyte()`. Construction is
/// uninitialized, zeroed, from a scalar literal, or a deep-cloned copy;
/// extract/insert walk an index path through the type the same way
/// `AccessChain` does.
#[derive(Clone)]
pub struct Object {
    ty: Type,
    bytes: Vec<u8>,
}
impl Object {
    pub fn new_uninit(ty: Type) -> Object {
        let n = ty.nbyte();
        let mut bytes = Vec::with_capacity(n);
        // Indeterminate, not undefined behavior: fill with a recognizable
        // pattern rather than leaving the vector's spare capacity un-set.
        bytes.resize(n, 0xCD);
        Object { ty, bytes }
    }
    pub fn new_zeroed(ty: Type) -> Object {
        let n = ty.nbyte();
        Object { ty, bytes: vec![0u8; n] }
    }
    pub fn from_bytes(ty: Type, bytes: Vec<u8>) -> Object {
        debug_assert_eq!(bytes.len(), ty.nbyte());
        Object { ty, bytes }
    }
    pub fn from_scalar_bits(ty: ScalarType, bits: u64) -> Object {
        let n = ty.nbyte();
        let mut bytes = vec![0u8; n];
        NativeEndian::write_uint(&mut bytes, bits, n);
        Object { ty: Type::Scalar(ty), bytes }
    }

    pub fn ty(&self) -> &Type { &self.ty }
    pub fn bytes(&self) -> &[u8] { &self.bytes }
    pub fn bytes_mut(&mut self) -> &mut [u8] { &mut self.bytes }
    pub fn size(&self) -> usize { self.bytes.len() }

    /// Read a scalar lane. `T` must be a type whose width matches the
    /// object's (vector) element width; `lane` is ignored for plain scalars.
    pub fn get<T: Pod>(&self, lane: usize) -> T {
        let elem_nbyte = self.ty.scalar_type().map(|s| s.nbyte()).unwrap_or(self.bytes.len());
        let off = lane * elem_nbyte;
        T::read(&self.bytes[off..off + elem_nbyte])
    }
    pub fn set<T: Pod>(&mut self, lane: usize, v: T) {
        let elem_nbyte = self.ty.scalar_type().map(|s| s.nbyte()).unwrap_or(self.bytes.len());
        let off = lane * elem_nbyte;
        v.write(&mut self.bytes[off..off + elem_nbyte]);
    }

    /// Number of scalar lanes: vector element count, or 1 for a plain
    /// scalar.
    pub fn nlane(&self) -> usize {
        match &self.ty {
            Type::Vector(v) => v.nscalar as usize,
            _ => 1,
        }
    }

    /// Walk one index of an access-chain-style path, returning the new
    /// object carved out at that sub-offset.
    pub fn extract_one(&self, i: usize) -> Option<Object> {
        let off = self.ty.element_offset(i)?;
        let sub_ty = self.ty.element_type(i)?;
        let n = sub_ty.nbyte();
        if off + n > self.bytes.len() { return None; }
        Some(Object::from_bytes(sub_ty, self.bytes[off..off + n].to_vec()))
    }
    /// Walk a full index path (as produced by `CompositeExtract`'s literal
    /// operand list or `AccessChain`'s indices) and return the addressed
    /// sub-object.
    pub fn extract(&self, path: &[usize]) -> Option<Object> {
        let mut cur_ty = self.ty.clone();
        let mut base = 0usize;
        for &i in path {
            let off = cur_ty.element_offset(i)?;
            cur_ty = cur_ty.element_type(i)?;
            base += off;
        }
        let n = cur_ty.nbyte();
        if base + n > self.bytes.len() { return None; }
        Some(Object::from_bytes(cur_ty, self.bytes[base..base + n].to_vec()))
    }
    /// Overwrite the sub-region addressed by `path` with `src`'s bytes,
    /// returning a new object (the data model says Object construction as a
    /// copy is how insert is expressed; mutation discipline for shared
    /// objects lives one level up, in the interpreter's result vector).
    pub fn insert(&self, path: &[usize], src: &Object) -> Option<Object> {
        let mut cur_ty = self.ty.clone();
        let mut base = 0usize;
        for &i in path {
            let off = cur_ty.element_offset(i)?;
            cur_ty = cur_ty.element_type(i)?;
            base += off;
        }
        let n = src.bytes.len();
        if base + n > self.bytes.len() { return None; }
        let mut out = self.clone();
        out.bytes[base..base + n].copy_from_slice(&src.bytes);
        Some(out)
    }

    pub fn load(ty: Type, mem: &Memory, addr: u64) -> Object {
        let n = ty.nbyte();
        let mut bytes = vec![0u8; n];
        mem.load(&mut bytes, addr, n);
        Object::from_bytes(ty, bytes)
    }
    pub fn store(&self, mem: &Memory, addr: u64) {
        mem.store(addr, self.bytes.len(), &self.bytes);
    }
}
impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.ty {
            Type::Pointer(_) => {
                let addr = self.get::<u64>(0);
                write!(f, "{:?} = 0x{:016x}", self.ty, addr)
            }
            Type::Scalar(s) if s.is_float() && s.nbyte() == 4 => write!(f, "{:?} = {}", self.ty, self.get::<f32>(0)),
            Type::Scalar(s) if s.is_float() && s.nbyte() == 8 => write!(f, "{:?} = {}", self.ty, self.get::<f64>(0)),
            Type::Scalar(s) if s.is_sint() => write!(f, "{:?} = {}", self.ty, self.get::<i64>(0)),
            Type::Scalar(_) => write!(f, "{:?} = {}", self.ty, self.get::<u64>(0)),
            _ => write!(f, "{:?} {:?}", self.ty, self.bytes),
        }
    }
}

/// Narrow trait for the handful of plain-old-data scalar widths `Object`
/// needs to get/set.
pub trait Pod: Copy {
    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
}
macro_rules! impl_pod_uint {
    ($t:ty) => {
        impl Pod for $t {
            fn read(bytes: &[u8]) -> Self {
                match bytes.len() {
                    1 => bytes[0] as $t,
                    2 => NativeEndian::read_u16(bytes) as $t,
                    4 => NativeEndian::read_u32(bytes) as $t,
                    8 => NativeEndian::read_u64(bytes) as $t,
                    _ => unreachable!("unsupported scalar width"),
                }
            }
            fn write(self, bytes: &mut [u8]) {
                match bytes.len() {
                    1 => bytes[0] = self as u8,
                    2 => NativeEndian::write_u16(bytes, self as u16),
                    4 => NativeEndian::write_u32(bytes, self as u32),
                    8 => NativeEndian::write_u64(bytes, self as u64),
                    _ => unreachable!("unsupported scalar width"),
                }
            }
        }
    };
}
// Signed reads must sign-extend a narrower stored width (e.g. a 32-bit
// negative int read as `i64`): reading through the unsigned path and then
// `as`-casting would zero-extend instead, turning every negative narrow
// int positive. So this reads through the signed `byteorder` accessors,
// which sign-extend on the native-to-target widening `as` cast. Writes are
// shared with the unsigned macro: truncating to a narrower width keeps the
// same two's-complement bit pattern regardless of signedness.
macro_rules! impl_pod_sint {
    ($t:ty) => {
        impl Pod for $t {
            fn read(bytes: &[u8]) -> Self {
                match bytes.len() {
                    1 => bytes[0] as i8 as $t,
                    2 => NativeEndian::read_i16(bytes) as $t,
                    4 => NativeEndian::read_i32(bytes) as $t,
                    8 => NativeEndian::read_i64(bytes) as $t,
                    _ => unreachable!("unsupported scalar width"),
                }
            }
            fn write(self, bytes: &mut [u8]) {
                match bytes.len() {
                    1 => bytes[0] = self as u8,
                    2 => NativeEndian::write_u16(bytes, self as u16),
                    4 => NativeEndian::write_u32(bytes, self as u32),
                    8 => NativeEndian::write_u64(bytes, self as u64),
                    _ => unreachable!("unsupported scalar width"),
                }
            }
        }
    };
}
impl_pod_uint!(u64);
impl_pod_uint!(u32);
impl_pod_sint!(i64);
impl_pod_sint!(i32);
impl Pod for f32 {
    fn read(bytes: &[u8]) -> Self { f32::from_bits(NativeEndian::read_u32(bytes)) }
    fn write(self, bytes: &mut [u8]) { NativeEndian::write_u32(bytes, self.to_bits()) }
}
impl Pod for f64 {
    fn read(bytes: &[u8]) -> Self { f64::from_bits(NativeEndian::read_u64(bytes)) }
    fn write(self, bytes: &mut [u8]) { NativeEndian::write_u64(bytes, self.to_bits()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{ArrayType, StructMember, StructType};

    #[test]
    fn scalar_get_set_roundtrip() {
        let mut o = Object::new_zeroed(Type::int(4, true));
        o.set::<i32>(0, -7);
        assert_eq!(o.get::<i32>(0), -7);
    }

    #[test]
    fn vector_lanes() {
        let ty = Type::Vector(crate::ty::VectorType::new(ScalarType::float(4), 4));
        let mut o = Object::new_zeroed(ty);
        for i in 0..4 { o.set::<f32>(i, i as f32 * 1.5); }
        for i in 0..4 { assert_eq!(o.get::<f32>(i), i as f32 * 1.5); }
    }

    #[test]
    fn extract_insert_struct_identity() {
        let elem = Type::int(4, false);
        let mut st = StructType::new(None);
        st.members.push(StructMember { name: None, offset: 0, ty: elem.clone() });
        st.members.push(StructMember { name: None, offset: 4, ty: Type::Array(ArrayType::new(&elem, 4, 4)) });
        let ty = Type::Struct(st);

        let mut obj = Object::new_zeroed(ty.clone());
        obj.set::<u32>(0, 11); // first member via raw byte 0 (u32 width matches)
        let extracted = obj.extract(&[1, 2]).unwrap();
        assert_eq!(extracted.ty(), &elem);

        let mut replacement = extracted.clone();
        replacement.set::<u32>(0, 99);
        let merged = obj.insert(&[1, 2], &replacement).unwrap();
        assert_eq!(merged.extract(&[1, 2]).unwrap().get::<u32>(0), 99);
        // Untouched region is unaffected.
        assert_eq!(merged.extract(&[0]).unwrap().get::<u32>(0), 11);
    }
}
