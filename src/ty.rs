//! Structured representations of SPIR-V types.
//!
//! Unlike a pure reflection library, these types are also consulted at
//! execution time: `element_offset`/`element_type` drive `AccessChain` and
//! `Object::extract`/`insert`, so every variant's size must be exactly the
//! byte count a conformant device would reserve for it.
use std::fmt;

pub use spirv_headers::StorageClass;

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub enum ScalarType {
    Boolean,
    Signed(u32),
    Unsigned(u32),
    Float(u32),
}
impl ScalarType {
    pub fn boolean() -> ScalarType {
        Self::Boolean
    }
    pub fn int(nbyte: u32, is_signed: bool) -> ScalarType {
        if is_signed { Self::Signed(nbyte) } else { Self::Unsigned(nbyte) }
    }
    pub fn float(nbyte: u32) -> ScalarType {
        Self::Float(nbyte)
    }
    pub fn is_signed(&self) -> Option<bool> {
        match self {
            Self::Boolean => None,
            Self::Signed(_) => Some(true),
            Self::Unsigned(_) => Some(false),
            Self::Float(_) => Some(true),
        }
    }
    pub fn nbyte(&self) -> usize {
        let nbyte = match self {
            Self::Boolean => 4, // booleans only exist inside registers, sized like a 32-bit word
            Self::Signed(nbyte) => *nbyte,
            Self::Unsigned(nbyte) => *nbyte,
            Self::Float(nbyte) => *nbyte,
        };
        nbyte as usize
    }
    pub fn is_boolean(&self) -> bool { matches!(self, Self::Boolean) }
    pub fn is_sint(&self) -> bool { matches!(self, Self::Signed(_)) }
    pub fn is_uint(&self) -> bool { matches!(self, Self::Unsigned(_)) }
    pub fn is_float(&self) -> bool { matches!(self, Self::Float(_)) }
}
impl fmt::Debug for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "bool"),
            Self::Signed(nbyte) => write!(f, "i{}", nbyte << 3),
            Self::Unsigned(nbyte) => write!(f, "u{}", nbyte << 3),
            Self::Float(nbyte) => write!(f, "f{}", nbyte << 3),
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct VectorType {
    pub scalar_ty: ScalarType,
    pub nscalar: u32,
}
impl VectorType {
    pub fn new(scalar_ty: ScalarType, nscalar: u32) -> VectorType {
        VectorType { scalar_ty, nscalar }
    }
    pub fn nbyte(&self) -> usize { self.nscalar as usize * self.scalar_ty.nbyte() }
}
impl fmt::Debug for VectorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vec{}<{:?}>", self.nscalar, self.scalar_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
pub enum MatrixAxisOrder {
    ColumnMajor,
    RowMajor,
}
impl Default for MatrixAxisOrder {
    fn default() -> MatrixAxisOrder { MatrixAxisOrder::ColumnMajor }
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct MatrixType {
    pub vec_ty: VectorType,
    pub nvec: u32,
    pub stride: usize,
    pub major: MatrixAxisOrder,
}
impl MatrixType {
    pub fn new(vec_ty: VectorType, nvec: u32) -> MatrixType {
        MatrixType {
            stride: vec_ty.nbyte(),
            vec_ty,
            nvec,
            major: MatrixAxisOrder::default(),
        }
    }
    pub(crate) fn decorate(&mut self, stride: usize, major: MatrixAxisOrder) {
        self.stride = stride;
        self.major = major;
    }
    pub fn nbyte(&self) -> usize { self.nvec as usize * self.stride }
    /// Size of one column, i.e. the element type `element_type(i)` advances to.
    pub fn col_ty(&self) -> Type { Type::Vector(self.vec_ty.clone()) }
}
impl fmt::Debug for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let transpose = match self.major {
            MatrixAxisOrder::ColumnMajor => "",
            MatrixAxisOrder::RowMajor => "T",
        };
        write!(f, "mat{}x{}{}<{:?}>", self.vec_ty.nscalar, self.nvec, transpose, self.vec_ty.scalar_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct ArrayType {
    pub(crate) elem_ty: Box<Type>,
    nrepeat: Option<u32>,
    stride: usize,
}
impl ArrayType {
    pub fn new(elem_ty: &Type, nrepeat: u32, stride: usize) -> ArrayType {
        ArrayType { elem_ty: Box::new(elem_ty.clone()), nrepeat: Some(nrepeat), stride }
    }
    pub fn new_runtime(elem_ty: &Type, stride: usize) -> ArrayType {
        ArrayType { elem_ty: Box::new(elem_ty.clone()), nrepeat: None, stride }
    }
    /// Size of the array. Runtime arrays report 0 per the data model's size
    /// invariant; callers needing the true extent must consult the buffer
    /// backing the pointer instead.
    pub fn nbyte(&self) -> usize {
        match self.nrepeat {
            Some(nrepeat) => self.stride * nrepeat as usize,
            None => 0,
        }
    }
    pub fn elem_ty(&self) -> &Type { &self.elem_ty }
    pub fn stride(&self) -> usize { self.stride }
    pub fn nrepeat(&self) -> Option<u32> { self.nrepeat }
    pub fn is_runtime(&self) -> bool { self.nrepeat.is_none() }
}
impl fmt::Debug for ArrayType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.nrepeat {
            Some(nrepeat) => write!(f, "[{:?}; {}]", self.elem_ty, nrepeat),
            None => write!(f, "[{:?}]", self.elem_ty),
        }
    }
}

#[derive(PartialEq, Eq, Clone, Hash)]
pub struct StructMember {
    pub name: Option<String>,
    pub offset: usize,
    pub ty: Type,
}
#[derive(PartialEq, Eq, Default, Clone, Hash)]
pub struct StructType {
    pub name: Option<String>,
    pub members: Vec<StructMember>,
}
impl StructType {
    pub fn new(name: Option<String>) -> StructType {
        StructType { name, ..Default::default() }
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    /// Size of the struct: one past the last member's end, matching the
    /// monotone-non-decreasing-offset invariant on `Type`.
    pub fn nbyte(&self) -> usize {
        self.members.last()
            .map(|last| last.offset + last.ty.nbyte())
            .unwrap_or(0)
    }
}
impl fmt::Debug for StructType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{} {{ ", name)?;
        } else {
            f.write_str("{ ")?;
        }
        for (i, member) in self.members.iter().enumerate() {
            if i != 0 { f.write_str(", ")?; }
            match &member.name {
                Some(name) => write!(f, "{}: {:?}", name, member.ty)?,
                None => write!(f, "{}: {:?}", i, member.ty)?,
            }
        }
        f.write_str(" }")
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct MatrixLayout {
    pub stride: usize,
    pub major: MatrixAxisOrder,
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct PointerType {
    pub store_cls: StorageClass,
    pub pointee_ty: Box<Type>,
    /// Stride used by `PtrAccessChain` to step whole elements of the pointer
    /// itself. Mirrors the `ArrayStride` decoration when the pointee is an
    /// array; otherwise it's the pointee's own size.
    pub stride: usize,
}
impl PointerType {
    pub fn new(store_cls: StorageClass, pointee_ty: &Type) -> PointerType {
        let stride = pointee_ty.nbyte();
        PointerType { store_cls, pointee_ty: Box::new(pointee_ty.clone()), stride }
    }
    pub fn pointee_ty(&self) -> &Type { &self.pointee_ty }
}
impl fmt::Debug for PointerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ptr<{:?}, {:?}>", self.store_cls, self.pointee_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct FunctionType {
    pub ret_ty: Box<Type>,
    pub param_tys: Vec<Type>,
}
impl FunctionType {
    pub fn new(ret_ty: Type, param_tys: Vec<Type>) -> FunctionType {
        FunctionType { ret_ty: Box::new(ret_ty), param_tys }
    }
}
impl fmt::Debug for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, p) in self.param_tys.iter().enumerate() {
            if i != 0 { f.write_str(", ")?; }
            write!(f, "{:?}", p)?;
        }
        write!(f, ") -> {:?}", self.ret_ty)
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub enum Type {
    /// Zero size. Only valid as a function return type or a never-loaded
    /// pointee.
    Void,
    Scalar(ScalarType),
    Vector(VectorType),
    Matrix(MatrixType),
    Array(ArrayType),
    RuntimeArray(ArrayType),
    Struct(StructType),
    Pointer(PointerType),
    Function(FunctionType),
}
impl Type {
    pub fn bool() -> Type { Type::Scalar(ScalarType::boolean()) }
    pub fn int(nbyte: u32, is_signed: bool) -> Type { Type::Scalar(ScalarType::int(nbyte, is_signed)) }
    pub fn float(nbyte: u32) -> Type { Type::Scalar(ScalarType::float(nbyte)) }

    /// Size in bytes. Void, Function and RuntimeArray report 0 per the
    /// data-model invariant.
    pub fn nbyte(&self) -> usize {
        use Type::*;
        match self {
            Void => 0,
            Scalar(s) => s.nbyte(),
            Vector(v) => v.nbyte(),
            Matrix(m) => m.nbyte(),
            Array(a) => a.nbyte(),
            RuntimeArray(_) => 0,
            Struct(s) => s.nbyte(),
            Pointer(_) => 8,
            Function(_) => 0,
        }
    }

    /// Byte offset of element `i` from the start of a value of this type.
    /// STRUCT consults the per-member offset table; VECTOR/MATRIX multiply by
    /// the element size; ARRAY/RUNTIME_ARRAY/POINTER multiply by stride.
    pub fn element_offset(&self, i: usize) -> Option<usize> {
        use Type::*;
        match self {
            Struct(s) => s.members.get(i).map(|m| m.offset),
            Vector(v) => Some(i * v.scalar_ty.nbyte()),
            Matrix(m) => Some(i * m.stride),
            Array(a) | RuntimeArray(a) => Some(i * a.stride()),
            Pointer(p) => Some(i * p.stride),
            _ => None,
        }
    }

    /// Type of element `i`, dispatching on kind the same way `element_offset`
    /// does.
    pub fn element_type(&self, i: usize) -> Option<Type> {
        use Type::*;
        match self {
            Struct(s) => s.members.get(i).map(|m| m.ty.clone()),
            Vector(v) => Some(Type::Scalar(v.scalar_ty)),
            Matrix(m) => Some(m.col_ty()),
            Array(a) | RuntimeArray(a) => Some((*a.elem_ty).clone()),
            Pointer(p) => Some((*p.pointee_ty).clone()),
            _ => None,
        }
    }

    /// Element count, where defined (vectors, matrices, fixed arrays,
    /// structs). `None` for scalars, runtime arrays and everything else.
    pub fn nelement(&self) -> Option<usize> {
        use Type::*;
        match self {
            Vector(v) => Some(v.nscalar as usize),
            Matrix(m) => Some(m.nvec as usize),
            Array(a) => a.nrepeat().map(|n| n as usize),
            Struct(s) => Some(s.members.len()),
            _ => None,
        }
    }

    /// The scalar type underlying a vector, or the type itself if already
    /// scalar.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            Type::Vector(v) => Some(v.scalar_ty),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool { matches!(self, Type::Void) }
    pub fn is_scalar(&self) -> bool { matches!(self, Type::Scalar(_)) }
    pub fn is_vector(&self) -> bool { matches!(self, Type::Vector(_)) }
    pub fn is_matrix(&self) -> bool { matches!(self, Type::Matrix(_)) }
    pub fn is_array(&self) -> bool { matches!(self, Type::Array(_)) }
    pub fn is_runtime_array(&self) -> bool { matches!(self, Type::RuntimeArray(_)) }
    pub fn is_struct(&self) -> bool { matches!(self, Type::Struct(_)) }
    pub fn is_pointer(&self) -> bool { matches!(self, Type::Pointer(_)) }
    pub fn is_composite(&self) -> bool {
        matches!(self, Type::Vector(_) | Type::Matrix(_) | Type::Array(_) | Type::Struct(_))
    }

    pub fn as_pointer(&self) -> Option<&PointerType> {
        match self { Type::Pointer(p) => Some(p), _ => None }
    }
}
impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(s) => s.fmt(f),
            Type::Vector(v) => v.fmt(f),
            Type::Matrix(m) => m.fmt(f),
            Type::Array(a) => a.fmt(f),
            Type::RuntimeArray(a) => write!(f, "[{:?}]", a.elem_ty),
            Type::Struct(s) => s.fmt(f),
            Type::Pointer(p) => p.fmt(f),
            Type::Function(fn_ty) => fn_ty.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sizes() {
        assert_eq!(Type::int(4, true).nbyte(), 4);
        assert_eq!(Type::float(8).nbyte(), 8);
        assert_eq!(Type::bool().nbyte(), 4);
    }

    #[test]
    fn vector_element_offset() {
        let v = Type::Vector(VectorType::new(ScalarType::float(4), 4));
        assert_eq!(v.element_offset(2), Some(8));
        assert_eq!(v.element_type(2), Some(Type::float(4)));
        assert_eq!(v.nbyte(), 16);
    }

    #[test]
    fn struct_offsets_monotone() {
        let elem = Type::float(4);
        let mut st = StructType::new(None);
        st.members.push(StructMember { name: None, offset: 0, ty: elem.clone() });
        st.members.push(StructMember { name: None, offset: 16, ty: Type::Array(ArrayType::new(&elem, 4, 4)) });
        let ty = Type::Struct(st);
        assert_eq!(ty.nbyte(), 32);
        assert_eq!(ty.element_offset(1), Some(16));
    }

    #[test]
    fn array_stride_and_runtime_size() {
        let elem = Type::int(4, false);
        let fixed = Type::Array(ArrayType::new(&elem, 10, 16));
        assert_eq!(fixed.nbyte(), 160);
        assert_eq!(fixed.element_offset(3), Some(48));

        let runtime = Type::RuntimeArray(ArrayType::new_runtime(&elem, 16));
        assert_eq!(runtime.nbyte(), 0);
        assert_eq!(runtime.element_offset(3), Some(48));
    }

    #[test]
    fn pointer_access_chain_step() {
        let pointee = Type::float(4);
        let ptr = Type::Pointer(PointerType::new(StorageClass::StorageBuffer, &pointee));
        assert_eq!(ptr.nbyte(), 8);
        assert_eq!(ptr.element_type(0), Some(pointee));
    }
}
