//! Module: the immutable container of types, constants, functions,
//! blocks, instructions, variables and entry points produced by parsing.
//! `Builder` performs a single left-to-right pass over the
//! instruction stream, building executable IR as it goes rather than a
//! reflection manifest.
use fnv::FnvHashMap as HashMap;

use spirv_headers::{BuiltIn, Decoration, ExecutionModel, Op, StorageClass};

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parse::{Instr, SpirvBinary};
use crate::ty::{ArrayType, MatrixAxisOrder, MatrixType, PointerType, StructMember, StructType, Type, VectorType};

pub type Id = u32;

/// One instruction inside a `Block`. Immutable once inserted; belongs to an
/// intrusive-in-spirit but vector-backed sequence (design note: index
/// adjacency stands in for a hand-rolled linked list).
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Op,
    pub result_ty: Option<Id>,
    pub result_id: Option<Id>,
    pub operands: Vec<u32>,
}
impl Instruction {
    /// `%result = OpName %op %op …`, the format error output uses for
    /// "the disassembled current instruction".
    pub fn disassemble(&self) -> String {
        let mut s = String::new();
        if let Some(id) = self.result_id {
            s.push_str(&format!("%{} = ", id));
        }
        s.push_str(&format!("{:?}", self.op));
        if let Some(ty) = self.result_ty {
            s.push_str(&format!(" %{}", ty));
        }
        for w in &self.operands {
            s.push_str(&format!(" %{}", w));
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: Id,
    pub instrs: Vec<Instruction>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: Id,
    pub fn_ty: Id,
    pub ret_ty: Id,
    pub param_ids: Vec<Id>,
    /// Block order as declared; the first entry is the entry block.
    pub block_order: Vec<Id>,
    pub blocks: HashMap<Id, Block>,
}
impl Function {
    pub fn entry_block_id(&self) -> Id { self.block_order[0] }
}

#[derive(Debug, Clone, Default)]
pub struct Decorations {
    pub entries: Vec<(Decoration, Vec<u32>)>,
}
impl Decorations {
    pub fn get(&self, deco: Decoration) -> Option<&[u32]> {
        self.entries.iter().find(|(d, _)| *d == deco).map(|(_, p)| p.as_slice())
    }
    pub fn get_u32(&self, deco: Decoration) -> Option<u32> {
        self.get(deco).and_then(|p| p.first()).copied()
    }
    pub fn has(&self, deco: Decoration) -> bool {
        self.entries.iter().any(|(d, _)| *d == deco)
    }
}

/// A module-scope declaration. Buffer variables are those whose pointer's
/// storage class is `Uniform`, `StorageBuffer` or `UniformConstant`.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: Id,
    pub ptr_ty: Id,
    pub store_cls: StorageClass,
    pub initializer: Option<Id>,
    pub decos: Decorations,
    pub name: Option<String>,
}
impl Variable {
    pub fn is_buffer(&self) -> bool {
        matches!(self.store_cls, StorageClass::Uniform | StorageClass::StorageBuffer | StorageClass::UniformConstant)
    }
    pub fn desc_set_binding(&self) -> Option<(u32, u32)> {
        let set = self.decos.get_u32(Decoration::DescriptorSet)?;
        let binding = self.decos.get_u32(Decoration::Binding)?;
        Some((set, binding))
    }
    pub fn builtin(&self) -> Option<BuiltIn> {
        self.decos.get_u32(Decoration::BuiltIn).and_then(|x| {
            use num_traits::FromPrimitive;
            BuiltIn::from_u32(x)
        })
    }
}

/// Immutable, shared-by-many-invocations container of everything parsing
/// produces.
#[derive(Debug)]
pub struct Module {
    pub bound: Id,
    pub types: HashMap<Id, Type>,
    pub functions: HashMap<Id, Function>,
    pub entry_points: HashMap<(String, ExecutionModel), Id>,
    pub local_sizes: HashMap<Id, (u32, u32, u32)>,
    pub spec_const_ids: HashMap<u32, Id>,
    pub spec_const_ops: Vec<(Id, Instruction)>,
    pub variables: Vec<Variable>,
    pub constants: Vec<Option<Object>>,
    pub workgroup_size_const: Option<Id>,
    pub names: HashMap<Id, String>,
}
impl Module {
    pub fn entry_function(&self, name: &str, exec_model: ExecutionModel) -> Option<Id> {
        self.entry_points.get(&(name.to_owned(), exec_model)).copied()
    }
    pub fn variable(&self, id: Id) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }
    pub fn constant(&self, id: Id) -> Option<&Object> {
        self.constants.get(id as usize).and_then(|o| o.as_ref())
    }
    pub fn ty(&self, id: Id) -> Option<&Type> { self.types.get(&id) }
    pub fn name_of(&self, id: Id) -> String {
        self.names.get(&id).cloned().unwrap_or_else(|| format!("{}", id))
    }

    pub fn from_binary(bin: &SpirvBinary) -> Result<Module> {
        Builder::new(bin)?.build()
    }
}

struct PendingFunction {
    id: Id,
    fn_ty: Id,
    ret_ty: Id,
    param_ids: Vec<Id>,
    block_order: Vec<Id>,
    blocks: HashMap<Id, Block>,
    cur_block: Option<Id>,
}

/// Single-pass builder. Decorations and names always precede their target's
/// declaration in a valid module, so a single left-to-right walk collecting
/// them as we go (rather than two passes) is sufficient.
struct Builder<'a> {
    bound: Id,
    decos: HashMap<Id, Decorations>,
    member_decos: HashMap<(Id, u32), Decorations>,
    names: HashMap<Id, String>,
    types: HashMap<Id, Type>,
    type_words: HashMap<Id, &'a [u32]>,
    functions: HashMap<Id, Function>,
    entry_points: HashMap<(String, ExecutionModel), Id>,
    entry_decls: Vec<(Id, String, ExecutionModel)>,
    local_sizes: HashMap<Id, (u32, u32, u32)>,
    spec_const_ids: HashMap<u32, Id>,
    spec_const_ops: Vec<(Id, Instruction)>,
    variables: Vec<Variable>,
    constants: Vec<Option<Object>>,
    workgroup_size_const: Option<Id>,
    cur_fn: Option<PendingFunction>,
    instrs: Vec<Instr<'a>>,
}
impl<'a> Builder<'a> {
    fn new(bin: &'a SpirvBinary) -> Result<Builder<'a>> {
        let header = bin.header()?;
        let mut cursor = bin.instrs()?;
        let mut instrs = Vec::new();
        while let Some(instr) = cursor.next()? {
            instrs.push(instr);
        }
        Ok(Builder {
            bound: header.bound,
            decos: HashMap::default(),
            member_decos: HashMap::default(),
            names: HashMap::default(),
            types: HashMap::default(),
            type_words: HashMap::default(),
            functions: HashMap::default(),
            entry_points: HashMap::default(),
            entry_decls: Vec::new(),
            local_sizes: HashMap::default(),
            spec_const_ids: HashMap::default(),
            spec_const_ops: Vec::new(),
            variables: Vec::new(),
            constants: vec![None; header.bound as usize],
            workgroup_size_const: None,
            cur_fn: None,
            instrs,
        })
    }

    fn build(mut self) -> Result<Module> {
        let instrs = std::mem::take(&mut self.instrs);
        for instr in &instrs {
            self.visit(instr)?;
        }
        for (func_id, name, exec_model) in std::mem::take(&mut self.entry_decls) {
            self.entry_points.insert((name, exec_model), func_id);
        }
        Ok(Module {
            bound: self.bound,
            types: self.types,
            functions: self.functions,
            entry_points: self.entry_points,
            local_sizes: self.local_sizes,
            spec_const_ids: self.spec_const_ids,
            spec_const_ops: self.spec_const_ops,
            variables: self.variables,
            constants: self.constants,
            workgroup_size_const: self.workgroup_size_const,
            names: self.names,
        })
    }

    fn visit(&mut self, instr: &Instr<'a>) -> Result<()> {
        let op = instr.op()?;
        if self.cur_fn.is_some() && !matches!(op, Op::FunctionEnd) {
            return self.visit_in_function(instr, op);
        }
        match op {
            Op::Name => {
                let mut ops = instr.operands();
                let id = ops.read_u32()?;
                let name = ops.read_str()?;
                self.names.insert(id, name.to_owned());
            }
            Op::Decorate => {
                let mut ops = instr.operands();
                let id = ops.read_u32()?;
                let deco: Decoration = ops.read_enum()?;
                let params = ops.read_list().to_vec();
                self.decos.entry(id).or_default().entries.push((deco, params));
            }
            Op::MemberDecorate => {
                let mut ops = instr.operands();
                let id = ops.read_u32()?;
                let member = ops.read_u32()?;
                let deco: Decoration = ops.read_enum()?;
                let params = ops.read_list().to_vec();
                self.member_decos.entry((id, member)).or_default().entries.push((deco, params));
            }
            Op::EntryPoint => {
                let mut ops = instr.operands();
                let exec_model: ExecutionModel = ops.read_enum()?;
                let func_id = ops.read_u32()?;
                let name = ops.read_str()?;
                self.entry_decls.push((func_id, name.to_owned(), exec_model));
            }
            Op::ExecutionMode => {
                let mut ops = instr.operands();
                let func_id = ops.read_u32()?;
                let mode = ops.read_u32()?;
                const LOCAL_SIZE: u32 = 17; // spirv_headers::ExecutionMode::LocalSize
                if mode == LOCAL_SIZE {
                    let x = ops.read_u32()?;
                    let y = ops.read_u32()?;
                    let z = ops.read_u32()?;
                    self.local_sizes.insert(func_id, (x, y, z));
                }
            }
            op if crate::consts::is_type_op(op) => self.visit_type(instr, op)?,
            op if crate::consts::is_constant_op(op) => self.visit_constant(instr, op)?,
            op if crate::consts::is_spec_constant_op(op) => self.visit_spec_constant(instr, op)?,
            Op::Variable => self.visit_module_variable(instr)?,
            Op::Function => self.visit_function_start(instr)?,
            _ => {}
        }
        Ok(())
    }

    fn ty(&self, id: Id) -> Result<Type> {
        self.types.get(&id).cloned().ok_or_else(|| Error::CorruptedSpirv(format!("type %{} used before declaration", id)))
    }

    fn visit_type(&mut self, instr: &Instr<'a>, op: Op) -> Result<()> {
        let mut ops = instr.operands();
        let id = ops.read_u32()?;
        let ty = match op {
            Op::TypeVoid => Type::Void,
            Op::TypeBool => Type::bool(),
            Op::TypeInt => {
                let nbit = ops.read_u32()?;
                let signed = ops.read_bool()?;
                Type::int(nbit / 8, signed)
            }
            Op::TypeFloat => {
                let nbit = ops.read_u32()?;
                Type::float(nbit / 8)
            }
            Op::TypeVector => {
                let elem_id = ops.read_u32()?;
                let n = ops.read_u32()?;
                let scalar = self.ty(elem_id)?.scalar_type().ok_or_else(|| Error::CorruptedSpirv("vector of non-scalar".into()))?;
                Type::Vector(VectorType::new(scalar, n))
            }
            Op::TypeMatrix => {
                let col_id = ops.read_u32()?;
                let n = ops.read_u32()?;
                let col_ty = self.ty(col_id)?;
                let vec_ty = match col_ty { Type::Vector(v) => v, _ => return Err(Error::CorruptedSpirv("matrix of non-vector".into())) };
                let mut mat = MatrixType::new(vec_ty, n);
                if let Some(decos) = self.decos.get(&id) {
                    if let Some(stride) = decos.get_u32(Decoration::MatrixStride) {
                        let major = if decos.has(Decoration::RowMajor) { MatrixAxisOrder::RowMajor } else { MatrixAxisOrder::ColumnMajor };
                        mat.decorate(stride as usize, major);
                    }
                }
                Type::Matrix(mat)
            }
            Op::TypeArray => {
                let elem_id = ops.read_u32()?;
                let len_const_id = ops.read_u32()?;
                let elem_ty = self.ty(elem_id)?;
                let n = self.constant(len_const_id)?.get::<u32>(0);
                let stride = self.decos.get(&id).and_then(|d| d.get_u32(Decoration::ArrayStride)).unwrap_or(elem_ty.nbyte() as u32);
                Type::Array(ArrayType::new(&elem_ty, n, stride as usize))
            }
            Op::TypeRuntimeArray => {
                let elem_id = ops.read_u32()?;
                let elem_ty = self.ty(elem_id)?;
                let stride = self.decos.get(&id).and_then(|d| d.get_u32(Decoration::ArrayStride)).unwrap_or(elem_ty.nbyte() as u32);
                Type::RuntimeArray(ArrayType::new_runtime(&elem_ty, stride as usize))
            }
            Op::TypeStruct => {
                let member_ids = ops.read_list().to_vec();
                let name = self.names.get(&id).cloned();
                let mut st = StructType::new(name);
                for (i, member_id) in member_ids.into_iter().enumerate() {
                    let member_ty = self.ty(member_id)?;
                    let offset = self.member_decos.get(&(id, i as u32))
                        .and_then(|d| d.get_u32(Decoration::Offset))
                        .unwrap_or(0);
                    let member_name = self.names.get(&member_id).cloned();
                    st.members.push(StructMember { name: member_name, offset: offset as usize, ty: member_ty });
                }
                Type::Struct(st)
            }
            Op::TypePointer => {
                let store_cls: StorageClass = ops.read_enum()?;
                let pointee_id = ops.read_u32()?;
                let pointee_ty = self.ty(pointee_id)?;
                Type::Pointer(PointerType::new(store_cls, &pointee_ty))
            }
            Op::TypeFunction => {
                let ret_id = ops.read_u32()?;
                let ret_ty = self.ty(ret_id)?;
                let param_ids = ops.read_list().to_vec();
                let param_tys = param_ids.into_iter().map(|i| self.ty(i)).collect::<Result<Vec<_>>>()?;
                Type::Function(crate::ty::FunctionType::new(ret_ty, param_tys))
            }
            _ => return Err(Error::UnsupportedSpirv(format!("unsupported type op {:?}", op))),
        };
        self.types.insert(id, ty);
        Ok(())
    }

    fn constant(&self, id: Id) -> Result<&Object> {
        self.constants.get(id as usize).and_then(|o| o.as_ref())
            .ok_or_else(|| Error::CorruptedSpirv(format!("constant %{} used before declaration", id)))
    }

    fn visit_constant(&mut self, instr: &Instr<'a>, op: Op) -> Result<()> {
        let mut ops = instr.operands();
        match op {
            Op::ConstantTrue | Op::ConstantFalse => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let v = if op == Op::ConstantTrue { 1u32 } else { 0u32 };
                let ty = self.ty(ty_id)?;
                let mut obj = Object::new_zeroed(ty);
                obj.set::<u32>(0, v);
                self.constants[id as usize] = Some(obj);
            }
            Op::Constant => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let words = ops.read_list();
                let ty = self.ty(ty_id)?;
                self.constants[id as usize] = Some(scalar_const_from_words(ty, words));
            }
            Op::ConstantComposite => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let member_ids = ops.read_list().to_vec();
                let ty = self.ty(ty_id)?;
                let mut obj = Object::new_zeroed(ty.clone());
                for (i, member_id) in member_ids.into_iter().enumerate() {
                    let member = self.constant(member_id)?.clone();
                    if let Some(merged) = obj.insert(&[i], &member) {
                        obj = merged;
                    }
                }
                self.constants[id as usize] = Some(obj);
            }
            Op::ConstantNull => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let ty = self.ty(ty_id)?;
                self.constants[id as usize] = Some(Object::new_zeroed(ty));
            }
            _ => {}
        }
        Ok(())
    }

    /// Specialization constants are stored at their *default* value; the
    /// pipeline stage overwrites these entries with caller-supplied
    /// overrides before evaluating `OpSpecConstantOp`s.
    fn visit_spec_constant(&mut self, instr: &Instr<'a>, op: Op) -> Result<()> {
        let mut ops = instr.operands();
        match op {
            Op::SpecConstantTrue | Op::SpecConstantFalse => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let v = if op == Op::SpecConstantTrue { 1u32 } else { 0u32 };
                let ty = self.ty(ty_id)?;
                let mut obj = Object::new_zeroed(ty);
                obj.set::<u32>(0, v);
                self.register_spec_const(id, obj);
            }
            Op::SpecConstant => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let words = ops.read_list();
                let ty = self.ty(ty_id)?;
                self.register_spec_const(id, scalar_const_from_words(ty, words));
            }
            Op::SpecConstantComposite => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let member_ids = ops.read_list().to_vec();
                let ty = self.ty(ty_id)?;
                let mut obj = Object::new_zeroed(ty.clone());
                for (i, member_id) in member_ids.into_iter().enumerate() {
                    if let Ok(member) = self.constant(member_id) {
                        let member = member.clone();
                        if let Some(merged) = obj.insert(&[i], &member) { obj = merged; }
                    }
                }
                if self.decos.get(&id).map(|d| d.has(Decoration::BuiltIn)).unwrap_or(false) {
                    if self.decos[&id].get_u32(Decoration::BuiltIn) == Some(BuiltIn::WorkgroupSize as u32) {
                        self.workgroup_size_const = Some(id);
                    }
                }
                self.constants[id as usize] = Some(obj);
            }
            Op::SpecConstantOp => {
                let ty_id = ops.read_u32()?;
                let id = ops.read_u32()?;
                let sub_opcode = ops.read_u32()?;
                let operands = ops.read_list().to_vec();
                let sub_op = num_traits::FromPrimitive::from_u32(sub_opcode)
                    .ok_or_else(|| Error::UnsupportedSpirv(format!("unsupported spec-const-op {}", sub_opcode)))?;
                let instruction = Instruction { op: sub_op, result_ty: Some(ty_id), result_id: Some(id), operands };
                self.spec_const_ops.push((id, instruction));
            }
            _ => {}
        }
        Ok(())
    }

    fn register_spec_const(&mut self, id: Id, obj: Object) {
        if let Some(spec_id) = self.decos.get(&id).and_then(|d| d.get_u32(Decoration::SpecId)) {
            self.spec_const_ids.insert(spec_id, id);
        }
        self.constants[id as usize] = Some(obj);
    }

    fn visit_module_variable(&mut self, instr: &Instr<'a>) -> Result<()> {
        let mut ops = instr.operands();
        let ty_id = ops.read_u32()?;
        let id = ops.read_u32()?;
        let store_cls: StorageClass = ops.read_enum()?;
        let initializer = ops.read_list().first().copied();
        let decos = self.decos.get(&id).cloned().unwrap_or_default();
        let name = self.names.get(&id).cloned();
        let _ = ty_id;
        self.variables.push(Variable { id, ptr_ty: ty_id, store_cls, initializer, decos, name });
        Ok(())
    }

    fn visit_function_start(&mut self, instr: &Instr<'a>) -> Result<()> {
        let mut ops = instr.operands();
        let ret_ty = ops.read_u32()?;
        let id = ops.read_u32()?;
        let _control = ops.read_u32()?;
        let fn_ty = ops.read_u32()?;
        self.cur_fn = Some(PendingFunction {
            id, fn_ty, ret_ty,
            param_ids: Vec::new(),
            block_order: Vec::new(),
            blocks: HashMap::default(),
            cur_block: None,
        });
        Ok(())
    }

    fn visit_in_function(&mut self, instr: &Instr<'a>, op: Op) -> Result<()> {
        match op {
            Op::FunctionParameter => {
                let mut ops = instr.operands();
                let _ty = ops.read_u32()?;
                let id = ops.read_u32()?;
                self.cur_fn.as_mut().unwrap().param_ids.push(id);
            }
            Op::Label => {
                let mut ops = instr.operands();
                let id = ops.read_u32()?;
                let f = self.cur_fn.as_mut().unwrap();
                f.block_order.push(id);
                f.blocks.insert(id, Block { id, instrs: Vec::new() });
                f.cur_block = Some(id);
            }
            Op::FunctionEnd => {
                let f = self.cur_fn.take().unwrap();
                self.functions.insert(f.id, Function {
                    id: f.id, fn_ty: f.fn_ty, ret_ty: f.ret_ty,
                    param_ids: f.param_ids, block_order: f.block_order, blocks: f.blocks,
                });
            }
            _ => {
                let instruction = self.decode_executable(instr, op)?;
                let f = self.cur_fn.as_mut().unwrap();
                let block_id = f.cur_block.expect("instruction outside any block");
                f.blocks.get_mut(&block_id).unwrap().instrs.push(instruction);
            }
        }
        Ok(())
    }

    fn decode_executable(&mut self, instr: &Instr<'a>, op: Op) -> Result<Instruction> {
        let mut ops = instr.operands();
        if has_result(op) {
            let ty_id = ops.read_u32()?;
            let id = ops.read_u32()?;
            let rest = ops.read_list().to_vec();
            Ok(Instruction { op, result_ty: Some(ty_id), result_id: Some(id), operands: rest })
        } else {
            let rest = ops.read_list().to_vec();
            Ok(Instruction { op, result_ty: None, result_id: None, operands: rest })
        }
    }
}

fn scalar_const_from_words(ty: Type, words: &[u32]) -> Object {
    let mut obj = Object::new_zeroed(ty);
    match words.len() {
        1 => obj.set::<u32>(0, words[0]),
        2 => {
            let bits = (words[0] as u64) | ((words[1] as u64) << 32);
            obj.set::<u64>(0, bits);
        }
        _ => {}
    }
    obj
}

fn has_result(op: Op) -> bool {
    !matches!(
        op,
        Op::Store | Op::CopyMemory | Op::Branch | Op::BranchConditional | Op::Switch
            | Op::Return | Op::ReturnValue | Op::Unreachable | Op::ControlBarrier
            | Op::Nop | Op::Line | Op::NoLine | Op::LoopMerge | Op::SelectionMerge
    )
}