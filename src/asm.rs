//! A tiny SPIR-V word-stream assembler, used only by this crate's own tests
//! and the CLI's `--asm` demo path. Mirrors `parse.rs`'s `Instr`-construction
//! helpers in the opposite direction: instead of reading words, it writes
//! them, word-count headers and all, so dispatch scenarios can be built
//! without a real `glslc`/`shaderc` toolchain in this environment.
#![cfg(any(test, feature = "asm"))]
use std::collections::HashMap;

use spirv_headers::{BuiltIn, Decoration, ExecutionModel, Op, StorageClass};

use crate::parse::SpirvBinary;

pub struct Builder {
    next_id: u32,
    entry_words: Vec<u32>,
    exec_mode_words: Vec<u32>,
    deco_words: Vec<u32>,
    name_words: Vec<u32>,
    global_words: Vec<u32>,
    fn_words: Vec<u32>,
    type_cache: HashMap<String, u32>,
}
impl Builder {
    pub fn new() -> Builder {
        Builder {
            next_id: 1,
            entry_words: Vec::new(),
            exec_mode_words: Vec::new(),
            deco_words: Vec::new(),
            name_words: Vec::new(),
            global_words: Vec::new(),
            fn_words: Vec::new(),
            type_cache: HashMap::new(),
        }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push_instr(buf: &mut Vec<u32>, op: Op, operands: &[u32]) {
        let len = (operands.len() + 1) as u32;
        buf.push((len << 16) | (op as u32));
        buf.extend_from_slice(operands);
    }

    fn push_str_words(s: &str) -> Vec<u32> {
        let bytes = s.as_bytes();
        let mut buf: Vec<u8> = bytes.to_vec();
        buf.push(0);
        while buf.len() % 4 != 0 { buf.push(0); }
        buf.chunks(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }
    fn push_instr_with_str(buf: &mut Vec<u32>, op: Op, leading: &[u32], s: &str, trailing: &[u32]) {
        let str_words = Self::push_str_words(s);
        let len = (leading.len() + str_words.len() + trailing.len() + 1) as u32;
        buf.push((len << 16) | (op as u32));
        buf.extend_from_slice(leading);
        buf.extend_from_slice(&str_words);
        buf.extend_from_slice(trailing);
    }

    // --- Types --------------------------------------------------------
    pub fn type_void(&mut self) -> u32 { self.cached_type("void", Op::TypeVoid, &[]) }
    pub fn type_bool(&mut self) -> u32 { self.cached_type("bool", Op::TypeBool, &[]) }
    pub fn type_int(&mut self, nbit: u32, signed: bool) -> u32 {
        self.cached_type(&format!("int{}{}", nbit, signed), Op::TypeInt, &[nbit, signed as u32])
    }
    pub fn type_float(&mut self, nbit: u32) -> u32 {
        self.cached_type(&format!("float{}", nbit), Op::TypeFloat, &[nbit])
    }
    pub fn type_vector(&mut self, elem_ty: u32, n: u32) -> u32 {
        self.cached_type(&format!("vec{}x{}", elem_ty, n), Op::TypeVector, &[elem_ty, n])
    }
    pub fn type_pointer(&mut self, store_cls: StorageClass, pointee: u32) -> u32 {
        self.cached_type(&format!("ptr{:?}x{}", store_cls, pointee), Op::TypePointer, &[store_cls as u32, pointee])
    }

    fn cached_type(&mut self, key: &str, op: Op, trailing: &[u32]) -> u32 {
        if let Some(&id) = self.type_cache.get(key) { return id; }
        let id = self.fresh_id();
        let mut ops = vec![id];
        ops.extend_from_slice(trailing);
        Self::push_instr(&mut self.global_words, op, &ops);
        self.type_cache.insert(key.to_owned(), id);
        id
    }

    pub fn type_array(&mut self, elem_ty: u32, len_const: u32, stride: u32) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.global_words, Op::TypeArray, &[id, elem_ty, len_const]);
        Self::push_instr(&mut self.deco_words, Op::Decorate, &[id, Decoration::ArrayStride as u32, stride]);
        id
    }
    pub fn type_runtime_array(&mut self, elem_ty: u32, stride: u32) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.global_words, Op::TypeRuntimeArray, &[id, elem_ty]);
        Self::push_instr(&mut self.deco_words, Op::Decorate, &[id, Decoration::ArrayStride as u32, stride]);
        id
    }
    pub fn type_struct(&mut self, members: &[(u32, u32)]) -> u32 {
        let id = self.fresh_id();
        let ids: Vec<u32> = members.iter().map(|(ty, _)| *ty).collect();
        let mut ops = vec![id];
        ops.extend_from_slice(&ids);
        Self::push_instr(&mut self.global_words, Op::TypeStruct, &ops);
        for (i, (_, offset)) in members.iter().enumerate() {
            Self::push_instr(&mut self.deco_words, Op::MemberDecorate, &[id, i as u32, Decoration::Offset as u32, *offset]);
        }
        id
    }
    pub fn type_function(&mut self, ret_ty: u32, params: &[u32]) -> u32 {
        let id = self.fresh_id();
        let mut ops = vec![id, ret_ty];
        ops.extend_from_slice(params);
        Self::push_instr(&mut self.global_words, Op::TypeFunction, &ops);
        id
    }

    // --- Constants ------------------------------------------------------
    pub fn constant_u32(&mut self, ty: u32, v: u32) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.global_words, Op::Constant, &[ty, id, v]);
        id
    }
    pub fn constant_f32(&mut self, ty: u32, v: f32) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.global_words, Op::Constant, &[ty, id, v.to_bits()]);
        id
    }
    pub fn constant_composite(&mut self, ty: u32, members: &[u32]) -> u32 {
        let id = self.fresh_id();
        let mut ops = vec![ty, id];
        ops.extend_from_slice(members);
        Self::push_instr(&mut self.global_words, Op::ConstantComposite, &ops);
        id
    }
    pub fn spec_constant_u32(&mut self, ty: u32, v: u32, spec_id: Option<u32>) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.global_words, Op::SpecConstant, &[ty, id, v]);
        if let Some(spec_id) = spec_id {
            Self::push_instr(&mut self.deco_words, Op::Decorate, &[id, Decoration::SpecId as u32, spec_id]);
        }
        id
    }

    // --- Decorations / names --------------------------------------------
    pub fn decorate(&mut self, id: u32, deco: Decoration, params: &[u32]) {
        let mut ops = vec![id, deco as u32];
        ops.extend_from_slice(params);
        Self::push_instr(&mut self.deco_words, Op::Decorate, &ops);
    }
    pub fn name(&mut self, id: u32, s: &str) {
        Self::push_instr_with_str(&mut self.name_words, Op::Name, &[id], s, &[]);
    }

    // --- Module-scope variables ------------------------------------------
    pub fn variable(&mut self, ptr_ty: u32, store_cls: StorageClass) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.global_words, Op::Variable, &[ptr_ty, id, store_cls as u32]);
        id
    }
    pub fn buffer_variable(&mut self, ptr_ty: u32, set: u32, binding: u32) -> u32 {
        let id = self.variable(ptr_ty, StorageClass::StorageBuffer);
        self.decorate(id, Decoration::DescriptorSet, &[set]);
        self.decorate(id, Decoration::Binding, &[binding]);
        id
    }
    pub fn builtin_input_variable(&mut self, ptr_ty: u32, builtin: BuiltIn) -> u32 {
        let id = self.variable(ptr_ty, StorageClass::Input);
        self.decorate(id, Decoration::BuiltIn, &[builtin as u32]);
        id
    }
    pub fn workgroup_variable(&mut self, ptr_ty: u32) -> u32 {
        self.variable(ptr_ty, StorageClass::Workgroup)
    }

    // --- Functions --------------------------------------------------------
    /// Begins a `void()` function (the shape every GLCompute entry point
    /// has) and emits its entry label, returning the function id.
    pub fn begin_function_void(&mut self) -> u32 {
        let void_ty = self.type_void();
        let fn_ty = self.type_function(void_ty, &[]);
        let id = self.fresh_id();
        Self::push_instr(&mut self.fn_words, Op::Function, &[void_ty, id, 0, fn_ty]);
        self.label();
        id
    }
    /// Begins a function with a return type and parameter types, emitting
    /// `OpFunctionParameter`s but not yet an entry label (the caller must
    /// call `label()` before emitting the body, mirroring real SPIR-V's
    /// "parameters before first block" ordering). Returns the function id
    /// and one fresh id per parameter.
    pub fn begin_function(&mut self, ret_ty: u32, param_tys: &[u32]) -> (u32, Vec<u32>) {
        let fn_ty = self.type_function(ret_ty, param_tys);
        let id = self.fresh_id();
        Self::push_instr(&mut self.fn_words, Op::Function, &[ret_ty, id, 0, fn_ty]);
        let param_ids: Vec<u32> = param_tys
            .iter()
            .map(|&ty| {
                let pid = self.fresh_id();
                Self::push_instr(&mut self.fn_words, Op::FunctionParameter, &[ty, pid]);
                pid
            })
            .collect();
        (id, param_ids)
    }
    pub fn label(&mut self) -> u32 {
        let id = self.fresh_id();
        Self::push_instr(&mut self.fn_words, Op::Label, &[id]);
        id
    }
    /// Reserves a block id to branch to before its body is emitted, for
    /// structured control flow built with forward branches (if/else, loops).
    pub fn reserve_label(&mut self) -> u32 { self.fresh_id() }
    /// Emits the `OpLabel` for a previously reserved id, starting that
    /// block's body at the current position.
    pub fn begin_block(&mut self, id: u32) {
        Self::push_instr(&mut self.fn_words, Op::Label, &[id]);
    }
    pub fn end_function(&mut self) {
        Self::push_instr(&mut self.fn_words, Op::FunctionEnd, &[]);
    }
    pub fn entry_point(&mut self, model: ExecutionModel, func: u32, name: &str, interface: &[u32]) {
        Self::push_instr_with_str(&mut self.entry_words, Op::EntryPoint, &[model as u32, func], name, interface);
    }
    pub fn local_size(&mut self, func: u32, x: u32, y: u32, z: u32) {
        const LOCAL_SIZE: u32 = 17;
        Self::push_instr(&mut self.exec_mode_words, Op::ExecutionMode, &[func, LOCAL_SIZE, x, y, z]);
    }

    /// Generic instruction emission for anything not covered by a named
    /// helper: `op(result_ty, [operand words...]) -> result_id`.
    pub fn op(&mut self, op: Op, result_ty: u32, operands: &[u32]) -> u32 {
        let id = self.fresh_id();
        let mut ops = vec![result_ty, id];
        ops.extend_from_slice(operands);
        Self::push_instr(&mut self.fn_words, op, &ops);
        id
    }
    /// Instructions with no result (`Store`, `Branch`, …).
    pub fn op_void(&mut self, op: Op, operands: &[u32]) {
        Self::push_instr(&mut self.fn_words, op, operands);
    }
    pub fn op_return(&mut self) { Self::push_instr(&mut self.fn_words, Op::Return, &[]); }
    pub fn op_return_value(&mut self, val: u32) { Self::push_instr(&mut self.fn_words, Op::ReturnValue, &[val]); }
    pub fn op_branch(&mut self, target: u32) { Self::push_instr(&mut self.fn_words, Op::Branch, &[target]); }
    pub fn op_branch_conditional(&mut self, cond: u32, t: u32, f: u32) {
        Self::push_instr(&mut self.fn_words, Op::BranchConditional, &[cond, t, f]);
    }
    /// Workgroup-scope control barrier: `Execution=Workgroup(2)`,
    /// `Memory=Workgroup(2)`, `Semantics=AcquireRelease|WorkgroupMemory`.
    /// All three operands are `OpConstant` id references, not literal words,
    /// per the SPIR-V instruction layout.
    pub fn op_control_barrier(&mut self) {
        let uint_ty = self.type_int(32, false);
        let scope = self.constant_u32(uint_ty, 2);
        let semantics = self.constant_u32(uint_ty, 0x108);
        Self::push_instr(&mut self.fn_words, Op::ControlBarrier, &[scope, scope, semantics]);
    }
    pub fn op_phi(&mut self, result_ty: u32, incoming: &[(u32, u32)]) -> u32 {
        let id = self.fresh_id();
        let mut ops = vec![result_ty, id];
        for (val, pred) in incoming { ops.push(*val); ops.push(*pred); }
        Self::push_instr(&mut self.fn_words, Op::Phi, &ops);
        id
    }

    pub fn finish(self) -> SpirvBinary {
        let mut words = vec![crate::parse::MAGIC, 0x0001_0300, 0, self.next_id, 0];
        Self::push_instr(&mut words, Op::Capability, &[1 /* Shader */]);
        Self::push_instr(&mut words, Op::MemoryModel, &[0 /* Logical */, 1 /* GLSL450 */]);
        words.extend_from_slice(&self.entry_words);
        words.extend_from_slice(&self.exec_mode_words);
        words.extend_from_slice(&self.name_words);
        words.extend_from_slice(&self.deco_words);
        words.extend_from_slice(&self.global_words);
        words.extend_from_slice(&self.fn_words);
        SpirvBinary::from(words)
    }
}
impl Default for Builder {
    fn default() -> Builder { Builder::new() }
}
