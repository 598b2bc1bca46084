//! Invocation Interpreter: the per-work-item fetch/decode/execute
//! loop, function call stack, and Phi staging discipline.
use std::sync::Arc;

use spirv_headers::{Op, StorageClass};

use crate::arith;
use crate::consts::GlslExtOp;
use crate::device::Device;
use crate::dim3::Dim3;
use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::module::{Id, Instruction, Module};
use crate::object::Object;
use crate::ty::{ScalarType, Type};

/// `current-function`/`current-block`/`instruction pointer` as one movable
/// cursor; `None` at the top level means FINISHED.
#[derive(Clone, Copy)]
struct Cursor {
    func: Id,
    block: Id,
    idx: usize,
}

struct StackFrame {
    ret_func: Id,
    ret_block: Id,
    ret_idx: usize,
    call_result_id: Option<Id>,
    allocations: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Barrier,
    Finished,
}

/// One work-item's interpreter state.
pub struct Invocation<'a> {
    device: &'a Device,
    module: Arc<Module>,
    entry_point_id: Id,
    objects: Vec<Option<Object>>,
    cur: Option<Cursor>,
    prev_block: Option<Id>,
    at_barrier: bool,
    call_stack: Vec<StackFrame>,
    phi_pending: Vec<(Id, Object)>,
    global_id: Dim3,
    local_id: Dim3,
    group_id: Dim3,
    private_memory: Memory,
    workgroup_memory: Option<Arc<Memory>>,
}
impl<'a> Invocation<'a> {
    /// Constructs an invocation, allocating its private memory and
    /// initializing built-in `Input` variables plus module-scope `Private`
    /// variables.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &'a Device,
        module: Arc<Module>,
        entry_point_id: Id,
        mut initial_objects: Vec<Option<Object>>,
        workgroup_memory: Option<Arc<Memory>>,
        global_id: Dim3,
        local_id: Dim3,
        group_id: Dim3,
        num_groups: Dim3,
    ) -> Invocation<'a> {
        let private_memory = Memory::new(crate::memory::MemoryScope::Invocation);

        for var in &module.variables {
            if var.store_cls != StorageClass::Input { continue; }
            let builtin = match var.builtin() {
                Some(b) => b,
                None => continue,
            };
            let ptr_ty = module.ty(var.ptr_ty).expect("pointer type of input variable must exist");
            let pointee = ptr_ty.as_pointer().expect("input variable type must be a pointer").pointee_ty().clone();
            let value = match builtin {
                spirv_headers::BuiltIn::GlobalInvocationId => global_id,
                spirv_headers::BuiltIn::LocalInvocationId => local_id,
                spirv_headers::BuiltIn::WorkgroupId => group_id,
                spirv_headers::BuiltIn::NumWorkgroups => num_groups,
                _ => continue,
            };
            let n = pointee.nbyte();
            let addr = private_memory.allocate_zeroed(n);
            let mut obj = Object::new_zeroed(pointee);
            obj.set::<u32>(0, value.x);
            obj.set::<u32>(1, value.y);
            obj.set::<u32>(2, value.z);
            obj.store(&private_memory, addr);
            let mut ptr_obj = Object::new_zeroed(ptr_ty.clone());
            ptr_obj.set::<u64>(0, addr);
            initial_objects[var.id as usize] = Some(ptr_obj);
        }

        for var in &module.variables {
            if var.store_cls != StorageClass::Private { continue; }
            let ptr_ty = module.ty(var.ptr_ty).expect("pointer type of private variable must exist");
            let pointee = ptr_ty.as_pointer().expect("private variable type must be a pointer").pointee_ty().clone();
            let n = pointee.nbyte();
            let addr = private_memory.allocate_zeroed(n);
            if let Some(init_id) = var.initializer {
                if let Some(Some(init)) = module.constants.get(init_id as usize) {
                    init.store(&private_memory, addr);
                }
            }
            let mut ptr_obj = Object::new_zeroed(ptr_ty.clone());
            ptr_obj.set::<u64>(0, addr);
            initial_objects[var.id as usize] = Some(ptr_obj);
        }

        let entry_block = module.functions[&entry_point_id].entry_block_id();
        let mut inv = Invocation {
            device,
            module,
            entry_point_id,
            objects: initial_objects,
            cur: Some(Cursor { func: entry_point_id, block: entry_block, idx: 0 }),
            prev_block: None,
            at_barrier: false,
            call_stack: Vec::new(),
            phi_pending: Vec::new(),
            global_id,
            local_id,
            group_id,
            private_memory,
            workgroup_memory,
        };
        inv.device.notify_invocation_begin(global_id);
        inv
    }

    pub fn state(&self) -> State {
        if self.at_barrier { State::Barrier } else if self.cur.is_some() { State::Ready } else { State::Finished }
    }
    pub fn global_id(&self) -> Dim3 { self.global_id }
    pub fn local_id(&self) -> Dim3 { self.local_id }
    pub fn private_memory(&self) -> &Memory { &self.private_memory }

    /// Clears a barrier set by `ControlBarrier`, letting the next `step()`
    /// re-execute past it.
    pub fn clear_barrier(&mut self) { self.at_barrier = false; }

    fn get(&self, id: Id) -> Result<&Object> {
        self.objects.get(id as usize).and_then(|o| o.as_ref())
            .ok_or_else(|| Error::StructuralError(format!("result %{} used before it was computed", id)))
    }
    fn set(&mut self, id: Id, obj: Object) {
        if id as usize >= self.objects.len() { self.objects.resize_with(id as usize + 1, || None); }
        self.objects[id as usize] = Some(obj);
    }

    fn current_instr(&self) -> Option<&Instruction> {
        let cur = self.cur?;
        self.module.functions.get(&cur.func)?.blocks.get(&cur.block)?.instrs.get(cur.idx)
    }

    fn report(&self, err: Error) {
        let fatal = !err.is_recoverable();
        let instr = self.current_instr().map(|i| i.disassemble());
        crate::device::with_worker_context(
            self.entry_point_id,
            self.global_id.as_tuple(),
            self.local_id.as_tuple(),
            self.group_id.as_tuple(),
            || self.device.report_error_with_instr(err, fatal, instr),
        );
    }

    fn get_memory(&self, store_cls: StorageClass) -> Result<&Memory> {
        match store_cls {
            StorageClass::StorageBuffer | StorageClass::Uniform => Ok(self.device.global_memory()),
            StorageClass::Workgroup => self.workgroup_memory.as_deref()
                .ok_or_else(|| Error::StructuralError("Workgroup storage class used outside a workgroup".into())),
            StorageClass::Input | StorageClass::Private | StorageClass::Function => Ok(&self.private_memory),
            other => Err(Error::StructuralError(format!("unsupported storage class {:?}", other))),
        }
    }

    /// Executes exactly one instruction.
    pub fn step(&mut self) {
        debug_assert_eq!(self.state(), State::Ready);
        let cur = self.cur.expect("step() called while not READY");
        let instr = self.module.functions[&cur.func].blocks[&cur.block].instrs[cur.idx].clone();

        if !self.phi_pending.is_empty() && !matches!(instr.op, Op::Phi | Op::Line) {
            for (id, obj) in self.phi_pending.drain(..) {
                self.set(id, obj);
            }
        }

        let jumped = match self.execute(&instr) {
            Ok(jumped) => jumped,
            Err(e) => {
                let fatal = !e.is_recoverable();
                self.report(e);
                fatal // unreachable in practice: report() already aborts on fatal
            }
        };

        if !jumped {
            if let Some(cur) = self.cur.as_mut() { cur.idx += 1; }
        }

        self.device.notify_instruction_executed(instr.result_id);
        if self.state() == State::Finished {
            self.device.notify_invocation_complete(self.global_id);
        }
    }

    /// Executes one instruction's semantics. Returns whether control flow
    /// already moved the cursor (branch/call/return), so `step()` knows
    /// whether to auto-advance.
    fn execute(&mut self, instr: &Instruction) -> Result<bool> {
        use Op::*;
        match instr.op {
            Nop | Line | NoLine | LoopMerge | SelectionMerge => Ok(false),
            Undef => {
                let ty = self.module.ty(instr.result_ty.unwrap()).unwrap().clone();
                self.set(instr.result_id.unwrap(), Object::new_uninit(ty));
                Ok(false)
            }
            Load => { self.exec_load(instr)?; Ok(false) }
            Store => { self.exec_store(instr)?; Ok(false) }
            CopyMemory => { self.exec_copy_memory(instr)?; Ok(false) }
            Variable => { self.exec_function_variable(instr)?; Ok(false) }
            AccessChain => { self.exec_access_chain(instr, false)?; Ok(false) }
            PtrAccessChain => { self.exec_access_chain(instr, true)?; Ok(false) }
            Branch => { self.exec_branch(instr.operands[0]); Ok(true) }
            BranchConditional => {
                let cond = self.get(instr.operands[0])?.get::<u32>(0) != 0;
                let target = if cond { instr.operands[1] } else { instr.operands[2] };
                self.exec_branch(target);
                Ok(true)
            }
            Switch => { self.exec_switch(instr)?; Ok(true) }
            Phi => { self.exec_phi(instr)?; Ok(false) }
            FunctionCall => { self.exec_function_call(instr)?; Ok(true) }
            Return => { self.exec_return(None); Ok(true) }
            ReturnValue => {
                let v = self.get(instr.operands[0])?.clone();
                self.exec_return(Some(v));
                Ok(true)
            }
            Unreachable => Err(Error::StructuralError("OpUnreachable was executed".into())),
            ControlBarrier => { self.exec_control_barrier(instr)?; Ok(false) }
            _ => {
                let get = |id: Id| self.get(id).map(|o| o.clone());
                let result = eval_pure_op(&self.module, &get, instr)?;
                self.set(instr.result_id.unwrap(), result);
                Ok(false)
            }
        }
    }

    fn exec_branch(&mut self, target: Id) {
        let func = self.cur.unwrap().func;
        self.prev_block = self.cur.map(|c| c.block);
        self.cur = Some(Cursor { func, block: target, idx: 0 });
    }

    fn exec_switch(&mut self, instr: &Instruction) -> Result<()> {
        let selector = self.get(instr.operands[0])?.get::<u32>(0);
        let default = instr.operands[1];
        let rest = &instr.operands[2..];
        let mut target = default;
        for pair in rest.chunks(2) {
            if pair.len() == 2 && pair[0] == selector {
                target = pair[1];
                break;
            }
        }
        self.exec_branch(target);
        Ok(())
    }

    /// Stages `(value, predecessor)` for the matching predecessor edge;
    /// flushed into the result vector on the next non-Phi instruction
    /// (Phi handling design note.)
    fn exec_phi(&mut self, instr: &Instruction) -> Result<()> {
        let prev = self.prev_block.ok_or_else(|| Error::StructuralError("OpPhi with no previous block".into()))?;
        let id = instr.result_id.unwrap();
        for pair in instr.operands.chunks(2) {
            if pair.len() == 2 && pair[1] == prev {
                let value = self.get(pair[0])?.clone();
                self.phi_pending.push((id, value));
                return Ok(());
            }
        }
        Err(Error::StructuralError("no matching predecessor block for OpPhi".into()))
    }

    fn exec_function_call(&mut self, instr: &Instruction) -> Result<()> {
        let func_id = instr.operands[0];
        let func = self.module.functions.get(&func_id)
            .ok_or_else(|| Error::StructuralError(format!("call to unknown function %{}", func_id)))?;
        let param_ids = func.param_ids.clone();
        for (param_id, arg_id) in param_ids.iter().zip(instr.operands[1..].iter()) {
            let arg = self.get(*arg_id)?.clone();
            self.set(*param_id, arg);
        }
        let cur = self.cur.unwrap();
        self.call_stack.push(StackFrame {
            ret_func: cur.func,
            ret_block: cur.block,
            ret_idx: cur.idx,
            call_result_id: instr.result_id,
            allocations: Vec::new(),
        });
        let entry_block = self.module.functions[&func_id].entry_block_id();
        self.prev_block = None;
        self.cur = Some(Cursor { func: func_id, block: entry_block, idx: 0 });
        Ok(())
    }

    /// Pops a call frame, releasing its private-memory allocations, and
    /// resumes at the instruction after the call.
    /// Returning from the outermost frame leaves the cursor `None`
    /// (FINISHED).
    fn exec_return(&mut self, value: Option<Object>) {
        match self.call_stack.pop() {
            Some(frame) => {
                for addr in frame.allocations {
                    self.private_memory.release(addr);
                }
                if let (Some(result_id), Some(value)) = (frame.call_result_id, value) {
                    self.set(result_id, value);
                }
                self.cur = Some(Cursor { func: frame.ret_func, block: frame.ret_block, idx: frame.ret_idx + 1 });
            }
            None => {
                self.cur = None;
            }
        }
    }

    fn exec_control_barrier(&mut self, instr: &Instruction) -> Result<()> {
        let exec_scope = self.get(instr.operands[0])?.get::<u32>(0);
        const SCOPE_WORKGROUP: u32 = 2;
        if exec_scope != SCOPE_WORKGROUP {
            return Err(Error::StructuralError(format!("unsupported control barrier execution scope {}", exec_scope)));
        }
        self.at_barrier = true;
        Ok(())
    }

    fn exec_function_variable(&mut self, instr: &Instruction) -> Result<()> {
        let ptr_ty = self.module.ty(instr.result_ty.unwrap())
            .ok_or_else(|| Error::StructuralError("Variable with unknown pointer type".into()))?.clone();
        let pointee = ptr_ty.as_pointer()
            .ok_or_else(|| Error::StructuralError("Variable result type is not a pointer".into()))?
            .pointee_ty().clone();
        let n = pointee.nbyte();
        let addr = self.private_memory.allocate(n);
        if let Some(&init_id) = instr.operands.get(1) {
            let init = self.get(init_id)?.clone();
            init.store(&self.private_memory, addr);
        }
        if let Some(frame) = self.call_stack.last_mut() {
            frame.allocations.push(addr);
        }
        let mut obj = Object::new_zeroed(ptr_ty);
        obj.set::<u64>(0, addr);
        self.set(instr.result_id.unwrap(), obj);
        Ok(())
    }

    fn pointer_ty(&self, ptr: &Object) -> Result<crate::ty::PointerType> {
        match ptr.ty() {
            Type::Pointer(p) => Ok(p.clone()),
            other => Err(Error::StructuralError(format!("expected pointer, found {:?}", other))),
        }
    }

    fn exec_load(&mut self, instr: &Instruction) -> Result<()> {
        let ptr = self.get(instr.operands[0])?.clone();
        let ptr_ty = self.pointer_ty(&ptr)?;
        let addr = ptr.get::<u64>(0);
        let result_ty = self.module.ty(instr.result_ty.unwrap()).unwrap().clone();
        let n = result_ty.nbyte();
        let mem = self.get_memory(ptr_ty.store_cls)?;
        let mut bytes = vec![0u8; n];
        if let Err(e) = mem.try_load(&mut bytes, addr, n) {
            self.report(e);
        }
        self.device.notify_memory_load(addr, n, false);
        self.set(instr.result_id.unwrap(), Object::from_bytes(result_ty, bytes));
        Ok(())
    }

    fn exec_store(&mut self, instr: &Instruction) -> Result<()> {
        let ptr = self.get(instr.operands[0])?.clone();
        let value = self.get(instr.operands[1])?.clone();
        let ptr_ty = self.pointer_ty(&ptr)?;
        let addr = ptr.get::<u64>(0);
        let mem = self.get_memory(ptr_ty.store_cls)?;
        if let Err(e) = mem.try_store(addr, value.size(), value.bytes()) {
            self.report(e);
        }
        self.device.notify_memory_store(addr, value.size(), false);
        Ok(())
    }

    fn exec_copy_memory(&mut self, instr: &Instruction) -> Result<()> {
        let dst_ptr = self.get(instr.operands[0])?.clone();
        let src_ptr = self.get(instr.operands[1])?.clone();
        let dst_ty = self.pointer_ty(&dst_ptr)?;
        let src_ty = self.pointer_ty(&src_ptr)?;
        let n = dst_ty.pointee_ty().nbyte();
        let dst_mem = self.get_memory(dst_ty.store_cls)?;
        let src_mem = self.get_memory(src_ty.store_cls)?;
        let mut buf = vec![0u8; n];
        if let Err(e) = src_mem.try_load(&mut buf, src_ptr.get::<u64>(0), n) {
            self.report(e);
        }
        if let Err(e) = dst_mem.try_store(dst_ptr.get::<u64>(0), n, &buf) {
            self.report(e);
        }
        Ok(())
    }

    fn exec_access_chain(&mut self, instr: &Instruction, is_ptr_access_chain: bool) -> Result<()> {
        let result_ty = self.module.ty(instr.result_ty.unwrap()).unwrap().clone();
        let base_id = instr.operands[0];
        let base = self.get(base_id)?.clone();
        let base_ptr_ty = self.pointer_ty(&base)?;
        let base_addr = base.get::<u64>(0);

        if base_addr == 0 {
            if let Some(var) = self.module.variable(base_id) {
                if var.is_buffer() {
                    if let Some((set, binding)) = var.desc_set_binding() {
                        self.report(Error::MissingDescriptor { set, binding });
                    }
                    let mut null_ptr = Object::new_zeroed(result_ty);
                    null_ptr.set::<u64>(0, 0);
                    self.set(instr.result_id.unwrap(), null_ptr);
                    return Ok(());
                }
            }
        }

        let mut addr = base_addr;
        let mut elem_ty = (*base_ptr_ty.pointee_ty).clone();
        let mut indices = instr.operands[1..].iter();

        if is_ptr_access_chain {
            let first_idx = self.index_value(*indices.next().unwrap())?;
            addr = addr.wrapping_add(first_idx.wrapping_mul(base_ptr_ty.stride as u64));
        }
        for &idx_id in indices {
            let idx = self.index_value(idx_id)? as usize;
            let off = elem_ty.element_offset(idx)
                .ok_or_else(|| Error::StructuralError(format!("index {} out of range for {:?}", idx, elem_ty)))?;
            addr = addr.wrapping_add(off as u64);
            elem_ty = elem_ty.element_type(idx)
                .ok_or_else(|| Error::StructuralError(format!("index {} out of range for {:?}", idx, elem_ty)))?;
        }

        let mut out = Object::new_zeroed(result_ty);
        out.set::<u64>(0, addr);
        self.set(instr.result_id.unwrap(), out);
        Ok(())
    }

    fn index_value(&self, id: Id) -> Result<u64> {
        Ok(self.get(id)?.get::<u64>(0))
    }
}

/// Shared by the interpreter's `step()` and `PipelineStage`'s one-shot
/// evaluation of `OpSpecConstantOp`: every opcode here is pure, i.e.
/// it only reads already-computed operand objects and produces a new one.
pub fn eval_pure_op<F: Fn(Id) -> Result<Object>>(module: &Module, get: &F, instr: &Instruction) -> Result<Object> {
    use Op::*;
    let result_ty = instr.result_ty
        .and_then(|t| module.ty(t))
        .ok_or_else(|| Error::StructuralError(format!("{:?} has no result type", instr.op)))?
        .clone();

    match instr.op {
        CopyObject => get(instr.operands[0]),
        CompositeConstruct => {
            let mut out = Object::new_zeroed(result_ty.clone());
            for (i, &id) in instr.operands.iter().enumerate() {
                let part = get(id)?;
                out = out.insert(&[i], &part)
                    .ok_or_else(|| Error::StructuralError("CompositeConstruct index out of range".into()))?;
            }
            Ok(out)
        }
        CompositeExtract => {
            let comp = get(instr.operands[0])?;
            let idxs: Vec<usize> = instr.operands[1..].iter().map(|&w| w as usize).collect();
            comp.extract(&idxs).ok_or_else(|| Error::StructuralError("CompositeExtract index out of range".into()))
        }
        CompositeInsert => {
            let obj = get(instr.operands[0])?;
            let comp = get(instr.operands[1])?;
            let idxs: Vec<usize> = instr.operands[2..].iter().map(|&w| w as usize).collect();
            comp.insert(&idxs, &obj).ok_or_else(|| Error::StructuralError("CompositeInsert index out of range".into()))
        }
        VectorShuffle => eval_vector_shuffle(&result_ty, get, instr),
        VectorExtractDynamic => {
            let vec = get(instr.operands[0])?;
            let idx = get(instr.operands[1])?.get::<u32>(0) as usize;
            vec.extract(&[idx]).ok_or_else(|| Error::StructuralError("VectorExtractDynamic index out of range".into()))
        }
        VectorInsertDynamic => {
            let vec = get(instr.operands[0])?;
            let comp = get(instr.operands[1])?;
            let idx = get(instr.operands[2])?.get::<u32>(0) as usize;
            vec.insert(&[idx], &comp).ok_or_else(|| Error::StructuralError("VectorInsertDynamic index out of range".into()))
        }
        Dot => eval_dot(get, instr),
        VectorTimesScalar => eval_vector_times_scalar(&result_ty, get, instr),
        MatrixTimesScalar => eval_matrix_times_scalar(&result_ty, get, instr),
        Select => eval_select(&result_ty, get, instr),
        Any => eval_any_all(get, instr, true),
        All => eval_any_all(get, instr, false),
        Bitcast => {
            let src = get(instr.operands[0])?;
            Ok(Object::from_bytes(result_ty, src.bytes().to_vec()))
        }
        ConvertFToU | ConvertFToS | ConvertSToF | ConvertUToF | SConvert | UConvert | FConvert =>
            eval_convert(instr.op, &result_ty, get, instr),
        ExtInst => eval_ext_inst(&result_ty, get, instr),
        op if is_unary(op) => {
            let a = get(instr.operands[0])?;
            arith::eval_unary(op, &result_ty, a.ty(), &a)
        }
        op => {
            let a = get(instr.operands[0])?;
            let b = get(instr.operands[1])?;
            arith::eval_binary(op, &result_ty, a.ty(), &a, &b)
        }
    }
}

fn is_unary(op: Op) -> bool {
    matches!(op, Op::SNegate | Op::FNegate | Op::Not | Op::LogicalNot | Op::IsNan | Op::IsInf)
}

fn lanes(ty: &Type) -> usize {
    match ty { Type::Vector(v) => v.nscalar as usize, _ => 1 }
}

fn copy_lane(scalar: ScalarType, dst: &mut Object, dst_lane: usize, src: &Object, src_lane: usize) {
    match scalar {
        ScalarType::Float(4) => dst.set::<f32>(dst_lane, src.get::<f32>(src_lane)),
        ScalarType::Float(_) => dst.set::<f64>(dst_lane, src.get::<f64>(src_lane)),
        ScalarType::Signed(_) => dst.set::<i64>(dst_lane, src.get::<i64>(src_lane)),
        ScalarType::Unsigned(_) | ScalarType::Boolean => dst.set::<u64>(dst_lane, src.get::<u64>(src_lane)),
    }
}

fn eval_vector_shuffle<F: Fn(Id) -> Result<Object>>(result_ty: &Type, get: &F, instr: &Instruction) -> Result<Object> {
    let v1 = get(instr.operands[0])?;
    let v2 = get(instr.operands[1])?;
    let n1 = lanes(v1.ty());
    let scalar = result_ty.scalar_type().ok_or_else(|| Error::StructuralError("VectorShuffle on non-vector result".into()))?;
    let mut out = Object::new_zeroed(result_ty.clone());
    for (lane, &comp) in instr.operands[2..].iter().enumerate() {
        if comp == u32::MAX { continue; } // undefined lane, left zeroed
        let idx = comp as usize;
        if idx < n1 {
            copy_lane(scalar, &mut out, lane, &v1, idx);
        } else {
            copy_lane(scalar, &mut out, lane, &v2, idx - n1);
        }
    }
    Ok(out)
}

fn eval_dot<F: Fn(Id) -> Result<Object>>(get: &F, instr: &Instruction) -> Result<Object> {
    let a = get(instr.operands[0])?;
    let b = get(instr.operands[1])?;
    let n = lanes(a.ty());
    let scalar = a.ty().scalar_type().ok_or_else(|| Error::StructuralError("Dot on non-vector".into()))?;
    let width = scalar.nbyte();
    let mut sum = 0f64;
    for lane in 0..n {
        let (x, y) = if width == 4 { (a.get::<f32>(lane) as f64, b.get::<f32>(lane) as f64) } else { (a.get::<f64>(lane), b.get::<f64>(lane)) };
        sum += x * y;
    }
    let mut out = Object::new_zeroed(Type::Scalar(scalar));
    if width == 4 { out.set::<f32>(0, sum as f32); } else { out.set::<f64>(0, sum); }
    Ok(out)
}

fn eval_vector_times_scalar<F: Fn(Id) -> Result<Object>>(result_ty: &Type, get: &F, instr: &Instruction) -> Result<Object> {
    let vec = get(instr.operands[0])?;
    let scalar_obj = get(instr.operands[1])?;
    let n = lanes(result_ty);
    let width = result_ty.scalar_type().unwrap().nbyte();
    let mut out = Object::new_zeroed(result_ty.clone());
    for lane in 0..n {
        if width == 4 {
            out.set::<f32>(lane, vec.get::<f32>(lane) * scalar_obj.get::<f32>(0));
        } else {
            out.set::<f64>(lane, vec.get::<f64>(lane) * scalar_obj.get::<f64>(0));
        }
    }
    Ok(out)
}

fn eval_matrix_times_scalar<F: Fn(Id) -> Result<Object>>(result_ty: &Type, get: &F, instr: &Instruction) -> Result<Object> {
    let mat = get(instr.operands[0])?;
    let scalar_obj = get(instr.operands[1])?;
    let ncol = result_ty.nelement().ok_or_else(|| Error::StructuralError("MatrixTimesScalar on non-matrix".into()))?;
    let mut out = mat.clone();
    for i in 0..ncol {
        let col = out.extract(&[i]).unwrap();
        let width = col.ty().scalar_type().unwrap().nbyte();
        let n = lanes(col.ty());
        let mut scaled = col.clone();
        for lane in 0..n {
            if width == 4 {
                scaled.set::<f32>(lane, col.get::<f32>(lane) * scalar_obj.get::<f32>(0));
            } else {
                scaled.set::<f64>(lane, col.get::<f64>(lane) * scalar_obj.get::<f64>(0));
            }
        }
        out = out.insert(&[i], &scaled).unwrap();
    }
    Ok(out)
}

fn eval_select<F: Fn(Id) -> Result<Object>>(result_ty: &Type, get: &F, instr: &Instruction) -> Result<Object> {
    let cond = get(instr.operands[0])?;
    let t = get(instr.operands[1])?;
    let f = get(instr.operands[2])?;
    let n = lanes(result_ty);
    if n == 1 {
        return Ok(if cond.get::<u32>(0) != 0 { t } else { f });
    }
    let scalar = result_ty.scalar_type().unwrap();
    let mut out = Object::new_zeroed(result_ty.clone());
    for lane in 0..n {
        let pick = if cond.get::<u32>(lane) != 0 { &t } else { &f };
        copy_lane(scalar, &mut out, lane, pick, lane);
    }
    Ok(out)
}

fn eval_any_all<F: Fn(Id) -> Result<Object>>(get: &F, instr: &Instruction, any: bool) -> Result<Object> {
    let vec = get(instr.operands[0])?;
    let n = lanes(vec.ty());
    let result = if any {
        (0..n).any(|i| vec.get::<u32>(i) != 0)
    } else {
        (0..n).all(|i| vec.get::<u32>(i) != 0)
    };
    let mut out = Object::new_zeroed(Type::bool());
    out.set::<u32>(0, result as u32);
    Ok(out)
}

fn eval_convert<F: Fn(Id) -> Result<Object>>(op: Op, result_ty: &Type, get: &F, instr: &Instruction) -> Result<Object> {
    let src = get(instr.operands[0])?;
    let n = lanes(result_ty);
    let src_scalar = src.ty().scalar_type().ok_or_else(|| Error::StructuralError(format!("{:?} on non-scalar/vector", op)))?;
    let dst_scalar = result_ty.scalar_type().ok_or_else(|| Error::StructuralError(format!("{:?} to non-scalar/vector", op)))?;
    let mut out = Object::new_zeroed(result_ty.clone());
    for lane in 0..n {
        match op {
            Op::ConvertFToU => {
                let v = read_float(src, src_scalar, lane);
                write_uint(&mut out, dst_scalar, lane, v as u64);
            }
            Op::ConvertFToS => {
                let v = read_float(src, src_scalar, lane);
                write_int(&mut out, dst_scalar, lane, v as i64);
            }
            Op::ConvertSToF => {
                let v = read_int(src, src_scalar, lane);
                write_float(&mut out, dst_scalar, lane, v as f64);
            }
            Op::ConvertUToF => {
                let v = read_uint(src, src_scalar, lane);
                write_float(&mut out, dst_scalar, lane, v as f64);
            }
            Op::SConvert => {
                let v = read_int(src, src_scalar, lane);
                write_int(&mut out, dst_scalar, lane, v);
            }
            Op::UConvert => {
                let v = read_uint(src, src_scalar, lane);
                write_uint(&mut out, dst_scalar, lane, v);
            }
            Op::FConvert => {
                let v = read_float(src, src_scalar, lane);
                write_float(&mut out, dst_scalar, lane, v);
            }
            _ => unreachable!(),
        }
    }
    Ok(out)
}
fn read_float(obj: &Object, scalar: ScalarType, lane: usize) -> f64 {
    if scalar.nbyte() == 4 { obj.get::<f32>(lane) as f64 } else { obj.get::<f64>(lane) }
}
fn read_int(obj: &Object, _scalar: ScalarType, lane: usize) -> i64 { obj.get::<i64>(lane) }
fn read_uint(obj: &Object, _scalar: ScalarType, lane: usize) -> u64 { obj.get::<u64>(lane) }
fn write_float(obj: &mut Object, scalar: ScalarType, lane: usize, v: f64) {
    if scalar.nbyte() == 4 { obj.set::<f32>(lane, v as f32) } else { obj.set::<f64>(lane, v) }
}
fn write_int(obj: &mut Object, _scalar: ScalarType, lane: usize, v: i64) { obj.set::<i64>(lane, v) }
fn write_uint(obj: &mut Object, _scalar: ScalarType, lane: usize, v: u64) { obj.set::<u64>(lane, v) }

fn eval_ext_inst<F: Fn(Id) -> Result<Object>>(result_ty: &Type, get: &F, instr: &Instruction) -> Result<Object> {
    let instr_num = instr.operands[1];
    let ext_op = GlslExtOp::from_u32(instr_num)
        .ok_or_else(|| Error::UnsupportedSpirv(format!("unsupported GLSL.std.450 instruction {}", instr_num)))?;
    let args = instr.operands[2..].iter().map(|&id| get(id)).collect::<Result<Vec<_>>>()?;
    let n = lanes(result_ty);
    let width = result_ty.scalar_type().ok_or_else(|| Error::StructuralError("ExtInst on non-float result".into()))?.nbyte();
    let mut out = Object::new_zeroed(result_ty.clone());
    for lane in 0..n {
        let vals: Vec<f64> = args.iter().map(|a| if width == 4 { a.get::<f32>(lane) as f64 } else { a.get::<f64>(lane) }).collect();
        let r = apply_glsl_ext(ext_op, &vals)?;
        if width == 4 { out.set::<f32>(lane, r as f32) } else { out.set::<f64>(lane, r) }
    }
    Ok(out)
}

fn apply_glsl_ext(op: GlslExtOp, v: &[f64]) -> Result<f64> {
    use GlslExtOp::*;
    Ok(match op {
        FAbs => v[0].abs(),
        Acos => v[0].acos(),
        Asin => v[0].asin(),
        Cos => v[0].cos(),
        Tan => v[0].tan(),
        Sin => v[0].sin(),
        Atan => v[0].atan(),
        Sinh => v[0].sinh(),
        Cosh => v[0].cosh(),
        Tanh => v[0].tanh(),
        Asinh => v[0].asinh(),
        Acosh => v[0].acosh(),
        Atanh => v[0].atanh(),
        Atan2 => v[0].atan2(v[1]),
        Sqrt => v[0].sqrt(),
        InverseSqrt => 1.0 / v[0].sqrt(),
        Fma => v[0].mul_add(v[1], v[2]),
    })
}

/// Evaluates a single `OpSpecConstantOp` instruction outside of any running
/// invocation: the pipeline stage's one-shot specialization pass.
/// Shares the same pure-opcode evaluator `step()` uses for everything that
/// isn't memory or control flow, since SPIR-V only allows that subset inside
/// `OpSpecConstantOp`.
pub fn eval_spec_const_op(
    device: &Device,
    module: &Module,
    objects: &[Option<Object>],
    instr: &Instruction,
) -> Result<Object> {
    let get = |id: Id| -> Result<Object> {
        objects.get(id as usize).and_then(|o| o.clone())
            .ok_or_else(|| Error::CorruptedSpirv(format!("spec-const-op referenced unevaluated %{}", id)))
    };
    eval_pure_op(module, &get, instr).map_err(|e| {
        device.report_error(e.clone(), false);
        e
    })
}
