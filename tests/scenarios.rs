//! End-to-end dispatch scenarios driving hand-assembled shaders through a
//! real `Device`/`DispatchExecutor`, covering barrier synchronization,
//! robust out-of-bounds access, and Phi-across-branches correctness.
//! Vector-add (a plain per-invocation dispatch with no control flow) and
//! specialization-constant override are covered as unit tests next to the
//! code they exercise (`dispatch.rs`, `stage.rs`); this file is for the
//! scenarios that need real shader control flow.
use std::collections::HashMap;
use std::sync::Arc;

use spirv_emu::asm::Builder as AsmBuilder;
use spirv_emu::device::Device;
use spirv_emu::dim3::Dim3;
use spirv_emu::dispatch::DispatchCommand;
use spirv_emu::dispatch::DispatchExecutor;
use spirv_emu::module::Module;
use spirv_emu::stage::PipelineStage;

use spirv_headers::{BuiltIn, ExecutionModel, Op, StorageClass};

fn storage_buffer_uint_array(asm: &mut AsmBuilder, uint_ty: u32, set: u32, binding: u32) -> u32 {
    let rt_arr = asm.type_runtime_array(uint_ty, 4);
    let block_ty = asm.type_struct(&[(rt_arr, 0)]);
    let block_ptr = asm.type_pointer(StorageClass::StorageBuffer, block_ty);
    asm.buffer_variable(block_ptr, set, binding)
}

fn global_id_var(asm: &mut AsmBuilder, uint_ty: u32) -> u32 {
    let uint3_ty = asm.type_vector(uint_ty, 3);
    let ptr_input3 = asm.type_pointer(StorageClass::Input, uint3_ty);
    asm.builtin_input_variable(ptr_input3, BuiltIn::GlobalInvocationId)
}

fn local_id_var(asm: &mut AsmBuilder, uint_ty: u32) -> u32 {
    let uint3_ty = asm.type_vector(uint_ty, 3);
    let ptr_input3 = asm.type_pointer(StorageClass::Input, uint3_ty);
    asm.builtin_input_variable(ptr_input3, BuiltIn::LocalInvocationId)
}

fn load_builtin_x(asm: &mut AsmBuilder, builtin_var: u32, uint_ty: u32) -> u32 {
    let ptr_input_scalar = asm.type_pointer(StorageClass::Input, uint_ty);
    let zero = asm.constant_u32(uint_ty, 0);
    let ptr = asm.op(Op::AccessChain, ptr_input_scalar, &[builtin_var, zero]);
    asm.op(Op::Load, uint_ty, &[ptr])
}

fn read_u32_array(device: &Device, addr: u64, n: usize) -> Vec<u32> {
    (0..n)
        .map(|i| {
            let mut bytes = [0u8; 4];
            device.global_memory().load(&mut bytes, addr + (i as u64) * 4, 4);
            u32::from_ne_bytes(bytes)
        })
        .collect()
}

/// Barrier correctness: each invocation writes its local id into a
/// workgroup-local array, barriers, then reads its neighbor's slot.
/// Group size (4,1,1), single group: `Out = [1,2,3,0]`.
#[test]
fn barrier_neighbor_exchange() {
    let mut asm = AsmBuilder::new();
    let uint_ty = asm.type_int(32, false);
    let out_var = storage_buffer_uint_array(&mut asm, uint_ty, 0, 0);
    let gid_var = global_id_var(&mut asm, uint_ty);
    let lid_var = local_id_var(&mut asm, uint_ty);

    let four_len = asm.constant_u32(uint_ty, 4);
    let w_arr = asm.type_array(uint_ty, four_len, 4);
    let w_ptr = asm.type_pointer(StorageClass::Workgroup, w_arr);
    let w_var = asm.workgroup_variable(w_ptr);
    let w_elem_ptr_ty = asm.type_pointer(StorageClass::Workgroup, uint_ty);
    let out_elem_ptr_ty = asm.type_pointer(StorageClass::StorageBuffer, uint_ty);

    let func = asm.begin_function_void();
    let gid = load_builtin_x(&mut asm, gid_var, uint_ty);
    let lid = load_builtin_x(&mut asm, lid_var, uint_ty);
    let zero = asm.constant_u32(uint_ty, 0);

    let w_self_ptr = asm.op(Op::AccessChain, w_elem_ptr_ty, &[w_var, lid]);
    asm.op_void(Op::Store, &[w_self_ptr, lid]);
    asm.op_control_barrier();

    let one = asm.constant_u32(uint_ty, 1);
    let four = asm.constant_u32(uint_ty, 4);
    let lid_plus_1 = asm.op(Op::IAdd, uint_ty, &[lid, one]);
    let neighbor = asm.op(Op::UMod, uint_ty, &[lid_plus_1, four]);
    let w_neighbor_ptr = asm.op(Op::AccessChain, w_elem_ptr_ty, &[w_var, neighbor]);
    let neighbor_val = asm.op(Op::Load, uint_ty, &[w_neighbor_ptr]);

    let out_ptr = asm.op(Op::AccessChain, out_elem_ptr_ty, &[out_var, zero, gid]);
    asm.op_void(Op::Store, &[out_ptr, neighbor_val]);
    asm.op_return();
    asm.end_function();
    asm.entry_point(ExecutionModel::GLCompute, func, "main", &[gid_var, lid_var]);
    asm.local_size(func, 4, 1, 1);

    let module = Arc::new(Module::from_binary(&asm.finish()).unwrap());
    let device = Device::new();
    let stage = Arc::new(PipelineStage::new(
        &device, module, "main", ExecutionModel::GLCompute, &HashMap::new(),
    ).unwrap());
    let out_addr = device.global_memory().allocate_zeroed(16);
    let mut cmd = DispatchCommand::new(stage, Dim3::new(1, 1, 1));
    cmd.bind(0, 0, out_addr);
    DispatchExecutor::run(&device, &cmd);

    assert_eq!(read_u32_array(&device, out_addr, 4), vec![1, 2, 3, 0]);
    assert_eq!(device.error_count(), 0);
}

/// Out-of-bounds load is a robust access: zero-filled destination, one
/// reported error, dispatch still completes.
#[test]
fn out_of_bounds_load_is_robust() {
    let mut asm = AsmBuilder::new();
    let uint_ty = asm.type_int(32, false);
    let buf_var = storage_buffer_uint_array(&mut asm, uint_ty, 0, 0);
    let out_var = storage_buffer_uint_array(&mut asm, uint_ty, 0, 1);
    let elem_ptr_ty = asm.type_pointer(StorageClass::StorageBuffer, uint_ty);

    let func = asm.begin_function_void();
    let zero = asm.constant_u32(uint_ty, 0);
    let five = asm.constant_u32(uint_ty, 5); // byte offset 20 = index 5 into a u32 array
    let ptr = asm.op(Op::AccessChain, elem_ptr_ty, &[buf_var, zero, five]);
    let val = asm.op(Op::Load, uint_ty, &[ptr]);
    let out_ptr = asm.op(Op::AccessChain, elem_ptr_ty, &[out_var, zero, zero]);
    asm.op_void(Op::Store, &[out_ptr, val]);
    asm.op_return();
    asm.end_function();
    asm.entry_point(ExecutionModel::GLCompute, func, "main", &[]);
    asm.local_size(func, 1, 1, 1);

    let module = Arc::new(Module::from_binary(&asm.finish()).unwrap());
    let device = Device::new();
    let stage = Arc::new(PipelineStage::new(
        &device, module, "main", ExecutionModel::GLCompute, &HashMap::new(),
    ).unwrap());

    let buf_addr = device.global_memory().allocate_zeroed(16); // only 4 u32s live
    let out_addr = device.global_memory().allocate_zeroed(4);
    let mut cmd = DispatchCommand::new(stage, Dim3::new(1, 1, 1));
    cmd.bind(0, 0, buf_addr);
    cmd.bind(0, 1, out_addr);
    DispatchExecutor::run(&device, &cmd);

    assert_eq!(read_u32_array(&device, out_addr, 1), vec![0]);
    assert_eq!(device.error_count(), 1);
}

/// Phi across two predecessors: `r = (global_id.x & 1) ? 7 : 9`,
/// dispatch (8,1,1): `Out = [9,7,9,7,9,7,9,7]`.
#[test]
fn phi_across_branch() {
    let mut asm = AsmBuilder::new();
    let uint_ty = asm.type_int(32, false);
    let bool_ty = asm.type_bool();
    let out_var = storage_buffer_uint_array(&mut asm, uint_ty, 0, 0);
    let gid_var = global_id_var(&mut asm, uint_ty);
    let out_elem_ptr_ty = asm.type_pointer(StorageClass::StorageBuffer, uint_ty);

    let func = asm.begin_function_void();
    let gid = load_builtin_x(&mut asm, gid_var, uint_ty);
    let one = asm.constant_u32(uint_ty, 1);
    let is_odd = asm.op(Op::BitwiseAnd, uint_ty, &[gid, one]);
    let zero_u = asm.constant_u32(uint_ty, 0);
    let cond = asm.op(Op::INotEqual, bool_ty, &[is_odd, zero_u]);

    let true_label = asm.reserve_label();
    let false_label = asm.reserve_label();
    let merge_label = asm.reserve_label();
    asm.op_branch_conditional(cond, true_label, false_label);

    asm.begin_block(true_label);
    let seven = asm.constant_u32(uint_ty, 7);
    asm.op_branch(merge_label);

    asm.begin_block(false_label);
    let nine = asm.constant_u32(uint_ty, 9);
    asm.op_branch(merge_label);

    asm.begin_block(merge_label);
    let r = asm.op_phi(uint_ty, &[(seven, true_label), (nine, false_label)]);
    let zero = asm.constant_u32(uint_ty, 0);
    let out_ptr = asm.op(Op::AccessChain, out_elem_ptr_ty, &[out_var, zero, gid]);
    asm.op_void(Op::Store, &[out_ptr, r]);
    asm.op_return();
    asm.end_function();
    asm.entry_point(ExecutionModel::GLCompute, func, "main", &[gid_var]);
    asm.local_size(func, 1, 1, 1);

    let module = Arc::new(Module::from_binary(&asm.finish()).unwrap());
    let device = Device::new();
    let stage = Arc::new(PipelineStage::new(
        &device, module, "main", ExecutionModel::GLCompute, &HashMap::new(),
    ).unwrap());
    let out_addr = device.global_memory().allocate_zeroed(4 * 8);
    let mut cmd = DispatchCommand::new(stage, Dim3::new(8, 1, 1));
    cmd.bind(0, 0, out_addr);
    DispatchExecutor::run(&device, &cmd);

    assert_eq!(read_u32_array(&device, out_addr, 8), vec![9, 7, 9, 7, 9, 7, 9, 7]);
    assert_eq!(device.error_count(), 0);
}

/// Function call with a private-storage local: `f(x) { int tmp = x*x;
/// return tmp + 1; }`, called twice and summed. Group size (5,1,1):
/// `Out[i] = 2*(i*i + 1)`.
#[test]
fn function_call_with_private_local() {
    let mut asm = AsmBuilder::new();
    let uint_ty = asm.type_int(32, false);
    let out_var = storage_buffer_uint_array(&mut asm, uint_ty, 0, 0);
    let gid_var = global_id_var(&mut asm, uint_ty);
    let out_elem_ptr_ty = asm.type_pointer(StorageClass::StorageBuffer, uint_ty);
    let tmp_ptr_ty = asm.type_pointer(StorageClass::Function, uint_ty);

    let (f_id, f_params) = asm.begin_function(uint_ty, &[uint_ty]);
    let x = f_params[0];
    asm.label();
    let tmp_var = asm.variable(tmp_ptr_ty, StorageClass::Function);
    let x_sq = asm.op(Op::IMul, uint_ty, &[x, x]);
    asm.op_void(Op::Store, &[tmp_var, x_sq]);
    let tmp_val = asm.op(Op::Load, uint_ty, &[tmp_var]);
    let one = asm.constant_u32(uint_ty, 1);
    let result = asm.op(Op::IAdd, uint_ty, &[tmp_val, one]);
    asm.op_return_value(result);
    asm.end_function();

    let func = asm.begin_function_void();
    let gid = load_builtin_x(&mut asm, gid_var, uint_ty);
    let call1 = asm.op(Op::FunctionCall, uint_ty, &[f_id, gid]);
    let call2 = asm.op(Op::FunctionCall, uint_ty, &[f_id, gid]);
    let sum = asm.op(Op::IAdd, uint_ty, &[call1, call2]);
    let zero = asm.constant_u32(uint_ty, 0);
    let out_ptr = asm.op(Op::AccessChain, out_elem_ptr_ty, &[out_var, zero, gid]);
    asm.op_void(Op::Store, &[out_ptr, sum]);
    asm.op_return();
    asm.end_function();
    asm.entry_point(ExecutionModel::GLCompute, func, "main", &[gid_var]);
    asm.local_size(func, 5, 1, 1);

    let module = Arc::new(Module::from_binary(&asm.finish()).unwrap());
    let device = Device::new();
    let stage = Arc::new(PipelineStage::new(
        &device, module, "main", ExecutionModel::GLCompute, &HashMap::new(),
    ).unwrap());
    let out_addr = device.global_memory().allocate_zeroed(4 * 5);
    let mut cmd = DispatchCommand::new(stage, Dim3::new(5, 1, 1));
    cmd.bind(0, 0, out_addr);
    DispatchExecutor::run(&device, &cmd);

    let expected: Vec<u32> = (0..5u32).map(|i| 2 * (i * i + 1)).collect();
    assert_eq!(read_u32_array(&device, out_addr, 5), expected);
    assert_eq!(device.error_count(), 0);
}
