//! Dispatch Executor: resolves buffer-variable pointer
//! objects against a descriptor-set map, enumerates every workgroup id in
//! one dispatch, and runs them across a thread pool.
//!
//! An open design question ("conflate two near-duplicate container
//! types... the intended design has exactly one dispatch-command record and
//! one executor") is resolved here: `DispatchCommand` is the only
//! description type and `DispatchExecutor` is the only runner.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::Device;
use crate::dim3::{enumerate, Dim3};
use crate::object::Object;
use crate::stage::PipelineStage;
use crate::workgroup::Workgroup;

/// `set -> (binding -> (array_element -> device address))`, exactly as
/// named in a dispatch description.
pub type DescriptorSetMap = HashMap<u32, HashMap<u32, HashMap<u32, u64>>>;

/// The one dispatch-command record: an entry
/// point's pipeline stage, the group counts, and the descriptor bindings
/// supplying buffer addresses.
pub struct DispatchCommand {
    pub pipeline_stage: Arc<PipelineStage>,
    pub num_groups: Dim3,
    pub descriptor_set_map: DescriptorSetMap,
}
impl DispatchCommand {
    pub fn new(pipeline_stage: Arc<PipelineStage>, num_groups: Dim3) -> DispatchCommand {
        DispatchCommand { pipeline_stage, num_groups, descriptor_set_map: HashMap::new() }
    }
    pub fn bind(&mut self, set: u32, binding: u32, addr: u64) -> &mut Self {
        self.descriptor_set_map.entry(set).or_default().entry(binding).or_default().insert(0, addr);
        self
    }
    pub fn bind_element(&mut self, set: u32, binding: u32, element: u32, addr: u64) -> &mut Self {
        self.descriptor_set_map.entry(set).or_default().entry(binding).or_default().insert(element, addr);
        self
    }
}

/// Resolves every buffer variable's pointer object against the descriptor
/// map. Variables with no entry get a null-address pointer, which the
/// interpreter's `AccessChain` turns into a `MissingDescriptor` report on
/// first use.
fn resolve_base_objects(stage: &PipelineStage, desc_map: &DescriptorSetMap) -> Vec<Option<Object>> {
    let module = stage.module();
    let mut objects = stage.objects.clone();
    for var in &module.variables {
        if !var.is_buffer() { continue; }
        let ptr_ty = match module.ty(var.ptr_ty) {
            Some(t) => t.clone(),
            None => continue,
        };
        let addr = var.desc_set_binding()
            .and_then(|(set, binding)| desc_map.get(&set).and_then(|b| b.get(&binding)))
            .and_then(|elems| elems.get(&0))
            .copied()
            .unwrap_or(0);
        let mut obj = Object::new_zeroed(ptr_ty);
        obj.set::<u64>(0, addr);
        if (var.id as usize) >= objects.len() {
            objects.resize_with(var.id as usize + 1, || None);
        }
        objects[var.id as usize] = Some(obj);
    }
    objects
}

/// Thread pool over pending workgroup ids.
/// `num_threads` comes from `Device`'s `RunnerConfig`, forced to 1 in
/// interactive mode or when any registered observer declares itself
/// non-thread-safe.
pub struct DispatchExecutor;
impl DispatchExecutor {
    /// Runs one dispatch to completion. Workgroups are enumerated in
    /// x-fastest order and handed out from a shared atomic counter; each
    /// worker thread owns its workgroups serially.
    pub fn run(device: &Device, cmd: &DispatchCommand) {
        device.notify_dispatch_begin();

        let base_objects = resolve_base_objects(&cmd.pipeline_stage, &cmd.descriptor_set_map);
        let pending: Vec<Dim3> = enumerate(cmd.num_groups).collect();
        let next_index = AtomicUsize::new(0);
        let num_threads = device.config().resolved_num_threads(device.any_observer_unsafe()).min(pending.len().max(1));

        std::thread::scope(|scope| {
            for _ in 0..num_threads.max(1) {
                scope.spawn(|| {
                    loop {
                        let idx = next_index.fetch_add(1, Ordering::SeqCst);
                        if idx >= pending.len() { break; }
                        let group_id = pending[idx];
                        let mut wg = Workgroup::new(
                            device,
                            &cmd.pipeline_stage,
                            group_id,
                            cmd.num_groups,
                            base_objects.clone(),
                        );
                        device.notify_workgroup_begin(&wg);
                        wg.run(device);
                        device.notify_workgroup_complete(&wg);
                    }
                });
            }
        });

        device.notify_dispatch_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Builder as AsmBuilder;
    use crate::module::Module;
    use std::collections::HashMap as StdHashMap;

    /// Vector-add scenario: `C[x] = A[x] + B[x]` over N invocations, group
    /// size (1,1,1).
    #[test]
    fn vector_add_s1() {
        let device = Device::new();
        let n: u32 = 256;

        let mut asm = AsmBuilder::new();
        let uint_ty = asm.type_int(32, false);
        let uint3_ty = asm.type_vector(uint_ty, 3);
        let uint_ptr_input = asm.type_pointer(spirv_headers::StorageClass::Input, uint3_ty);
        let gid_var = asm.builtin_input_variable(uint_ptr_input, spirv_headers::BuiltIn::GlobalInvocationId);

        let rt_arr = asm.type_runtime_array(uint_ty, 4);
        let block_ty = asm.type_struct(&[(rt_arr, 0)]);
        let block_ptr = asm.type_pointer(spirv_headers::StorageClass::StorageBuffer, block_ty);
        let a_var = asm.buffer_variable(block_ptr, 0, 0);
        let b_var = asm.buffer_variable(block_ptr, 0, 1);
        let c_var = asm.buffer_variable(block_ptr, 0, 2);

        let uint_ptr_input_scalar = asm.type_pointer(spirv_headers::StorageClass::Input, uint_ty);
        let uint_ptr_sb = asm.type_pointer(spirv_headers::StorageClass::StorageBuffer, uint_ty);
        let zero = asm.constant_u32(uint_ty, 0);

        let func = asm.begin_function_void();
        let gid_ptr = asm.op(spirv_headers::Op::AccessChain, uint_ptr_input_scalar, &[gid_var, zero]);
        let gid = asm.op(spirv_headers::Op::Load, uint_ty, &[gid_ptr]);
        let a_ptr = asm.op(spirv_headers::Op::AccessChain, uint_ptr_sb, &[a_var, zero, gid]);
        let a_val = asm.op(spirv_headers::Op::Load, uint_ty, &[a_ptr]);
        let b_ptr = asm.op(spirv_headers::Op::AccessChain, uint_ptr_sb, &[b_var, zero, gid]);
        let b_val = asm.op(spirv_headers::Op::Load, uint_ty, &[b_ptr]);
        let sum = asm.op(spirv_headers::Op::IAdd, uint_ty, &[a_val, b_val]);
        let c_ptr = asm.op(spirv_headers::Op::AccessChain, uint_ptr_sb, &[c_var, zero, gid]);
        asm.op_void(spirv_headers::Op::Store, &[c_ptr, sum]);
        asm.op_return();
        asm.end_function();
        asm.entry_point(spirv_headers::ExecutionModel::GLCompute, func, "main", &[gid_var]);
        asm.local_size(func, 1, 1, 1);

        let module = Arc::new(Module::from_binary(&asm.finish()).unwrap());
        let stage = Arc::new(PipelineStage::new(
            &device, module, "main", spirv_headers::ExecutionModel::GLCompute, &StdHashMap::new(),
        ).unwrap());

        let a_addr = device.global_memory().allocate_zeroed(4 * n as usize);
        let b_addr = device.global_memory().allocate_zeroed(4 * n as usize);
        let c_addr = device.global_memory().allocate_zeroed(4 * n as usize);
        for i in 0..n {
            device.global_memory().store(a_addr + (i as u64) * 4, 4, &i.to_ne_bytes());
            let b_val = 42u32 + 3 * i;
            device.global_memory().store(b_addr + (i as u64) * 4, 4, &b_val.to_ne_bytes());
        }

        let mut cmd = DispatchCommand::new(stage, Dim3::new(n, 1, 1));
        cmd.bind(0, 0, a_addr);
        cmd.bind(0, 1, b_addr);
        cmd.bind(0, 2, c_addr);
        DispatchExecutor::run(&device, &cmd);

        for i in 0..n {
            let mut out = [0u8; 4];
            device.global_memory().load(&mut out, c_addr + (i as u64) * 4, 4);
            assert_eq!(u32::from_ne_bytes(out), 42 + 4 * i, "mismatch at index {}", i);
        }
        assert_eq!(device.error_count(), 0);
    }
}
