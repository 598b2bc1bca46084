//! Workgroup: owns workgroup-scope memory and the invocation set
//! for one group id, and drives the barrier-synchronized step loop.
use std::sync::Arc;

use spirv_headers::StorageClass;

use crate::device::Device;
use crate::dim3::Dim3;
use crate::error::Error;
use crate::interp::{Invocation, State};
use crate::memory::{Memory, MemoryScope};
use crate::object::Object;
use crate::stage::PipelineStage;

/// One workgroup's invocation set plus the workgroup-scope `Memory` they
/// share. A single workgroup is never split across worker threads, so
/// nothing here needs to be `Send`-shared beyond the `Device` reference.
pub struct Workgroup<'a> {
    group_id: Dim3,
    local_memory: Arc<Memory>,
    invocations: Vec<Invocation<'a>>,
}
impl<'a> Workgroup<'a> {
    /// Allocates workgroup-scope storage for every `Workgroup`-storage-class
    /// module variable, then creates `group_size.x*y*z` invocations in
    /// z-major, y-middle, x-fastest order.
    /// `base_objects` is the per-dispatch initial-objects vector with buffer
    /// variables already resolved against the descriptor map; each
    /// invocation gets its own clone plus the workgroup-variable pointers.
    pub fn new(
        device: &'a Device,
        stage: &PipelineStage,
        group_id: Dim3,
        num_groups: Dim3,
        base_objects: Vec<Option<Object>>,
    ) -> Workgroup<'a> {
        let local_memory = Arc::new(Memory::new(MemoryScope::Workgroup));
        let module = stage.module();

        let mut wg_objects = base_objects;
        for var in &module.variables {
            if var.store_cls != StorageClass::Workgroup { continue; }
            let ptr_ty = module.ty(var.ptr_ty).expect("pointer type of workgroup variable must exist").clone();
            let pointee = ptr_ty.as_pointer().expect("workgroup variable type must be a pointer").pointee_ty().clone();
            let addr = local_memory.allocate_zeroed(pointee.nbyte());
            let mut ptr_obj = Object::new_zeroed(ptr_ty);
            ptr_obj.set::<u64>(0, addr);
            if (var.id as usize) >= wg_objects.len() {
                wg_objects.resize_with(var.id as usize + 1, || None);
            }
            wg_objects[var.id as usize] = Some(ptr_obj);
        }

        let entry_id = stage.entry_id();
        let group_size = stage.group_size;
        let invocations = crate::dim3::enumerate(group_size)
            .map(|local_id| {
                let global_id = local_id + group_id * group_size;
                Invocation::new(
                    device,
                    Arc::clone(module),
                    entry_id,
                    wg_objects.clone(),
                    Some(Arc::clone(&local_memory)),
                    global_id,
                    local_id,
                    group_id,
                    num_groups,
                )
            })
            .collect();

        Workgroup { group_id, local_memory, invocations }
    }

    pub fn group_id(&self) -> Dim3 { self.group_id }
    pub fn local_memory(&self) -> &Memory { &self.local_memory }
    pub fn len(&self) -> usize { self.invocations.len() }
    pub fn is_empty(&self) -> bool { self.invocations.is_empty() }

    /// Drives every invocation to completion, honouring barriers.
    /// Reports and aborts (via `Device`,
    /// which calls `process::exit` for fatal errors) on barrier divergence.
    pub fn run(&mut self, device: &Device) {
        loop {
            loop {
                let next_ready = self.invocations.iter().position(|inv| inv.state() == State::Ready);
                match next_ready {
                    Some(i) => {
                        while self.invocations[i].state() == State::Ready {
                            self.invocations[i].step();
                        }
                    }
                    None => break,
                }
            }

            let n_barrier = self.invocations.iter().filter(|inv| inv.state() == State::Barrier).count();
            if n_barrier == 0 {
                break;
            } else if n_barrier == self.invocations.len() {
                device.notify_workgroup_barrier(self);
                for inv in &mut self.invocations {
                    inv.clear_barrier();
                }
            } else {
                device.report_error(
                    Error::StructuralError(format!(
                        "barrier divergence in workgroup {:?}: {} of {} invocations reached the barrier",
                        self.group_id, n_barrier, self.invocations.len()
                    )),
                    true,
                );
                return;
            }
        }
    }
}
