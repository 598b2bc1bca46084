//! Pipeline Stage: specializes a `Module` for one entry point.
use std::collections::HashMap;
use std::sync::Arc;

use crate::device::Device;
use crate::dim3::Dim3;
use crate::error::{Error, Result};
use crate::module::{Id, Module};
use crate::object::Object;

/// Specialization-constant override, identified by the `SpecId` decoration
/// (a specialization constant).
pub type SpecId = u32;

/// A `Module` specialized for one entry point: spec-constant overrides
/// already folded in, `OpSpecConstantOp`s already evaluated, workgroup size
/// already resolved.
pub struct PipelineStage {
    module: Arc<Module>,
    entry_id: Id,
    /// Module's constant-result vector, overwritten for spec-const ids and
    /// evaluated spec-const-ops. Copied into every invocation's
    /// initial-objects vector.
    pub(crate) objects: Vec<Option<Object>>,
    pub group_size: Dim3,
}
impl PipelineStage {
    pub fn module(&self) -> &Arc<Module> { &self.module }
    pub fn entry_id(&self) -> Id { self.entry_id }

    pub fn new(
        device: &Device,
        module: Arc<Module>,
        entry_name: &str,
        exec_model: spirv_headers::ExecutionModel,
        overrides: &HashMap<SpecId, Object>,
    ) -> Result<PipelineStage> {
        let entry_id = module.entry_function(entry_name, exec_model).ok_or_else(|| {
            Error::HostError(format!("no entry point '{}' for {:?}", entry_name, exec_model))
        })?;

        let mut objects = module.constants.clone();
        for (spec_id, value) in overrides {
            if let Some(&result_id) = module.spec_const_ids.get(spec_id) {
                objects[result_id as usize] = Some(value.clone());
            }
        }

        // Evaluate OpSpecConstantOp instructions with a throw-away
        // single-shot invocation whose only job is to execute that one op
        //
        for (result_id, instr) in &module.spec_const_ops {
            let value = crate::interp::eval_spec_const_op(device, &module, &objects, instr)?;
            objects[*result_id as usize] = Some(value);
        }

        let mut group_size = module.local_sizes.get(&entry_id).copied().map(|(x, y, z)| Dim3::new(x, y, z)).unwrap_or_default();
        if let Some(wg_id) = module.workgroup_size_const {
            if let Some(Some(obj)) = objects.get(wg_id as usize) {
                group_size = Dim3::new(obj.get::<u32>(0), obj.get::<u32>(1), obj.get::<u32>(2));
            }
        }

        Ok(PipelineStage { module, entry_id, objects, group_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Builder as AsmBuilder;

    #[test]
    fn spec_constant_default_and_override() {
        let device = Device::new();
        let mut asm = AsmBuilder::new();
        let uint_ty = asm.type_int(32, false);
        let k = asm.spec_constant_u32(uint_ty, 1, Some(0));
        let f = asm.begin_function_void();
        asm.op_return();
        asm.end_function();
        asm.entry_point(spirv_headers::ExecutionModel::GLCompute, f, "main", &[]);
        asm.local_size(f, 1, 1, 1);
        let module = Arc::new(Module::from_binary(&asm.finish()).unwrap());

        let stage = PipelineStage::new(&device, module.clone(), "main", spirv_headers::ExecutionModel::GLCompute, &HashMap::new()).unwrap();
        assert_eq!(stage.objects[k as usize].as_ref().unwrap().get::<u32>(0), 1);

        let mut overrides = HashMap::new();
        let mut v = Object::new_zeroed(crate::ty::Type::int(4, false));
        v.set::<u32>(0, 3);
        overrides.insert(0u32, v);
        let stage = PipelineStage::new(&device, module, "main", spirv_headers::ExecutionModel::GLCompute, &overrides).unwrap();
        assert_eq!(stage.objects[k as usize].as_ref().unwrap().get::<u32>(0), 3);
    }
}
