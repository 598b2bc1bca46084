//! # A software emulator for SPIR-V compute shaders.
//!
//! This crate models a Vulkan-style compute device well enough to execute a
//! compiled SPIR-V module's `GLCompute` entry points in software: it parses
//! the binary into an in-memory [`Module`](module::Module), specializes one
//! entry point into a [`PipelineStage`](stage::PipelineStage), and dispatches
//! it across a thread pool with [`DispatchExecutor`](dispatch::DispatchExecutor).
//! Every work-item in every workgroup gets its own
//! [`Invocation`](interp::Invocation) interpreter instance; workgroups
//! barrier-synchronize their invocations and run independently of one
//! another, same as a real device's compute units.
//!
//! ## What this crate does not do
//!
//! No rasterization, no image sampling, no subgroup operations or atomics,
//! no vendor-exact transcendental rounding, and no attempt at throughput —
//! this is a correctness-first reference executor, not a fast one. See
//! `DESIGN.md` for the full list of intentional omissions.
//!
//! ## Minimal usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use spirv_emu::device::Device;
//! use spirv_emu::dim3::Dim3;
//! use spirv_emu::dispatch::{DispatchCommand, DispatchExecutor};
//! use spirv_emu::module::Module;
//! use spirv_emu::parse::SpirvBinary;
//! use spirv_emu::stage::PipelineStage;
//!
//! let bin = SpirvBinary::from(std::fs::read("shader.spv")?.as_slice());
//! let module = Arc::new(Module::from_binary(&bin)?);
//! let device = Device::new();
//! let stage = Arc::new(PipelineStage::new(
//!     &device, module, "main", spirv_headers::ExecutionModel::GLCompute, &Default::default(),
//! )?);
//! let mut cmd = DispatchCommand::new(stage, Dim3::new(64, 1, 1));
//! cmd.bind(0, 0, some_buffer_addr);
//! DispatchExecutor::run(&device, &cmd);
//! # Ok::<(), spirv_emu::error::Error>(())
//! ```
pub mod arith;
#[cfg(any(test, feature = "asm"))]
pub mod asm;
pub mod consts;
pub mod device;
pub mod dim3;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod interp;
pub mod memory;
pub mod module;
pub mod object;
pub mod observer;
pub mod parse;
pub mod stage;
pub mod ty;
pub mod workgroup;

pub use device::Device;
pub use dim3::Dim3;
pub use dispatch::{DescriptorSetMap, DispatchCommand, DispatchExecutor};
pub use error::{Error, Result};
pub use module::Module;
pub use object::Object;
pub use parse::SpirvBinary;
pub use stage::PipelineStage;
pub use ty::Type;
