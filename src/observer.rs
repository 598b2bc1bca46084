//! Observer plug-in hooks.
//!
//! The source's ABI loads plug-ins from dynamic libraries via `dlopen`. A
//! portable rewrite can't do that without giving up cross-platform builds,
//! so the design note sanctions trading the `dlopen` boundary for a
//! trait-object registry: `Device::register_observer` takes a
//! `Box<dyn Observer>` instead of a `cdylib` path. `TALVOS_PLUGINS` is still
//! read and logged so a host program knows it asked for dynamic
//! loading this crate doesn't perform.
use crate::module::Id;
use crate::workgroup::Workgroup;

/// Every method has a default no-op body: implementors override only the
/// hooks they care about, exactly as `talvos::Plugin` lets a C++ plug-in
/// subclass a handful of virtuals.
pub trait Observer: Send + Sync {
    /// Whether this observer's hooks may be called concurrently from
    /// multiple worker threads. A `false` here forces the dispatch executor
    /// down to a single worker (`num_threads`).
    fn is_thread_safe(&self) -> bool { true }

    fn dispatch_begin(&self) {}
    fn dispatch_complete(&self) {}
    fn workgroup_begin(&self, _group: &Workgroup) {}
    fn workgroup_barrier(&self, _group: &Workgroup) {}
    fn workgroup_complete(&self, _group: &Workgroup) {}
    fn invocation_begin(&self, _global_id: (u32, u32, u32)) {}
    fn invocation_complete(&self, _global_id: (u32, u32, u32)) {}
    fn instruction_executed(&self, _result_id: Option<Id>) {}
    fn memory_load(&self, _addr: u64, _len: usize, _from_host: bool) {}
    fn memory_store(&self, _addr: u64, _len: usize, _from_host: bool) {}
    fn memory_map(&self, _addr: u64, _len: usize) {}
    fn memory_unmap(&self, _addr: u64) {}
}
