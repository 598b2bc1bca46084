//! Device: owns the global `Memory` and the observer registry, and
//! serializes error reporting across worker threads.
use std::cell::Cell;
use std::io::Write;
use std::sync::Mutex;

use log::error;

use crate::dim3::Dim3;
use crate::env::RunnerConfig;
use crate::error::Error;
use crate::memory::{Memory, MemoryScope};
use crate::module::Id;
use crate::observer::Observer;
use crate::workgroup::Workgroup;

thread_local! {
    /// Per-worker-thread context used to annotate error reports (error
    /// output format). `None` on the host thread.
    static WORKER_CONTEXT: Cell<Option<WorkerContext>> = Cell::new(None);
}

#[derive(Clone, Copy)]
struct WorkerContext {
    entry_point_id: Id,
    global_id: (u32, u32, u32),
    local_id: (u32, u32, u32),
    group_id: (u32, u32, u32),
}

/// Sets the calling thread's worker context for the duration of `f`,
/// restoring the previous value afterwards. Used by the dispatch executor
/// around each invocation `step()` so `Device::report_error` can annotate
/// value-level errors with "where" they happened without threading an
/// explicit argument through every interpreter call (mirrors the source's
/// `thread_local CurrentInvocation`/`CurrentGroup`).
pub fn with_worker_context<R>(
    entry_point_id: Id,
    global_id: (u32, u32, u32),
    local_id: (u32, u32, u32),
    group_id: (u32, u32, u32),
    f: impl FnOnce() -> R,
) -> R {
    let ctx = WorkerContext { entry_point_id, global_id, local_id, group_id };
    let prev = WORKER_CONTEXT.with(|c| c.replace(Some(ctx)));
    let r = f();
    WORKER_CONTEXT.with(|c| c.set(prev));
    r
}

pub struct Device {
    global_memory: Memory,
    observers: Vec<Box<dyn Observer>>,
    error_out: Mutex<()>,
    config: RunnerConfig,
    error_count: std::sync::atomic::AtomicU64,
}
impl Device {
    pub fn new() -> Device {
        let config = RunnerConfig::from_env();
        for path in &config.plugin_paths {
            log::info!("TALVOS_PLUGINS named '{}'; dynamic plugin loading is not supported by this build, register an Observer in-process instead", path);
        }
        Device {
            global_memory: Memory::new(MemoryScope::Device),
            observers: Vec::new(),
            error_out: Mutex::new(()),
            config,
            error_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn global_memory(&self) -> &Memory { &self.global_memory }
    pub fn config(&self) -> &RunnerConfig { &self.config }
    pub fn error_count(&self) -> u64 { self.error_count.load(std::sync::atomic::Ordering::SeqCst) }

    pub fn register_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }
    pub fn any_observer_unsafe(&self) -> bool {
        self.observers.iter().any(|o| !o.is_thread_safe())
    }

    /// Serializes to a mutex-guarded stderr stream; annotates
    /// with the current worker's entry point, invocation/group ids and
    /// disassembled current instruction when called from a worker thread.
    /// Aborts the process when `fatal`.
    pub fn report_error(&self, err: Error, fatal: bool) {
        self.report_error_with_instr(err, fatal, None)
    }

    pub fn report_error_with_instr(&self, err: Error, fatal: bool, current_instr: Option<String>) {
        self.error_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        error!("{}", err);

        let _guard = self.error_out.lock().unwrap();
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr);
        let _ = writeln!(stderr, "{}", err);

        let ctx = WORKER_CONTEXT.with(|c| c.get());
        match ctx {
            Some(ctx) => {
                let _ = writeln!(stderr, "    Entry point: %{}", ctx.entry_point_id);
                let _ = writeln!(
                    stderr,
                    "    Invocation: Global{:?} Local{:?} Group{:?}",
                    ctx.global_id, ctx.local_id, ctx.group_id
                );
                if let Some(instr) = current_instr {
                    let _ = writeln!(stderr, "      {}", instr);
                }
            }
            None => {
                let _ = writeln!(stderr, "    <origin unknown>");
            }
        }
        let _ = writeln!(stderr);
        drop(_guard);

        if fatal {
            std::process::exit(1);
        }
    }

    pub fn notify_dispatch_begin(&self) { for o in &self.observers { o.dispatch_begin(); } }
    pub fn notify_dispatch_complete(&self) { for o in &self.observers { o.dispatch_complete(); } }
    pub fn notify_workgroup_begin(&self, g: &Workgroup) { for o in &self.observers { o.workgroup_begin(g); } }
    pub fn notify_workgroup_barrier(&self, g: &Workgroup) { for o in &self.observers { o.workgroup_barrier(g); } }
    pub fn notify_workgroup_complete(&self, g: &Workgroup) { for o in &self.observers { o.workgroup_complete(g); } }
    pub fn notify_invocation_begin(&self, id: Dim3) { for o in &self.observers { o.invocation_begin(id.as_tuple()); } }
    pub fn notify_invocation_complete(&self, id: Dim3) { for o in &self.observers { o.invocation_complete(id.as_tuple()); } }
    pub fn notify_instruction_executed(&self, result_id: Option<Id>) {
        for o in &self.observers { o.instruction_executed(result_id); }
    }
    pub fn notify_memory_load(&self, addr: u64, len: usize, from_host: bool) {
        for o in &self.observers { o.memory_load(addr, len, from_host); }
    }
    pub fn notify_memory_store(&self, addr: u64, len: usize, from_host: bool) {
        for o in &self.observers { o.memory_store(addr, len, from_host); }
    }
    pub fn notify_memory_map(&self, addr: u64, len: usize) { for o in &self.observers { o.memory_map(addr, len); } }
    pub fn notify_memory_unmap(&self, addr: u64) { for o in &self.observers { o.memory_unmap(addr); } }
}
impl Default for Device {
    fn default() -> Device { Device::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_memory_is_usable() {
        let dev = Device::new();
        let addr = dev.global_memory().allocate_zeroed(4);
        dev.global_memory().store(addr, 4, &7u32.to_ne_bytes());
        let mut out = [0u8; 4];
        dev.global_memory().load(&mut out, addr, 4);
        assert_eq!(u32::from_ne_bytes(out), 7);
    }

    #[test]
    fn non_fatal_error_does_not_abort() {
        let dev = Device::new();
        dev.report_error(Error::InvalidAccess { addr: 0, len: 4, reason: "test" }, false);
        assert_eq!(dev.error_count(), 1);
    }
}
