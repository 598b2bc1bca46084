//! Error kinds reported by the module loader and the interpreter.
use std::error;
use std::fmt;

/// The four error kinds named by the emulator's error-handling design: two
/// value-level kinds the interpreter reports and recovers from, one
/// structural kind that aborts, and the host-facing kind for a bad binary or
/// a plugin that failed to load. `CorruptedSpirv`/`UnsupportedSpirv` are
/// `HostError`'s concrete shapes for this crate's own module builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Out-of-bounds or released-buffer load/store/map. Recoverable: loads
    /// zero-fill, stores no-op.
    InvalidAccess { addr: u64, len: usize, reason: &'static str },
    /// `AccessChain`/`PtrAccessChain` on a buffer variable with no descriptor
    /// binding. Recoverable: yields a null-address pointer.
    MissingDescriptor { set: u32, binding: u32 },
    /// Unknown opcode, unhandled operand width, bad storage class,
    /// `Unreachable` executed, or barrier-divergence. Not recoverable.
    StructuralError(String),
    /// Bad shader binary or plugin load failure, reported to the host.
    HostError(String),
    /// The SPIR-V word stream is truncated, mis-sized, or fails the magic
    /// number / version check.
    CorruptedSpirv(String),
    /// A well-formed module uses a SPIR-V feature this crate does not model.
    /// Out of scope: subgroup ops, atomics, tessellation/geometry stages,
    /// image sampling.
    UnsupportedSpirv(String),
}
impl Error {
    /// Value-level errors stay inside the interpreter: they are
    /// reported via `Device` and execution continues with a defined
    /// fallback. Everything else aborts the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InvalidAccess { .. } | Error::MissingDescriptor { .. })
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidAccess { addr, len, reason } =>
                write!(f, "invalid access of {} bytes at 0x{:016x}: {}", len, addr, reason),
            Error::MissingDescriptor { set, binding } =>
                write!(f, "no descriptor bound for set {} binding {}", set, binding),
            Error::StructuralError(msg) => write!(f, "structural error: {}", msg),
            Error::HostError(msg) => write!(f, "host error: {}", msg),
            Error::CorruptedSpirv(msg) => write!(f, "spirv binary is corrupted: {}", msg),
            Error::UnsupportedSpirv(msg) => write!(f, "spirv binary used unsupported feature: {}", msg),
        }
    }
}
impl error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
