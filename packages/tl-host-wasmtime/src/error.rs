use thiserror::Error;

/// Errors surfaced by the host while driving the guest module.
///
/// Startup errors (`MissingExport`, `PrimeMoverNotFound`) mean the scheduler
/// is never started. `MemoryGrowth` and `Guest` are unrecoverable at runtime:
/// the guest has no fallback allocation strategy and a non-trap fault leaves
/// the interpreter in an unknown state. Guest-reported evaluation errors are
/// *not* represented here — they are read out of the guest's error slot and
/// printed, then the loop continues.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("guest export `{name}` is missing or has the wrong type")]
    MissingExport { name: &'static str },

    #[error("prime mover not present in the guest function table")]
    PrimeMoverNotFound,

    #[error("guest memory growth of {pages} page(s) refused")]
    MemoryGrowth { pages: u64 },

    #[error("watermark overflow while allocating {size} bytes")]
    WatermarkOverflow { size: u32 },

    #[error("guest memory access out of bounds")]
    MemoryAccess(#[from] wasmtime::MemoryAccessError),

    #[error("guest fault: {0}")]
    Guest(wasmtime::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// Recover a `HostError` raised inside an import closure, or wrap anything
/// else (compile errors, non-trap faults) as a guest fault.
pub(crate) fn map_guest_error(err: wasmtime::Error) -> HostError {
    match err.downcast::<HostError>() {
        Ok(host) => host,
        Err(other) => HostError::Guest(other),
    }
}
