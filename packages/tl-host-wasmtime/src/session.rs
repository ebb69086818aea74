use wasmtime::{Func, Memory, Store, Table};

use crate::error::HostResult;
use crate::guest::{resolve_prime_mover, HostState};

/// Bytes reserved for the guest's opaque interpreter record. The guest ABI
/// fixes the true size (168 as of this writing); the reservation is a
/// generous round number so ABI drift does not silently overlap the next
/// region.
pub const INTERP_RECORD_SIZE: u32 = 256;

/// Size of the pending-expression slot, one guest pointer.
pub const PTR_SIZE: u32 = 4;

/// Registration key under which the continuation is handed to the guest.
pub const PRIME_MOVER_NAME: &str = "PRIME_MOVER";

/// Addresses of the session state placed in guest memory at startup, plus
/// the resolved continuation identity. Allocated once; lives for the whole
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLayout {
    /// Address of the interpreter session record.
    pub interp: u32,
    /// Address of the slot holding the most recently read expression.
    pub expr_slot: u32,
    /// Address of the NUL-terminated registration name.
    pub name: u32,
    /// Index of the prime-mover continuation in the guest function table.
    pub prime_mover: u32,
}

impl SessionLayout {
    /// Lay out the session state in guest memory.
    ///
    /// Order matters: the interpreter record, expression slot and name
    /// string are placed contiguously before any guest call, the watermark
    /// is aligned for whatever the guest allocates next, and only then is
    /// the prime mover resolved. The caller invokes the guest's
    /// session-initialize entry point afterwards.
    pub fn bootstrap(
        store: &mut Store<HostState>,
        memory: Memory,
        table: Table,
        main_k: Func,
    ) -> HostResult<Self> {
        let mut alloc = store.data().alloc;
        let interp = alloc.allocate(&mut *store, memory, INTERP_RECORD_SIZE)?.base;
        let expr_slot = alloc.allocate(&mut *store, memory, PTR_SIZE)?.base;

        let name_len = PRIME_MOVER_NAME.len() as u32 + 1;
        let name = alloc.allocate(&mut *store, memory, name_len)?.base;
        let mut encoded = PRIME_MOVER_NAME.as_bytes().to_vec();
        encoded.push(0);
        memory.write(&mut *store, name as usize, &encoded)?;

        alloc.align8(&mut *store, memory)?;
        store.data_mut().alloc = alloc;

        let prime_mover = resolve_prime_mover(store, table, main_k)?;
        Ok(Self {
            interp,
            expr_slot,
            name,
            prime_mover,
        })
    }
}
