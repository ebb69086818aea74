use wasmtime::{AsContextMut, Memory};

use crate::error::{HostError, HostResult};

/// WASM page size in bytes.
pub const PAGE: u32 = 65536;

/// A contiguous range `[base, base + size)` of guest linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u32,
    pub size: u32,
}

/// Bump allocator over the guest's linear memory.
///
/// The watermark is the next free offset; it only ever moves forward. Regions
/// are never reclaimed — the guest's `release_heap` is a no-op by design. The
/// allocator is seeded from the guest's `__heap_base` export after
/// instantiation and before the first guest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BumpAllocator {
    watermark: u32,
}

impl BumpAllocator {
    pub fn seed(&mut self, base: u32) {
        self.watermark = base;
    }

    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    /// Hand out `min_size` bytes at the current watermark, growing the
    /// backing memory if the new watermark runs past it.
    pub fn allocate(
        &mut self,
        mut ctx: impl AsContextMut,
        memory: Memory,
        min_size: u32,
    ) -> HostResult<MemoryRegion> {
        let base = self.watermark;
        self.watermark = base
            .checked_add(min_size)
            .ok_or(HostError::WatermarkOverflow { size: min_size })?;
        self.ensure_backing(&mut ctx, memory)?;
        Ok(MemoryRegion {
            base,
            size: min_size,
        })
    }

    /// Round the watermark up to the next 8-byte boundary and make sure the
    /// backing memory covers it.
    pub fn align8(&mut self, mut ctx: impl AsContextMut, memory: Memory) -> HostResult<()> {
        self.watermark = (self.watermark + 7) & !7;
        self.ensure_backing(&mut ctx, memory)
    }

    /// Grow `memory` by exactly the pages needed to cover the watermark.
    fn ensure_backing(&self, mut ctx: impl AsContextMut, memory: Memory) -> HostResult<()> {
        let need = u64::from(self.watermark).div_ceil(u64::from(PAGE));
        let have = memory.size(&ctx);
        if need > have {
            let delta = need - have;
            memory
                .grow(&mut ctx, delta)
                .map_err(|_| HostError::MemoryGrowth { pages: delta })?;
            tracing::debug!(pages = need, grown_by = delta, "guest memory grown");
        }
        Ok(())
    }
}
