use std::ffi::c_void;

use tokio::sync::mpsc::UnboundedSender;
use wasmtime::{
    Caller, Engine, Func, Linker, Memory, Module, Ref, Store, Table, Trap, TypedFunc, Val,
};

use crate::alloc::{BumpAllocator, PAGE};
use crate::console::Console;
use crate::error::{map_guest_error, HostError, HostResult};
use crate::protocol::OutboundMessage;
use crate::session::SessionLayout;

/// Guest heap requests are rounded up to this many bytes to amortize growth
/// calls. The guest allocates small objects out of each chunk itself.
pub const HEAP_CHUNK: u32 = 32 * PAGE;

/// Result of the guest's read-expression entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete expression was parsed; the value is its guest address.
    Expression(i32),
    /// The guest ran out of buffered input mid-parse. Re-invoke the same
    /// call after more input has been fed.
    NeedMoreData,
}

/// Result of one guest apply step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Progress,
    NeedMoreData,
}

/// The guest entry points the scheduler drives, as a seam.
///
/// `WasmGuest` is the real implementation; tests script a `MockGuest`
/// against the same surface. Every method runs synchronously to completion —
/// "blocking for input" is modeled by the tri-state outcomes, never by an
/// actual blocking call.
pub trait GuestControl {
    /// Clear per-iteration interpreter state (error slot, value/cont stacks).
    fn clear_state(&mut self) -> HostResult<()>;

    /// Give the guest a garbage-collection opportunity. A no-op when the
    /// guest does not export the hook.
    fn collect_garbage(&mut self) -> HostResult<()>;

    /// Push one input byte into the guest's read buffer. Returns `true` if
    /// the buffer is full and the byte was rejected.
    fn feed_byte(&mut self, byte: u8) -> HostResult<bool>;

    /// Invoke the read-expression entry point.
    fn read_expression(&mut self) -> HostResult<ReadOutcome>;

    /// Schedule evaluation of `expr` with the prime-mover continuation.
    fn begin_apply(&mut self, expr: i32) -> HostResult<()>;

    /// Run one step of the guest's apply loop.
    fn apply_next(&mut self) -> HostResult<StepOutcome>;

    /// Read the guest's error slot; zero means clear.
    fn last_error(&mut self) -> HostResult<i32>;

    /// Print a guest value through the output path.
    fn print_value(&mut self, value: i32) -> HostResult<()>;

    /// False once the guest has signaled termination.
    fn running(&self) -> bool;

    fn console(&mut self) -> &mut Console;
}

/// Host-side state reachable from import closures via the store.
pub struct HostState {
    pub console: Console,
    pub alloc: BumpAllocator,
    pub running: bool,
}

impl HostState {
    pub fn new(tx: UnboundedSender<OutboundMessage>) -> Self {
        Self {
            console: Console::new(tx),
            alloc: BumpAllocator::default(),
            running: true,
        }
    }
}

fn caller_memory(caller: &mut Caller<'_, HostState>) -> HostResult<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or(HostError::MissingExport { name: "memory" })
}

/// Register the `tl` import module the guest links against.
///
/// All six imports execute synchronously within one scheduler resumption and
/// never suspend. `new_heap` may grow linear memory; nothing here caches a
/// raw view across calls.
pub fn add_to_linker(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap("tl", "fflush", |mut caller: Caller<'_, HostState>, _fd: i32| {
        caller.data_mut().console.flush();
    })?;

    // The guest writes all streams through here; fd is advisory.
    linker.func_wrap(
        "tl",
        "fputc",
        |mut caller: Caller<'_, HostState>, _fd: i32, c: i32| {
            caller.data_mut().console.put_byte(c as u8);
        },
    )?;

    // Linked but never invoked; reads go through the read-expression export.
    linker.func_wrap("tl", "fgetc", |_caller: Caller<'_, HostState>, fd: i32| -> i32 {
        tracing::warn!(fd, "guest called fgetc, which has no input path");
        -1
    })?;

    // Advisory: the guest cannot truly halt itself, so the host records the
    // exit and promises not to call back in.
    linker.func_wrap("tl", "halt", |mut caller: Caller<'_, HostState>, code: i32| {
        let state = caller.data_mut();
        state.running = false;
        state
            .console
            .sysprint(&format!("\nProcess exited with code {code}"));
    })?;

    linker.func_wrap(
        "tl",
        "new_heap",
        |mut caller: Caller<'_, HostState>,
         min: i32,
         where_ptr: i32,
         size_ptr: i32|
         -> wasmtime::Result<()> {
            let memory = caller_memory(&mut caller)?;
            let amount = (min as u32).max(HEAP_CHUNK);
            // The allocator is Copy; work on a scratch copy so the caller
            // borrow is free for the memory operations, then write it back.
            let mut alloc = caller.data().alloc;
            let region = alloc.allocate(&mut caller, memory, amount)?;
            caller.data_mut().alloc = alloc;
            memory.write(
                &mut caller,
                where_ptr as usize,
                &(region.base as i32).to_le_bytes(),
            )?;
            memory.write(
                &mut caller,
                size_ptr as usize,
                &(region.size as i32).to_le_bytes(),
            )?;
            tracing::debug!(
                min,
                base = region.base,
                size = region.size,
                "guest heap request served"
            );
            Ok(())
        },
    )?;

    // The guest never actually frees; memory is reclaimed when the instance
    // is dropped.
    linker.func_wrap(
        "tl",
        "release_heap",
        |_caller: Caller<'_, HostState>, _base: i32, _size: i32| {},
    )?;

    Ok(())
}

/// Scan the guest's exported function table for the entry that is
/// reference-equal to `target`, returning its index.
///
/// The guest ABI passes continuations as table indices rather than direct
/// references, so the host must recover the integer identity of the exported
/// prime mover before it can register the continuation. The table is never
/// mutated, so the index is stable for the process lifetime.
pub fn resolve_prime_mover(
    store: &mut Store<HostState>,
    table: Table,
    target: Func,
) -> HostResult<u32> {
    let want = raw_funcref(store, Some(target))?;
    let len = table.size(&*store);
    for i in 0..len {
        let Some(Ref::Func(entry)) = table.get(&mut *store, i) else {
            continue;
        };
        if raw_funcref(store, entry)? == want {
            return Ok(i as u32);
        }
    }
    Err(HostError::PrimeMoverNotFound)
}

fn raw_funcref(store: &mut Store<HostState>, func: Option<Func>) -> HostResult<*mut c_void> {
    // Raw funcref pointers are compared for identity only, never
    // dereferenced.
    let raw = unsafe { Val::FuncRef(func).to_raw(&mut *store) }.map_err(map_guest_error)?;
    Ok(raw.get_funcref())
}

/// The instantiated guest module plus the cached handles and session layout
/// the scheduler needs.
pub struct WasmGuest {
    store: Store<HostState>,
    memory: Memory,
    layout: SessionLayout,
    clear: TypedFunc<i32, ()>,
    gc: Option<TypedFunc<i32, ()>>,
    putc: TypedFunc<i32, i32>,
    read: TypedFunc<(i32, i32), i32>,
    eval_and_then: TypedFunc<(i32, i32, i32, i32, i32), ()>,
    apply: TypedFunc<i32, i32>,
    get_error: TypedFunc<i32, i32>,
    print: TypedFunc<(i32, i32), ()>,
}

fn typed_export<P, R>(
    instance: &wasmtime::Instance,
    store: &mut Store<HostState>,
    name: &'static str,
) -> HostResult<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|_| HostError::MissingExport { name })
}

impl WasmGuest {
    /// Instantiate the guest and run the startup sequence: seed the
    /// allocator from `__heap_base`, lay out the session state, resolve the
    /// prime mover, then call the guest's session-initialize entry point.
    ///
    /// Any failure here means the scheduler is never started.
    pub fn instantiate(
        engine: &Engine,
        module: &Module,
        tx: UnboundedSender<OutboundMessage>,
    ) -> HostResult<Self> {
        let mut linker = Linker::new(engine);
        add_to_linker(&mut linker).map_err(HostError::Guest)?;
        let mut store = Store::new(engine, HostState::new(tx));
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(map_guest_error)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(HostError::MissingExport { name: "memory" })?;
        let table = instance
            .get_table(&mut store, "__indirect_function_table")
            .ok_or(HostError::MissingExport {
                name: "__indirect_function_table",
            })?;
        let main_k = instance
            .get_func(&mut store, "_main_k")
            .ok_or(HostError::MissingExport { name: "_main_k" })?;
        let heap_base = instance
            .get_global(&mut store, "__heap_base")
            .and_then(|g| g.get(&mut store).i32())
            .ok_or(HostError::MissingExport { name: "__heap_base" })?;

        let init = typed_export::<i32, ()>(&instance, &mut store, "tl_interp_init")?;
        let clear = typed_export::<i32, ()>(&instance, &mut store, "tl_wasm_clear_state")?;
        let putc = typed_export::<i32, i32>(&instance, &mut store, "tl_wasm_putc")?;
        let read = typed_export::<(i32, i32), i32>(&instance, &mut store, "tl_read")?;
        let eval_and_then = typed_export::<(i32, i32, i32, i32, i32), ()>(
            &instance,
            &mut store,
            "_tl_eval_and_then",
        )?;
        let apply = typed_export::<i32, i32>(&instance, &mut store, "tl_apply_next")?;
        let get_error = typed_export::<i32, i32>(&instance, &mut store, "tl_wasm_get_error")?;
        let print = typed_export::<(i32, i32), ()>(&instance, &mut store, "tl_print")?;
        let gc = instance.get_typed_func::<i32, ()>(&mut store, "tl_gc").ok();

        store.data_mut().alloc.seed(heap_base as u32);
        let layout = SessionLayout::bootstrap(&mut store, memory, table, main_k)?;
        tracing::info!(
            interp = layout.interp,
            expr_slot = layout.expr_slot,
            name = layout.name,
            prime_mover = layout.prime_mover,
            "session state laid out"
        );

        init.call(&mut store, layout.interp as i32)
            .map_err(map_guest_error)?;

        Ok(Self {
            store,
            memory,
            layout,
            clear,
            gc,
            putc,
            read,
            eval_and_then,
            apply,
            get_error,
            print,
        })
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    fn interp(&self) -> i32 {
        self.layout.interp as i32
    }
}

impl GuestControl for WasmGuest {
    fn clear_state(&mut self) -> HostResult<()> {
        let interp = self.interp();
        self.clear
            .call(&mut self.store, interp)
            .map_err(map_guest_error)
    }

    fn collect_garbage(&mut self) -> HostResult<()> {
        let interp = self.interp();
        if let Some(gc) = &self.gc {
            gc.call(&mut self.store, interp).map_err(map_guest_error)?;
        }
        Ok(())
    }

    fn feed_byte(&mut self, byte: u8) -> HostResult<bool> {
        let full = self
            .putc
            .call(&mut self.store, i32::from(byte))
            .map_err(map_guest_error)?;
        Ok(full > 0)
    }

    fn read_expression(&mut self) -> HostResult<ReadOutcome> {
        let interp = self.interp();
        match self.read.call(&mut self.store, (interp, 0)) {
            Ok(addr) => {
                // Park the expression address where the guest ABI expects it.
                self.memory.write(
                    &mut self.store,
                    self.layout.expr_slot as usize,
                    &addr.to_le_bytes(),
                )?;
                Ok(ReadOutcome::Expression(addr))
            }
            // The guest traps, by construction, when its input buffer runs
            // dry mid-parse; the aborted parse is restarted from scratch on
            // the next call, so the host re-feeds uncommitted input.
            Err(err) if err.downcast_ref::<Trap>().is_some() => Ok(ReadOutcome::NeedMoreData),
            Err(err) => Err(map_guest_error(err)),
        }
    }

    fn begin_apply(&mut self, expr: i32) -> HostResult<()> {
        let interp = self.interp();
        let prime_mover = self.layout.prime_mover as i32;
        let name = self.layout.name as i32;
        self.eval_and_then
            .call(&mut self.store, (interp, expr, 0, prime_mover, name))
            .map_err(map_guest_error)
    }

    fn apply_next(&mut self) -> HostResult<StepOutcome> {
        let interp = self.interp();
        match self.apply.call(&mut self.store, interp) {
            Ok(0) => Ok(StepOutcome::Done),
            Ok(_) => Ok(StepOutcome::Progress),
            Err(err) if err.downcast_ref::<Trap>().is_some() => Ok(StepOutcome::NeedMoreData),
            Err(err) => Err(map_guest_error(err)),
        }
    }

    fn last_error(&mut self) -> HostResult<i32> {
        let interp = self.interp();
        self.get_error
            .call(&mut self.store, interp)
            .map_err(map_guest_error)
    }

    fn print_value(&mut self, value: i32) -> HostResult<()> {
        let interp = self.interp();
        self.print
            .call(&mut self.store, (interp, value))
            .map_err(map_guest_error)
    }

    fn running(&self) -> bool {
        self.store.data().running
    }

    fn console(&mut self) -> &mut Console {
        &mut self.store.data_mut().console
    }
}
