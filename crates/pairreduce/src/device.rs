//! The device-buffer capability.
//!
//! A [`DeviceContext`] is an explicit handle to a compute device. Rather than
//! relying upon global device state, every entry point that runs on a device
//! receives the context, acquires it for the duration of the invocation
//! (via [`DeviceScope`]), and releases it afterwards.
//!
//! All working memory of a device invocation (the output rows and the
//! scratch buffers of the teams) lives in device buffers. Input arrays are
//! currently read in place; in other words, we assume that the device shares
//! the host's address space. [`HostDevice`] is the only implementation that
//! ships with this crate. It is mostly useful for exercising the device code
//! path and for capping the working memory of a calculation.

use crate::Error;
use crate::executor::{Executor, build_schedule, check_output_len, split_output};
use crate::runtime::ExecParams;
use log::{debug, info, warn};
use pairreduce_nostd_internal::{BlockedReduction, PairFormula, TeamScratchLayout, fill_row_block};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// identifies a buffer allocated by a [`DeviceContext`]
pub type BufferId = usize;

pub trait DeviceContext: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the device for use by the calling thread
    fn acquire(&self) -> Result<(), Error>;

    fn release(&self);

    /// The vector widths that the device's kernels were built for.
    ///
    /// `None` means that every width is supported.
    fn supported_widths(&self) -> Option<&[usize]> {
        None
    }

    /// allocate a zero-initialized buffer of `len` f64 elements
    fn alloc(&self, len: usize) -> Result<BufferId, Error>;

    fn free(&self, id: BufferId);

    fn copy_to_device(&self, id: BufferId, src: &[f64]) -> Result<(), Error>;

    fn copy_to_host(&self, id: BufferId, dst: &mut [f64]) -> Result<(), Error>;

    /// Run `kernel` on the device with mutable access to the listed buffers
    /// (in the listed order).
    fn launch(
        &self,
        buffers: &[BufferId],
        kernel: &mut dyn FnMut(&mut [&mut [f64]]),
    ) -> Result<(), Error>;
}

/// Check that a device supports every width in `widths`
pub(crate) fn check_supported_widths(ctx: &dyn DeviceContext, widths: &[usize]) -> Result<(), Error> {
    let Some(supported) = ctx.supported_widths() else {
        return Ok(());
    };
    match widths.iter().copied().find(|w| !supported.contains(w)) {
        Some(width) => Err(Error::unsupported_shape(width, supported.to_vec())),
        None => Ok(()),
    }
}

/// Holds a [`DeviceContext`] for the lifetime of the scope
pub struct DeviceScope<'d> {
    ctx: &'d dyn DeviceContext,
}

impl<'d> DeviceScope<'d> {
    pub fn new(ctx: &'d dyn DeviceContext) -> Result<Self, Error> {
        ctx.acquire()?;
        Ok(Self { ctx })
    }
}

impl<'d> Drop for DeviceScope<'d> {
    fn drop(&mut self) {
        self.ctx.release();
    }
}

/// A device buffer that is freed when it goes out of scope
pub struct DeviceBuffer<'d> {
    ctx: &'d dyn DeviceContext,
    id: BufferId,
    len: usize,
}

impl<'d> DeviceBuffer<'d> {
    pub fn new(ctx: &'d dyn DeviceContext, len: usize) -> Result<Self, Error> {
        let id = ctx.alloc(len)?;
        Ok(Self { ctx, id, len })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'d> Drop for DeviceBuffer<'d> {
    fn drop(&mut self) {
        self.ctx.free(self.id);
    }
}

#[derive(Default)]
struct HostDeviceState {
    buffers: HashMap<BufferId, Vec<f64>>,
    next_id: BufferId,
    used_bytes: usize,
    active_scopes: usize,
}

/// A "device" whose buffers live in host memory
///
/// The device optionally enforces a budget on the total number of bytes held
/// in its buffers at any time. It can also pretend that its kernels only
/// support a fixed set of vector widths.
pub struct HostDevice {
    name: String,
    budget_bytes: Option<usize>,
    widths: Option<Vec<usize>>,
    state: Mutex<HostDeviceState>,
}

impl Default for HostDevice {
    fn default() -> Self {
        HostDevice::new()
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            name: "host".to_owned(),
            budget_bytes: None,
            widths: None,
            state: Mutex::new(HostDeviceState::default()),
        }
    }

    pub fn with_budget(mut self, budget_bytes: usize) -> Self {
        self.budget_bytes = Some(budget_bytes);
        self
    }

    pub fn with_supported_widths(mut self, widths: Vec<usize>) -> Self {
        self.widths = Some(widths);
        self
    }

    /// the number of bytes currently held in buffers
    pub fn used_bytes(&self) -> usize {
        self.lock().used_bytes
    }

    /// the number of live buffers
    pub fn n_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HostDeviceState> {
        // a panicking kernel can't leave the bookkeeping inconsistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unknown_buffer(id: BufferId) -> Error {
    Error::configuration(format!("there is no device buffer with id {id}"))
}

impl DeviceContext for HostDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn acquire(&self) -> Result<(), Error> {
        let mut state = self.lock();
        state.active_scopes += 1;
        info!(
            "acquired device \"{}\" ({} active scopes)",
            self.name, state.active_scopes
        );
        Ok(())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.active_scopes = state.active_scopes.saturating_sub(1);
        info!(
            "released device \"{}\" ({} active scopes)",
            self.name, state.active_scopes
        );
    }

    fn supported_widths(&self) -> Option<&[usize]> {
        self.widths.as_deref()
    }

    fn alloc(&self, len: usize) -> Result<BufferId, Error> {
        let n_bytes = len.saturating_mul(std::mem::size_of::<f64>());
        let mut state = self.lock();
        if let Some(budget) = self.budget_bytes {
            if state.used_bytes.saturating_add(n_bytes) > budget {
                warn!(
                    "device \"{}\" can't allocate {n_bytes} bytes ({} of {budget} bytes in use)",
                    self.name, state.used_bytes
                );
                return Err(Error::resource("device buffer", n_bytes));
            }
        }
        let mut buf: Vec<f64> = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::resource("device buffer", n_bytes))?;
        buf.resize(len, 0.0);

        let id = state.next_id;
        state.next_id += 1;
        state.used_bytes += n_bytes;
        state.buffers.insert(id, buf);
        Ok(id)
    }

    fn free(&self, id: BufferId) {
        let mut state = self.lock();
        if let Some(buf) = state.buffers.remove(&id) {
            state.used_bytes -= buf.len() * std::mem::size_of::<f64>();
        }
    }

    fn copy_to_device(&self, id: BufferId, src: &[f64]) -> Result<(), Error> {
        let mut state = self.lock();
        let buf = state.buffers.get_mut(&id).ok_or_else(|| unknown_buffer(id))?;
        if buf.len() != src.len() {
            return Err(Error::configuration(format!(
                "can't copy {} elements into a device buffer of length {}",
                src.len(),
                buf.len()
            )));
        }
        buf.copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, id: BufferId, dst: &mut [f64]) -> Result<(), Error> {
        let state = self.lock();
        let buf = state.buffers.get(&id).ok_or_else(|| unknown_buffer(id))?;
        if buf.len() != dst.len() {
            return Err(Error::configuration(format!(
                "can't copy a device buffer of length {} into {} elements",
                buf.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn launch(
        &self,
        buffers: &[BufferId],
        kernel: &mut dyn FnMut(&mut [&mut [f64]]),
    ) -> Result<(), Error> {
        // check out the buffers so that the lock isn't held by the kernel
        let mut checked_out = CheckedOut {
            device: self,
            taken: Vec::with_capacity(buffers.len()),
        };
        {
            let mut state = self.lock();
            for &id in buffers {
                let buf = state.buffers.remove(&id).ok_or_else(|| unknown_buffer(id))?;
                checked_out.taken.push((id, buf));
            }
        }

        let mut views: Vec<&mut [f64]> = checked_out
            .taken
            .iter_mut()
            .map(|(_, buf)| buf.as_mut_slice())
            .collect();
        kernel(&mut views);
        Ok(())
    }
}

/// Buffers taken out of a [`HostDevice`] for the duration of a launch.
///
/// They go back to the device on drop, even if the kernel panics.
struct CheckedOut<'a> {
    device: &'a HostDevice,
    taken: Vec<(BufferId, Vec<f64>)>,
}

impl<'a> Drop for CheckedOut<'a> {
    fn drop(&mut self) {
        let mut state = self.device.lock();
        for (id, buf) in self.taken.drain(..) {
            state.buffers.insert(id, buf);
        }
    }
}

/// Carries out row blocks inside a single kernel launch on a device
///
/// The output rows and the team scratch buffer are device buffers. The
/// output gets staged on the device before the launch and copied back to the
/// host afterwards.
pub struct DeviceExecutor<'d> {
    ctx: &'d dyn DeviceContext,
}

impl<'d> DeviceExecutor<'d> {
    pub fn new(ctx: &'d dyn DeviceContext) -> Self {
        Self { ctx }
    }
}

impl<'d> Executor for DeviceExecutor<'d> {
    fn drive_reduction<B>(
        &mut self,
        reduction: &B,
        params: &ExecParams,
        out: &mut [f64],
    ) -> Result<(), Error>
    where
        B: BlockedReduction + Sync,
    {
        check_output_len(reduction, out)?;
        check_supported_widths(self.ctx, &[reduction.get_formula().dim()])?;
        let team_param = params.team_param(reduction.get_formula().inner_stage_len());
        let blocks = build_schedule(reduction, team_param.rows_per_team.get());
        debug!(
            "device executor ({}): {} row blocks",
            self.ctx.name(),
            blocks.len()
        );
        if blocks.is_empty() {
            return Ok(());
        }

        let _scope = DeviceScope::new(self.ctx)?;
        let layout = TeamScratchLayout::new(reduction, &team_param);
        let dev_out = DeviceBuffer::new(self.ctx, out.len())?;
        let dev_scratch = DeviceBuffer::new(self.ctx, layout.total_len())?;
        self.ctx.copy_to_device(dev_out.id(), out)?;

        self.ctx
            .launch(&[dev_out.id(), dev_scratch.id()], &mut |buffers: &mut [&mut [f64]]| {
                if let [dev_out, scratch] = buffers {
                    for (block, chunk) in split_output(reduction, &blocks, dev_out) {
                        fill_row_block(reduction, &team_param, &block, scratch, chunk);
                    }
                }
            })?;
        self.ctx.copy_to_host(dev_out.id(), out)
    }
}
