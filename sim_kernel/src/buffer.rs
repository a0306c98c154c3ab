//! Blocking buffer allocation
//!
//! The accounting lives in [`resources::BufferPool`]. This layer adds the
//! waiting: a process that finds its size class exhausted waits on the
//! class's semaphore until a buffer of that class is released.

use crate::scheduler::{finish, OpError};
use crate::state::KernelState;
use crate::Kernel;
use core_types::SemaphoreId;
use kernel_api::KernelError;
use resources::{Buffer, ClassStats, PoolError};

impl KernelState {
    /// Semaphore that exhausted-class waiters of `class` sleep on
    pub(crate) fn buffer_semaphore(&mut self, class: usize) -> Result<SemaphoreId, KernelError> {
        if let Some(Some(sem)) = self.buffer_sems.get(class) {
            return Ok(*sem);
        }
        let sem = self.sem_create(0)?;
        if self.buffer_sems.len() <= class {
            self.buffer_sems.resize(class + 1, None);
        }
        self.buffer_sems[class] = Some(sem);
        Ok(sem)
    }

    /// Returns a buffer to its class and wakes one waiter of that class
    pub(crate) fn buffer_release(&mut self, buffer: Buffer) -> Result<usize, KernelError> {
        let class = self
            .buffers
            .release(buffer)
            .map_err(|_| KernelError::BadBuffer)?;
        let waiting = self
            .buffers
            .class_stats(class)
            .is_some_and(|stats| stats.waiting > 0);
        if waiting {
            if let Some(Some(sem)) = self.buffer_sems.get(class).copied() {
                self.sem_post(sem)?;
            }
        }
        Ok(class)
    }
}

impl Kernel {
    /// Allocates a buffer of at least `size` bytes
    ///
    /// A process blocks while the size class is exhausted; an interrupt
    /// handler gets [`KernelError::BufferExhausted`] instead.
    pub fn buffer_alloc(&self, size: usize) -> Result<Buffer, KernelError> {
        finish(self.buffer_alloc_op(size))
    }

    /// Returns a buffer to the pool
    pub fn buffer_free(&self, buffer: Buffer) -> Result<(), KernelError> {
        finish(self.buffer_free_op(buffer))
    }

    /// Per-class counters, smallest class first
    pub fn buffer_stats(&self) -> Vec<ClassStats> {
        self.shared.lock().state.buffers.stats()
    }

    fn buffer_alloc_op(&self, size: usize) -> Result<Buffer, OpError> {
        let mut section = self.enter()?;
        let caller = section.caller();
        loop {
            let class = match section.state.buffers.try_allocate(size, caller) {
                Ok(buffer) => return Ok(buffer),
                Err(PoolError::TooLarge(_)) => return Err(KernelError::BufferTooLarge(size).into()),
                Err(PoolError::BadBuffer) => return Err(KernelError::BadBuffer.into()),
                Err(PoolError::Exhausted { class, .. }) => class,
            };
            let Some(pid) = caller else {
                return Err(KernelError::BufferExhausted(size).into());
            };

            let sem = section.state.buffer_semaphore(class)?;
            section.state.buffers.add_waiter(class);
            let waited = match section.state.sem_wait(pid, sem) {
                Ok(true) => self.reschedule(&mut section),
                Ok(false) => Ok(()),
                Err(err) => Err(err.into()),
            };
            section.state.buffers.remove_waiter(class);
            waited?;
        }
    }

    fn buffer_free_op(&self, buffer: Buffer) -> Result<(), OpError> {
        let mut section = self.enter()?;
        section.state.buffer_release(buffer)?;
        Ok(())
    }
}
