//! Scoped read access to actor-owned buffers.
//!
//! `acquire` hands out a guard that derefs to the buffer contents; the
//! buffer becomes available again when the guard drops. Only one guard per
//! buffer may be outstanding. A second acquire fails instead of blocking.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::error::{BufferKind, DestructibleError, Result};

bitflags! {
    /// Selects which physics actors `acquire_physics_actor_buffer` lists.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PhysicsActorQueryFlags: u32 {
        const STATIC = 1;
        const DYNAMIC = 2;
        /// Also list actors whose island is owned by another destructible actor.
        const ALLOW_REDUNDANCY = 4;
        const ALL = Self::STATIC.bits() | Self::DYNAMIC.bits();
    }
}

#[derive(Debug)]
pub struct ScopedBuffer<T> {
    kind: BufferKind,
    data: RwLock<Vec<T>>,
    acquired: AtomicBool,
}

impl<T> ScopedBuffer<T> {
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            data: RwLock::new(Vec::new()),
            acquired: AtomicBool::new(false),
        }
    }

    fn claim(&self) -> Result<()> {
        if self
            .acquired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(buffer = %self.kind, "acquire while a previous acquire is still outstanding");
            return Err(DestructibleError::BufferAlreadyAcquired(self.kind));
        }
        Ok(())
    }

    /// Read-only view of the current contents.
    pub fn acquire(&self, clear_on_release: bool) -> Result<BufferGuard<'_, T>> {
        self.claim()?;
        Ok(BufferGuard {
            buffer: self,
            data: Some(self.data.read()),
            clear_on_release,
        })
    }

    /// Refills the buffer, then hands out a read-only view of it.
    pub fn acquire_with(&self, fill: impl FnOnce(&mut Vec<T>)) -> Result<BufferGuard<'_, T>> {
        self.claim()?;
        let mut write = self.data.write();
        write.clear();
        fill(&mut *write);
        Ok(BufferGuard {
            buffer: self,
            data: Some(RwLockWriteGuard::downgrade(write)),
            clear_on_release: false,
        })
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    /// Appends published items. Exclusive access proves no guard is alive.
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        self.data.get_mut().extend(items);
    }

    pub fn clear(&mut self) {
        self.data.get_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct BufferGuard<'a, T> {
    buffer: &'a ScopedBuffer<T>,
    data: Option<RwLockReadGuard<'a, Vec<T>>>,
    clear_on_release: bool,
}

impl<T> Deref for BufferGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match &self.data {
            Some(guard) => guard.as_slice(),
            None => &[],
        }
    }
}

impl<T> Drop for BufferGuard<'_, T> {
    fn drop(&mut self) {
        drop(self.data.take());
        if self.clear_on_release {
            self.buffer.data.write().clear();
        }
        self.buffer.acquired.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let mut buffer = ScopedBuffer::new(BufferKind::ChunkEvents);
        buffer.extend([1, 2, 3]);
        {
            let guard = buffer.acquire(false).unwrap();
            assert_eq!(&*guard, &[1, 2, 3]);
            assert!(matches!(
                buffer.acquire(false),
                Err(DestructibleError::BufferAlreadyAcquired(BufferKind::ChunkEvents))
            ));
        }
        assert!(!buffer.is_acquired());
        assert!(buffer.acquire(false).is_ok());
    }

    #[test]
    fn test_clear_on_release() {
        let mut buffer = ScopedBuffer::new(BufferKind::ChunkEvents);
        buffer.extend([7]);
        drop(buffer.acquire(true).unwrap());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_acquire_with_refills() {
        let mut buffer = ScopedBuffer::new(BufferKind::PhysicsActors);
        buffer.extend([9, 9]);
        let guard = buffer.acquire_with(|v| v.push(4)).unwrap();
        assert_eq!(&*guard, &[4]);
    }
}
