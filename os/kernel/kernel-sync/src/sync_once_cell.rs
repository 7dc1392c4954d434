use core::{
    cell::UnsafeCell,
    fmt,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const SET: u8 = 2;

/// Write-once cell usable from `static`s before any allocator exists.
///
/// There is no way to reset a cell once it is set.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }

    /// The stored value, if any.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.is_set() {
            // SAFETY: SET is only published after the value is written.
            Some(unsafe { self.get_unchecked() })
        } else {
            None
        }
    }

    /// Store `value` unless the cell is already set or being set.
    ///
    /// # Errors
    /// Hands `value` back if another value won.
    pub fn set(&self, value: T) -> Result<(), T> {
        if !self.begin_write() {
            return Err(value);
        }
        self.finish_write(value);
        Ok(())
    }

    /// Initialize at most once and return the stored value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        match self.get_or_try_init(|| Ok::<T, core::convert::Infallible>(init())) {
            Ok(v) => v,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_init`](Self::get_or_init), but a failed `init` leaves
    /// the cell empty so a later caller may retry.
    ///
    /// # Errors
    /// Whatever `init` returns.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(v) = self.get() {
            return Ok(v);
        }

        if self.begin_write() {
            match init() {
                Ok(v) => self.finish_write(v),
                Err(e) => {
                    self.state.store(EMPTY, Ordering::Release);
                    return Err(e);
                }
            }
        } else {
            while self.state.load(Ordering::Acquire) == WRITING {
                spin_loop();
            }
            if !self.is_set() {
                // the other writer failed; try ourselves
                return self.get_or_try_init(init);
            }
        }

        // SAFETY: SET observed or written above.
        Ok(unsafe { self.get_unchecked() })
    }

    fn begin_write(&self) -> bool {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn finish_write(&self, value: T) {
        // SAFETY: WRITING grants exclusive access to the slot.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(SET, Ordering::Release);
    }

    /// # Safety
    /// The state must be `SET`.
    unsafe fn get_unchecked(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == SET {
            // SAFETY: set and exclusively owned.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SyncOnceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(v) => f.debug_tuple("SyncOnceCell").field(v).finish(),
            None => f.write_str("SyncOnceCell(<unset>)"),
        }
    }
}

// SAFETY: shared only after SET; writes are exclusive through the state word.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
