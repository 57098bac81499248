//! Real-time allocation guard.
//!
//! Declared real-time threads must not touch the heap once they are running. [`RealtimeScope`]
//! marks the current thread real-time; [`RealtimeAllocator`], installed as the global
//! allocator, aborts the process on any allocation made inside such a scope. Frees are always
//! allowed.
//!
//! The allocator is opt-in; without it scopes are only bookkeeping.
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: rtloop::RealtimeAllocator = rtloop::RealtimeAllocator;
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static REALTIME: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` if the current thread is inside a [`RealtimeScope`].
pub fn is_realtime_thread() -> bool {
    REALTIME.try_with(Cell::get).unwrap_or(false)
}

/// Marks the current thread real-time until dropped.
///
/// Scopes nest; dropping an inner scope restores the outer state. The guard is tied to the
/// thread that created it.
#[must_use = "the thread leaves real-time mode as soon as the scope is dropped"]
pub struct RealtimeScope {
    previous: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl RealtimeScope {
    /// Enters real-time mode on the current thread.
    pub fn enter() -> Self {
        let previous = REALTIME.with(|flag| flag.replace(true));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for RealtimeScope {
    fn drop(&mut self) {
        REALTIME.with(|flag| flag.set(self.previous));
    }
}

/// Global allocator that forwards to [`System`] and aborts on allocation inside a
/// [`RealtimeScope`].
pub struct RealtimeAllocator;

unsafe impl GlobalAlloc for RealtimeAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        check_allocation(layout.size());
        // SAFETY: forwarded unchanged to the system allocator.
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        check_allocation(layout.size());
        // SAFETY: forwarded unchanged to the system allocator.
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        check_allocation(new_size);
        // SAFETY: forwarded unchanged to the system allocator.
        unsafe { System.realloc(ptr, layout, new_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: forwarded unchanged to the system allocator.
        unsafe { System.dealloc(ptr, layout) }
    }
}

fn check_allocation(size: usize) {
    if is_realtime_thread() {
        abort_on_allocation(size);
    }
}

/// Writes the diagnostic straight to stderr and aborts. Must not allocate.
fn abort_on_allocation(size: usize) -> ! {
    let mut buffer = [0u8; 96];
    let prefix = b"RAW: Malloced ";
    buffer[..prefix.len()].copy_from_slice(prefix);
    let mut length = prefix.len();

    let mut digits = [0u8; 20];
    let mut count = 0;
    let mut remaining = size;
    loop {
        digits[count] = b'0' + (remaining % 10) as u8;
        count += 1;
        remaining /= 10;
        if remaining == 0 {
            break;
        }
    }
    for digit in digits[..count].iter().rev() {
        buffer[length] = *digit;
        length += 1;
    }

    let suffix = b" bytes on a real-time thread\n";
    buffer[length..length + suffix.len()].copy_from_slice(suffix);
    length += suffix.len();

    // SAFETY: writes an initialized stack buffer to stderr, then aborts.
    unsafe {
        libc::write(libc::STDERR_FILENO, buffer.as_ptr().cast(), length);
        libc::abort();
    }
}
