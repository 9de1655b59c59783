//! Fixed table of native-callback trampolines.
//!
//! The vendor ABI takes a bare C function pointer and no user-data
//! argument, so per-session closures are parked in a fixed table of static
//! slots, each paired with its own `extern "C"` function that reads the
//! slot under a mutex. The table size bounds the number of concurrent
//! sessions; when it is full, `LoadExtIoApi` fails.

use std::ffi::{c_float, c_int, c_void};
use std::sync::Mutex;

use tracing::trace;

use crate::vendor::NativeCallback;

/// Number of trampoline slots, and therefore of concurrent sessions.
pub const SLOT_COUNT: usize = 5;

/// The per-session closure invoked by a slot's static function.
pub type SlotClosure = Box<dyn Fn(c_int, c_int, c_float, *mut c_void) -> c_int + Send>;

struct Slot {
    closure: Mutex<Option<SlotClosure>>,
}

static SLOTS: [Slot; SLOT_COUNT] = [
    Slot {
        closure: Mutex::new(None),
    },
    Slot {
        closure: Mutex::new(None),
    },
    Slot {
        closure: Mutex::new(None),
    },
    Slot {
        closure: Mutex::new(None),
    },
    Slot {
        closure: Mutex::new(None),
    },
];

static NEXT_SLOT: Mutex<usize> = Mutex::new(0);

fn invoke(idx: usize, cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int {
    match SLOTS[idx].closure.lock() {
        Ok(guard) => match guard.as_ref() {
            Some(f) => f(cnt, status, iq_offs, iq_data),
            None => -1,
        },
        Err(_) => -1,
    }
}

extern "C" fn trampoline0(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int {
    invoke(0, cnt, status, iq_offs, iq_data)
}
extern "C" fn trampoline1(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int {
    invoke(1, cnt, status, iq_offs, iq_data)
}
extern "C" fn trampoline2(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int {
    invoke(2, cnt, status, iq_offs, iq_data)
}
extern "C" fn trampoline3(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int {
    invoke(3, cnt, status, iq_offs, iq_data)
}
extern "C" fn trampoline4(cnt: c_int, status: c_int, iq_offs: c_float, iq_data: *mut c_void) -> c_int {
    invoke(4, cnt, status, iq_offs, iq_data)
}

static ENTRIES: [NativeCallback; SLOT_COUNT] =
    [trampoline0, trampoline1, trampoline2, trampoline3, trampoline4];

/// A claimed slot; dropping it clears the stored closure and frees the
/// slot for the next session.
pub struct SlotHandle {
    idx: usize,
}

impl SlotHandle {
    /// The C function pointer to hand to the vendor's `SetCallback`.
    pub fn native(&self) -> NativeCallback {
        ENTRIES[self.idx]
    }

    pub fn index(&self) -> usize {
        self.idx
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        if let Ok(mut slot) = SLOTS[self.idx].closure.lock() {
            *slot = None;
        }
        trace!(idx = self.idx, "callback trampoline slot released");
    }
}

/// Claim the next free slot, searching circularly from the last handed-out
/// index. `None` when every slot is taken.
pub fn claim(closure: SlotClosure) -> Option<SlotHandle> {
    let mut closure = Some(closure);
    let mut next = NEXT_SLOT.lock().ok()?;
    for _ in 0..SLOT_COUNT {
        let idx = *next;
        *next = (idx + 1) % SLOT_COUNT;
        let Ok(mut slot) = SLOTS[idx].closure.lock() else {
            continue;
        };
        if slot.is_some() {
            continue;
        }
        *slot = closure.take();
        trace!(idx, "callback trampoline slot claimed");
        return Some(SlotHandle { idx });
    }
    None
}
