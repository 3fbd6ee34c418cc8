// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Typed, fenced views over the two mapped hypervisor-shared pages.
//!
//! The hypervisor uses `IoReq::state` as the hand-off token between itself
//! and this process: it is the *only* field that needs atomic
//! acquire/release semantics, because the acquire on `READY` and the
//! release on `RESP_READY` are what make every other field's plain
//! (volatile) read or write globally visible at the right time. This
//! mirrors the design note in SPEC_FULL.md: typed acquire/release atomic
//! fields rather than raw, unordered memory writes.

use std::ptr;
use std::sync::atomic::Ordering;

use xen_sys::{BufIoReq, BufferedIopage, IoReq, IOREQ_BUFFER_SLOT_NUM};

/// A view over one vCPU's synchronous request/response slot.
pub struct SyncSlot {
    ptr: *mut IoReq,
}

// SAFETY: the pointee is shared hypervisor memory accessed only through
// the volatile/atomic operations below; `SyncSlot` carries no other
// thread-unsafe state.
unsafe impl Send for SyncSlot {}

impl SyncSlot {
    /// # Safety
    /// `ptr` must point to a live, page-backed `IoReq` for the lifetime of
    /// the returned `SyncSlot`.
    pub unsafe fn new(ptr: *mut IoReq) -> SyncSlot {
        SyncSlot { ptr }
    }

    pub fn state(&self, order: Ordering) -> u8 {
        unsafe { (*self.ptr).state.load(order) }
    }

    pub fn set_state(&self, value: u8, order: Ordering) {
        unsafe { (*self.ptr).state.store(value, order) }
    }

    pub fn addr(&self) -> u64 {
        unsafe { ptr::read_volatile(&(*self.ptr).addr) }
    }

    pub fn data(&self) -> u64 {
        unsafe { ptr::read_volatile(&(*self.ptr).data) }
    }

    pub fn set_data(&self, v: u64) {
        unsafe { ptr::write_volatile(&mut (*self.ptr).data, v) }
    }

    pub fn count(&self) -> u32 {
        unsafe { ptr::read_volatile(&(*self.ptr).count) }
    }

    pub fn size(&self) -> u32 {
        unsafe { ptr::read_volatile(&(*self.ptr).size) }
    }

    pub fn ty(&self) -> u8 {
        unsafe { ptr::read_volatile(&(*self.ptr).ty) }
    }

    pub fn dir(&self) -> u8 {
        unsafe { ptr::read_volatile(&(*self.ptr).dir) }
    }

    pub fn df(&self) -> u8 {
        unsafe { ptr::read_volatile(&(*self.ptr).df) }
    }

    pub fn data_is_ptr(&self) -> u8 {
        unsafe { ptr::read_volatile(&(*self.ptr).data_is_ptr) }
    }

    pub fn vp_eport(&self) -> u32 {
        unsafe { ptr::read_volatile(&(*self.ptr).vp_eport) }
    }
}

/// A view over the per-vCPU synchronous shared page, sized at map time by
/// the domain's vCPU count (the page has no length field of its own; the
/// layout is a flat array of `IoReq` starting at the page base).
pub struct SharedIopageView {
    base: *mut IoReq,
    vcpus: usize,
}

// SAFETY: access goes through SyncSlot's volatile/atomic operations only.
unsafe impl Send for SharedIopageView {}

impl SharedIopageView {
    /// # Safety
    /// `base` must point to a mapping at least `vcpus * size_of::<IoReq>()`
    /// bytes long, valid for the view's lifetime.
    pub unsafe fn new(base: *mut u8, vcpus: usize) -> SharedIopageView {
        SharedIopageView {
            base: base as *mut IoReq,
            vcpus,
        }
    }

    pub fn vcpus(&self) -> usize {
        self.vcpus
    }

    pub fn slot(&self, vcpu: usize) -> SyncSlot {
        assert!(vcpu < self.vcpus, "vcpu index out of range");
        // SAFETY: bounds-checked above; `base` was required to cover all
        // `vcpus` slots at construction.
        unsafe { SyncSlot::new(self.base.add(vcpu)) }
    }
}

/// A view over the buffered (ring) iopage.
pub struct BufferedIopageView {
    base: *mut BufferedIopage,
}

// SAFETY: access goes through the atomic/volatile operations below only.
unsafe impl Send for BufferedIopageView {}

impl BufferedIopageView {
    /// # Safety
    /// `base` must point to a live, page-backed `BufferedIopage` for the
    /// lifetime of the returned view.
    pub unsafe fn new(base: *mut u8) -> BufferedIopageView {
        BufferedIopageView {
            base: base as *mut BufferedIopage,
        }
    }

    pub fn read_pointer(&self, order: Ordering) -> u32 {
        unsafe { (*self.base).read_pointer.load(order) }
    }

    pub fn set_read_pointer(&self, value: u32, order: Ordering) {
        unsafe { (*self.base).read_pointer.store(value, order) }
    }

    pub fn write_pointer(&self, order: Ordering) -> u32 {
        unsafe { (*self.base).write_pointer.load(order) }
    }

    pub fn slot(&self, index: u32) -> BufIoReq {
        let i = (index as usize) % IOREQ_BUFFER_SLOT_NUM;
        // SAFETY: `i` is reduced modulo the ring's fixed slot count.
        unsafe { ptr::read_volatile(&(*self.base).buf_ioreq[i]) }
    }
}
