// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw bindings for `/proc/xen/privcmd`, the device Xen's control-plane
//! libraries (xenctrl/xendevicemodel/xenforeignmemory) all eventually
//! funnel through: a hypercall passthrough plus batched foreign-memory
//! map/unmap and resource-map ioctls.
//!
//! Modeled on the real privcmd ABI the way
//! `other_examples/.../xencall/src/sys.rs` hand-binds it: fixed-value
//! `_IOC`-style constants rather than a build-time bindgen pass, since this
//! workspace has no access to the kernel headers at build time.

use std::os::raw::{c_int, c_ulong};

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PrivcmdHypercall {
    pub op: c_ulong,
    pub arg: [c_ulong; 5],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct PrivcmdMmapEntry {
    pub va: u64,
    pub mfn: u64,
    pub npages: u64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PrivcmdMmap {
    pub num: c_int,
    pub dom: u16,
    pub entry: *mut PrivcmdMmapEntry,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct PrivcmdMmapBatch {
    pub num: u32,
    pub dom: u16,
    pub addr: u64,
    pub mfns: *mut u64,
    pub errors: *mut c_int,
}

/// Resource kinds for `IOCTL_PRIVCMD_MMAP_RESOURCE`. Only the ioreq-server
/// resource (shared + buffered iopages) is relevant to this crate.
pub const XENMEM_RESOURCE_IOREQ_SERVER: u32 = 0;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct PrivcmdMmapResource {
    pub dom: u16,
    pub typ: u32,
    pub id: u32,
    pub idx: u32,
    pub num: u64,
    pub addr: u64,
}

pub const IOCTL_PRIVCMD_HYPERCALL: u64 = 0x305000;
pub const IOCTL_PRIVCMD_MMAP: u64 = 0x105002;
pub const IOCTL_PRIVCMD_MMAPBATCH_V2: u64 = 0x205004;
pub const IOCTL_PRIVCMD_MMAP_RESOURCE: u64 = 0x205007;

// Hypercall numbers used by this workspace (full table mirrors
// `HYPERVISOR_*` in xen/include/public/xen.h; only the subset the ioreq
// dispatch engine needs is listed).
pub const HYPERVISOR_EVENT_CHANNEL_OP: c_ulong = 32;
pub const HYPERVISOR_HVM_OP: c_ulong = 34;
pub const HYPERVISOR_DOMCTL: c_ulong = 36;
pub const HYPERVISOR_DM_OP: c_ulong = 41;

pub const XEN_DOMCTL_GETDOMAININFO: u32 = 5;
pub const XEN_DOMCTL_SET_TARGET: u32 = 46;
pub const XEN_DOMCTL_INTERFACE_VERSION: u32 = 0x0000000c;
