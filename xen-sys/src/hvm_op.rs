// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw `HVMOP_*`/`XEN_DMOP_*` request structures for the ioreq-server
//! lifecycle: create, map its resource, enable, route address ranges to
//! it, and destroy it. These are issued as `HYPERVISOR_DM_OP` hypercalls
//! via `PrivcmdHypercall` in `hypervisor::transport`.

pub type Domid = u16;
pub type IoservId = u16;

pub const HVMOP_IOREQ_MEM_ACCESS: u32 = 1;

/// One entry of the `HYPERVISOR_dm_op` buffer array: a pointer/length pair
/// to a single `XEN_DMOP_*` request structure, the way the real `dm_op`
/// hypercall is invoked (`xendevicemodel_op` over `xen_dm_op_buf`).
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct DmOpBuf {
    pub h: u64,
    pub size: u64,
}

/// `XEN_DMOP_*` request discriminants. Each request struct below carries
/// one of these as its leading `op` field, the way the real ABI tags a
/// `xen_dm_op` union member.
pub const XEN_DMOP_CREATE_IOREQ_SERVER: u32 = 1;
pub const XEN_DMOP_GET_IOREQ_SERVER_INFO: u32 = 2;
pub const XEN_DMOP_MAP_IO_RANGE_TO_IOREQ_SERVER: u32 = 3;
pub const XEN_DMOP_UNMAP_IO_RANGE_FROM_IOREQ_SERVER: u32 = 4;
pub const XEN_DMOP_SET_IOREQ_SERVER_STATE: u32 = 7;
pub const XEN_DMOP_DESTROY_IOREQ_SERVER: u32 = 8;
pub const XEN_DMOP_SET_IRQ_LEVEL: u32 = 17;

/// `XEN_DMOP_create_ioreq_server`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DmopCreateIoreqServer {
    pub op: u32,
    pub pad: u32,
    pub handle_bufioreq: u8,
    pub pad2: [u8; 3],
    pub id: IoservId,
}

/// `XEN_DMOP_get_ioreq_server_info`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DmopGetIoreqServerInfo {
    pub op: u32,
    pub pad: u32,
    pub id: IoservId,
    pub ioreq_gfn: u64,
    pub bufioreq_gfn: u64,
    pub bufioreq_port: u32,
}

/// `XEN_DMOP_set_ioreq_server_state`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DmopSetIoreqServerState {
    pub op: u32,
    pub pad: u32,
    pub id: IoservId,
    pub enabled: u8,
}

/// `XEN_DMOP_destroy_ioreq_server`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DmopDestroyIoreqServer {
    pub op: u32,
    pub pad: u32,
    pub id: IoservId,
}

pub const HVM_IO_RANGE_PORT: u32 = 0;
pub const HVM_IO_RANGE_MEMORY: u32 = 1;
pub const HVM_IO_RANGE_PCI: u32 = 2;

/// `XEN_DMOP_map_io_range_to_ioreq_server` /
/// `XEN_DMOP_unmap_io_range_from_ioreq_server`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DmopIoRange {
    pub op: u32,
    pub pad: u32,
    pub id: IoservId,
    pub ty: u32,
    pub start: u64,
    pub end: u64,
}

/// `XEN_DMOP_set_irq_level`
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DmopSetIrqLevel {
    pub op: u32,
    pub pad: u32,
    pub irq: u32,
    pub level: u8,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct DomCtlGetDomainInfo {
    pub domid: Domid,
    pub flags: u32,
    pub tot_pages: u64,
    pub max_pages: u64,
    pub shr_pages: u64,
    pub shared_info_frame: u64,
    pub cpu_time: u64,
    pub nr_online_vcpus: u32,
    pub max_vcpu_id: u32,
}
