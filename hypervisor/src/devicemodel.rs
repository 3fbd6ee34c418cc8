// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe wrapper over the `HYPERVISOR_DM_OP`/`HYPERVISOR_DOMCTL` hypercalls
//! this crate needs: the ioreq-server lifecycle (create, enable, route
//! address ranges to it, destroy), domain introspection (vCPU count), and
//! `set_irq_level`.

use xen_sys::{
    DmOpBuf, DmopCreateIoreqServer, DmopDestroyIoreqServer, DmopGetIoreqServerInfo, DmopIoRange,
    DmopSetIoreqServerState, DmopSetIrqLevel, DomCtlGetDomainInfo, HYPERVISOR_DM_OP,
    HYPERVISOR_DOMCTL, XEN_DMOP_CREATE_IOREQ_SERVER, XEN_DMOP_DESTROY_IOREQ_SERVER,
    XEN_DMOP_GET_IOREQ_SERVER_INFO, XEN_DMOP_MAP_IO_RANGE_TO_IOREQ_SERVER,
    XEN_DMOP_SET_IOREQ_SERVER_STATE, XEN_DMOP_SET_IRQ_LEVEL,
    XEN_DMOP_UNMAP_IO_RANGE_FROM_IOREQ_SERVER, XEN_DOMCTL_GETDOMAININFO, XEN_DOMCTL_SET_TARGET,
};

use crate::error::{HypervisorError, Result};
use crate::xencall::XenCall;

pub struct DeviceModel<'a> {
    call: &'a XenCall,
    domid: u16,
}

impl<'a> DeviceModel<'a> {
    pub fn new(call: &'a XenCall, domid: u16) -> DeviceModel<'a> {
        DeviceModel { call, domid }
    }

    /// Issues one `XEN_DMOP_*` request of type `T` via `HYPERVISOR_DM_OP`.
    fn dm_op<T: Copy>(&self, req: &mut T) -> Result<()> {
        let buf = DmOpBuf {
            h: req as *mut T as u64,
            size: std::mem::size_of::<T>() as u64,
        };
        self.call
            .hypercall(
                HYPERVISOR_DM_OP,
                [
                    self.domid as _,
                    1,
                    &buf as *const DmOpBuf as _,
                    0,
                    0,
                ],
            )
            .map(|_| ())
    }

    pub fn domain_vcpu_count(&self) -> Result<u32> {
        let mut info = DomCtlGetDomainInfo {
            domid: self.domid,
            ..Default::default()
        };
        self.call
            .hypercall(
                HYPERVISOR_DOMCTL,
                [
                    XEN_DOMCTL_GETDOMAININFO as _,
                    &mut info as *mut DomCtlGetDomainInfo as _,
                    0,
                    0,
                    0,
                ],
            )
            .map_err(|_| HypervisorError::DomainInfo(self.domid))?;
        if info.domid != self.domid {
            return Err(HypervisorError::DomainInfo(self.domid));
        }
        Ok(info.max_vcpu_id + 1)
    }

    pub fn set_target(&self, backend_domid: u16) -> Result<()> {
        #[repr(C)]
        struct SetTarget {
            domid: u16,
            target: u16,
        }
        let mut req = SetTarget {
            domid: self.domid,
            target: backend_domid,
        };
        self.call
            .hypercall(
                HYPERVISOR_DOMCTL,
                [
                    XEN_DOMCTL_SET_TARGET as _,
                    &mut req as *mut SetTarget as _,
                    0,
                    0,
                    0,
                ],
            )
            .map(|_| ())
    }

    pub fn create_ioreq_server(&self, handle_bufioreq: bool) -> Result<u16> {
        let mut req = DmopCreateIoreqServer {
            op: XEN_DMOP_CREATE_IOREQ_SERVER,
            handle_bufioreq: handle_bufioreq as u8,
            ..Default::default()
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::CreateIoreqServer(std::io::Error::last_os_error()))?;
        Ok(req.id)
    }

    pub fn get_ioreq_server_info(&self, ioservid: u16) -> Result<DmopGetIoreqServerInfo> {
        let mut req = DmopGetIoreqServerInfo {
            op: XEN_DMOP_GET_IOREQ_SERVER_INFO,
            id: ioservid,
            ..Default::default()
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::MapResource(std::io::Error::last_os_error()))?;
        Ok(req)
    }

    pub fn set_ioreq_server_state(&self, ioservid: u16, enabled: bool) -> Result<()> {
        let mut req = DmopSetIoreqServerState {
            op: XEN_DMOP_SET_IOREQ_SERVER_STATE,
            id: ioservid,
            enabled: enabled as u8,
            ..Default::default()
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::SetServerState(std::io::Error::last_os_error()))
    }

    pub fn destroy_ioreq_server(&self, ioservid: u16) -> Result<()> {
        let mut req = DmopDestroyIoreqServer {
            op: XEN_DMOP_DESTROY_IOREQ_SERVER,
            id: ioservid,
            ..Default::default()
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::DestroyIoreqServer(std::io::Error::last_os_error()))
    }

    pub fn map_io_range_to_ioreq_server(&self, ioservid: u16, ty: u32, start: u64, end: u64) -> Result<()> {
        let mut req = DmopIoRange {
            op: XEN_DMOP_MAP_IO_RANGE_TO_IOREQ_SERVER,
            pad: 0,
            id: ioservid,
            ty,
            start,
            end,
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::MapIoRange(std::io::Error::last_os_error()))
    }

    pub fn unmap_io_range_from_ioreq_server(&self, ioservid: u16, ty: u32, start: u64, end: u64) -> Result<()> {
        let mut req = DmopIoRange {
            op: XEN_DMOP_UNMAP_IO_RANGE_FROM_IOREQ_SERVER,
            pad: 0,
            id: ioservid,
            ty,
            start,
            end,
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::UnmapIoRange(std::io::Error::last_os_error()))
    }

    pub fn set_irq_level(&self, irq: u32, level: bool) -> Result<()> {
        let mut req = DmopSetIrqLevel {
            op: XEN_DMOP_SET_IRQ_LEVEL,
            pad: 0,
            irq,
            level: level as u8,
        };
        self.dm_op(&mut req)
            .map_err(|_| HypervisorError::SetIrq(std::io::Error::last_os_error()))
    }
}
