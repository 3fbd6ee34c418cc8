// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe wrapper over the foreign-memory half of `/proc/xen/privcmd`:
//! mapping the ioreq server's shared resource (the two iopages) and
//! mapping/unmapping arbitrary guest page frames for the Map Cache.

use std::fs::{File, OpenOptions};
use std::os::raw::c_void;
use std::os::unix::io::AsRawFd;
use std::ptr;

use xen_sys::{
    PrivcmdMmapBatch, PrivcmdMmapResource, IOCTL_PRIVCMD_MMAPBATCH_V2, IOCTL_PRIVCMD_MMAP_RESOURCE,
    XC_PAGE_SIZE, XENMEM_RESOURCE_IOREQ_SERVER,
};

use crate::error::{HypervisorError, Result};

pub struct ForeignMemory {
    file: File,
}

impl ForeignMemory {
    pub fn open() -> Result<ForeignMemory> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/proc/xen/privcmd")
            .map_err(|e| HypervisorError::Open("/proc/xen/privcmd", e))?;
        Ok(ForeignMemory { file })
    }

    /// Maps the ioreq server's shared resource: `nr_pages` contiguous
    /// pages starting at resource-relative frame 0 (the buffered iopage
    /// followed by the shared iopage, per `XENMEM_resource_ioreq_server`).
    pub fn map_ioreq_server_resource(&self, domid: u16, ioservid: u16, nr_pages: u64) -> Result<*mut u8> {
        let len = nr_pages as usize * XC_PAGE_SIZE;
        // SAFETY: requesting an anonymous private mapping the kernel will
        // populate in-place via the subsequent ioctl; MAP_PRIVATE here just
        // reserves the VA range.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(HypervisorError::MapResource(std::io::Error::last_os_error()));
        }

        let mut req = PrivcmdMmapResource {
            dom: domid,
            typ: XENMEM_RESOURCE_IOREQ_SERVER,
            id: ioservid as u32,
            idx: 0,
            num: nr_pages,
            addr: addr as u64,
        };
        // SAFETY: req references the VA range just reserved above; the
        // kernel populates it with the ioreq server's pages in place.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_PRIVCMD_MMAP_RESOURCE as _,
                &mut req as *mut PrivcmdMmapResource,
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: addr/len are the mapping we just created.
            unsafe {
                libc::munmap(addr, len);
            }
            return Err(HypervisorError::MapResource(err));
        }

        Ok(addr as *mut u8)
    }

    pub fn unmap(&self, addr: *mut u8, nr_pages: usize) -> Result<()> {
        // SAFETY: addr/nr_pages describe a mapping this handle created.
        let ret = unsafe { libc::munmap(addr as *mut c_void, nr_pages * XC_PAGE_SIZE) };
        if ret != 0 {
            return Err(HypervisorError::UnmapPages(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Maps `pfns.len()` guest page frames contiguously, returning a
    /// pointer to the start of the mapping. Used by the Map Cache for
    /// DMA-like guest memory access.
    pub fn map_guest_pages(&self, domid: u16, pfns: &[u64]) -> Result<*mut u8> {
        let len = pfns.len() * XC_PAGE_SIZE;
        // SAFETY: reserves a VA range the batch ioctl below populates.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(HypervisorError::MapPages(std::io::Error::last_os_error()));
        }

        let mut mfns: Vec<u64> = pfns.to_vec();
        let mut errors: Vec<i32> = vec![0; pfns.len()];
        let mut batch = PrivcmdMmapBatch {
            num: pfns.len() as u32,
            dom: domid,
            addr: addr as u64,
            mfns: mfns.as_mut_ptr(),
            errors: errors.as_mut_ptr(),
        };
        // SAFETY: mfns/errors are sized to `batch.num` and outlive the call.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_PRIVCMD_MMAPBATCH_V2 as _,
                &mut batch as *mut PrivcmdMmapBatch,
            )
        };
        if ret < 0 || errors.iter().any(|&e| e != 0) {
            let err = std::io::Error::last_os_error();
            // SAFETY: addr/len are the mapping just created.
            unsafe {
                libc::munmap(addr, len);
            }
            return Err(HypervisorError::MapPages(err));
        }

        Ok(addr as *mut u8)
    }
}
