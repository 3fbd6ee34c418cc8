// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error;

use hypervisor::HypervisorError;

#[sorted]
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("address range [{0:#x}, {1:#x}] overlaps an existing entry")]
    Overlap(u64, u64),
    #[error("transport error registering range: {0}")]
    Transport(#[from] HypervisorError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[sorted]
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device registration failed: {0}")]
    Registration(#[from] RegistryError),
}
