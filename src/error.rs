// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error;

use devices::DeviceError;
use hypervisor::HypervisorError;

#[sorted]
#[derive(Error, Debug)]
pub enum InitError {
    #[error("device initialization failed: {0}")]
    Device(#[from] DeviceError),
    #[error("domain configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("hypervisor transport failure during init: {0}")]
    Transport(#[from] HypervisorError),
}

pub type Result<T> = std::result::Result<T, InitError>;
