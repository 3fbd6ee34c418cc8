// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Address-Space Registry and Map Cache, plus the `IoHandler`/`Device`
//! traits virtual devices implement to plug into the dispatch engine.
//! Named and scoped after crosvm's `devices` crate, generalized here from
//! a PCI/virtio bus to the three PIO/MMIO/PCI-config spaces the Xen ioreq
//! ABI exposes.

mod address_space;
mod device;
mod error;
mod io_handler;
mod map_cache;

pub use address_space::AddressSpaceRegistry;
pub use device::Device;
pub use error::{DeviceError, RegistryError, Result};
pub use io_handler::{AccessInfo, AccessWidths, AddressKind, Direction, IoHandler};
pub use map_cache::MapCache;
