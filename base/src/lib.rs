// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ambient utilities shared by every crate in the workspace: descriptor
//! ownership, process-wide logging init, and signal-to-fd plumbing.
//! Deliberately small; this is not a port of crosvm's full `base` crate,
//! only the slice this workspace needs.

mod descriptor;
pub mod signal;
pub mod syslog;

pub use descriptor::AsRawDescriptor;
