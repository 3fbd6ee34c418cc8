// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::io::RawFd;

/// Anything that owns a raw OS descriptor that the event loop may need to
/// `select`/`poll` on. Mirrors the narrow slice of crosvm's
/// `AsRawDescriptor` that this crate actually needs.
pub trait AsRawDescriptor {
    fn as_raw_descriptor(&self) -> RawFd;
}

impl AsRawDescriptor for RawFd {
    fn as_raw_descriptor(&self) -> RawFd {
        *self
    }
}
