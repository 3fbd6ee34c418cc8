// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Logging setup, the way crosvm's `base::syslog` is the one place callers
//! go through instead of reaching for `env_logger` directly.

use once_cell::sync::OnceCell;

static INIT: OnceCell<()> = OnceCell::new();

/// Initializes the process-wide logger. Safe to call more than once; only
/// the first call takes effect.
pub fn init() {
    INIT.get_or_init(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_micros()
            .init();
    });
}
