// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The configuration object consumed once per guest-attach cycle. Parsing
//! it out of xenstore is explicitly out of scope (per spec §1); this is
//! the shape the dispatch engine and device registration expect to
//! receive, deserializable with `serde` so a config-store backend or a
//! test fixture can both produce it the same way.

use serde::Deserialize;

fn default_size() -> u64 {
    0x1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: String,
    pub base: u64,
    pub irq: u32,
    /// Byte width of the address range this device claims. Defaults to one
    /// page; meaningless for `kind == "pci"`, where `base` is instead the
    /// encoded BDF and the range is always the single point `[base, base]`.
    #[serde(default = "default_size")]
    pub size: u64,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    pub domid: u16,
    pub backend_domid: u16,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl DomainConfig {
    pub fn from_json(s: &str) -> serde_json::Result<DomainConfig> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = DomainConfig::from_json(r#"{"domid": 3, "backend_domid": 0}"#).unwrap();
        assert_eq!(cfg.domid, 3);
        assert_eq!(cfg.backend_domid, 0);
        assert!(cfg.devices.is_empty());
    }

    #[test]
    fn parses_device_list() {
        let json = r#"{
            "domid": 7,
            "backend_domid": 0,
            "devices": [
                {"name": "disk0", "kind": "block", "base": 0, "irq": 5, "readonly": true, "path": "/img"}
            ]
        }"#;
        let cfg = DomainConfig::from_json(json).unwrap();
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.devices[0].kind, "block");
        assert!(cfg.devices[0].readonly);
    }
}
