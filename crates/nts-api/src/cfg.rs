// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Control-plane configuration of the receive stack.

use crate::Ipv4Addr;
use crate::MacAddr;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The smallest legal IPv4 datagram: a bare header.
pub const MIN_DATAGRAM_SIZE: u16 = 20;

/// The largest datagram the stack is built to buffer (a jumbo frame's
/// IP payload). Channels that must hold a whole datagram while its
/// checksum is being verified are sized for this.
pub const MAX_DATAGRAM_SIZE: u16 = 9216;

/// The default maximum datagram size: the standard Ethernet MTU.
pub const DEFAULT_MAX_DATAGRAM_SIZE: u16 = 1500;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CfgError {
    #[error("MAC address {0} is not a unicast address")]
    BadMac(MacAddr),

    #[error("IPv4 address {0} cannot be assigned to an interface")]
    BadIp(Ipv4Addr),

    #[error("netmask {0} is not a contiguous prefix")]
    BadNetmask(Ipv4Addr),

    #[error("max datagram size {size} is outside [{min}, {max}]")]
    BadMaxDatagramSize { size: u16, min: u16, max: u16 },
}

/// Configuration of the receive stack.
///
/// These values mirror the registers the management plane writes
/// before any traffic is admitted; they must be stable before the
/// first frame is pushed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NtsCfg {
    /// The MAC address of this interface.
    pub mac: MacAddr,

    /// The IPv4 address of this interface.
    pub ip: Ipv4Addr,

    /// The subnet mask; used to recognise the subnet-directed
    /// broadcast address.
    #[serde(default = "default_netmask")]
    pub netmask: Ipv4Addr,

    /// Datagrams whose Total-Length exceeds this value are filtered.
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: u16,

    /// Whether the stack admits traffic at start.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_netmask() -> Ipv4Addr {
    Ipv4Addr::from_const([255, 255, 255, 0])
}

fn default_max_datagram_size() -> u16 {
    DEFAULT_MAX_DATAGRAM_SIZE
}

fn default_enabled() -> bool {
    true
}

impl NtsCfg {
    pub fn new(mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            mac,
            ip,
            netmask: default_netmask(),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), CfgError> {
        // The group bit is the low bit of the first octet.
        if self.mac.bytes()[0] & 0x1 != 0 || self.mac == MacAddr::ZERO {
            return Err(CfgError::BadMac(self.mac));
        }

        if self.ip == Ipv4Addr::ANY_ADDR || self.ip == Ipv4Addr::LOCAL_BCAST {
            return Err(CfgError::BadIp(self.ip));
        }

        let mask = u32::from(self.netmask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(CfgError::BadNetmask(self.netmask));
        }

        if !(MIN_DATAGRAM_SIZE..=MAX_DATAGRAM_SIZE)
            .contains(&self.max_datagram_size)
        {
            return Err(CfgError::BadMaxDatagramSize {
                size: self.max_datagram_size,
                min: MIN_DATAGRAM_SIZE,
                max: MAX_DATAGRAM_SIZE,
            });
        }

        Ok(())
    }

    /// The subnet-directed broadcast address of this interface.
    pub fn directed_bcast(&self) -> Ipv4Addr {
        self.ip.directed_bcast(self.netmask)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cfg() -> NtsCfg {
        NtsCfg::new(
            "a8:40:25:00:00:01".parse().unwrap(),
            "10.0.0.5".parse().unwrap(),
        )
    }

    #[test]
    fn default_cfg_is_valid() {
        assert_eq!(cfg().validate(), Ok(()));
    }

    #[test]
    fn reject_bad_values() {
        let mut c = cfg();
        c.mac = MacAddr::BROADCAST;
        assert_eq!(c.validate(), Err(CfgError::BadMac(MacAddr::BROADCAST)));

        let mut c = cfg();
        c.netmask = "255.0.255.0".parse().unwrap();
        assert!(matches!(c.validate(), Err(CfgError::BadNetmask(_))));

        let mut c = cfg();
        c.max_datagram_size = MAX_DATAGRAM_SIZE + 1;
        assert!(matches!(
            c.validate(),
            Err(CfgError::BadMaxDatagramSize { .. })
        ));
    }

    #[test]
    fn from_toml() {
        let c: NtsCfg = toml::from_str(
            r#"
            mac = "a8:40:25:00:00:01"
            ip = "10.0.0.5"
            max_datagram_size = 9000
            "#,
        )
        .unwrap();

        assert_eq!(c.ip, "10.0.0.5".parse().unwrap());
        assert_eq!(c.netmask, "255.255.255.0".parse().unwrap());
        assert_eq!(c.max_datagram_size, 9000);
        assert!(c.enabled);
        assert_eq!(c.directed_bcast(), "10.0.0.255".parse().unwrap());
    }
}
