//! Endpoint, connector and connection-type value types.
//!
//! Every physical terminal in the plant is addressed by a `(device, control,
//! address)` triple.  A source device's output 2 and a matrix switcher's input
//! 7 are both just [`EndpointInfo`] values; whether a terminal is an input or
//! an output depends on which side of a [`crate::Connection`] it appears on.
//!
//! # Connection-type flags (for beginners)
//!
//! A single HDMI cable carries video *and* audio, while a USB extender only
//! carries USB.  [`ConnectionType`] is a small bit set so one value can say
//! "this link carries video and audio".  Routing and usage accounting often
//! need to work one signal type at a time, so [`ConnectionType::flags`]
//! decomposes a composite mask into its individual flags:
//!
//! ```rust
//! use avroute_core::ConnectionType;
//!
//! let av = ConnectionType::VIDEO | ConnectionType::AUDIO;
//! let flags: Vec<_> = av.flags().collect();
//! assert_eq!(flags, vec![ConnectionType::VIDEO, ConnectionType::AUDIO]);
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Identifies a device (a box on the rack).
pub type DeviceId = u32;

/// Identifies a control on a device (one device may expose several).
pub type ControlId = u32;

/// Identifies one numbered terminal (input or output) on a control.
pub type Address = u32;

/// Identifies a room requesting routes.
pub type RoomId = u32;

// ── Connection types ──────────────────────────────────────────────────────────

/// Bit set of signal types carried by a connection or requested by a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionType(pub u8);

impl ConnectionType {
    pub const NONE: ConnectionType = ConnectionType(0);
    pub const VIDEO: ConnectionType = ConnectionType(1 << 0);
    pub const AUDIO: ConnectionType = ConnectionType(1 << 1);
    pub const USB: ConnectionType = ConnectionType(1 << 2);
    pub const ALL: ConnectionType = ConnectionType(0b0111);

    /// Returns `true` when no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when every flag in `other` is also set in `self`.
    pub fn contains(self, other: ConnectionType) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when at least one flag is shared.
    pub fn intersects(self, other: ConnectionType) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: ConnectionType) -> ConnectionType {
        ConnectionType(self.0 | other.0)
    }

    pub fn intersection(self, other: ConnectionType) -> ConnectionType {
        ConnectionType(self.0 & other.0)
    }

    /// Returns `true` when exactly one flag is set.
    pub fn is_single(self) -> bool {
        self.0 != 0 && self.0 & (self.0 - 1) == 0
    }

    /// Iterates the individual flags of this mask, lowest bit first.
    pub fn flags(self) -> impl Iterator<Item = ConnectionType> {
        (0..8u8)
            .map(|bit| 1u8 << bit)
            .filter(move |bit| self.0 & bit != 0)
            .map(ConnectionType)
    }
}

impl BitOr for ConnectionType {
    type Output = ConnectionType;

    fn bitor(self, rhs: ConnectionType) -> ConnectionType {
        self.union(rhs)
    }
}

impl BitOrAssign for ConnectionType {
    fn bitor_assign(&mut self, rhs: ConnectionType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ConnectionType {
    type Output = ConnectionType;

    fn bitand(self, rhs: ConnectionType) -> ConnectionType {
        self.intersection(rhs)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = self
            .flags()
            .map(|flag| match flag {
                ConnectionType::VIDEO => "Video",
                ConnectionType::AUDIO => "Audio",
                ConnectionType::USB => "Usb",
                _ => "Unknown",
            })
            .collect();
        f.write_str(&names.join("|"))
    }
}

// ── Endpoints ─────────────────────────────────────────────────────────────────

/// A `(device, control)` pair identifying a control without an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceControlInfo {
    pub device: DeviceId,
    pub control: ControlId,
}

impl DeviceControlInfo {
    pub fn new(device: DeviceId, control: ControlId) -> Self {
        Self { device, control }
    }
}

impl fmt::Display for DeviceControlInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.control)
    }
}

/// One terminal (an output or an input) on a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub device: DeviceId,
    pub control: ControlId,
    pub address: Address,
}

impl EndpointInfo {
    pub fn new(device: DeviceId, control: ControlId, address: Address) -> Self {
        Self {
            device,
            control,
            address,
        }
    }

    /// Returns the control this endpoint lives on.
    pub fn device_control(&self) -> DeviceControlInfo {
        DeviceControlInfo::new(self.device, self.control)
    }

    /// Returns the endpoint at `address` on the same control.
    pub fn with_address(&self, address: Address) -> Self {
        Self { address, ..*self }
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.device, self.control, self.address)
    }
}

/// One physical port on a control, without naming the far end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub address: Address,
    pub connection_type: ConnectionType,
}

impl ConnectorInfo {
    pub fn new(address: Address, connection_type: ConnectionType) -> Self {
        Self {
            address,
            connection_type,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_decomposes_composite_mask() {
        let mask = ConnectionType::VIDEO | ConnectionType::USB;
        let flags: Vec<_> = mask.flags().collect();
        assert_eq!(flags, vec![ConnectionType::VIDEO, ConnectionType::USB]);
    }

    #[test]
    fn test_flags_of_empty_mask_is_empty() {
        assert_eq!(ConnectionType::NONE.flags().count(), 0);
    }

    #[test]
    fn test_contains_requires_every_flag() {
        let av = ConnectionType::VIDEO | ConnectionType::AUDIO;
        assert!(av.contains(ConnectionType::VIDEO));
        assert!(av.contains(av));
        assert!(!ConnectionType::VIDEO.contains(av));
        assert!(ConnectionType::VIDEO.intersects(av));
    }

    #[test]
    fn test_is_single_only_for_one_flag() {
        assert!(ConnectionType::AUDIO.is_single());
        assert!(!ConnectionType::ALL.is_single());
        assert!(!ConnectionType::NONE.is_single());
    }

    #[test]
    fn test_display_lists_flag_names() {
        let av = ConnectionType::VIDEO | ConnectionType::AUDIO;
        assert_eq!(av.to_string(), "Video|Audio");
        assert_eq!(ConnectionType::NONE.to_string(), "None");
    }

    #[test]
    fn test_endpoint_device_control_drops_address() {
        let endpoint = EndpointInfo::new(3, 1, 7);
        assert_eq!(endpoint.device_control(), DeviceControlInfo::new(3, 1));
        assert_eq!(endpoint.with_address(9), EndpointInfo::new(3, 1, 9));
    }
}
