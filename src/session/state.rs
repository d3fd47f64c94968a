//! Connection state and session identity

use std::fmt;

/// Session connection state
///
/// `Disconnected -> Connecting -> Connected -> Ready`, with `Disconnected`
/// reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Reserved; no transition currently enters it
    Authenticating = 3,
    Ready = 4,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Authenticating,
            4 => ConnectionState::Ready,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Who we are on the network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub cid: Option<i32>,
    pub callsign: Option<String>,
    pub token: Option<String>,
}

impl SessionIdentity {
    /// cid and callsign, if both are known
    pub fn station(&self) -> Option<(i32, &str)> {
        match (self.cid, self.callsign.as_deref()) {
            (Some(cid), Some(callsign)) => Some((cid, callsign)),
            _ => None,
        }
    }
}

/// Station details announced by the welcome message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationInfo {
    pub main_frequency: u32,
    pub is_controller: bool,
}

/// Format a frequency (kHz x 1000) as MHz with three decimals
pub fn format_mhz(frequency: u32) -> String {
    format!("{:.3}MHz", frequency as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_repr_round_trip() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authenticating,
            ConnectionState::Ready,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Disconnected);
    }

    #[test]
    fn test_station_requires_cid_and_callsign() {
        let mut identity = SessionIdentity::default();
        assert!(identity.station().is_none());

        identity.cid = Some(1001);
        assert!(identity.station().is_none());

        identity.callsign = Some("CCA1234".to_string());
        assert_eq!(identity.station(), Some((1001, "CCA1234")));
    }

    #[test]
    fn test_format_mhz() {
        assert_eq!(format_mhz(122_800), "122.800MHz");
        assert_eq!(format_mhz(121_500), "121.500MHz");
    }
}
