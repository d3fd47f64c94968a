//! Session layer: connection state machine and its helpers

pub mod activity;
pub mod atc_panel;
pub mod controller;
pub mod events;
pub mod radio;
pub mod state;

pub use activity::ActivityMonitor;
pub use atc_panel::{ControllerPanel, Preset};
pub use controller::{SessionConfig, SessionController};
pub use events::SessionEvent;
pub use radio::{Com, ComState, RadioControl, RadioPanel, RadioUpdate};
pub use state::{ConnectionState, SessionIdentity, StationInfo};
