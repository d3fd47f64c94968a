//! COM1/COM2 radio panel
//!
//! Reconciles radio state reported by a flight simulator with the session:
//! tuning a COM moves the receive authorization along with it, and a COM
//! selected for transmit drags the transmit frequency with it.

use crate::session::state::format_mhz;

/// What the panel needs from the session
pub trait RadioControl {
    fn set_receive(&self, frequency: u32, enabled: bool);
    fn switch_transmit(&self, frequency: u32, transmitter: u8);
    fn clear_transmit(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Com {
    Com1,
    Com2,
}

impl Com {
    pub fn transmitter(self) -> u8 {
        match self {
            Com::Com1 => 0,
            Com::Com2 => 1,
        }
    }
}

/// Reported state of one COM radio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComState {
    pub frequency: u32,
    pub receive: bool,
}

impl ComState {
    pub fn new(frequency: u32, receive: bool) -> Self {
        Self { frequency, receive }
    }
}

/// One simulator poll result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioUpdate {
    pub com1: ComState,
    pub com2: ComState,
}

#[derive(Debug, Clone, Copy, Default)]
struct ComSlot {
    state: ComState,
    /// Receive indicator: previous or current receive flag
    listening: bool,
}

#[derive(Debug, Default)]
pub struct RadioPanel {
    com1: ComSlot,
    com2: ComSlot,
    transmit: Option<Com>,
}

impl RadioPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn com(&self, com: Com) -> ComState {
        self.slot(com).state
    }

    pub fn is_listening(&self, com: Com) -> bool {
        self.slot(com).listening
    }

    pub fn transmit(&self) -> Option<Com> {
        self.transmit
    }

    pub fn apply<R: RadioControl + ?Sized>(&mut self, radio: &R, update: RadioUpdate) {
        self.reconcile(radio, Com::Com1, update.com1);
        self.reconcile(radio, Com::Com2, update.com2);
    }

    /// Pick the COM used for transmit, or stop transmitting with `None`
    pub fn select_transmit<R: RadioControl + ?Sized>(&mut self, radio: &R, com: Option<Com>) {
        self.transmit = com;
        match com {
            Some(com) => radio.switch_transmit(self.slot(com).state.frequency, com.transmitter()),
            None => radio.clear_transmit(),
        }
    }

    fn reconcile<R: RadioControl + ?Sized>(&mut self, radio: &R, com: Com, update: ComState) {
        let transmitting = self.transmit == Some(com);
        let slot = self.slot_mut(com);

        if slot.state.frequency != update.frequency {
            if slot.state.frequency != 0 {
                radio.set_receive(slot.state.frequency, false);
            }
            radio.set_receive(update.frequency, slot.state.receive | update.receive);
            tracing::debug!(?com, "Tuned to {}", format_mhz(update.frequency));
            if transmitting {
                radio.switch_transmit(update.frequency, com.transmitter());
            }
            slot.state.frequency = update.frequency;
        }

        slot.listening = slot.state.receive | update.receive;
        slot.state.receive = update.receive;
    }

    fn slot(&self, com: Com) -> &ComSlot {
        match com {
            Com::Com1 => &self.com1,
            Com::Com2 => &self.com2,
        }
    }

    fn slot_mut(&mut self, com: Com) -> &mut ComSlot {
        match com {
            Com::Com1 => &mut self.com1,
            Com::Com2 => &mut self.com2,
        }
    }
}
