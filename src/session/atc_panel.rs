//! Controller position panel
//!
//! Stations the welcome message marks as a controller get four transmit
//! presets: the position's main frequency, UNICOM, emergency and a
//! free-entry frequency, each on its own transmitter. At most one preset
//! transmits at a time.

use crate::constants::{EMERGENCY_FREQUENCY, UNICOM_FREQUENCY};
use crate::session::radio::RadioControl;
use crate::session::state::format_mhz;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    Main,
    Unicom,
    Emergency,
    Custom,
}

impl Preset {
    pub fn transmitter(self) -> u8 {
        match self {
            Preset::Main => 0,
            Preset::Unicom => 1,
            Preset::Emergency => 2,
            Preset::Custom => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "main" => Some(Preset::Main),
            "unicom" => Some(Preset::Unicom),
            "emergency" | "emer" => Some(Preset::Emergency),
            "custom" => Some(Preset::Custom),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self.transmitter() as usize
    }
}

/// Parse `ddd.ddd` MHz (one to three integer digits, exactly three
/// decimals) into kHz x 1000 units. Zero is not a frequency.
pub fn parse_frequency(text: &str) -> Option<u32> {
    let (mhz, khz) = text.trim().split_once('.')?;
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !(1..=3).contains(&mhz.len()) || khz.len() != 3 || !digits(mhz) || !digits(khz) {
        return None;
    }
    let frequency = mhz.parse::<u32>().ok()? * 1000 + khz.parse::<u32>().ok()?;
    (frequency != 0).then_some(frequency)
}

#[derive(Debug, Default)]
pub struct ControllerPanel {
    main_frequency: u32,
    custom_frequency: Option<u32>,
    receive: [bool; 4],
    transmit: Option<Preset>,
}

impl ControllerPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frequency behind a preset, if it has one yet
    pub fn frequency(&self, preset: Preset) -> Option<u32> {
        match preset {
            Preset::Main => (self.main_frequency != 0).then_some(self.main_frequency),
            Preset::Unicom => Some(UNICOM_FREQUENCY),
            Preset::Emergency => Some(EMERGENCY_FREQUENCY),
            Preset::Custom => self.custom_frequency,
        }
    }

    pub fn is_receiving(&self, preset: Preset) -> bool {
        self.receive[preset.index()]
    }

    pub fn transmit(&self) -> Option<Preset> {
        self.transmit
    }

    /// Session became Ready as a controller: monitor main, UNICOM and emergency
    pub fn on_ready<R: RadioControl + ?Sized>(&mut self, radio: &R, main_frequency: u32) {
        self.main_frequency = main_frequency;
        tracing::info!("Controller position on {}", format_mhz(main_frequency));

        for preset in [Preset::Main, Preset::Unicom, Preset::Emergency] {
            self.set_receive(radio, preset, true);
        }
        self.receive[Preset::Custom.index()] = false;
    }

    /// Toggle monitoring of a preset. Returns false if it has no frequency.
    pub fn set_receive<R: RadioControl + ?Sized>(
        &mut self,
        radio: &R,
        preset: Preset,
        enabled: bool,
    ) -> bool {
        let Some(frequency) = self.frequency(preset) else {
            return false;
        };
        self.receive[preset.index()] = enabled;
        radio.set_receive(frequency, enabled);
        true
    }

    /// Transmit on a preset, or stop transmitting with `None`.
    /// Returns false if the preset has no frequency.
    pub fn select_transmit<R: RadioControl + ?Sized>(
        &mut self,
        radio: &R,
        preset: Option<Preset>,
    ) -> bool {
        match preset {
            Some(preset) => {
                let Some(frequency) = self.frequency(preset) else {
                    return false;
                };
                self.transmit = Some(preset);
                radio.switch_transmit(frequency, preset.transmitter());
            }
            None => {
                self.transmit = None;
                radio.clear_transmit();
            }
        }
        true
    }

    /// Enter the free frequency. Invalid text disables the custom preset,
    /// releasing its receive flag and transmit selection.
    pub fn set_custom_frequency<R: RadioControl + ?Sized>(&mut self, radio: &R, text: &str) -> bool {
        let previous = self.custom_frequency;
        let receiving = self.is_receiving(Preset::Custom);

        match parse_frequency(text) {
            Some(frequency) => {
                if receiving && previous != Some(frequency) {
                    if let Some(old) = previous {
                        radio.set_receive(old, false);
                    }
                    radio.set_receive(frequency, true);
                }
                self.custom_frequency = Some(frequency);
                true
            }
            None => {
                tracing::debug!("Invalid frequency '{}'", text);
                if let (Some(old), true) = (previous, receiving) {
                    radio.set_receive(old, false);
                }
                self.receive[Preset::Custom.index()] = false;
                self.custom_frequency = None;
                if self.transmit == Some(Preset::Custom) {
                    self.select_transmit(radio, None);
                }
                false
            }
        }
    }
}
