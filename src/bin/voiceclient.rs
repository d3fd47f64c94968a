//! Headless voice client
//!
//! Usage: `voiceclient <cid> <callsign> <token>`, then type commands on stdin.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use atc_voice_client::{
    audio::{find_device_index, list_devices, AudioPipeline, Direction},
    config::{ClientConfig, ConfigStore},
    network::NetworkTransport,
    session::{
        state::format_mhz, ConnectionState, ControllerPanel, Preset, SessionController,
        SessionEvent,
    },
};

/// How long to wait for the Disconnect line to reach the server on exit
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(1);

const HELP: &str = "\
Commands:
  ptt on|off                  hold or release push-to-talk
  tx <frequency> <transmitter> transmit on a frequency (kHz x 1000)
  tx off                      stop transmitting
  rx <frequency> on|off       monitor a frequency
  msg <target> <text>         send a text message
  atc tx main|unicom|emergency|custom|off
                              controller positions: transmit on a preset
  atc rx main|unicom|emergency|custom on|off
                              controller positions: monitor a preset
  atc freq <ddd.ddd>          controller positions: set the custom frequency
  devices                     list audio devices
  quit                        disconnect and exit";

#[tokio::main]
async fn main() -> Result<()> {
    let store = ConfigStore::open(ClientConfig::default_path()?)?;
    let config = store.current();

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [cid, callsign, token] = args.as_slice() else {
        bail!("usage: voiceclient <cid> <callsign> <token>");
    };
    let cid: i32 = cid.parse().context("cid must be an integer")?;

    tracing::info!(config = %store.path().display(), "Starting voice client");

    let pipeline = Arc::new(AudioPipeline::new(config.queue_capacity()));
    select_devices(&pipeline, &config);

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(NetworkTransport::new(Handle::current(), transport_tx));
    let session = SessionController::new(
        transport.clone(),
        pipeline.clone(),
        config.session_config(),
        Handle::current(),
    );
    let _pump = session.spawn_event_pump(transport_rx);
    let mut events = session.subscribe();

    session.set_cid(cid);
    session.set_callsign(callsign.as_str());
    session.set_token(token.as_str());
    session.connect();

    println!("{}", HELP);
    let mut panel = ControllerPanel::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let SessionEvent::StateChanged(ConnectionState::Ready) = event {
                        if session.is_controller() {
                            panel.on_ready(session.as_ref(), session.main_frequency());
                        }
                    }
                    report(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} session events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !run_command(&session, &mut panel, line.trim()) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect();
    if !transport.flush(SHUTDOWN_FLUSH).await {
        tracing::warn!("Control channel did not flush before exit");
    }

    let audio = pipeline.stats();
    let network = transport.stats();
    tracing::info!(
        "Stats: {} frames encoded, {} played, {} decode failures, {} voice packets sent, {} received",
        audio.frames_encoded,
        audio.frames_played,
        audio.decode_failures,
        network.voice_sent,
        network.voice_received
    );

    Ok(())
}

/// Apply configured device names; unknown names fall back to the default
fn select_devices(pipeline: &AudioPipeline, config: &ClientConfig) {
    let devices = list_devices();

    for (direction, name) in [
        (Direction::Input, &config.audio_input),
        (Direction::Output, &config.audio_output),
    ] {
        if name.is_empty() {
            continue;
        }
        let Some(index) = find_device_index(&devices, direction, name) else {
            tracing::warn!("{:?} device '{}' not found, using default", direction, name);
            continue;
        };
        let result = match direction {
            Direction::Input => pipeline.set_input_device(Some(index)),
            Direction::Output => pipeline.set_output_device(Some(index)),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to select {:?} device '{}': {}", direction, name, e);
        }
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let kind = if device.is_input { "Input" } else { "Output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!(
            "  [{} {}] {}{} ({} Hz, {} ch)",
            kind, device.index, device.name, default_marker, device.sample_rate, device.channels
        );
    }
    println!();
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("state: {}", state),
        SessionEvent::MessageReceived(message) => {
            println!("[{:?}] {}: {}", message.kind, message.callsign, message.data)
        }
        SessionEvent::FrequencyChanged(0) => println!("transmit: off"),
        SessionEvent::FrequencyChanged(frequency) => println!("transmit: {}", format_mhz(*frequency)),
        SessionEvent::Error(error) => println!("error: {}", error),
        SessionEvent::VoiceReceived(packet) => {
            tracing::trace!(callsign = %packet.callsign, frequency = packet.frequency, "Voice received")
        }
        SessionEvent::VoiceSent => {}
    }
}

/// Returns false when the user asked to quit
fn run_command(session: &SessionController, panel: &mut ControllerPanel, line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();

    match words.as_slice() {
        [] => {}
        ["ptt", "on"] => session.set_ptt(true),
        ["ptt", "off"] => session.set_ptt(false),
        ["tx", "off"] => session.clear_frequency(),
        ["tx", frequency, transmitter] => match (frequency.parse::<u32>(), transmitter.parse::<u8>()) {
            (Ok(frequency), Ok(transmitter)) => session.switch_frequency(frequency, transmitter),
            _ => println!("usage: tx <frequency> <transmitter>"),
        },
        ["rx", frequency, flag @ ("on" | "off")] => match frequency.parse::<u32>() {
            Ok(frequency) => session.set_transmitter_receive_flag(frequency, *flag == "on"),
            Err(_) => println!("usage: rx <frequency> on|off"),
        },
        ["msg", target, text @ ..] if !text.is_empty() => {
            session.send_text_message(target, &text.join(" "))
        }
        ["atc", ..] if !session.is_controller() => println!("not a controller position"),
        ["atc", "tx", "off"] => {
            panel.select_transmit(session, None);
        }
        ["atc", "tx", name] => match Preset::from_name(name) {
            Some(preset) => {
                if !panel.select_transmit(session, Some(preset)) {
                    println!("{:?} has no frequency", preset);
                }
            }
            None => println!("unknown preset: {}", name),
        },
        ["atc", "rx", name, flag @ ("on" | "off")] => match Preset::from_name(name) {
            Some(preset) => {
                if !panel.set_receive(session, preset, *flag == "on") {
                    println!("{:?} has no frequency", preset);
                }
            }
            None => println!("unknown preset: {}", name),
        },
        ["atc", "freq", text] => {
            if !panel.set_custom_frequency(session, text) {
                println!("invalid frequency, expected ddd.ddd");
            }
        }
        ["devices"] => print_devices(),
        ["quit"] | ["exit"] => return false,
        _ => println!("unknown command: {}\n{}", line, HELP),
    }

    true
}
