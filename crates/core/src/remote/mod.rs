//! Remote control: an external process overriding knobs, the LED and the
//! active mode.
//!
//! Commands arrive as OSC messages over UDP. Each maps onto a one-line text
//! form, which is also accepted directly (one command per line, leading
//! slash optional):
//!
//! ```text
//! /knob/<n> <float>   override knob n (0-based) with a value in [0, 1]
//! /release/<n>        drop the override on knob n
//! /led <int>          set the LED
//! /mode <int>         switch to mode index
//! ```
//!
//! LED changes are announced back as an OSC `/led <int>` message.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use rosc::{OscMessage, OscPacket, OscType};

use crate::{control::OverrideBank, control::KNOB_COUNT, LumenError, RemoteError, Result};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteCommand {
    Knob { index: usize, value: f32 },
    Release { index: usize },
    Led(i32),
    Mode(usize),
}

impl RemoteCommand {
    pub fn parse(message: &str) -> std::result::Result<Self, RemoteError> {
        let mut parts = message.split_whitespace();
        let address = parts.next().ok_or(RemoteError::Empty)?;
        let value = parts.next();
        let path = address.trim_start_matches('/');

        if let Some(index) = path.strip_prefix("knob/") {
            let index = parse_knob_index(index)?;
            let value = value.ok_or_else(|| RemoteError::MissingValue(address.to_string()))?;
            let parsed: f32 = parse_value(address, value)?;
            if !parsed.is_finite() {
                return Err(invalid(address, value));
            }
            return Ok(RemoteCommand::Knob {
                index,
                value: parsed.clamp(0.0, 1.0),
            });
        }

        if let Some(index) = path.strip_prefix("release/") {
            return Ok(RemoteCommand::Release {
                index: parse_knob_index(index)?,
            });
        }

        match path {
            "led" => {
                let value = value.ok_or_else(|| RemoteError::MissingValue(address.to_string()))?;
                Ok(RemoteCommand::Led(parse_value(address, value)?))
            }
            "mode" => {
                let value = value.ok_or_else(|| RemoteError::MissingValue(address.to_string()))?;
                Ok(RemoteCommand::Mode(parse_value(address, value)?))
            }
            _ => Err(RemoteError::UnknownAddress(address.to_string())),
        }
    }

    /// Interprets an OSC message; the first argument is the value. Float
    /// arguments to `/led` and `/mode` are truncated toward zero.
    pub fn from_osc(message: &OscMessage) -> std::result::Result<Self, RemoteError> {
        let integral = matches!(message.addr.trim_start_matches('/'), "led" | "mode");
        match message.args.first().and_then(|arg| osc_value(arg, integral)) {
            Some(value) => Self::parse(&format!("{} {value}", message.addr)),
            None => Self::parse(&message.addr),
        }
    }
}

fn osc_value(arg: &OscType, integral: bool) -> Option<String> {
    match arg {
        OscType::Int(value) => Some(value.to_string()),
        OscType::Long(value) => Some(value.to_string()),
        OscType::Float(value) if integral && value.is_finite() => {
            Some((value.trunc() as i64).to_string())
        }
        OscType::Double(value) if integral && value.is_finite() => {
            Some((value.trunc() as i64).to_string())
        }
        OscType::Float(value) => Some(value.to_string()),
        OscType::Double(value) => Some(value.to_string()),
        OscType::String(value) => Some(value.clone()),
        OscType::Bool(value) => Some(u8::from(*value).to_string()),
        _ => None,
    }
}

fn parse_knob_index(text: &str) -> std::result::Result<usize, RemoteError> {
    text.parse::<usize>()
        .ok()
        .filter(|index| *index < KNOB_COUNT)
        .ok_or_else(|| RemoteError::KnobIndex(text.to_string()))
}

fn parse_value<T: std::str::FromStr>(address: &str, value: &str) -> std::result::Result<T, RemoteError> {
    value.parse().map_err(|_| invalid(address, value))
}

fn invalid(address: &str, value: &str) -> RemoteError {
    RemoteError::InvalidValue {
        address: address.to_string(),
        value: value.to_string(),
    }
}

/// Applies remote commands to the override layer. Safe to use from any
/// thread.
#[derive(Debug, Clone)]
pub struct RemoteControlBridge {
    overrides: Arc<OverrideBank>,
}

impl RemoteControlBridge {
    pub fn new(overrides: Arc<OverrideBank>) -> Self {
        Self { overrides }
    }

    pub fn apply(&self, command: RemoteCommand) {
        match command {
            RemoteCommand::Knob { index, value } => {
                self.overrides.set_knob(index, value);
            }
            RemoteCommand::Release { index } => {
                self.overrides.clear_knob(index);
            }
            RemoteCommand::Led(value) => self.overrides.set_led(value),
            RemoteCommand::Mode(index) => self.overrides.request_mode(index),
        }
    }

    /// Parses and applies one message.
    pub fn handle_message(&self, message: &str) -> std::result::Result<RemoteCommand, RemoteError> {
        let command = RemoteCommand::parse(message)?;
        self.apply(command);
        Ok(command)
    }

    /// Applies every message in an OSC packet, bundles included.
    pub fn handle_packet(&self, packet: &OscPacket) -> usize {
        match packet {
            OscPacket::Message(message) => match RemoteCommand::from_osc(message) {
                Ok(command) => {
                    tracing::debug!(?command, "remote command");
                    self.apply(command);
                    1
                }
                Err(err) => {
                    tracing::warn!(address = %message.addr, %err, "dropping remote message");
                    0
                }
            },
            OscPacket::Bundle(bundle) => bundle
                .content
                .iter()
                .map(|packet| self.handle_packet(packet))
                .sum(),
        }
    }

    /// Handles one datagram: an OSC packet, or failing that, text lines.
    /// Malformed commands are logged and dropped. Returns how many were
    /// applied.
    pub fn handle_datagram(&self, payload: &[u8]) -> usize {
        if let Ok((_, packet)) = rosc::decoder::decode_udp(payload) {
            return self.handle_packet(&packet);
        }

        let text = String::from_utf8_lossy(payload);
        let mut applied = 0;
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            match self.handle_message(line) {
                Ok(command) => {
                    tracing::debug!(?command, "remote command");
                    applied += 1;
                }
                Err(err) => tracing::warn!(message = line, %err, "dropping remote message"),
            }
        }
        applied
    }
}

/// What the frame loop needs from a remote-control transport.
pub trait RemoteLink {
    /// Announces an LED change to the remote side. Must not block.
    fn notify_led(&mut self, led: i32);

    /// Stops the listener, waiting up to `grace`.
    fn close(&mut self, grace: Duration);
}

/// UDP transport: listens for command datagrams on its own thread and sends
/// LED notifications to a fixed reply address.
pub struct UdpBridge {
    socket: UdpSocket,
    reply: SocketAddr,
    running: Arc<AtomicBool>,
    done_rx: Option<Receiver<()>>,
    thread: Option<JoinHandle<()>>,
}

impl UdpBridge {
    pub fn spawn(listen: &str, reply: &str, bridge: RemoteControlBridge) -> Result<Self> {
        let socket = UdpSocket::bind(listen)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let reply = reply
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| LumenError::msg(format!("cannot resolve reply address `{reply}`")))?;

        let listener = socket.try_clone()?;
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("remote-control".to_string())
            .spawn(move || {
                let mut buffer = [0_u8; MAX_DATAGRAM];
                while flag.load(Ordering::Acquire) {
                    match listener.recv_from(&mut buffer) {
                        Ok((len, _from)) => {
                            bridge.handle_datagram(&buffer[..len]);
                        }
                        Err(err)
                            if matches!(
                                err.kind(),
                                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                            ) => {}
                        Err(err) => tracing::warn!(%err, "remote receive failed"),
                    }
                }
                let _ = done_tx.send(());
            })?;

        tracing::info!(listen, %reply, "remote control listening");
        Ok(Self {
            socket,
            reply,
            running,
            done_rx: Some(done_rx),
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl RemoteLink for UdpBridge {
    fn notify_led(&mut self, led: i32) {
        let packet = OscPacket::Message(OscMessage {
            addr: "/led".to_string(),
            args: vec![OscType::Int(led)],
        });
        let bytes = match rosc::encoder::encode(&packet) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(?err, "could not encode led notification");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&bytes, self.reply) {
            tracing::warn!(%err, reply = %self.reply, "led notification failed");
        }
    }

    fn close(&mut self, grace: Duration) {
        self.running.store(false, Ordering::Release);
        let Some(done_rx) = self.done_rx.take() else {
            return;
        };
        match done_rx.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                tracing::info!("remote control closed");
            }
            Err(RecvTimeoutError::Timeout) => {
                self.thread.take();
                tracing::warn!(?grace, "remote listener did not stop, detaching");
            }
        }
    }
}

impl Drop for UdpBridge {
    fn drop(&mut self) {
        self.close(Duration::from_secs(1));
    }
}
