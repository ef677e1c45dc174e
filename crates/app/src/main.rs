use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;

use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Sender;
use lumenbox_core::{
    palette::load_palettes,
    AppConfig, AudioBackend, AudioSampler, FrameScheduler, HeadlessScreen, InputEvent,
    LumenError, ModeRegistry, RemoteControlBridge, SamplerStatus, SharedAudioChannel,
    SharedControls, UdpBridge,
};
use tracing_subscriber::EnvFilter;

fn main() -> lumenbox_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Modes => {
            for (index, name) in ModeRegistry::with_builtin().names().enumerate() {
                println!("{index}\t{name}");
            }
            Ok(())
        }
        Commands::InitConfig { path } => run_init_config(&path),
    }
}

fn run_live(args: LiveArgs) -> lumenbox_core::Result<()> {
    let mut config = AppConfig::load_or_create(&args.config)?;
    if args.synthetic {
        config.audio.backend = AudioBackend::Synthetic {
            frequency: 220.0,
            amplitude: 0.5,
        };
    }
    if args.mode.is_some() {
        config.modes.initial = args.mode;
    }
    tracing::info!(config = ?args.config, ticks = args.ticks, "starting live mode");

    let channel = SharedAudioChannel::new();
    let sampler = AudioSampler::spawn(&config.audio, channel.clone());
    if let SamplerStatus::Failed(reason) = sampler.status() {
        if config.audio.require_audio {
            return Err(LumenError::Audio(reason.clone()));
        }
    }

    let (screen, events) = HeadlessScreen::new();
    let controls = SharedControls::new();
    spawn_console(events, controls.clone())?;

    let mut scheduler = FrameScheduler::new(
        &config,
        ModeRegistry::with_builtin(),
        Box::new(screen),
        Box::new(controls),
        channel,
    );
    scheduler.set_sampler(sampler);
    match load_palettes(&config.paths.palettes) {
        Ok(palettes) => scheduler.control_mut().set_palettes(palettes),
        Err(err) => tracing::warn!(%err, "could not load palettes, keeping defaults"),
    }

    if config.remote.enabled {
        let bridge = RemoteControlBridge::new(scheduler.control().overrides());
        match UdpBridge::spawn(&config.remote.listen, &config.remote.reply, bridge) {
            Ok(link) => scheduler.set_remote(Box::new(link)),
            Err(err) => tracing::warn!(%err, "remote control unavailable"),
        }
    }

    let ticks = scheduler.run(args.ticks);
    tracing::info!(ticks, "live mode finished");
    Ok(())
}

fn run_init_config(path: &Path) -> lumenbox_core::Result<()> {
    if path.exists() {
        return Err(LumenError::msg(format!(
            "{} already exists, not overwriting",
            path.display()
        )));
    }
    AppConfig::live_defaults().save(path)?;
    tracing::info!(?path, "wrote default config");
    Ok(())
}

/// Reads console commands from stdin and turns them into input events and
/// knob movements.
fn spawn_console(events: Sender<InputEvent>, controls: SharedControls) -> lumenbox_core::Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_console(&line) {
                    Some(ConsoleCommand::Event(event)) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Some(ConsoleCommand::Knob(index, value)) => controls.set_knob(index, value),
                    Some(ConsoleCommand::Gain(value)) => controls.set_gain_knob(value),
                    Some(ConsoleCommand::Note(note, on)) => {
                        if on {
                            controls.note_on(note);
                        } else {
                            controls.note_off(note);
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!(line = %line, "unknown console command"),
                }
            }
        })?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConsoleCommand {
    Event(InputEvent),
    Knob(usize, f32),
    Gain(f32),
    Note(u8, bool),
}

fn parse_console(line: &str) -> Option<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let mut arg = || words.next();

    let event = match command {
        "q" | "quit" => InputEvent::Quit,
        "m" | "menu" => InputEvent::ToggleMenu,
        "o" | "osd" => InputEvent::ToggleOsd,
        "c" | "clear" => InputEvent::ToggleAutoClear,
        "l" | "lock" => InputEvent::ToggleGainLock,
        "n" | "next" => InputEvent::NextMode,
        "p" | "prev" => InputEvent::PreviousMode,
        "g" | "grab" => InputEvent::Screengrab,
        "r" | "reset" => InputEvent::ResetPeaks,
        "rec" => InputEvent::SequencerRecord,
        "play" => InputEvent::SequencerPlay,
        "stop" => InputEvent::SequencerStop,
        "loop" => InputEvent::ToggleSequencerLoop,
        "mode" => InputEvent::SelectMode(arg()?.parse().ok()?),
        "press" | "release" => InputEvent::Button {
            index: arg()?.parse().ok()?,
            down: command == "press",
        },
        "knob" => {
            let index = arg()?.parse().ok()?;
            let value = arg()?.parse().ok()?;
            return Some(ConsoleCommand::Knob(index, value));
        }
        "gain" => return Some(ConsoleCommand::Gain(arg()?.parse().ok()?)),
        "on" | "off" => {
            return Some(ConsoleCommand::Note(arg()?.parse().ok()?, command == "on"));
        }
        _ => return None,
    };
    Some(ConsoleCommand::Event(event))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive video synthesizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the frame loop with audio capture and remote control.
    Live(LiveArgs),
    /// List the registered modes with their indices.
    Modes,
    /// Write a default configuration file.
    InitConfig {
        /// Where to write the file.
        #[arg(default_value = "lumenbox.json")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// Configuration file; created with defaults if missing.
    #[arg(short, long, default_value = "lumenbox.json")]
    config: PathBuf,
    /// Stop after this many frames.
    #[arg(short, long)]
    ticks: Option<u64>,
    /// Use a generated sine instead of a capture device.
    #[arg(long)]
    synthetic: bool,
    /// Mode to start in, by name.
    #[arg(short, long)]
    mode: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands_map_to_inputs() {
        assert_eq!(
            parse_console("q"),
            Some(ConsoleCommand::Event(InputEvent::Quit))
        );
        assert_eq!(
            parse_console("mode 1"),
            Some(ConsoleCommand::Event(InputEvent::SelectMode(1)))
        );
        assert_eq!(
            parse_console("release 9"),
            Some(ConsoleCommand::Event(InputEvent::Button { index: 9, down: false }))
        );
        assert_eq!(
            parse_console("loop"),
            Some(ConsoleCommand::Event(InputEvent::ToggleSequencerLoop))
        );
        assert_eq!(parse_console("knob 2 0.5"), Some(ConsoleCommand::Knob(2, 0.5)));
        assert_eq!(parse_console("on 60"), Some(ConsoleCommand::Note(60, true)));
        assert_eq!(parse_console("knob x"), None);
        assert_eq!(parse_console("dance"), None);
    }
}
