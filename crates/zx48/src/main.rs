//! ZX Spectrum 48K emulator: desktop runner.
//!
//! Window and blitter via winit + pixels, audio via cpal, 50 Hz pacing by
//! frame-time checks on redraw. Runner hotkeys:
//!
//! - F5 play tape, F6 stop tape, F7 rewind tape
//! - F8 pause/resume, F9 single-frame step while paused
//! - F12 reset, Escape quit
//! - Numpad 8/4/6/2 + Numpad 0 drive the Kempston joystick

mod audio;

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode as WinitKey, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use audio::AudioOutput;
use machine_spectrum::Spectrum;
use machine_spectrum::memory::ROM_LEN;
use zx_core::{JoystickState, KeyCode, Machine};

/// Integer window scale for sharp pixels.
const SCALE: u32 = 3;

/// 50 Hz frame period.
const FRAME_DURATION: Duration = Duration::from_millis(20);

struct CliArgs {
    rom_path: PathBuf,
    tape_path: Option<PathBuf>,
    snapshot_path: Option<PathBuf>,
    fast_load: bool,
    debug: bool,
}

fn print_usage_and_exit(code: i32) -> ! {
    eprintln!(
        "Usage: zx48 [options]\n\
         \n\
         Options:\n\
           -r, --rom PATH        16K ROM image (default ./roms/48k.bin)\n\
           -t, --tape PATH       TZX tape to load\n\
           -s, --snapshot PATH   SNA or Z80 snapshot to load\n\
           -f, --fast-load PATH  like --tape with the ROM-trap fast loader\n\
           -d, --debug           start paused (F9 steps one frame)\n\
           -h, --help            show this help"
    );
    process::exit(code);
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        rom_path: PathBuf::from("./roms/48k.bin"),
        tape_path: None,
        snapshot_path: None,
        fast_load: false,
        debug: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-r" | "--rom" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Missing value for --rom");
                    print_usage_and_exit(1);
                };
                cli.rom_path = PathBuf::from(value);
            }
            "-t" | "--tape" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Missing value for --tape");
                    print_usage_and_exit(1);
                };
                cli.tape_path = Some(PathBuf::from(value));
            }
            "-s" | "--snapshot" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Missing value for --snapshot");
                    print_usage_and_exit(1);
                };
                cli.snapshot_path = Some(PathBuf::from(value));
            }
            "-f" | "--fast-load" => {
                i += 1;
                let Some(value) = args.get(i) else {
                    eprintln!("Missing value for --fast-load");
                    print_usage_and_exit(1);
                };
                cli.tape_path = Some(PathBuf::from(value));
                cli.fast_load = true;
            }
            "-d" | "--debug" => cli.debug = true,
            "-h" | "--help" => print_usage_and_exit(0),
            other => {
                eprintln!("Unknown option: {other}");
                print_usage_and_exit(1);
            }
        }
        i += 1;
    }

    cli
}

struct App {
    spectrum: Spectrum,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    _audio: Option<AudioOutput>,
    last_frame_time: Instant,
    paused: bool,
    step_one_frame: bool,
    joystick: JoystickState,
    /// Set when the CPU faulted; turns into a nonzero exit code.
    failed: bool,
}

impl App {
    fn new(spectrum: Spectrum, audio: Option<AudioOutput>, paused: bool) -> Self {
        Self {
            spectrum,
            window: None,
            pixels: None,
            _audio: audio,
            last_frame_time: Instant::now(),
            paused,
            step_one_frame: false,
            joystick: JoystickState::default(),
            failed: false,
        }
    }

    fn handle_keyboard_input(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let pressed = event.state == ElementState::Pressed;

        // Runner hotkeys on press only
        if pressed && !event.repeat {
            match code {
                WinitKey::Escape => {
                    event_loop.exit();
                    return;
                }
                WinitKey::F5 => {
                    self.spectrum.tape_play();
                    return;
                }
                WinitKey::F6 => {
                    self.spectrum.tape_stop();
                    return;
                }
                WinitKey::F7 => {
                    self.spectrum.tape_rewind();
                    return;
                }
                WinitKey::F8 => {
                    self.paused = !self.paused;
                    log::info!("{}", if self.paused { "paused" } else { "resumed" });
                    return;
                }
                WinitKey::F9 => {
                    if self.paused {
                        self.step_one_frame = true;
                    }
                    return;
                }
                WinitKey::F12 => {
                    self.spectrum.reset();
                    return;
                }
                _ => {}
            }
        }

        // Kempston joystick on the numpad
        if let Some(axis) = match code {
            WinitKey::Numpad8 => Some(&mut self.joystick.up),
            WinitKey::Numpad2 => Some(&mut self.joystick.down),
            WinitKey::Numpad4 => Some(&mut self.joystick.left),
            WinitKey::Numpad6 => Some(&mut self.joystick.right),
            WinitKey::Numpad0 => Some(&mut self.joystick.fire),
            _ => None,
        } {
            *axis = pressed;
            self.spectrum.set_joystick(self.joystick);
            return;
        }

        // Everything else goes to the keyboard matrix
        if let Some(key) = map_host_key(code) {
            if pressed {
                self.spectrum.key_down(key);
            } else {
                self.spectrum.key_up(key);
            }
        }
    }

    fn blit(&mut self) {
        if let Some(pixels) = self.pixels.as_mut() {
            self.spectrum.render(pixels.frame_mut());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let video = self.spectrum.video_config();
        let size = winit::dpi::LogicalSize::new(video.width * SCALE, video.height * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("ZX Spectrum 48K")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(video.width, video.height, surface) {
                    Ok(pixels) => {
                        self.pixels = Some(pixels);
                        self.window = Some(window);
                    }
                    Err(e) => {
                        eprintln!("Failed to create pixel surface: {e}");
                        event_loop.exit();
                    }
                }
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_keyboard_input(event_loop, event);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let due = now.duration_since(self.last_frame_time) >= FRAME_DURATION;
                let run = (!self.paused && due) || self.step_one_frame;

                if run {
                    self.spectrum.run_frame();
                    self.blit();
                    self.last_frame_time = now;
                    self.step_one_frame = false;

                    if self.spectrum.faulted() {
                        eprintln!("CPU fault: undefined opcode, stopping (see log)");
                        self.failed = true;
                        event_loop.exit();
                        return;
                    }
                }

                if let Some(pixels) = self.pixels.as_ref()
                    && let Err(e) = pixels.render()
                {
                    eprintln!("Render error: {e}");
                    self.failed = true;
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

/// Translate a winit key code to the machine's key codes.
fn map_host_key(code: WinitKey) -> Option<KeyCode> {
    Some(match code {
        WinitKey::KeyA => KeyCode::KeyA,
        WinitKey::KeyB => KeyCode::KeyB,
        WinitKey::KeyC => KeyCode::KeyC,
        WinitKey::KeyD => KeyCode::KeyD,
        WinitKey::KeyE => KeyCode::KeyE,
        WinitKey::KeyF => KeyCode::KeyF,
        WinitKey::KeyG => KeyCode::KeyG,
        WinitKey::KeyH => KeyCode::KeyH,
        WinitKey::KeyI => KeyCode::KeyI,
        WinitKey::KeyJ => KeyCode::KeyJ,
        WinitKey::KeyK => KeyCode::KeyK,
        WinitKey::KeyL => KeyCode::KeyL,
        WinitKey::KeyM => KeyCode::KeyM,
        WinitKey::KeyN => KeyCode::KeyN,
        WinitKey::KeyO => KeyCode::KeyO,
        WinitKey::KeyP => KeyCode::KeyP,
        WinitKey::KeyQ => KeyCode::KeyQ,
        WinitKey::KeyR => KeyCode::KeyR,
        WinitKey::KeyS => KeyCode::KeyS,
        WinitKey::KeyT => KeyCode::KeyT,
        WinitKey::KeyU => KeyCode::KeyU,
        WinitKey::KeyV => KeyCode::KeyV,
        WinitKey::KeyW => KeyCode::KeyW,
        WinitKey::KeyX => KeyCode::KeyX,
        WinitKey::KeyY => KeyCode::KeyY,
        WinitKey::KeyZ => KeyCode::KeyZ,
        WinitKey::Digit0 => KeyCode::Digit0,
        WinitKey::Digit1 => KeyCode::Digit1,
        WinitKey::Digit2 => KeyCode::Digit2,
        WinitKey::Digit3 => KeyCode::Digit3,
        WinitKey::Digit4 => KeyCode::Digit4,
        WinitKey::Digit5 => KeyCode::Digit5,
        WinitKey::Digit6 => KeyCode::Digit6,
        WinitKey::Digit7 => KeyCode::Digit7,
        WinitKey::Digit8 => KeyCode::Digit8,
        WinitKey::Digit9 => KeyCode::Digit9,
        WinitKey::ShiftLeft => KeyCode::ShiftLeft,
        WinitKey::ShiftRight => KeyCode::ShiftRight,
        WinitKey::ControlLeft => KeyCode::ControlLeft,
        WinitKey::ControlRight => KeyCode::ControlRight,
        WinitKey::Enter => KeyCode::Enter,
        WinitKey::Space => KeyCode::Space,
        WinitKey::Backspace => KeyCode::Backspace,
        WinitKey::ArrowUp => KeyCode::ArrowUp,
        WinitKey::ArrowDown => KeyCode::ArrowDown,
        WinitKey::ArrowLeft => KeyCode::ArrowLeft,
        WinitKey::ArrowRight => KeyCode::ArrowRight,
        _ => return None,
    })
}

fn main() {
    env_logger::init();
    let cli = parse_args();

    // ROM load failure is fatal at startup.
    let rom = match std::fs::read(&cli.rom_path) {
        Ok(rom) => rom,
        Err(e) => {
            eprintln!("Failed to read ROM {}: {e}", cli.rom_path.display());
            process::exit(1);
        }
    };
    if rom.len() != ROM_LEN {
        eprintln!(
            "ROM {} is {} bytes, expected {ROM_LEN}",
            cli.rom_path.display(),
            rom.len()
        );
        process::exit(1);
    }

    let mut spectrum = Spectrum::new(&rom);

    // Tape and snapshot problems are not fatal; log and continue.
    if let Some(path) = &cli.tape_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|data| {
            let tzx = format_tzx::TzxFile::parse(&data)?;
            spectrum.insert_tape(tzx, cli.fast_load);
            Ok(())
        }) {
            Ok(()) => log::info!("loaded tape {}", path.display()),
            Err(e) => log::error!("failed to load tape {}: {e}", path.display()),
        }
    }

    if let Some(path) = &cli.snapshot_path {
        match std::fs::read(path).map_err(|e| e.to_string()).and_then(|data| {
            spectrum.load_file(&path.to_string_lossy(), &data)
        }) {
            Ok(()) => log::info!("loaded snapshot {}", path.display()),
            Err(e) => log::error!("failed to load snapshot {}: {e}", path.display()),
        }
    }

    let audio = match AudioOutput::new(spectrum.audio_sink(), spectrum.audio_config().sample_rate) {
        Ok(output) => Some(output),
        Err(e) => {
            log::warn!("audio disabled: {e}");
            None
        }
    };

    let mut app = App::new(spectrum, audio, cli.debug);

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(1);
    }

    if app.failed {
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_mapping_covers_the_matrix_keys() {
        assert_eq!(map_host_key(WinitKey::KeyQ), Some(KeyCode::KeyQ));
        assert_eq!(map_host_key(WinitKey::Digit0), Some(KeyCode::Digit0));
        assert_eq!(map_host_key(WinitKey::Enter), Some(KeyCode::Enter));
        assert_eq!(map_host_key(WinitKey::F1), None);
        assert_eq!(map_host_key(WinitKey::Numpad0), None);
    }
}
