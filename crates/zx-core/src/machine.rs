//! Machine abstraction for the emulated system.
//!
//! The `Machine` trait is the boundary between the core and the host: the
//! runner drives frames, pulls video, and delivers input without knowing
//! the machine's internals.

/// Video output configuration for a machine.
#[derive(Debug, Clone, Copy)]
pub struct VideoConfig {
    /// Native display width in pixels.
    pub width: u32,
    /// Native display height in pixels.
    pub height: u32,
    /// Frame rate in frames per second.
    pub fps: f32,
}

/// Audio output configuration for a machine.
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
}

/// Joystick state (host-side generic form).
///
/// Machines map this to their specific joystick format internally.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoystickState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub fire: bool,
}

/// Key codes delivered by the host.
///
/// A subset of winit's `KeyCode` so the core crates stay host-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    // Letters
    KeyA,
    KeyB,
    KeyC,
    KeyD,
    KeyE,
    KeyF,
    KeyG,
    KeyH,
    KeyI,
    KeyJ,
    KeyK,
    KeyL,
    KeyM,
    KeyN,
    KeyO,
    KeyP,
    KeyQ,
    KeyR,
    KeyS,
    KeyT,
    KeyU,
    KeyV,
    KeyW,
    KeyX,
    KeyY,
    KeyZ,

    // Numbers
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,

    // Modifiers
    ShiftLeft,
    ShiftRight,
    ControlLeft,
    ControlRight,

    // Special
    Enter,
    Space,
    Backspace,

    // Arrow keys
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

/// Trait for the emulated machine.
pub trait Machine {
    /// Get the video output configuration.
    fn video_config(&self) -> VideoConfig;

    /// Get the audio output configuration.
    fn audio_config(&self) -> AudioConfig;

    /// Execute one frame of emulation.
    fn run_frame(&mut self);

    /// Render the current display to an RGBA pixel buffer.
    ///
    /// The buffer size must be `width * height * 4` bytes.
    fn render(&self, buffer: &mut [u8]);

    /// Handle a key press event.
    fn key_down(&mut self, key: KeyCode);

    /// Handle a key release event.
    fn key_up(&mut self, key: KeyCode);

    /// Set the joystick state.
    fn set_joystick(&mut self, state: JoystickState);

    /// Reset the machine to its initial state.
    fn reset(&mut self);

    /// Load a file into the machine, dispatching on the extension.
    fn load_file(&mut self, path: &str, data: &[u8]) -> Result<(), String>;
}
