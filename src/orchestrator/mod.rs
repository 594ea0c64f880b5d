//! Voice controller wiring session, interpreter, dispatcher and speaker

mod controller;

pub use controller::VoiceController;
