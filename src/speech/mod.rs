//! Spoken responses to the user

mod speaker;

pub use speaker::ResponseSpeaker;
