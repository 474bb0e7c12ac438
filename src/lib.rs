//! Voice-driven data-entry workflows.
//!
//! The user records a short answer for each step of a server-side workflow
//! (contact or invoice creation); the service transcribes and parses it,
//! and this crate keeps the local session, draft and navigation state in
//! sync with the service's responses.

pub mod api;
pub mod audio;
pub mod capture;
pub mod config;
pub mod entity;
pub mod hotkey;
pub mod workflow;
