//! Use-case services over the reminder store.
//!
//! # Responsibility
//! - Gate new reminders at intake and render user-facing text.
//! - Keep the binary and chat front ends decoupled from storage details.

pub mod format;
pub mod intake_service;
pub mod list_view;
