//! Command implementations.

pub mod add;
pub mod auth;
pub mod calendars;
pub mod clear;
pub mod events;
pub mod update;
