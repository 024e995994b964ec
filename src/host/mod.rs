//! Lifecycle controller: loads generators, drives them and tears them down.

pub(crate) mod controller;
pub(crate) mod events;
pub(crate) mod export;
pub(crate) mod opts;
pub(crate) mod scheduler;
pub(crate) mod state;
