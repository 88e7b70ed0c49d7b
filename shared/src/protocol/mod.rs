//! Request/response framing for the coverage pull protocol

pub mod wire;

pub use wire::{Command, RequestFrame};
