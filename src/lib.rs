//! Core of the resistive-heater temperature controller.
//!
//! Everything in here is `no_std`, allocation free and independent of the
//! board: the firmware binary plugs the STM32 peripherals in through [`hal::Hal`]
//! and [`params::NvStorage`], and drives the pieces from its embassy tasks.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod battery;
pub mod control;
pub mod drivers;
pub mod hal;
pub mod params;
pub mod protocol;
pub mod state;
