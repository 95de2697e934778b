//! Dual-channel signal/power output engine for the Raspberry Pi Pico.
//!
//! Two PIO state machines drive a pair of external latched-bus DACs from
//! interleaved `[signal, power]` byte buffers, each fed by a self-re-arming
//! three-channel DMA ring that streams with no CPU involvement once armed.
//! A third state machine samples a quadrature encoder in hardware so no step
//! is ever missed, whatever the CPU is doing.

#![no_std]

pub mod buffer;
pub mod bus;
pub mod dac;
pub mod encoder;
pub mod menu;
pub mod ring;
pub mod synth;

pub use crate::buffer::*;
pub use crate::bus::*;
pub use crate::dac::*;
pub use crate::encoder::*;
pub use crate::menu::*;
pub use crate::ring::*;
pub use crate::synth::*;

use rp_pico as bsp;

use bsp::hal;
use hal::gpio;

/// Type alias for a non-ID pin with a pull-up input configuration.
pub type DynInputPin = gpio::Pin<gpio::DynPinId, gpio::FunctionSioInput, gpio::PullUp>;
/// Type alias for a non-ID pin for use with the PIO0.
pub type DynPio0Pin = gpio::Pin<gpio::DynPinId, gpio::FunctionPio0, gpio::PullUp>;
