//! PIO-backed quadrature decoding with zero missed steps.
//!
//! The edge-sampler microprogram watches the two encoder pins and pushes the
//! raw 2-bit state to the RX FIFO on every change, independent of CPU
//! scheduling. The push is non-blocking: with a full queue a transition is
//! dropped rather than stalling the sampler, so the loss mode is queue
//! overflow, never a missed edge at the pins. The software half folds the
//! queued states into signed steps through a fixed transition table.

use rp_pico as bsp;

use bsp::hal;
use hal::pio;

/// Step delta per quadrature transition, indexed by `(last << 2) | new`.
/// Adjacent Gray-code transitions step ±1; repeats and two-bit jumps decode
/// to 0.
pub const TRANSITION_TABLE: [i8; 16] = [
	 0,  1, -1,  0, //
	-1,  0,  0,  1, //
	 1,  0,  0, -1, //
	 0, -1,  1,  0, //
];

/// Assembles the edge-sampler program.
pub fn sampler_program() -> ::pio::Program<{ ::pio::RP2040_MAX_PROGRAM_SIZE }> {
	let program = pio_proc::pio_asm!(
		"    mov osr, pins" // seed the last-seen state from the pins
		"    out x, 2"
		".wrap_target"
		"poll:"
		"    mov isr, null"
		"    in pins, 2"
		"    mov y, isr"
		"    jmp x!=y changed"
		"    jmp poll"
		"changed:"
		"    push noblock" // full queue drops the sample, never stalls
		"    mov x, y"
		".wrap"
	);
	program.program
}

/// Loads the edge-sampler program onto a state machine watching `pin_a` and
/// `pin_b` (which must be `pin_a + 1`). `divisor` slows the sampling clock;
/// a few MHz is plenty for a mechanical encoder and filters contact noise.
/// The caller starts the returned state machine.
pub fn load_sampler_program<P, SM>(
	program: pio::InstalledProgram<P>,
	sm: pio::UninitStateMachine<(P, SM)>,
	pin_a: u8,
	pin_b: u8,
	divisor: f32,
) -> (
	pio::StateMachine<(P, SM), pio::Stopped>,
	pio::Rx<(P, SM)>,
)
where
	P: pio::PIOExt,
	SM: pio::StateMachineIndex,
{
	let (mut sm, rx, _tx) = pio::PIOBuilder::from_installed_program(program)
		.in_pin_base(pin_a)
		.buffers(pio::Buffers::OnlyRx)
		.autopush(false)
		.autopull(false)
		.in_shift_direction(pio::ShiftDirection::Left)
		.out_shift_direction(pio::ShiftDirection::Right)
		.build(sm);

	sm.set_pindirs([
		(pin_a, pio::PinDir::Input),
		(pin_b, pio::PinDir::Input),
	]);
	sm.set_clock_divisor(divisor);

	(sm, rx)
}

/// Software half of the decoder: folds dequeued 2-bit states into a signed
/// step count. Owns the last-observed state and the accumulator; reset only
/// at construction.
pub struct DecoderState {
	last: u8,
	total: i32,
	missed: u32,
}

impl DecoderState {
	pub const fn new() -> Self {
		Self {
			last: 0,
			total: 0,
			missed: 0,
		}
	}

	/// Folds one dequeued state into the running total.
	pub fn update(&mut self, state: u8) {
		let state = state & 0b11;
		let index = usize::from((self.last << 2) | state);
		let delta = TRANSITION_TABLE[index];
		if delta == 0 && state != self.last {
			// A two-bit jump means an intermediate transition never reached
			// the queue; count it so overflow drops stay observable.
			self.missed += 1;
		}
		self.total += i32::from(delta);
		self.last = state;
	}

	/// Accumulated step delta since the previous call; resets the
	/// accumulator.
	pub fn take(&mut self) -> i32 {
		core::mem::replace(&mut self.total, 0)
	}

	/// Transitions that decoded to no movement despite a state change,
	/// i.e. evidence of queue-overflow drops.
	pub fn missed(&self) -> u32 {
		self.missed
	}
}

impl Default for DecoderState {
	fn default() -> Self {
		Self::new()
	}
}

/// A quadrature encoder read through the edge sampler's queue.
pub struct PioEncoder<P, SM>
where
	P: pio::PIOExt,
	SM: pio::StateMachineIndex,
{
	rx: pio::Rx<(P, SM)>,
	state: DecoderState,
}

impl<P, SM> PioEncoder<P, SM>
where
	P: pio::PIOExt,
	SM: pio::StateMachineIndex,
{
	pub fn new(rx: pio::Rx<(P, SM)>) -> Self {
		Self {
			rx,
			state: DecoderState::new(),
		}
	}

	/// Empties the hardware queue in FIFO order and returns the signed step
	/// delta since the previous drain.
	///
	/// Call often enough that the 8-deep joined FIFO cannot fill between
	/// calls; transitions pushed into a full queue are silently dropped
	/// (see [`DecoderState::missed`]).
	pub fn drain(&mut self) -> i32 {
		while let Some(word) = self.rx.read() {
			self.state.update(word as u8);
		}
		self.state.take()
	}

	/// Count of transitions lost to queue overflow so far.
	pub fn missed(&self) -> u32 {
		self.state.missed()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn feed(state: &mut DecoderState, sequence: &[u8]) {
		for &s in sequence {
			state.update(s);
		}
	}

	#[test]
	fn clockwise_cycle_accumulates_plus_four() {
		// 00 -> 01 -> 11 -> 10 -> 00
		let mut decoder = DecoderState::new();
		feed(&mut decoder, &[0b01, 0b11, 0b10, 0b00]);
		assert_eq!(decoder.take(), 4);
		assert_eq!(decoder.missed(), 0);
	}

	#[test]
	fn counterclockwise_cycle_accumulates_minus_four() {
		let mut decoder = DecoderState::new();
		feed(&mut decoder, &[0b10, 0b11, 0b01, 0b00]);
		assert_eq!(decoder.take(), -4);
		assert_eq!(decoder.missed(), 0);
	}

	#[test]
	fn repeated_state_decodes_to_zero() {
		let mut decoder = DecoderState::new();
		feed(&mut decoder, &[0b00, 0b00, 0b00]);
		assert_eq!(decoder.take(), 0);
		assert_eq!(decoder.missed(), 0);
	}

	#[test]
	fn two_bit_jump_is_dropped_and_counted() {
		// 00 -> 11 is ambiguous; the table yields 0 and the miss is recorded.
		let mut decoder = DecoderState::new();
		feed(&mut decoder, &[0b11]);
		assert_eq!(decoder.take(), 0);
		assert_eq!(decoder.missed(), 1);
	}

	#[test]
	fn take_resets_the_accumulator() {
		let mut decoder = DecoderState::new();
		feed(&mut decoder, &[0b01]);
		assert_eq!(decoder.take(), 1);
		assert_eq!(decoder.take(), 0);
		feed(&mut decoder, &[0b11]);
		assert_eq!(decoder.take(), 1);
	}

	#[test]
	fn table_is_antisymmetric() {
		// Reversing a transition must negate its delta.
		for last in 0..4u8 {
			for new in 0..4u8 {
				let forward = TRANSITION_TABLE[usize::from((last << 2) | new)];
				let backward = TRANSITION_TABLE[usize::from((new << 2) | last)];
				assert_eq!(forward, -backward, "{:02b} -> {:02b}", last, new);
			}
		}
	}

	#[test]
	fn sampler_program_pushes_without_blocking() {
		let program = sampler_program();
		assert_eq!(program.code.len(), 9);
		// The change path must not stall a full queue: PUSH with the block
		// bit clear.
		assert_eq!(program.code[7], 0x8000, "push noblock");
		// The poll loop reads exactly the two encoder pins.
		assert_eq!(program.code[3], 0x4002, "in pins, 2");
		// Only the polling loop wraps; the seed instructions run once.
		assert_eq!(program.wrap.target, 2);
		assert_eq!(program.wrap.source, 8);
	}
}
