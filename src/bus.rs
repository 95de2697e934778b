//! The bus-write microprogram for the dual latched DACs.
//!
//! Each bus carries 8 data lines plus three active-low control lines driven
//! from the state machine's side-set group:
//!
//! - Side-set bit 0: WR (write strobe)
//! - Side-set bit 1: CS_SIG (signal DAC chip-select)
//! - Side-set bit 2: CS_AMP (power DAC chip-select)
//!
//! One interleaved sample pair takes exactly four state-machine cycles:
//! drive the signal byte with WR+CS_SIG low, latch, drive the power byte
//! with WR+CS_AMP low, latch. The program wraps forever; it has no terminal
//! state.

use rp_pico as bsp;

use bsp::hal;
use hal::pio;

/// All three control lines high (idle / latch edge).
pub const CTRL_IDLE: u8 = 0b111;
/// WR and CS_SIG low while the signal byte is on the data lines.
pub const CTRL_WRITE_SIGNAL: u8 = 0b100;
/// WR and CS_AMP low while the power byte is on the data lines.
pub const CTRL_WRITE_POWER: u8 = 0b010;

/// Control-line value driven on each of the four cycles one sample pair takes.
pub const CONTROL_SEQUENCE: [u8; 4] = [CTRL_WRITE_SIGNAL, CTRL_IDLE, CTRL_WRITE_POWER, CTRL_IDLE];

/// State-machine cycles consumed per interleaved sample pair.
pub const CYCLES_PER_SAMPLE: u32 = 4;

/// Ceiling on the state-machine clock. The external DACs need roughly 100 ns
/// of write-strobe low time, so the strobe cycle must never get shorter.
pub const MAX_SM_CLOCK_HZ: u32 = 10_000_000;

/// Number of data lines per bus.
pub const DATA_PIN_COUNT: u8 = 8;
/// Number of side-set control lines per bus.
pub const CTRL_PIN_COUNT: u8 = 3;

/// Assembles the bus-write program. One copy is shared by both buses.
pub fn bus_program() -> ::pio::Program<{ ::pio::RP2040_MAX_PROGRAM_SIZE }> {
	let program = pio_proc::pio_asm!(
		".side_set 3"
		".wrap_target"
		"out pins, 8    side 0b100" // signal byte on the bus, WR + CS_SIG low
		"nop            side 0b111" // latch
		"out pins, 8    side 0b010" // power byte on the bus, WR + CS_AMP low
		"nop            side 0b111" // latch
		".wrap"
	);
	program.program
}

/// Loads the bus-write program onto a state machine, mapping
/// `data_base..data_base+8` as the out pins and `ctrl_base..ctrl_base+3`
/// (WR, CS_SIG, CS_AMP) as the side-set pins, and starts it. The machine
/// stalls on an empty TX FIFO until the DMA ring is armed.
///
/// Returns the running state machine and its TX FIFO handle.
pub fn load_bus_program<P, SM>(
	program: pio::InstalledProgram<P>,
	sm: pio::UninitStateMachine<(P, SM)>,
	data_base: u8,
	ctrl_base: u8,
) -> (
	pio::StateMachine<(P, SM), pio::Running>,
	pio::Tx<(P, SM)>,
)
where
	P: pio::PIOExt,
	SM: pio::StateMachineIndex,
{
	// The DMA data channel performs byte-size writes, which the bus fabric
	// replicates across the 32-bit FIFO word. With an 8-bit pull threshold
	// and right shift, exactly the low byte of each word reaches the pins.
	let (mut sm, _rx, tx) = pio::PIOBuilder::from_installed_program(program)
		.out_pins(data_base, DATA_PIN_COUNT)
		.side_set_pin_base(ctrl_base)
		.buffers(pio::Buffers::OnlyTx)
		.autopull(true)
		.pull_threshold(DATA_PIN_COUNT)
		.out_shift_direction(pio::ShiftDirection::Right)
		.build(sm);

	let data_pins = data_base..data_base + DATA_PIN_COUNT;
	let ctrl_pins = ctrl_base..ctrl_base + CTRL_PIN_COUNT;
	sm.set_pindirs(
		data_pins
			.chain(ctrl_pins.clone())
			.map(|pin| (pin, pio::PinDir::Output)),
	);
	// Control lines rest high; both chip-selects are active low.
	sm.set_pins(ctrl_pins.map(|pin| (pin, pio::PinState::High)));

	(sm.start(), tx)
}

/// Effective state-machine clock for a requested sample rate: four cycles per
/// interleaved pair, clamped to the DAC write-pulse limit. A request above
/// the limit silently receives the clamped clock; a zero request is raised
/// to the one-sample-per-second floor so the clock is never zero.
pub const fn sm_clock_for(sample_rate: u32) -> u32 {
	let requested = sample_rate.saturating_mul(CYCLES_PER_SAMPLE);
	if requested > MAX_SM_CLOCK_HZ {
		MAX_SM_CLOCK_HZ
	} else if requested < CYCLES_PER_SAMPLE {
		CYCLES_PER_SAMPLE
	} else {
		requested
	}
}

/// Sample rate actually achieved after clamping.
pub const fn effective_sample_rate(sample_rate: u32) -> u32 {
	sm_clock_for(sample_rate) / CYCLES_PER_SAMPLE
}

/// 16.8 fixed-point clock divisor bringing `sys_clk` down to `sm_clk`.
pub fn clock_divisor(sys_clk: u32, sm_clk: u32) -> (u16, u8) {
	let int = (sys_clk / sm_clk).min(u16::MAX as u32) as u16;
	let frac = (((sys_clk % sm_clk) as u64 * 256) / sm_clk as u64) as u8;
	(int, frac)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sm_clock_is_four_times_the_sample_rate_until_the_clamp() {
		assert_eq!(sm_clock_for(44_100), 176_400);
		assert_eq!(sm_clock_for(100_000), 400_000);
		assert_eq!(sm_clock_for(2_500_000), 10_000_000);
		assert_eq!(sm_clock_for(2_500_001), 10_000_000);
		assert_eq!(sm_clock_for(u32::MAX), 10_000_000);
	}

	#[test]
	fn clamped_requests_report_the_effective_rate() {
		assert_eq!(effective_sample_rate(44_100), 44_100);
		assert_eq!(effective_sample_rate(4_000_000), 2_500_000);
	}

	#[test]
	fn zero_rate_is_raised_to_the_floor() {
		assert_eq!(sm_clock_for(0), CYCLES_PER_SAMPLE);
		assert_eq!(effective_sample_rate(0), 1);
		// The divisor math must stay defined for the floored clock.
		assert_eq!(clock_divisor(125_000_000, sm_clock_for(0)), (u16::MAX, 0));
	}

	#[test]
	fn divisor_matches_the_system_clock_ratio() {
		// 125 MHz / 10 MHz = 12.5
		assert_eq!(clock_divisor(125_000_000, 10_000_000), (12, 128));
		// 125 MHz / 176.4 kHz = 708.61...
		assert_eq!(clock_divisor(125_000_000, 176_400), (708, 157));
		assert_eq!(clock_divisor(125_000_000, 125_000_000), (1, 0));
	}

	#[test]
	fn bus_program_follows_the_control_sequence() {
		let program = bus_program();
		assert_eq!(program.code.len(), CONTROL_SEQUENCE.len());

		for (i, instr) in program.code.iter().enumerate() {
			// Three side-set bits occupy the top of the 5-bit delay field.
			let side = ((instr >> 10) & 0b111) as u8;
			assert_eq!(side, CONTROL_SEQUENCE[i], "cycle {}", i);
		}

		// Cycles 0 and 2 drive a fresh byte onto the data lines.
		for i in [0usize, 2] {
			let instr = program.code[i];
			assert_eq!(instr >> 13, 0b011, "OUT opcode at {}", i);
			assert_eq!((instr >> 5) & 0b111, 0b000, "PINS destination at {}", i);
			assert_eq!(instr & 0x1f, u16::from(DATA_PIN_COUNT), "bit count at {}", i);
		}

		// The program wraps over its whole body; there is no terminal state.
		assert_eq!(program.wrap.target, 0);
		assert_eq!(program.wrap.source, 3);
	}
}
