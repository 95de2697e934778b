#![no_std]
#![no_main]

// Ensures that the program is halted on panic.
extern crate panic_halt;

use defmt_rtt as _;

use pico_duodac::*;

// The "rp_pico" crate is a Board Support Package for the RP2040 Hardware Abstraction Layer.
// Whenever the "bsp" alias is used, it is directly referencing the rp_pico crate.
use rp_pico as bsp;

// The macro for the start-up function.
use bsp::entry;

// Shorter alias for the Hardware Abstraction Layer.
use bsp::hal;

// Shorter alias for the Peripheral Access Crate.
use hal::pac;

use core::cell::{Cell, RefCell};

use cortex_m::singleton;
use critical_section::Mutex;
use embedded_hal::digital::InputPin;
use hal::dma::{DMAExt, SingleChannel};
use hal::fugit::MicrosDurationU64;
use hal::gpio;
use hal::pio::{PIOExt, StateMachineIndex};
use hal::Clock;
use pac::interrupt;

// GPIO layout:
// Bus A: data 0-7, WR 8, CS_SIG 9, CS_AMP 10.
// Bus B: data 16-23, WR 24, CS_SIG 25, CS_AMP 26.
// Value encoder on 14/15 (PIO sampled), navigation encoder on 27/28 (IRQ),
// navigation button on 11.

const PIN_BUS_A_DATA: u8 = 0;
const PIN_BUS_A_CTRL: u8 = 8;
const PIN_BUS_B_DATA: u8 = 16;
const PIN_BUS_B_CTRL: u8 = 24;

/// Sampling clock divisor for the value encoder: 125 MHz / 12.5 = 10 MHz.
const SAMPLER_DIVISOR: f32 = 12.5;

/// Parameter readout refresh interval, roughly 30 FPS.
const RENDER_INTERVAL: MicrosDurationU64 = MicrosDurationU64::millis(33);

/// Navigation button debounce window.
const BUTTON_DEBOUNCE: MicrosDurationU64 = MicrosDurationU64::millis(50);

/// One full pass of a 0.1 s regeneration. A buffer displaced by a swap can
/// still be read by the ring for up to this long afterwards.
const BUFFER_PERIOD: MicrosDurationU64 = MicrosDurationU64::millis(100);

/// Storage per sample buffer: the longest regeneration, interleaved.
const BUF_BYTES: usize = synth::MAX_SAMPLES * 2;

/// Steps accumulated by the navigation encoder since the last take.
/// Single producer (the IRQ below), single consumer (the main loop).
static NAV_DELTA: Mutex<Cell<i32>> = Mutex::new(Cell::new(0));
static NAV_PINS: Mutex<RefCell<Option<(DynInputPin, DynInputPin)>>> =
	Mutex::new(RefCell::new(None));

/// Falling edge on the navigation encoder's A pin; B's level gives the
/// direction.
#[interrupt]
fn IO_IRQ_BANK0() {
	critical_section::with(|cs| {
		if let Some((pin_a, pin_b)) = NAV_PINS.borrow_ref_mut(cs).as_mut() {
			if pin_a.interrupt_status(gpio::Interrupt::EdgeLow) {
				pin_a.clear_interrupt(gpio::Interrupt::EdgeLow);
				let step = if pin_b.is_high().unwrap_or(false) { 1 } else { -1 };
				let delta = NAV_DELTA.borrow(cs);
				delta.set(delta.get() + step);
			}
		}
	});
}

fn take_nav_delta() -> i32 {
	critical_section::with(|cs| NAV_DELTA.borrow(cs).replace(0))
}

/// Regenerates a channel's interleaved buffer from its parameters. The
/// signal is synthesized into the front half of the storage and expanded in
/// place with the power byte.
fn generate(params: &ChannelParams, storage: &'static mut [u8]) -> SampleBuffer {
	let synth = Synth::new(params.sample_rate);
	let half = storage.len() / 2;
	let samples = synth
		.fill(params.wave, params.freq, params.duty, &mut storage[..half])
		.len();
	synth::interleave_in_place(storage, samples, params.power as u8);
	SampleBuffer::new(storage, samples * 2).unwrap()
}

/// Regenerates into reusable storage and hands the result to the bus. A
/// sample-rate edit needs a full re-arm to change the state-machine clock;
/// everything else swaps at the next wrap boundary.
///
/// Returns false while the previous hand-off has not settled yet: the ring
/// can keep reading a displaced buffer for one full pass, so regenerating
/// any storage within [`BUFFER_PERIOD`] of the last hand-off is unsafe. The
/// caller retries on the next loop iteration.
fn commit<P, SM, D, C, A>(
	params: &ChannelParams,
	dac: &mut DacPair<P, SM, D, C, A>,
	spare: &mut Option<&'static mut [u8]>,
	now: hal::timer::Instant,
	last_handoff: &mut hal::timer::Instant,
) -> bool
where
	P: PIOExt,
	SM: StateMachineIndex,
	D: SingleChannel,
	C: SingleChannel,
	A: SingleChannel,
{
	if now
		.checked_duration_since(*last_handoff)
		.map_or(false, |elapsed| elapsed < BUFFER_PERIOD)
	{
		return false;
	}
	let storage = spare
		.take()
		.or_else(|| dac.reclaim().map(SampleBuffer::into_inner));
	match storage {
		Some(storage) => {
			let fresh = generate(params, storage);
			if params.sample_rate != dac.sample_rate() {
				dac.play(fresh, params.sample_rate);
			} else if let Some(stale) = dac.swap_buffer(fresh) {
				// Out of the ring since the last settled hand-off.
				*spare = Some(stale.into_inner());
			}
			*last_handoff = now;
			true
		}
		None => false,
	}
}

fn apply<P, SM, D, C, A>(
	action: MenuAction,
	dac: &mut DacPair<P, SM, D, C, A>,
	pending: &mut bool,
) where
	P: PIOExt,
	SM: StateMachineIndex,
	D: SingleChannel,
	C: SingleChannel,
	A: SingleChannel,
{
	match action {
		MenuAction::None => {}
		MenuAction::Commit => *pending = true,
		MenuAction::PowerChanged(level) => dac.update_power(level as i32),
	}
}

/// The display collaborator: parameter rows as plain text over RTT.
fn render(menu: &ChannelMenu) {
	defmt::info!("ACT: {=str}", menu.params.name);
	for index in 0..PARAM_COUNT {
		let field = menu.line(index);
		let cursor = if field.editing {
			"["
		} else if field.selected {
			">"
		} else {
			" "
		};
		defmt::info!("{=str}{=str}", cursor, field.text.as_str());
	}
}

#[entry]
fn main() -> ! {
	// Get access to the RP2040 peripherals.
	let mut pac = pac::Peripherals::take().unwrap();

	// Set up the watchdog driver - needed by the clock setup code.
	let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);

	// Configure the clocks.
	let clocks = hal::clocks::init_clocks_and_plls(
		bsp::XOSC_CRYSTAL_FREQ,
		pac.XOSC,
		pac.CLOCKS,
		pac.PLL_SYS,
		pac.PLL_USB,
		&mut pac.RESETS,
		&mut watchdog,
	)
		.ok()
		.unwrap();
	let sys_clk_hz = clocks.system_clock.freq().to_Hz();

	// Set up the pins.
	let sio = hal::Sio::new(pac.SIO);
	let pins = bsp::Pins::new(
		pac.IO_BANK0,
		pac.PADS_BANK0,
		sio.gpio_bank0,
		&mut pac.RESETS,
	);

	let timer = hal::Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);

	// Hand the bus pins to PIO0. Bus A data and control lines.
	let _ = pins.gpio0.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio1.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio2.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio3.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio4.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio5.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio6.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio7.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio8.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio9.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio10.into_function::<gpio::FunctionPio0>();

	// Bus B data and control lines.
	let _ = pins.gpio16.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio17.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio18.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio19.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio20.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio21.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio22.into_function::<gpio::FunctionPio0>();
	let _ = pins.b_power_save.into_function::<gpio::FunctionPio0>();
	let _ = pins.vbus_detect.into_function::<gpio::FunctionPio0>();
	let _ = pins.led.into_function::<gpio::FunctionPio0>();
	let _ = pins.gpio26.into_function::<gpio::FunctionPio0>();

	// Value (precision) encoder, read by the PIO edge sampler.
	let enc_val_pin_a: DynPio0Pin = pins.gpio14.reconfigure().into_dyn_pin();
	let enc_val_pin_b: DynPio0Pin = pins.gpio15.reconfigure().into_dyn_pin();

	// Navigation encoder and its push button.
	let nav_pin_a: DynInputPin = pins.gpio27.reconfigure().into_dyn_pin();
	let nav_pin_b: DynInputPin = pins.gpio28.reconfigure().into_dyn_pin();
	let mut nav_button: DynInputPin = pins.gpio11.reconfigure().into_dyn_pin();

	nav_pin_a.set_interrupt_enabled(gpio::Interrupt::EdgeLow, true);
	critical_section::with(|cs| {
		*NAV_PINS.borrow_ref_mut(cs) = Some((nav_pin_a, nav_pin_b));
	});
	unsafe { pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0) };

	// Load the PIO programs: one shared bus program on SM0 and SM1, the edge
	// sampler on SM2.
	let (mut pio0, sm0, sm1, sm2, _) = pac.PIO0.split(&mut pac.RESETS);

	let bus_installed = pio0.install(&bus_program()).unwrap();
	let (sm_a, tx_a) = load_bus_program(
		unsafe { bus_installed.share() },
		sm0,
		PIN_BUS_A_DATA,
		PIN_BUS_A_CTRL,
	);
	let (sm_b, tx_b) = load_bus_program(bus_installed, sm1, PIN_BUS_B_DATA, PIN_BUS_B_CTRL);

	let sampler_installed = pio0.install(&sampler_program()).unwrap();
	let (sampler_sm, sampler_rx) = load_sampler_program(
		sampler_installed,
		sm2,
		enc_val_pin_a.id().num,
		enc_val_pin_b.id().num,
		SAMPLER_DIVISOR,
	);
	let _sampler = sampler_sm.start();
	let mut enc_val = PioEncoder::new(sampler_rx);

	// One DMA channel triple per bus.
	let dma = pac.DMA.split(&mut pac.RESETS);
	let ctrl_a = singleton!(: RingControlBlock = RingControlBlock::new()).unwrap();
	let ctrl_b = singleton!(: RingControlBlock = RingControlBlock::new()).unwrap();
	let mut dac_a = DacPair::new(
		sm_a,
		tx_a,
		DmaRing::new(dma.ch0, dma.ch1, dma.ch2, ctrl_a),
		sys_clk_hz,
	);
	let mut dac_b = DacPair::new(
		sm_b,
		tx_b,
		DmaRing::new(dma.ch3, dma.ch4, dma.ch5, ctrl_b),
		sys_clk_hz,
	);

	// Two storages per channel: one playing, one spare for regeneration.
	let buf_a_front: &'static mut [u8] = singleton!(: [u8; BUF_BYTES] = [0; BUF_BYTES]).unwrap();
	let buf_a_back: &'static mut [u8] = singleton!(: [u8; BUF_BYTES] = [0; BUF_BYTES]).unwrap();
	let buf_b_front: &'static mut [u8] = singleton!(: [u8; BUF_BYTES] = [0; BUF_BYTES]).unwrap();
	let buf_b_back: &'static mut [u8] = singleton!(: [u8; BUF_BYTES] = [0; BUF_BYTES]).unwrap();

	let mut menu_a = ChannelMenu::new("CH A");
	let mut menu_b = ChannelMenu::new("CH B");

	defmt::info!("dual-DAC engine up, sys clk {} Hz", sys_clk_hz);

	let rate_a = dac_a.play(generate(&menu_a.params, buf_a_front), menu_a.params.sample_rate);
	let rate_b = dac_b.play(generate(&menu_b.params, buf_b_front), menu_b.params.sample_rate);
	defmt::info!("bus A at {} Hz, bus B at {} Hz", rate_a, rate_b);

	let mut spare_a: Option<&'static mut [u8]> = Some(buf_a_back);
	let mut spare_b: Option<&'static mut [u8]> = Some(buf_b_back);

	// The front panel edits channel A; B streams its defaults until channel
	// switching is wired to the hardware.
	let active = 0usize;

	let mut last_render = timer.get_counter();
	let mut last_press = timer.get_counter();
	let mut button_was_pressed = false;
	let mut last_handoff_a = timer.get_counter();
	let mut last_handoff_b = timer.get_counter();
	let mut pending_a = false;
	let mut pending_b = false;

	loop {
		let now = timer.get_counter();
		let now_ms = now.ticks() / 1_000;

		// Navigation encoder moves the cursor.
		let nav = take_nav_delta();
		if nav != 0 {
			if active == 0 {
				menu_a.navigate(nav, now_ms);
			} else {
				menu_b.navigate(nav, now_ms);
			}
		}

		// Click toggles edit mode; leaving edit mode commits.
		let pressed = nav_button.is_low().unwrap_or(false);
		if pressed
			&& !button_was_pressed
			&& now
				.checked_duration_since(last_press)
				.map_or(true, |elapsed| elapsed >= BUTTON_DEBOUNCE)
		{
			last_press = now;
			if active == 0 {
				let action = menu_a.click(now_ms);
				apply(action, &mut dac_a, &mut pending_a);
			} else {
				let action = menu_b.click(now_ms);
				apply(action, &mut dac_b, &mut pending_b);
			}
		}
		button_was_pressed = pressed;

		// Value encoder edits the selected parameter.
		let turn = enc_val.drain();
		if turn != 0 {
			if active == 0 {
				let action = menu_a.turn(turn, now_ms);
				apply(action, &mut dac_a, &mut pending_a);
			} else {
				let action = menu_b.turn(turn, now_ms);
				apply(action, &mut dac_b, &mut pending_b);
			}
		}

		// Auto-commit after five quiet seconds in edit mode.
		if active == 0 {
			let action = menu_a.poll_timeout(now_ms);
			apply(action, &mut dac_a, &mut pending_a);
		} else {
			let action = menu_b.poll_timeout(now_ms);
			apply(action, &mut dac_b, &mut pending_b);
		}

		// Pending commits wait out the previous hand-off's settling window.
		if pending_a
			&& commit(&menu_a.params, &mut dac_a, &mut spare_a, now, &mut last_handoff_a)
		{
			pending_a = false;
		}
		if pending_b
			&& commit(&menu_b.params, &mut dac_b, &mut spare_b, now, &mut last_handoff_b)
		{
			pending_b = false;
		}

		// Parameter readout at ~30 FPS.
		if now
			.checked_duration_since(last_render)
			.map_or(true, |elapsed| elapsed >= RENDER_INTERVAL)
		{
			last_render = now;
			render(if active == 0 { &menu_a } else { &menu_b });
		}
	}
}
