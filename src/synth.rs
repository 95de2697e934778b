//! Waveform synthesis: fills byte buffers with normalized 0–255 samples.
//!
//! This is the ordinary-collaborator side of the engine; the output core
//! only sees the interleaved bytes it produces.

use libm::{fabsf, floorf, sinf};

/// Every regeneration fills a tenth of a second of audio. That span does not
/// necessarily hold a whole number of cycles, so some frequencies click at
/// the loop wrap; kept as the observed behavior of the device.
pub const BUFFER_SECONDS: f32 = 0.1;

/// Largest sample count a regeneration can produce, at the highest
/// selectable sample rate.
pub const MAX_SAMPLES: usize = 10_000;

/// The wave shapes the engine can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum WaveKind {
	Sine,
	Triangle,
	Sawtooth,
	Square,
}

impl WaveKind {
	pub const ALL: [WaveKind; 4] = [
		WaveKind::Sine,
		WaveKind::Triangle,
		WaveKind::Sawtooth,
		WaveKind::Square,
	];

	pub fn label(&self) -> &'static str {
		match self {
			WaveKind::Sine => "Sine",
			WaveKind::Triangle => "Tri",
			WaveKind::Sawtooth => "Saw",
			WaveKind::Square => "Sqr",
		}
	}

	/// The shape `delta` steps away in [`WaveKind::ALL`], wrapping.
	pub fn cycled(self, delta: i32) -> WaveKind {
		let len = Self::ALL.len() as i32;
		let index = Self::ALL.iter().position(|kind| *kind == self).unwrap_or(0) as i32;
		Self::ALL[(index + delta).rem_euclid(len) as usize]
	}
}

/// Maps a bipolar sample in −1.0..=1.0 onto the DAC's byte range.
fn normalize(v: f32) -> u8 {
	(127.5 + v * 127.5).clamp(0.0, 255.0) as u8
}

/// Waveform generator for one sample rate.
pub struct Synth {
	sample_rate: u32,
}

impl Synth {
	pub const fn new(sample_rate: u32) -> Self {
		Self { sample_rate }
	}

	/// Number of samples one regeneration produces at this rate.
	pub fn samples(&self) -> usize {
		(self.sample_rate as f32 * BUFFER_SECONDS) as usize
	}

	/// Fills `out` with one waveform and returns the written prefix.
	/// `duty_percent` only affects the square shape.
	pub fn fill<'a>(
		&self,
		kind: WaveKind,
		freq: u32,
		duty_percent: u32,
		out: &'a mut [u8],
	) -> &'a mut [u8] {
		let count = self.samples().min(out.len());
		let buf = &mut out[..count];
		match kind {
			WaveKind::Sine => self.sine(freq, buf),
			WaveKind::Triangle => self.triangle(freq, buf),
			WaveKind::Sawtooth => self.sawtooth(freq, buf),
			WaveKind::Square => self.square(freq, duty_percent, buf),
		}
		buf
	}

	fn sine(&self, freq: u32, buf: &mut [u8]) {
		let step = 2.0 * core::f32::consts::PI * freq as f32 / self.sample_rate as f32;
		for (i, sample) in buf.iter_mut().enumerate() {
			*sample = normalize(sinf(step * i as f32));
		}
	}

	fn square(&self, freq: u32, duty_percent: u32, buf: &mut [u8]) {
		let period = (self.sample_rate / freq.max(1)).max(1) as usize;
		let high = period * duty_percent as usize / 100;
		for (i, sample) in buf.iter_mut().enumerate() {
			let v = if i % period < high { 1.0 } else { -1.0 };
			*sample = normalize(v);
		}
	}

	fn sawtooth(&self, freq: u32, buf: &mut [u8]) {
		let period = self.sample_rate as f32 / freq as f32;
		for (i, sample) in buf.iter_mut().enumerate() {
			let x = i as f32 / period;
			*sample = normalize(2.0 * (x - floorf(0.5 + x)));
		}
	}

	fn triangle(&self, freq: u32, buf: &mut [u8]) {
		let period = self.sample_rate as f32 / freq as f32;
		for (i, sample) in buf.iter_mut().enumerate() {
			let x = i as f32 / period;
			let t = x - floorf(x);
			*sample = normalize(2.0 * fabsf(2.0 * t - 1.0) - 1.0);
		}
	}
}

/// Interleaves `signal` with a constant power byte into `out` as
/// `[s0, p, s1, p, ...]` and returns the number of bytes written.
pub fn interleave(signal: &[u8], power: u8, out: &mut [u8]) -> usize {
	let count = signal.len().min(out.len() / 2);
	for (i, &s) in signal[..count].iter().enumerate() {
		out[2 * i] = s;
		out[2 * i + 1] = power;
	}
	count * 2
}

/// Expands the first `samples` bytes of `buf` in place into interleaved
/// `[signal, power]` pairs. Walking backwards lets the signal prefix double
/// as the output without scratch memory; `buf` must hold at least
/// `2 * samples` bytes.
pub fn interleave_in_place(buf: &mut [u8], samples: usize, power: u8) {
	for i in (0..samples).rev() {
		buf[2 * i] = buf[i];
		buf[2 * i + 1] = power;
	}
}
