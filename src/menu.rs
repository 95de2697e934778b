//! The per-channel parameter model and the edit-mode state machine the two
//! encoders drive.
//!
//! The display collaborator only ever sees plain [`TextField`]s; how they
//! are rendered is its concern. The application maps [`MenuAction`]s onto
//! the output facade: `Commit` regenerates and swaps the channel's buffer,
//! `PowerChanged` updates the live buffer in place.

use core::fmt::Write;

use heapless::String;

use crate::synth::{self, WaveKind};

/// Number of editable parameters per channel.
pub const PARAM_COUNT: usize = 5;

/// Milliseconds of inactivity after which edit mode commits on its own.
pub const EDIT_TIMEOUT_MS: u64 = 5_000;

pub const FREQ_MIN: u32 = 20;
pub const FREQ_MAX: u32 = 10_000;
pub const FREQ_STEP: u32 = 10;

pub const POWER_MIN: u32 = 0;
pub const POWER_MAX: u32 = 255;
pub const POWER_STEP: u32 = 5;

pub const DUTY_MIN: u32 = 1;
pub const DUTY_MAX: u32 = 99;
pub const DUTY_STEP: u32 = 1;

pub const FS_MIN: u32 = 8_000;
pub const FS_MAX: u32 = 100_000;
pub const FS_STEP: u32 = 1_000;

// A regeneration at the highest selectable rate must fit the synth's cap.
const _: () = assert!(FS_MAX as usize / 10 <= synth::MAX_SAMPLES);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
	Wave,
	Freq,
	Power,
	Duty,
	SampleRate,
}

impl Param {
	/// Cursor order, matching the display layout.
	pub const ORDER: [Param; PARAM_COUNT] = [
		Param::Wave,
		Param::Freq,
		Param::Power,
		Param::Duty,
		Param::SampleRate,
	];

	pub fn label(&self) -> &'static str {
		match self {
			Param::Wave => "Wave",
			Param::Freq => "Freq",
			Param::Power => "Powr",
			Param::Duty => "Duty",
			Param::SampleRate => "Fs",
		}
	}
}

/// One channel's editable parameters.
pub struct ChannelParams {
	pub name: &'static str,
	pub wave: WaveKind,
	pub freq: u32,
	pub power: u32,
	pub duty: u32,
	pub sample_rate: u32,
}

impl ChannelParams {
	pub const fn new(name: &'static str) -> Self {
		Self {
			name,
			wave: WaveKind::Sine,
			freq: 440,
			power: 200,
			duty: 50,
			sample_rate: 44_100,
		}
	}

	/// Applies an encoder delta to one numeric parameter, clamped to its
	/// range.
	fn adjust(&mut self, param: Param, delta: i32) {
		match param {
			Param::Freq => self.freq = step_clamp(self.freq, FREQ_MIN, FREQ_MAX, FREQ_STEP, delta),
			Param::Power => {
				self.power = step_clamp(self.power, POWER_MIN, POWER_MAX, POWER_STEP, delta)
			}
			Param::Duty => self.duty = step_clamp(self.duty, DUTY_MIN, DUTY_MAX, DUTY_STEP, delta),
			Param::SampleRate => {
				self.sample_rate = step_clamp(self.sample_rate, FS_MIN, FS_MAX, FS_STEP, delta)
			}
			Param::Wave => {}
		}
	}
}

fn step_clamp(value: u32, min: u32, max: u32, step: u32, delta: i32) -> u32 {
	let moved = i64::from(value) + i64::from(delta) * i64::from(step);
	moved.clamp(i64::from(min), i64::from(max)) as u32
}

/// What the application should do after feeding input into the menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuAction {
	/// Nothing to apply.
	None,
	/// Edit mode ended; regenerate and swap the channel's buffer.
	Commit,
	/// Power changed while editing; update the live buffer in place.
	PowerChanged(u32),
}

/// Plain-text rendering of one parameter row.
pub struct TextField {
	pub text: String<16>,
	pub selected: bool,
	pub editing: bool,
}

/// Selection cursor plus the edit-mode state machine for one channel.
pub struct ChannelMenu {
	pub params: ChannelParams,
	selected: usize,
	edit_mode: bool,
	last_interact_ms: u64,
}

impl ChannelMenu {
	pub fn new(name: &'static str) -> Self {
		Self {
			params: ChannelParams::new(name),
			selected: 0,
			edit_mode: false,
			last_interact_ms: 0,
		}
	}

	pub fn selected_param(&self) -> Param {
		Param::ORDER[self.selected]
	}

	pub fn is_editing(&self) -> bool {
		self.edit_mode
	}

	/// Navigation encoder: moves the selection cursor while not editing.
	pub fn navigate(&mut self, delta: i32, now_ms: u64) {
		if delta == 0 {
			return;
		}
		if !self.edit_mode {
			let count = PARAM_COUNT as i32;
			self.selected = (self.selected as i32 + delta).rem_euclid(count) as usize;
		}
		self.last_interact_ms = now_ms;
	}

	/// Encoder click: toggles edit mode. Leaving edit mode commits.
	pub fn click(&mut self, now_ms: u64) -> MenuAction {
		self.edit_mode = !self.edit_mode;
		self.last_interact_ms = now_ms;
		if self.edit_mode {
			MenuAction::None
		} else {
			MenuAction::Commit
		}
	}

	/// Value encoder: edits the selected parameter while in edit mode.
	/// Power edits are applied live instead of waiting for the commit.
	pub fn turn(&mut self, delta: i32, now_ms: u64) -> MenuAction {
		if delta == 0 || !self.edit_mode {
			return MenuAction::None;
		}
		self.last_interact_ms = now_ms;
		match self.selected_param() {
			Param::Wave => {
				self.params.wave = self.params.wave.cycled(delta);
				MenuAction::None
			}
			Param::Power => {
				self.params.adjust(Param::Power, delta);
				MenuAction::PowerChanged(self.params.power)
			}
			param => {
				self.params.adjust(param, delta);
				MenuAction::None
			}
		}
	}

	/// Commits on its own after five quiet seconds in edit mode.
	pub fn poll_timeout(&mut self, now_ms: u64) -> MenuAction {
		if self.edit_mode && now_ms.saturating_sub(self.last_interact_ms) > EDIT_TIMEOUT_MS {
			self.edit_mode = false;
			MenuAction::Commit
		} else {
			MenuAction::None
		}
	}

	/// One display line per parameter.
	pub fn line(&self, index: usize) -> TextField {
		let param = Param::ORDER[index];
		let mut text: String<16> = String::new();
		let _ = match param {
			Param::Wave => write!(text, "{}:{}", param.label(), self.params.wave.label()),
			Param::Freq => write!(text, "{}:{}", param.label(), self.params.freq),
			Param::Power => write!(text, "{}:{}", param.label(), self.params.power),
			Param::Duty => write!(text, "{}:{}", param.label(), self.params.duty),
			Param::SampleRate => write!(text, "{}:{}", param.label(), self.params.sample_rate),
		};
		TextField {
			text,
			selected: index == self.selected,
			editing: self.edit_mode && index == self.selected,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cursor_wraps_in_both_directions() {
		let mut menu = ChannelMenu::new("CH A");
		assert_eq!(menu.selected_param(), Param::Wave);
		menu.navigate(-1, 0);
		assert_eq!(menu.selected_param(), Param::SampleRate);
		menu.navigate(2, 0);
		assert_eq!(menu.selected_param(), Param::Freq);
	}

	#[test]
	fn click_toggles_edit_mode_and_commits_on_exit() {
		let mut menu = ChannelMenu::new("CH A");
		assert_eq!(menu.click(0), MenuAction::None);
		assert!(menu.is_editing());
		assert_eq!(menu.click(10), MenuAction::Commit);
		assert!(!menu.is_editing());
	}

	#[test]
	fn cursor_is_locked_while_editing() {
		let mut menu = ChannelMenu::new("CH A");
		menu.click(0);
		menu.navigate(1, 0);
		assert_eq!(menu.selected_param(), Param::Wave);
	}

	#[test]
	fn turns_are_ignored_outside_edit_mode() {
		let mut menu = ChannelMenu::new("CH A");
		assert_eq!(menu.turn(3, 0), MenuAction::None);
		assert_eq!(menu.params.wave, WaveKind::Sine);
	}

	#[test]
	fn numeric_edits_step_and_clamp() {
		let mut menu = ChannelMenu::new("CH A");
		menu.navigate(1, 0); // Freq
		menu.click(0);
		menu.turn(2, 0);
		assert_eq!(menu.params.freq, 460);
		menu.turn(-1_000_000, 0);
		assert_eq!(menu.params.freq, FREQ_MIN);
		menu.turn(1_000_000, 0);
		assert_eq!(menu.params.freq, FREQ_MAX);
	}

	#[test]
	fn power_edits_are_applied_live() {
		let mut menu = ChannelMenu::new("CH A");
		menu.navigate(2, 0); // Power
		menu.click(0);
		assert_eq!(menu.turn(1, 0), MenuAction::PowerChanged(205));
		assert_eq!(menu.turn(1_000, 0), MenuAction::PowerChanged(POWER_MAX));
	}

	#[test]
	fn wave_edits_cycle_the_shape() {
		let mut menu = ChannelMenu::new("CH A");
		menu.click(0);
		assert_eq!(menu.turn(1, 0), MenuAction::None);
		assert_eq!(menu.params.wave, WaveKind::Triangle);
		menu.turn(-2, 0);
		assert_eq!(menu.params.wave, WaveKind::Square);
	}

	#[test]
	fn edit_mode_times_out_into_a_commit() {
		let mut menu = ChannelMenu::new("CH A");
		menu.click(1_000);
		assert_eq!(menu.poll_timeout(5_500), MenuAction::None);
		assert_eq!(menu.poll_timeout(6_001), MenuAction::Commit);
		assert!(!menu.is_editing());
		// Once out of edit mode the timeout never fires again.
		assert_eq!(menu.poll_timeout(60_000), MenuAction::None);
	}

	#[test]
	fn interaction_defers_the_timeout() {
		let mut menu = ChannelMenu::new("CH A");
		menu.click(0);
		menu.turn(1, 4_000);
		assert_eq!(menu.poll_timeout(8_000), MenuAction::None);
		assert_eq!(menu.poll_timeout(9_001), MenuAction::Commit);
	}

	#[test]
	fn lines_carry_text_and_cursor_state() {
		let mut menu = ChannelMenu::new("CH A");
		menu.navigate(1, 0);
		let line = menu.line(1);
		assert_eq!(line.text.as_str(), "Freq:440");
		assert!(line.selected);
		assert!(!line.editing);

		menu.click(0);
		let line = menu.line(1);
		assert!(line.editing);
		assert_eq!(menu.line(0).text.as_str(), "Wave:Sine");
		assert_eq!(menu.line(4).text.as_str(), "Fs:44100");
	}
}
