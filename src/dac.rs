//! The per-bus output facade tying a bus state machine to its DMA ring.

use rp_pico as bsp;

use bsp::hal;
use hal::dma::{SingleChannel, WriteTarget};
use hal::pio;

use crate::buffer::SampleBuffer;
use crate::bus;
use crate::ring::{DmaRing, TREQ_PERMANENT};

/// Two-deep buffer retention for one bus: the active buffer plus the one
/// displaced by the most recent hand-off, since a pass that started before
/// the hand-off finishes out of the old memory.
struct Retention {
	current: Option<SampleBuffer>,
	previous: Option<SampleBuffer>,
}

impl Retention {
	const fn new() -> Self {
		Self {
			current: None,
			previous: None,
		}
	}

	/// Makes `buf` the active buffer. A buffer that falls out of the two
	/// retained slots is handed back; its storage would otherwise be lost
	/// for good.
	fn retain(&mut self, buf: SampleBuffer) -> Option<SampleBuffer> {
		let overflow = self.previous.take();
		self.previous = self.current.take();
		self.current = Some(buf);
		overflow
	}

	fn reclaim(&mut self) -> Option<SampleBuffer> {
		self.previous.take()
	}

	fn current_mut(&mut self) -> Option<&mut SampleBuffer> {
		self.current.as_mut()
	}
}

/// One latched-bus DAC pair: a running bus state machine, its three-channel
/// DMA ring, and the buffers the hardware is allowed to read.
///
/// The facade retains the active buffer for as long as it may be in flight,
/// plus the buffer displaced by the most recent swap, since a pass that
/// started before the swap finishes out of the old memory. The buffer
/// displaced before that is reclaimable via [`DacPair::reclaim`].
pub struct DacPair<P, SM, D, C, A>
where
	P: pio::PIOExt,
	SM: pio::StateMachineIndex,
	D: SingleChannel,
	C: SingleChannel,
	A: SingleChannel,
{
	sm: pio::StateMachine<(P, SM), pio::Running>,
	tx: pio::Tx<(P, SM)>,
	ring: DmaRing<D, C, A>,
	retained: Retention,
	sys_clk_hz: u32,
	sample_rate: u32,
}

impl<P, SM, D, C, A> DacPair<P, SM, D, C, A>
where
	P: pio::PIOExt,
	SM: pio::StateMachineIndex,
	D: SingleChannel,
	C: SingleChannel,
	A: SingleChannel,
{
	/// Builds the facade for one bus. The state machine must already be
	/// running the bus program (see [`bus::load_bus_program`]); it stalls on
	/// the empty FIFO until [`DacPair::play`] arms the ring.
	pub fn new(
		sm: pio::StateMachine<(P, SM), pio::Running>,
		tx: pio::Tx<(P, SM)>,
		ring: DmaRing<D, C, A>,
		sys_clk_hz: u32,
	) -> Self {
		Self {
			sm,
			tx,
			ring,
			retained: Retention::new(),
			sys_clk_hz,
			sample_rate: 0,
		}
	}

	/// Starts continuous playback of `buf` at `sample_rate` samples per
	/// second and returns the rate actually in effect.
	///
	/// Rates above the bus limit are clamped, not rejected; a clamp is
	/// logged and visible in the return value. Invalid buffer lengths are
	/// rejected earlier, at [`SampleBuffer`] construction, before any
	/// hardware state changes.
	pub fn play(&mut self, buf: SampleBuffer, sample_rate: u32) -> u32 {
		let sm_clock = bus::sm_clock_for(sample_rate);
		let effective = sm_clock / bus::CYCLES_PER_SAMPLE;
		if effective != sample_rate {
			defmt::warn!(
				"sample rate clamped: requested {} Hz, effective {} Hz",
				sample_rate,
				effective
			);
		}
		let (int, frac) = bus::clock_divisor(self.sys_clk_hz, sm_clock);
		self.sm.clock_divisor_fixed_point(int, frac);

		let addr = buf.address();
		let len = buf.len() as u32;
		// Retain before the ring can observe the address.
		if self.retained.retain(buf).is_some() {
			defmt::warn!("buffer storage dropped: reclaim before re-arming");
		}

		let fifo_addr = self.tx.fifo_address() as u32;
		self.ring.arm(addr, len, fifo_addr, Self::treq());
		self.sample_rate = effective;
		effective
	}

	/// Queues `buf` to replace the playing buffer at the next wrap boundary.
	///
	/// Fire and forget: the in-flight pass is untouched and the hand-off
	/// happens no later than one buffer period after this returns. The
	/// displaced buffer stays retained until a later [`DacPair::reclaim`];
	/// a buffer pushed out of retention by the swap is handed back rather
	/// than dropped, so its storage stays reusable.
	pub fn swap_buffer(&mut self, buf: SampleBuffer) -> Option<SampleBuffer> {
		let addr = buf.address();
		let len = buf.len() as u32;
		let overflow = self.retained.retain(buf);
		self.ring.set_next(addr, len);
		defmt::debug!("buffer swap queued: {} bytes", len);
		overflow
	}

	/// Rewrites the power byte of every sample in the retained buffer,
	/// clamping `level` to `0..=255`. The DMA engine may be mid-pass; a pass
	/// already in flight can read a mix of old and new power bytes, settled
	/// within one buffer period. See [`SampleBuffer`].
	pub fn update_power(&mut self, level: i32) {
		if let Some(buf) = self.retained.current_mut() {
			buf.fill_power(level);
		}
	}

	/// Hands back the buffer displaced by the last swap so its storage can
	/// be refilled. Only safe to call once a full buffer period has passed
	/// since that swap; until then the ring may still be reading it.
	pub fn reclaim(&mut self) -> Option<SampleBuffer> {
		self.retained.reclaim()
	}

	/// Sample rate currently in effect.
	pub fn sample_rate(&self) -> u32 {
		self.sample_rate
	}

	/// Readback of the data channel's programmed transfer count.
	pub fn transfer_count(&self) -> u32 {
		self.ring.data_trans_count()
	}

	/// Readback of the address the data channel is reading from.
	pub fn read_address(&self) -> u32 {
		self.ring.data_read_addr()
	}

	fn treq() -> u32 {
		match <pio::Tx<(P, SM)> as WriteTarget>::tx_treq() {
			Some(treq) => u32::from(treq),
			None => TREQ_PERMANENT,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use core::ptr::addr_of_mut;

	fn buffer(storage: &'static mut [u8]) -> SampleBuffer {
		SampleBuffer::full(storage).unwrap()
	}

	#[test]
	fn retention_is_two_deep_and_hands_back_the_overflow() {
		static mut A: [u8; 4] = [0; 4];
		static mut B: [u8; 4] = [0; 4];
		static mut C: [u8; 4] = [0; 4];
		let a = buffer(unsafe { &mut *addr_of_mut!(A) });
		let b = buffer(unsafe { &mut *addr_of_mut!(B) });
		let c = buffer(unsafe { &mut *addr_of_mut!(C) });
		let a_addr = a.address();

		let mut retained = Retention::new();
		assert!(retained.retain(a).is_none());
		assert!(retained.retain(b).is_none());
		// A third hand-off pushes the oldest buffer out of retention.
		let overflow = retained.retain(c).unwrap();
		assert_eq!(overflow.address(), a_addr);
	}

	#[test]
	fn reclaim_empties_the_previous_slot() {
		static mut A: [u8; 4] = [0; 4];
		static mut B: [u8; 4] = [0; 4];
		static mut C: [u8; 4] = [0; 4];
		let a = buffer(unsafe { &mut *addr_of_mut!(A) });
		let b = buffer(unsafe { &mut *addr_of_mut!(B) });
		let c = buffer(unsafe { &mut *addr_of_mut!(C) });
		let a_addr = a.address();

		let mut retained = Retention::new();
		retained.retain(a);
		retained.retain(b);
		assert_eq!(retained.reclaim().unwrap().address(), a_addr);
		assert!(retained.reclaim().is_none());
		// With the previous slot reclaimed, nothing falls out on the next
		// hand-off.
		assert!(retained.retain(c).is_none());
	}
}
