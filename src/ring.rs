//! The self-re-arming three-channel DMA ring that keeps a bus state machine
//! fed without CPU involvement.
//!
//! Per bus, three channels with fixed logical roles:
//!
//! - **data**: streams buffer bytes into the PIO TX FIFO, paced by the state
//!   machine's TX DREQ, and chains to the count re-arm channel when the
//!   buffer is exhausted.
//! - **count re-arm**: copies [`RingControlBlock::next_count`] into the data
//!   channel's `TRANS_COUNT` register, then chains to the address re-arm.
//! - **address re-arm**: copies [`RingControlBlock::next_addr`] into the data
//!   channel's `READ_ADDR` *trigger* alias, which both loads the next source
//!   address and restarts the data channel.
//!
//! Each wrap of the data channel therefore reconfigures and retriggers
//! itself through the control block, with no CPU in the loop. The foreground
//! replaces what plays next by rewriting the control block between wraps.

use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

use rp_pico as bsp;

use bsp::hal;
use hal::dma::SingleChannel;
use hal::pac;

const CTRL_EN: u32 = 1 << 0;
const CTRL_HIGH_PRIORITY: u32 = 1 << 1;
const CTRL_DATA_SIZE_LSB: u32 = 2;
const CTRL_INCR_READ: u32 = 1 << 4;
const CTRL_CHAIN_TO_LSB: u32 = 11;
const CTRL_TREQ_SEL_LSB: u32 = 15;
const CTRL_IRQ_QUIET: u32 = 1 << 21;

const SIZE_BYTE: u32 = 0;
const SIZE_WORD: u32 = 2;

/// TREQ selector for an unpaced transfer.
pub const TREQ_PERMANENT: u32 = 0x3f;

/// The two-word record the re-arm channels read at every wrap boundary.
///
/// Foreground-writable, hardware-read-only. It must live at a stable
/// `'static` address for the lifetime of the ring; the re-arm channels keep
/// its field addresses programmed as their read addresses.
#[repr(C)]
pub struct RingControlBlock {
	next_addr: u32,
	next_count: u32,
}

impl RingControlBlock {
	pub const fn new() -> Self {
		Self {
			next_addr: 0,
			next_count: 0,
		}
	}

	/// Publishes the buffer that plays from the next wrap onward.
	///
	/// The caller must already have retained the buffer; the release fence
	/// orders that store before the block update so the ring never reads an
	/// address whose buffer could still be torn down. Address first, then
	/// count, so a wrap racing the update at worst replays the old length
	/// from the new address for one pass.
	pub fn publish(&mut self, addr: u32, count: u32) {
		compiler_fence(Ordering::Release);
		unsafe {
			ptr::write_volatile(&mut self.next_addr, addr);
			ptr::write_volatile(&mut self.next_count, count);
		}
	}

	pub(crate) fn next_addr_ptr(&self) -> u32 {
		&self.next_addr as *const u32 as u32
	}

	pub(crate) fn next_count_ptr(&self) -> u32 {
		&self.next_count as *const u32 as u32
	}
}

impl Default for RingControlBlock {
	fn default() -> Self {
		Self::new()
	}
}

/// CTRL word for the data channel: byte reads marching through the buffer,
/// write address pinned to the TX FIFO, paced by `treq`, chained to the
/// count re-arm channel, no completion interrupt.
pub(crate) fn data_ctrl(treq: u32, chain_to: u32) -> u32 {
	CTRL_IRQ_QUIET
		| (treq << CTRL_TREQ_SEL_LSB)
		| (chain_to << CTRL_CHAIN_TO_LSB)
		| CTRL_INCR_READ
		| (SIZE_BYTE << CTRL_DATA_SIZE_LSB)
		| CTRL_HIGH_PRIORITY
		| CTRL_EN
}

/// CTRL word for a re-arm channel: one unpaced 32-bit word from the ring
/// control block into a data-channel register, neither address incrementing.
/// A channel that chains to itself does not chain at all.
pub(crate) fn rearm_ctrl(chain_to: u32) -> u32 {
	CTRL_IRQ_QUIET
		| (TREQ_PERMANENT << CTRL_TREQ_SEL_LSB)
		| (chain_to << CTRL_CHAIN_TO_LSB)
		| (SIZE_WORD << CTRL_DATA_SIZE_LSB)
		| CTRL_EN
}

/// CHAN_ABORT bit mask covering one bus's channel triple.
pub(crate) fn abort_mask(data_id: u8, count_id: u8, addr_id: u8) -> u32 {
	(1 << data_id) | (1 << count_id) | (1 << addr_id)
}

/// One bus's channel triple. Once [`DmaRing::arm`] returns, samples stream
/// and the ring re-arms itself with zero CPU participation; the foreground
/// only ever rewrites the control block.
pub struct DmaRing<D, C, A>
where
	D: SingleChannel,
	C: SingleChannel,
	A: SingleChannel,
{
	ch_data: D,
	ch_count: C,
	ch_addr: A,
	ctrl: &'static mut RingControlBlock,
}

impl<D, C, A> DmaRing<D, C, A>
where
	D: SingleChannel,
	C: SingleChannel,
	A: SingleChannel,
{
	pub fn new(ch_data: D, ch_count: C, ch_addr: A, ctrl: &'static mut RingControlBlock) -> Self {
		Self {
			ch_data,
			ch_count,
			ch_addr,
			ctrl,
		}
	}

	/// Points the ring at a buffer and starts it.
	///
	/// `fifo_addr` is the PIO TX FIFO register address and `treq` the state
	/// machine's TX DREQ. The re-arm channels are configured and enabled
	/// through the non-trigger CTRL alias first, so they sit idle until the
	/// data channel's first wrap chains into them; the data channel's own
	/// CTRL write is the trigger that starts the stream.
	pub fn arm(&mut self, buf_addr: u32, buf_len: u32, fifo_addr: u32, treq: u32) {
		self.disarm();
		self.ctrl.publish(buf_addr, buf_len);

		let count_id = u32::from(self.ch_count.id());
		let addr_id = u32::from(self.ch_addr.id());

		let trans_count_reg = self.ch_data.ch().ch_trans_count().as_ptr() as u32;
		let read_addr_trig_reg = self.ch_data.ch().ch_al3_read_addr_trig().as_ptr() as u32;

		let ch = self.ch_count.ch();
		ch.ch_read_addr().write(|w| unsafe { w.bits(self.ctrl.next_count_ptr()) });
		ch.ch_write_addr().write(|w| unsafe { w.bits(trans_count_reg) });
		ch.ch_trans_count().write(|w| unsafe { w.bits(1) });
		ch.ch_al1_ctrl().write(|w| unsafe { w.bits(rearm_ctrl(addr_id)) });

		let ch = self.ch_addr.ch();
		ch.ch_read_addr().write(|w| unsafe { w.bits(self.ctrl.next_addr_ptr()) });
		ch.ch_write_addr().write(|w| unsafe { w.bits(read_addr_trig_reg) });
		ch.ch_trans_count().write(|w| unsafe { w.bits(1) });
		// Chaining to itself disables the chain; the re-arm ends the wrap.
		ch.ch_al1_ctrl().write(|w| unsafe { w.bits(rearm_ctrl(addr_id)) });

		let ch = self.ch_data.ch();
		ch.ch_read_addr().write(|w| unsafe { w.bits(buf_addr) });
		ch.ch_write_addr().write(|w| unsafe { w.bits(fifo_addr) });
		ch.ch_trans_count().write(|w| unsafe { w.bits(buf_len) });
		ch.ch_ctrl_trig().write(|w| unsafe { w.bits(data_ctrl(treq, count_id)) });
	}

	/// Stops all three channels. Clearing EN only pauses an in-flight
	/// transfer; a paused data channel would later resume its stale
	/// remaining count against whatever read address the re-arm writes, so
	/// the triple is aborted outright and the abort is waited out before
	/// anything gets reprogrammed.
	pub fn disarm(&mut self) {
		self.ch_data.ch().ch_al1_ctrl().write(|w| unsafe { w.bits(0) });
		self.ch_count.ch().ch_al1_ctrl().write(|w| unsafe { w.bits(0) });
		self.ch_addr.ch().ch_al1_ctrl().write(|w| unsafe { w.bits(0) });

		let mask = abort_mask(self.ch_data.id(), self.ch_count.id(), self.ch_addr.id());
		let dma = unsafe { &*pac::DMA::ptr() };
		dma.chan_abort().write(|w| unsafe { w.bits(mask) });
		while dma.chan_abort().read().bits() != 0 {}
	}

	/// Publishes the buffer the ring plays after the next wrap. The in-flight
	/// transfer is unaffected.
	pub fn set_next(&mut self, addr: u32, count: u32) {
		self.ctrl.publish(addr, count);
	}

	/// Transfer count currently programmed into the data channel.
	pub fn data_trans_count(&self) -> u32 {
		self.ch_data.ch().ch_trans_count().read().bits()
	}

	/// Source address the data channel is currently reading from.
	pub fn data_read_addr(&self) -> u32 {
		self.ch_data.ch().ch_read_addr().read().bits()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn control_block_layout_matches_the_rearm_reads() {
		// The address re-arm reads word 0, the count re-arm word 1.
		let blk = RingControlBlock::new();
		assert_eq!(blk.next_count_ptr() - blk.next_addr_ptr(), 4);
	}

	#[test]
	fn publish_updates_both_fields() {
		let mut blk = RingControlBlock::new();
		blk.publish(0x2000_0100, 512);
		assert_eq!(blk.next_addr, 0x2000_0100);
		assert_eq!(blk.next_count, 512);
	}

	#[test]
	fn data_ctrl_field_placement() {
		let word = data_ctrl(0, 1);
		assert_eq!(word & 1, 1, "enabled");
		assert_eq!((word >> 2) & 0b11, SIZE_BYTE, "byte transfers");
		assert_eq!((word >> 4) & 1, 1, "read address increments");
		assert_eq!((word >> 5) & 1, 0, "write address pinned to the FIFO");
		assert_eq!((word >> 11) & 0xf, 1, "chains to the count re-arm");
		assert_eq!((word >> 15) & 0x3f, 0, "paced by the given DREQ");
		assert_eq!((word >> 21) & 1, 1, "no completion interrupt");
	}

	#[test]
	fn abort_mask_covers_exactly_the_triple() {
		assert_eq!(abort_mask(0, 1, 2), 0b111);
		assert_eq!(abort_mask(3, 4, 5), 0b111000);
	}

	#[test]
	fn rearm_ctrl_is_one_unpaced_word() {
		let word = rearm_ctrl(2);
		assert_eq!(word & 1, 1, "enabled");
		assert_eq!((word >> 2) & 0b11, SIZE_WORD, "32-bit transfer");
		assert_eq!((word >> 4) & 1, 0, "fixed read address");
		assert_eq!((word >> 5) & 1, 0, "fixed write address");
		assert_eq!((word >> 11) & 0xf, 2, "chain target");
		assert_eq!((word >> 15) & 0x3f, TREQ_PERMANENT, "unpaced");
	}
}
