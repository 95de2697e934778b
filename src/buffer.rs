use core::ptr;

/// Errors reported by the output facade before any hardware state is touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum DacError {
	/// The interleaved buffer was empty, odd-length, or longer than its storage.
	InvalidBufferLength(usize),
}

/// An interleaved `[signal, power, signal, power, ...]` byte buffer that the
/// DMA engine reads directly out of RAM.
///
/// While a buffer is retained by a [`DacPair`](crate::dac::DacPair) the
/// hardware may be reading any byte of it at any time. The only CPU write the
/// type allows in that state is [`SampleBuffer::fill_power`], which touches
/// odd indices only: a transfer already in flight can observe a mix of old and
/// new power bytes for at most one pass, after which every pass sees the new
/// value. Signal bytes are never rewritten in place; they change only through
/// a buffer swap at a wrap boundary.
pub struct SampleBuffer {
	storage: &'static mut [u8],
	len: usize,
}

impl SampleBuffer {
	/// Takes ownership of `storage` and marks its first `len` bytes as the
	/// active interleaved content. `len` must be even, non-zero and within
	/// the storage.
	pub fn new(storage: &'static mut [u8], len: usize) -> Result<Self, DacError> {
		if len == 0 || len % 2 != 0 || len > storage.len() {
			return Err(DacError::InvalidBufferLength(len));
		}
		Ok(Self { storage, len })
	}

	/// Shorthand for a buffer whose whole storage is active.
	pub fn full(storage: &'static mut [u8]) -> Result<Self, DacError> {
		let len = storage.len();
		Self::new(storage, len)
	}

	/// Active length in bytes. Always even, always non-zero.
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		// Zero-length buffers are rejected at construction.
		false
	}

	/// Start address the DMA data channel reads from.
	pub(crate) fn address(&self) -> u32 {
		self.storage.as_ptr() as u32
	}

	/// Overwrites the power byte of every active sample with the clamped
	/// level. See the type docs for the consistency window.
	pub fn fill_power(&mut self, level: i32) {
		fill_power(&mut self.storage[..self.len], level);
	}

	/// Releases the underlying storage, e.g. to regenerate its contents once
	/// the buffer has left the ring.
	pub fn into_inner(self) -> &'static mut [u8] {
		self.storage
	}
}

/// Overwrites every odd-indexed (power) byte of an interleaved buffer with
/// `level` clamped to `0..=255`. Volatile stores, since the DMA engine may be
/// reading the same bytes concurrently.
pub(crate) fn fill_power(data: &mut [u8], level: i32) {
	let level = level.clamp(0, 255) as u8;
	for byte in data.iter_mut().skip(1).step_by(2) {
		unsafe { ptr::write_volatile(byte, level) };
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use core::ptr::addr_of_mut;

	#[test]
	fn rejects_empty_and_odd_lengths() {
		static mut STORAGE: [u8; 4] = [7, 7, 7, 7];
		let storage = unsafe { &mut *addr_of_mut!(STORAGE) };
		assert_eq!(
			SampleBuffer::new(storage, 0).err(),
			Some(DacError::InvalidBufferLength(0))
		);

		static mut ODD: [u8; 1] = [7];
		let odd = unsafe { &mut *addr_of_mut!(ODD) };
		assert_eq!(
			SampleBuffer::full(odd).err(),
			Some(DacError::InvalidBufferLength(1))
		);
	}

	#[test]
	fn rejects_lengths_beyond_the_storage() {
		static mut STORAGE: [u8; 4] = [0; 4];
		let storage = unsafe { &mut *addr_of_mut!(STORAGE) };
		assert_eq!(
			SampleBuffer::new(storage, 6).err(),
			Some(DacError::InvalidBufferLength(6))
		);
	}

	#[test]
	fn accepts_an_even_active_prefix() {
		static mut STORAGE: [u8; 8] = [0; 8];
		let storage = unsafe { &mut *addr_of_mut!(STORAGE) };
		let buf = SampleBuffer::new(storage, 6).unwrap();
		assert_eq!(buf.len(), 6);
		assert!(!buf.is_empty());
	}

	#[test]
	fn power_fill_rewrites_odd_bytes_only() {
		let mut data = [10, 100, 20, 100, 30, 100];
		fill_power(&mut data, 50);
		assert_eq!(data, [10, 50, 20, 50, 30, 50]);
	}

	#[test]
	fn power_fill_clamps_out_of_range_levels() {
		let mut data = [1, 2, 3, 4];
		fill_power(&mut data, 300);
		assert_eq!(data, [1, 255, 3, 255]);
		fill_power(&mut data, -17);
		assert_eq!(data, [1, 0, 3, 0]);
	}

	#[test]
	fn power_fill_respects_the_active_length() {
		static mut STORAGE: [u8; 8] = [9; 8];
		let storage = unsafe { &mut *addr_of_mut!(STORAGE) };
		let mut buf = SampleBuffer::new(storage, 4).unwrap();
		buf.fill_power(0);
		let data = buf.into_inner();
		assert_eq!(data, &[9, 0, 9, 0, 9, 9, 9, 9]);
	}
}
