use crate::{BufferDesc, RenderError};

/// How a frame ended up in the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
	/// Strides matched; one contiguous copy.
	Bulk { bytes: usize },
	/// Strides differed; each row copied on its own.
	Rows { rows: usize, row_bytes: usize },
}

/// Copies `desc.height` rows of `src` into `dst`, reconciling the two strides.
///
/// Nothing outside the visible `width * 4` bytes of each destination row is written
/// unless both sides share the same layout.
pub fn copy_frame(
	src: &[u8],
	src_stride: usize,
	dst: &mut [u8],
	desc: &BufferDesc,
) -> Result<CopyStrategy, RenderError> {
	let width_bytes = desc.visible_row_bytes();
	let dst_stride = desc.row_bytes();
	let rows = desc.height as usize;
	if width_bytes > dst_stride {
		return Err(RenderError::InvalidBuffer {
			width: desc.width,
			height: desc.height,
			stride: desc.stride,
		});
	}
	if src_stride < width_bytes {
		return Err(RenderError::StrideTooSmall {
			stride: src_stride,
			row_bytes: width_bytes,
		});
	}
	if rows == 0 {
		return Ok(CopyStrategy::Rows { rows: 0, row_bytes: width_bytes });
	}

	// Saturates so an absurd stride reads as a source that can never be large enough.
	let src_needed = span(src_stride, rows, width_bytes).unwrap_or(usize::MAX);
	if src.len() < src_needed {
		return Err(RenderError::SourceTooSmall {
			len: src.len(),
			needed: src_needed,
		});
	}
	let dst_needed = span(dst_stride, rows, width_bytes).unwrap_or(usize::MAX);
	if dst.len() < dst_needed {
		return Err(RenderError::DestinationTooSmall {
			len: dst.len(),
			needed: dst_needed,
		});
	}

	let bulk = src_stride
		.checked_mul(rows)
		.filter(|&bulk| src_stride == dst_stride && src.len() >= bulk && dst.len() >= bulk);
	if let Some(bulk) = bulk {
		dst[..bulk].copy_from_slice(&src[..bulk]);
		return Ok(CopyStrategy::Bulk { bytes: bulk });
	}

	for row in 0..rows {
		let from = row * src_stride;
		let to = row * dst_stride;
		dst[to..to + width_bytes].copy_from_slice(&src[from..from + width_bytes]);
	}
	Ok(CopyStrategy::Rows {
		rows,
		row_bytes: width_bytes,
	})
}

/// Bytes covered by `rows` rows of `stride` where the last row holds only `row_bytes`.
fn span(stride: usize, rows: usize, row_bytes: usize) -> Option<usize> {
	stride.checked_mul(rows - 1)?.checked_add(row_bytes)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::FORMAT_ARGB8888;

	fn desc(width: u32, height: u32, stride: u32) -> BufferDesc {
		BufferDesc {
			width,
			height,
			stride,
			format: FORMAT_ARGB8888,
		}
	}

	fn pattern(len: usize) -> Vec<u8> {
		(0..len).map(|i| (i % 251) as u8).collect()
	}

	#[test]
	fn matching_strides_copy_in_one_go() {
		let desc = desc(8, 4, 8);
		let src = pattern(8 * 4 * 4);
		let mut dst = vec![0u8; src.len()];
		let strategy = copy_frame(&src, 32, &mut dst, &desc).unwrap();
		assert_eq!(strategy, CopyStrategy::Bulk { bytes: 128 });
		assert_eq!(dst, src);
	}

	#[test]
	fn differing_strides_copy_row_by_row() {
		// Source rows are padded to 40 bytes, destination to 48.
		let desc = desc(8, 3, 12);
		let src = pattern(40 * 3);
		let mut dst = vec![0xaau8; 48 * 3];
		let strategy = copy_frame(&src, 40, &mut dst, &desc).unwrap();
		assert_eq!(strategy, CopyStrategy::Rows { rows: 3, row_bytes: 32 });
		for row in 0..3 {
			assert_eq!(&dst[row * 48..row * 48 + 32], &src[row * 40..row * 40 + 32]);
			assert!(dst[row * 48 + 32..(row + 1) * 48].iter().all(|&b| b == 0xaa));
		}
	}

	#[test]
	fn last_row_may_omit_padding() {
		let desc = desc(2, 2, 0);
		// 16 byte source stride with only 8 bytes in the final row.
		let src = pattern(16 + 8);
		let mut dst = vec![0u8; 16];
		let strategy = copy_frame(&src, 16, &mut dst, &desc).unwrap();
		assert_eq!(strategy, CopyStrategy::Rows { rows: 2, row_bytes: 8 });
		assert_eq!(&dst[8..16], &src[16..24]);
	}

	#[test]
	fn short_source_is_an_error() {
		let desc = desc(8, 4, 0);
		let src = vec![0u8; 100];
		let mut dst = vec![0u8; 128];
		assert!(matches!(
			copy_frame(&src, 32, &mut dst, &desc),
			Err(RenderError::SourceTooSmall { len: 100, needed: 128 })
		));
	}

	#[test]
	fn narrow_source_stride_is_an_error() {
		let desc = desc(8, 1, 0);
		let mut dst = vec![0u8; 32];
		assert!(matches!(
			copy_frame(&[0u8; 64], 16, &mut dst, &desc),
			Err(RenderError::StrideTooSmall { stride: 16, row_bytes: 32 })
		));
	}

	#[test]
	fn overflowing_source_stride_is_an_error() {
		let desc = desc(8, 4, 0);
		let mut dst = vec![0u8; 128];
		assert!(matches!(
			copy_frame(&[0u8; 64], usize::MAX / 2, &mut dst, &desc),
			Err(RenderError::SourceTooSmall {
				len: 64,
				needed: usize::MAX,
			})
		));
		assert!(dst.iter().all(|&b| b == 0));
	}
}
