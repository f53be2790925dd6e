//! Per-frame post-processing.
//!
//! Both passes operate on the raw little-endian byte buffer the SDK filled.
//! Stretch runs before binning.

/// Left-shift every 16-bit sample by `shift` bits.
///
/// `shift == 0` leaves the buffer untouched. A trailing odd byte is ignored.
pub fn apply_stretch(buffer: &mut [u8], shift: u8) {
    if shift == 0 {
        return;
    }
    for chunk in buffer.chunks_exact_mut(2) {
        let sample = u16::from_le_bytes([chunk[0], chunk[1]]) << shift;
        chunk.copy_from_slice(&sample.to_le_bytes());
    }
}

/// Sum `bin`x`bin` blocks of a `width`x`height` frame, saturating at the
/// sample type's maximum.
///
/// `bytes_per_pixel` is 1 or 2. Rows and columns that do not fill a whole
/// block are dropped. `bin <= 1` returns the input unchanged.
pub fn bin_frame(
    data: &[u8],
    width: u32,
    height: u32,
    bin: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    if bin <= 1 {
        return data.to_vec();
    }
    let out_w = (width / bin) as usize;
    let out_h = (height / bin) as usize;
    let width = width as usize;
    let bin = bin as usize;
    let mut out = vec![0u8; out_w * out_h * bytes_per_pixel];

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum: u32 = 0;
            for dy in 0..bin {
                let row = (oy * bin + dy) * width;
                for dx in 0..bin {
                    let idx = (row + ox * bin + dx) * bytes_per_pixel;
                    sum += match bytes_per_pixel {
                        1 => data.get(idx).copied().unwrap_or(0) as u32,
                        _ => match data.get(idx..idx + 2) {
                            Some(b) => u16::from_le_bytes([b[0], b[1]]) as u32,
                            None => 0,
                        },
                    };
                }
            }
            let dst = (oy * out_w + ox) * bytes_per_pixel;
            match bytes_per_pixel {
                1 => out[dst] = sum.min(u8::MAX as u32) as u8,
                _ => {
                    let v = sum.min(u16::MAX as u32) as u16;
                    out[dst..dst + 2].copy_from_slice(&v.to_le_bytes());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn to_words(bytes: &[u8]) -> Vec<u16> {
        bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn stretch_zero_is_identity() {
        let raw = words(&[1, 2, 4095, 0x8001]);
        let mut buf = raw.clone();
        apply_stretch(&mut buf, 0);
        assert_eq!(buf, raw);
    }

    #[test]
    fn stretch_shifts_each_sample_once() {
        let mut buf = words(&[1, 100, 4095]);
        apply_stretch(&mut buf, 4);
        assert_eq!(to_words(&buf), vec![16, 1600, 65520]);
    }

    #[test]
    fn stretch_discards_overflowing_bits() {
        let mut buf = words(&[0x8001]);
        apply_stretch(&mut buf, 1);
        assert_eq!(to_words(&buf), vec![0x0002]);
    }

    #[test]
    fn bin_sums_blocks_16bit() {
        // 4x2 frame, 2x2 bin -> 2x1
        let data = words(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let out = bin_frame(&data, 4, 2, 2, 2);
        assert_eq!(to_words(&out), vec![1 + 2 + 5 + 6, 3 + 4 + 7 + 8]);
    }

    #[test]
    fn bin_saturates() {
        let data = words(&[60000, 60000, 60000, 60000]);
        let out = bin_frame(&data, 2, 2, 2, 2);
        assert_eq!(to_words(&out), vec![u16::MAX]);

        let data8 = vec![200u8, 200, 200, 200];
        assert_eq!(bin_frame(&data8, 2, 2, 2, 1), vec![255]);
    }

    #[test]
    fn bin_drops_partial_blocks() {
        let data = vec![1u8; 5 * 3];
        let out = bin_frame(&data, 5, 3, 2, 1);
        assert_eq!(out, vec![4, 4]);
    }

    #[test]
    fn bin_one_is_copy() {
        let data = vec![9u8, 8, 7];
        assert_eq!(bin_frame(&data, 3, 1, 1, 1), data);
    }
}
