//! LEB128 varints and zigzag encoding for signed values.
//!
//! Values are split into 7-bit groups, least significant first. Every byte
//! except the last has its high bit set.

/// Append `value` to `buf`. Returns the number of bytes written.
pub(crate) fn write_u64(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let mut size = 1;
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
        size += 1;
    }
    buf.push(value as u8);
    size
}

/// Decode one varint from `bytes` starting at `*pos`, advancing `*pos`.
///
/// Returns `None` on truncated input or when the value overflows 64 bits.
pub(crate) fn read_u64(bytes: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        let chunk = u64::from(byte & 0x7F);
        if shift == 63 && chunk > 1 {
            return None;
        }
        value |= chunk << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
}

/// Map signed to unsigned so that small magnitudes stay small:
/// 0, -1, 1, -2, ... become 0, 1, 2, 3, ...
pub(crate) fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub(crate) fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_values() {
        let cases: [(u64, &[u8]); 4] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (300, &[0xAC, 0x02]),
        ];
        for (value, expected) in cases {
            let mut buf = Vec::new();
            let size = write_u64(&mut buf, value);
            assert_eq!(buf, expected, "value {value}");
            assert_eq!(size, expected.len());
        }
    }

    #[test]
    fn roundtrip_edge_values() {
        let values = [0_u64, 127, 128, 16383, 16384, u64::MAX];
        for &v in &values {
            let mut buf = Vec::new();
            write_u64(&mut buf, v);
            let mut pos = 0;
            assert_eq!(read_u64(&buf, &mut pos), Some(v));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut pos = 0;
        assert_eq!(read_u64(&[0x80, 0x80], &mut pos), None);
    }

    #[test]
    fn overlong_input_is_rejected() {
        let bytes = [0xFF; 11];
        let mut pos = 0;
        assert_eq!(read_u64(&bytes, &mut pos), None);
    }

    #[test]
    fn zigzag_interleaves_signs() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        for v in [0, 1, -1, i64::MIN, i64::MAX, -123_456] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
    }
}
