//! Little-endian signed PCM sample access.

use super::ProcessStatus;

/// Decode one native sample of width `bits` from the start of `bytes`.
pub(crate) fn read_sample(bytes: &[u8], bits: u16) -> i32 {
    match bits {
        8 => bytes[0] as i8 as i32,
        16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i32,
        24 => {
            let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]);
            raw >> 8
        }
        _ => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Largest and smallest native value for a sample width.
pub(crate) fn sample_range(bits: u16) -> (i64, i64) {
    let max = (1_i64 << (bits - 1)) - 1;
    (-max - 1, max)
}

/// Encode `value` at width `bits`, saturating to the representable range.
pub(crate) fn write_sample(value: i64, bits: u16, out: &mut Vec<u8>) {
    let (min, max) = sample_range(bits);
    let value = value.clamp(min, max);
    match bits {
        8 => out.push(value as i8 as u8),
        16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        24 => {
            let bytes = (value as i32).to_le_bytes();
            out.extend_from_slice(&bytes[..3]);
        }
        _ => out.extend_from_slice(&(value as i32).to_le_bytes()),
    }
}

/// Same as [`write_sample`] but into a fixed slot.
pub(crate) fn store_sample(value: i64, bits: u16, slot: &mut [u8]) {
    let (min, max) = sample_range(bits);
    let value = value.clamp(min, max) as i32;
    let bytes = value.to_le_bytes();
    let width = bits as usize / 8;
    slot[..width].copy_from_slice(&bytes[..width]);
}

/// Run `step` over each complete frame of `input`, honoring the output limit.
///
/// Consumed frames are drained from `input`; a trailing partial frame stays.
pub(crate) fn process_frames<F>(
    input: &mut Vec<u8>,
    output: &mut Vec<u8>,
    limit: usize,
    frame_bytes: usize,
    mut step: F,
) -> ProcessStatus
where
    F: FnMut(&[u8], &mut Vec<u8>),
{
    if input.len() < frame_bytes {
        return ProcessStatus::NeedMore;
    }
    let mut consumed = 0;
    while consumed + frame_bytes <= input.len() {
        if output.len() >= limit {
            break;
        }
        step(&input[consumed..consumed + frame_bytes], output);
        consumed += frame_bytes;
    }
    input.drain(..consumed);
    if input.len() >= frame_bytes {
        ProcessStatus::Pending
    } else {
        ProcessStatus::Done
    }
}
