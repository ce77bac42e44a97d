/// Bit helpers for the FAST segment test.
///
/// Circle pixels are packed into a `u16`, bit `i` standing for offset `i`
/// of the Bresenham circle, so contiguity checks wrap around bit 15 -> bit 0.

/// Pack a boolean circle into a 16-bit mask
pub fn circle_mask(pixels: &[bool; 16]) -> u16 {
    pixels
        .iter()
        .enumerate()
        .fold(0u16, |mask, (i, &set)| if set { mask | (1 << i) } else { mask })
}

/// True when `mask` holds a circular run of at least `min_count` set bits
pub fn has_contiguous_arc(mask: u16, min_count: usize) -> bool {
    if min_count == 0 || min_count > 16 {
        return false;
    }
    if (mask.count_ones() as usize) < min_count {
        return false;
    }

    // AND the mask with its rotations; a surviving bit starts a run of length min_count
    let mut run = mask;
    for i in 1..min_count as u32 {
        run &= mask.rotate_right(i);
        if run == 0 {
            return false;
        }
    }
    run != 0
}

/// Linear scan reference used to cross-check the bitmask version
pub fn longest_circular_run(mask: u16) -> usize {
    if mask == u16::MAX {
        return 16;
    }
    let mut best = 0;
    let mut current = 0;
    for i in 0..32 {
        if mask & (1 << (i % 16)) != 0 {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best.min(16)
}
