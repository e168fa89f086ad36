//! Pointer stuffing helpers.
//!
//! Values placed in the engine's per-body user data word are an object address with flag bits
//! OR'd into the low bits that are guaranteed zero by the object's alignment.

/// Alignment every stuffed object must be allocated at.
pub const STUFFED_POINTER_ALIGNMENT: usize = 8;

/// Number of low bits that are always zero in a pointer with `STUFFED_POINTER_ALIGNMENT`.
pub const UNUSED_POINTER_BITS: u32 = STUFFED_POINTER_ALIGNMENT.trailing_zeros();

/// Mask selecting the flag bits of a stuffed value.
pub const STUFFED_POINTER_DATA_MASK: u64 = (1 << UNUSED_POINTER_BITS) - 1;

/// Mask selecting the address bits of a stuffed value.
pub const STUFFED_POINTER_POINTER_MASK: u64 = !STUFFED_POINTER_DATA_MASK;

const _: () = {
    assert!(STUFFED_POINTER_ALIGNMENT.is_power_of_two());
    assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
};

/// Combines an aligned address with flag bits.
///
/// Flag bits outside of `STUFFED_POINTER_DATA_MASK` are dropped.
#[inline(always)]
pub fn stuff_pointer<T>(pointer: *const T, flags: u64) -> u64 {
    let address = pointer as usize as u64;
    debug_assert!(
        address & STUFFED_POINTER_DATA_MASK == 0,
        "Stuffed pointer target is not aligned to {} bytes",
        STUFFED_POINTER_ALIGNMENT
    );
    debug_assert!(
        flags & STUFFED_POINTER_POINTER_MASK == 0,
        "Too many flags to fit in the unused pointer bits"
    );
    address | (flags & STUFFED_POINTER_DATA_MASK)
}

/// Recovers the address part of a stuffed value.
///
/// An all-zero address decodes to `None` explicitly instead of being reinterpreted, so the result
/// does not depend on how the platform represents null.
#[inline(always)]
pub fn unstuff_pointer<T>(stuffed: u64) -> Option<*const T> {
    let address = stuffed & STUFFED_POINTER_POINTER_MASK;
    if address == 0 {
        return None;
    }
    Some(address as usize as *const T)
}

/// Recovers the flag part of a stuffed value.
#[inline(always)]
pub fn stuffed_flags(stuffed: u64) -> u64 {
    stuffed & STUFFED_POINTER_DATA_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct Aligned(#[allow(dead_code)] u64);

    #[test]
    fn test_masks() {
        assert_eq!(UNUSED_POINTER_BITS, 3);
        assert_eq!(STUFFED_POINTER_DATA_MASK, 0b111);
        assert_eq!(STUFFED_POINTER_POINTER_MASK & STUFFED_POINTER_DATA_MASK, 0);
        assert_eq!(STUFFED_POINTER_POINTER_MASK | STUFFED_POINTER_DATA_MASK, u64::MAX);
    }

    #[test]
    fn test_round_trip_all_flag_values() {
        let value = Aligned(7);
        let pointer = &value as *const Aligned;
        for flags in 0..=STUFFED_POINTER_DATA_MASK {
            let stuffed = stuff_pointer(pointer, flags);
            assert_eq!(unstuff_pointer::<Aligned>(stuffed), Some(pointer));
            assert_eq!(stuffed_flags(stuffed), flags);
        }
    }

    #[test]
    fn test_null_decodes_to_none() {
        assert_eq!(unstuff_pointer::<Aligned>(0), None);
        // Only flag bits set, no address
        assert_eq!(unstuff_pointer::<Aligned>(0b101), None);
        assert_eq!(stuffed_flags(0b101), 0b101);
    }
}
