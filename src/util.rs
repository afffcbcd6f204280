/// Serial Number Arithmetic (RFC 1982)
///
/// TSNs and stream sequence numbers wrap; every ordering comparison in this
/// crate goes through these helpers rather than `<`/`>`.
#[inline]
pub(crate) fn sna32lt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && i2 - i1 < 1 << 31) || (i1 > i2 && i1 - i2 > 1 << 31)
}

#[inline]
pub(crate) fn sna32lte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32lt(i1, i2)
}

#[inline]
pub(crate) fn sna32gt(i1: u32, i2: u32) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 31) || (i1 > i2 && (i1 - i2) <= 1 << 31)
}

#[inline]
pub(crate) fn sna32gte(i1: u32, i2: u32) -> bool {
    i1 == i2 || sna32gt(i1, i2)
}

#[inline]
pub(crate) fn sna16lt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && (i2 - i1) < 1 << 15) || (i1 > i2 && (i1 - i2) > 1 << 15)
}

#[inline]
pub(crate) fn sna16gt(i1: u16, i2: u16) -> bool {
    (i1 < i2 && (i2 - i1) >= 1 << 15) || (i1 > i2 && (i1 - i2) <= 1 << 15)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serial_number_arithmetic_32bit() {
        assert!(sna32lt(0, 1), "0 < 1");
        assert!(sna32lt(u32::MAX, 0), "MAX < 0 across the wrap");
        assert!(sna32gt(0, u32::MAX), "0 > MAX across the wrap");
        assert!(
            sna32lt(0x7fff_fffe, 0x7fff_ffff),
            "adjacent below the midpoint"
        );
        assert!(
            !sna32lt(0, 1 << 31),
            "exactly half the space away is not less"
        );
        assert!(sna32gt(0, 1 << 31), "exactly half the space away compares greater");
        assert!(sna32lte(42, 42), "equal is lte");
        assert!(sna32gte(42, 42), "equal is gte");
        assert!(!sna32lt(42, 42), "equal is not lt");
    }

    #[test]
    fn test_serial_number_arithmetic_16bit() {
        assert!(sna16lt(0, 1), "0 < 1");
        assert!(sna16lt(u16::MAX, 0), "MAX < 0 across the wrap");
        assert!(sna16gt(0, u16::MAX), "0 > MAX across the wrap");
        assert!(!sna16lt(0, 1 << 15), "exactly half the space away is not less");
        assert!(sna16gt(0, 1 << 15), "exactly half the space away compares greater");
    }
}
