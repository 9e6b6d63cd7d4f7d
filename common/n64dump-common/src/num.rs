use std::ops::RangeInclusive;

pub trait GetBit {
    #[must_use]
    fn bit(self, i: u8) -> bool;

    #[must_use]
    fn bits(self, range: RangeInclusive<u8>) -> Self;
}

macro_rules! impl_get_bit {
    ($t:ty) => {
        impl GetBit for $t {
            #[inline]
            fn bit(self, i: u8) -> bool {
                debug_assert!(i < (<$t>::BITS as u8));
                self & (1 << i) != 0
            }

            #[inline]
            fn bits(self, range: RangeInclusive<u8>) -> Self {
                let start = *range.start();
                let end = *range.end();
                debug_assert!(end < (<$t>::BITS as u8));

                (self >> start) & ((1 << (end - start + 1)) - 1)
            }
        }
    };
}

impl_get_bit!(u8);
impl_get_bit!(u16);
impl_get_bit!(u32);

pub trait U16Ext {
    fn lsb(self) -> u8;

    fn msb(self) -> u8;

    /// Big-endian byte pair, most significant byte first.
    fn to_be_pair(self) -> [u8; 2];
}

impl U16Ext for u16 {
    #[inline(always)]
    fn lsb(self) -> u8 {
        self as u8
    }

    #[inline(always)]
    fn msb(self) -> u8 {
        (self >> 8) as u8
    }

    #[inline(always)]
    fn to_be_pair(self) -> [u8; 2] {
        [self.msb(), self.lsb()]
    }
}

pub trait U32Ext {
    fn high_word(self) -> u16;

    fn low_word(self) -> u16;
}

impl U32Ext for u32 {
    #[inline(always)]
    fn high_word(self) -> u16 {
        (self >> 16) as u16
    }

    #[inline(always)]
    fn low_word(self) -> u16 {
        self as u16
    }
}
