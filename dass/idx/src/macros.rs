/// Make a `struct Name(u32)` newtype usable as a key of
/// [IndexedMap](crate::maps::IndexedMap) and
/// [SecondaryMap](crate::maps::SecondaryMap).
///
/// Keys are dense positions, so the arenas of a single function never come
/// close to `u32::MAX` entries.
#[macro_export]
macro_rules! impl_index {
    ($name: ident) => {
        impl $crate::IndexRef for $name {
            #[inline]
            fn index(&self) -> usize {
                self.0 as usize
            }

            #[inline]
            fn new(input: usize) -> Self {
                debug_assert!(input <= u32::MAX as usize);
                $name(input as u32)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<usize> for $name {
            fn from(position: usize) -> Self {
                <$name as $crate::IndexRef>::new(position)
            }
        }
    };
}
