//! Integer helpers the size-class mapping is defined in terms of.

/// `true` iff `x` is a nonzero power of two.
#[must_use]
pub(crate) const fn is_power_of_two(x: usize) -> bool {
    x != 0 && (x & (x - 1)) == 0
}

/// `floor(log2(x))`. Requires `x > 0`.
#[must_use]
pub(crate) const fn log2_floor(x: usize) -> usize {
    debug_assert!(x > 0);
    (usize::BITS - 1 - x.leading_zeros()) as usize
}

/// `ceil(log2(x))`. Requires `x > 0`; `log2_ceil(1) == 0`.
#[must_use]
pub(crate) const fn log2_ceil(x: usize) -> usize {
    debug_assert!(x > 0);
    if x <= 1 { 0 } else { log2_floor(x - 1) + 1 }
}

/// `2^power`. Requires `power < usize::BITS`.
#[must_use]
pub(crate) const fn pow2(power: usize) -> usize {
    1 << power
}
