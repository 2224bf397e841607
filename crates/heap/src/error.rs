use snafu::{Location, Snafu};

use crate::{ALIGNMENT, FRAGMENT_SIZE_MIN};

/// Errors that can occur while carving a heap instance out of an arena.
///
/// Initialization either succeeds completely or leaves the arena untouched.
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub))]
pub enum InitError {
    /// The arena base is null or not [`ALIGNMENT`]-aligned.
    #[snafu(display("arena base {addr:#x} is null or not aligned to {ALIGNMENT} bytes"))]
    MisalignedBase {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The arena cannot hold the instance record plus one smallest block.
    #[snafu(display(
        "arena of {size} bytes cannot hold the instance record and a {FRAGMENT_SIZE_MIN}-byte block"
    ))]
    ArenaTooSmall {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
