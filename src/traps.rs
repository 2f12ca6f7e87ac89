/// The predefined runtime exception types.
///
/// A trapping instruction raises an exception of the corresponding kind; the
/// same kinds are raised by the host-facing runtime APIs (argument
/// marshalling, instantiation, intrinsic stubs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, onlyerror::Error)]
pub enum Trap {
    /// An out-of-bounds linear memory access.
    #[error("out of bounds memory access")]
    MemoryAddressOutOfBounds,
    /// An out-of-bounds table access.
    #[error("out of bounds table access")]
    TableIndexOutOfBounds,
    /// The call stack was exhausted.
    #[error("call stack exhausted")]
    StackOverflow,
    /// An integer division by zero, or an overflowing integer division.
    #[error("integer divide by zero or overflow")]
    IntegerDivideByZeroOrOverflow,
    /// An invalid floating point operation (e.g. out-of-range conversion).
    #[error("invalid floating point operation")]
    InvalidFloatOperation,
    /// Invocation arguments did not match the function's signature.
    #[error("invoke signature mismatch")]
    InvokeSignatureMismatch,
    /// `unreachable` was executed.
    #[error("reached unreachable code")]
    ReachedUnreachable,
    /// An indirect call's runtime signature check failed.
    #[error("indirect call signature mismatch")]
    IndirectCallSignatureMismatch,
    /// An indirect call through an uninitialized table element.
    #[error("uninitialized table element")]
    UninitializedTableElement,
    /// The guest called abort.
    #[error("abort called")]
    CalledAbort,
    /// An intrinsic with no implementation was called.
    #[error("called unimplemented intrinsic")]
    CalledUnimplementedIntrinsic,
    /// The runtime could not allocate memory.
    #[error("out of memory")]
    OutOfMemory,
    /// An active data or element segment was out of bounds at instantiation.
    #[error("invalid segment offset")]
    InvalidSegmentOffset,
    /// An atomic memory access was not naturally aligned.
    #[error("misaligned atomic memory access")]
    MisalignedAtomicMemoryAccess,
    /// A runtime API was passed an invalid argument.
    #[error("invalid argument")]
    InvalidArgument,
}

impl From<Trap> for u8 {
    fn from(value: Trap) -> Self {
        match value {
            Trap::MemoryAddressOutOfBounds => 0,
            Trap::TableIndexOutOfBounds => 1,
            Trap::StackOverflow => 2,
            Trap::IntegerDivideByZeroOrOverflow => 3,
            Trap::InvalidFloatOperation => 4,
            Trap::InvokeSignatureMismatch => 5,
            Trap::ReachedUnreachable => 6,
            Trap::IndirectCallSignatureMismatch => 7,
            Trap::UninitializedTableElement => 8,
            Trap::CalledAbort => 9,
            Trap::CalledUnimplementedIntrinsic => 10,
            Trap::OutOfMemory => 11,
            Trap::InvalidSegmentOffset => 12,
            Trap::MisalignedAtomicMemoryAccess => 13,
            Trap::InvalidArgument => 14,
        }
    }
}

impl TryFrom<u8> for Trap {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::MemoryAddressOutOfBounds),
            1 => Ok(Self::TableIndexOutOfBounds),
            2 => Ok(Self::StackOverflow),
            3 => Ok(Self::IntegerDivideByZeroOrOverflow),
            4 => Ok(Self::InvalidFloatOperation),
            5 => Ok(Self::InvokeSignatureMismatch),
            6 => Ok(Self::ReachedUnreachable),
            7 => Ok(Self::IndirectCallSignatureMismatch),
            8 => Ok(Self::UninitializedTableElement),
            9 => Ok(Self::CalledAbort),
            10 => Ok(Self::CalledUnimplementedIntrinsic),
            11 => Ok(Self::OutOfMemory),
            12 => Ok(Self::InvalidSegmentOffset),
            13 => Ok(Self::MisalignedAtomicMemoryAccess),
            14 => Ok(Self::InvalidArgument),
            c => {
                tracing::warn!("unknown trap code {c}");
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_code_round_trip() {
        for code in 0..15u8 {
            let trap = Trap::try_from(code).unwrap();
            assert_eq!(u8::from(trap), code);
        }
        assert!(Trap::try_from(200).is_err());
    }
}
