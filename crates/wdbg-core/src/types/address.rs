//! Debuggee address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Address in the debuggee's virtual address space
///
/// Start addresses, trap addresses, module bases and faulting addresses all
/// travel through the core as `Address` so they cannot be mixed up with
/// sizes, exit codes or handle values.
///
/// ```rust
/// use wdbg_core::types::Address;
///
/// let start = Address::from(0x401000);
/// assert_eq!((start + 1).value(), 0x401001);
/// assert_eq!(start.to_string(), "0x401000");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address, used by the OS for "no start routine" / "no name".
    pub const ZERO: Self = Address(0);

    /// Create an address in const contexts.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Raw value to hand to OS calls.
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// `None` for the null address, `Some(self)` otherwise.
    ///
    /// The OS reports "unknown start routine" and "no image name" as null
    /// pointers; this turns them into options at the decoding boundary.
    pub const fn non_null(self) -> Option<Self>
    {
        if self.0 == 0 {
            None
        } else {
            Some(self)
        }
    }

    /// Subtract an offset, returning `None` on underflow.
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Add an offset, saturating at the top of the address space.
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_display_is_compact_hex()
    {
        assert_eq!(Address::ZERO.to_string(), "0x0");
        assert_eq!(Address::from(0x7ffe_0000).to_string(), "0x7ffe0000");
    }

    #[test]
    fn test_non_null()
    {
        assert_eq!(Address::ZERO.non_null(), None);
        assert_eq!(Address::from(0x10).non_null(), Some(Address::from(0x10)));
    }

    #[test]
    fn test_checked_sub_underflow()
    {
        assert_eq!(Address::from(1).checked_sub(1), Some(Address::ZERO));
        assert_eq!(Address::ZERO.checked_sub(1), None);
    }
}
