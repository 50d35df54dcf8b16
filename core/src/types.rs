//! Identifiers and value objects shared by every part of the booking core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a `", stringify!($name), "` from a UUID")]
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of a platform user (student or teacher)
    UserId
);
uuid_id!(
    /// Identity of a teacher-published bookable slot
    SlotId
);
uuid_id!(
    /// Identity of a booking
    BookingId
);
uuid_id!(
    /// Identity of a session (meeting) attached to a booking
    SessionId
);
uuid_id!(
    /// Identity of a ledger transaction
    TransactionId
);
uuid_id!(
    /// Groups ledger transactions that belong to one business event
    TransactionGroupId
);
uuid_id!(
    /// Identity of a single ledger entry
    EntryId
);

// ============================================================================
// Credits
// ============================================================================

/// An amount of platform credits.
///
/// Credits are whole units. Balances are signed because system accounts are
/// mirror-signed (see [`crate::account::Account`]) and can read negative.
///
/// A single price or posting amount is capped at [`Credits::MAX_AMOUNT`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(i64);

impl Credits {
    /// Zero credits
    pub const ZERO: Self = Self(0);

    /// Largest amount a slot price or a single ledger entry may carry.
    pub const MAX_AMOUNT: Self = Self(1_000_000_000_000);

    /// Creates a credit amount
    #[must_use]
    pub const fn new(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns the raw amount
    #[must_use]
    pub const fn amount(&self) -> i64 {
        self.0
    }

    /// True when strictly greater than zero
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// True when `0 < self <= MAX_AMOUNT`
    #[must_use]
    pub const fn is_valid_amount(&self) -> bool {
        self.0 > 0 && self.0 <= Self::MAX_AMOUNT.0
    }

    /// `floor(self * percent / 100)`, never above `self` for `percent <= 100`.
    ///
    /// Computed in 128 bits; saturates for `percent > 100` on huge amounts.
    #[must_use]
    pub fn percent_floor(&self, percent: u8) -> Self {
        let scaled = (i128::from(self.0) * i128::from(percent)).div_euclid(100);
        Self(i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX }))
    }

    /// `self + rhs`, `None` on overflow
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} credits", self.0)
    }
}

impl Add for Credits {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Credits {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Credits {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl std::iter::Sum for Credits {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Role a user plays relative to a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The user paying for and attending the session
    Student,
    /// The user who published the slot and teaches the session
    Teacher,
}

impl Role {
    /// Lowercase wire/database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            other => Err(crate::Error::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Authenticated caller, resolved upstream by the identity collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Caller identity
    pub id: UserId,
    /// Caller role
    pub role: Role,
}

/// External user entity with its cached ledger balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identity
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Write-through copy of the user's latest ledger `balance_after`
    pub credit_balance: Credits,
}

impl User {
    /// Creates a user with an empty balance.
    #[must_use]
    pub const fn new(id: UserId, name: String) -> Self {
        Self {
            id,
            name,
            credit_balance: Credits::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_floor_rounds_down() {
        assert_eq!(Credits::new(100).percent_floor(50), Credits::new(50));
        assert_eq!(Credits::new(101).percent_floor(50), Credits::new(50));
        assert_eq!(Credits::new(99).percent_floor(100), Credits::new(99));
        assert_eq!(Credits::new(1).percent_floor(50), Credits::ZERO);
    }

    #[test]
    fn percent_floor_does_not_overflow_on_large_amounts() {
        let huge = Credits::new(i64::MAX);
        assert_eq!(huge.percent_floor(100), huge);
        assert_eq!(huge.percent_floor(50), Credits::new(i64::MAX / 2));
        assert_eq!(Credits::new(i64::MAX / 10).percent_floor(100), Credits::new(i64::MAX / 10));
    }

    #[test]
    fn amount_bounds() {
        assert!(Credits::new(1).is_valid_amount());
        assert!(Credits::MAX_AMOUNT.is_valid_amount());
        assert!(!Credits::ZERO.is_valid_amount());
        assert!(!Credits::new(Credits::MAX_AMOUNT.amount() + 1).is_valid_amount());
        assert_eq!(Credits::new(i64::MAX).checked_add(Credits::new(1)), None);
        assert_eq!(Credits::new(2).checked_add(Credits::new(3)), Some(Credits::new(5)));
    }

    #[test]
    fn ids_parse_from_display() {
        let id = BookingId::new();
        let parsed: BookingId = id.to_string().parse().unwrap_or_default();
        assert_eq!(parsed, id);
    }

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!("teacher".parse::<Role>().ok(), Some(Role::Teacher));
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn credits_sum() {
        let total: Credits = [Credits::new(3), Credits::new(4)].into_iter().sum();
        assert_eq!(total, Credits::new(7));
    }
}
