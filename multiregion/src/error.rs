use embedded_storage::nor_flash::NorFlashErrorKind;
use thiserror::Error;

use crate::lorawan::region::Region;

/// Errors raised by the flash-backed session store
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The store offset or image size does not meet the flash's
    /// read, write or erase granularity
    #[error("store location misaligned for this flash")]
    Misaligned,

    /// The store page does not fit in the flash
    #[error("store page beyond flash capacity")]
    OutOfBounds,

    /// Erase, program or read failed in the flash driver
    #[error("flash error: {0:?}")]
    Flash(NorFlashErrorKind),
}

/// Errors returned by the multi-region manager, generic over the MAC
/// stack's own error type
#[derive(Error, Debug, PartialEq)]
pub enum Error<E> {
    /// `init` has not run yet
    #[error("manager not initialized")]
    NotInitialized,

    /// No session is live, so there is nothing to save
    #[error("no joined session")]
    NotJoined,

    /// The region has no DevEUI in the device configuration
    #[error("no DevEUI provisioned for {0}")]
    NotProvisioned(Region),

    /// The region is recognized but not managed
    #[error("region {0} not supported")]
    UnsupportedRegion(Region),

    /// No populated slot holds a session for the region
    #[error("no session stored for {0}")]
    SlotMissing(Region),

    /// The stored record for the region failed its CRC check
    #[error("stored session for {0} is corrupt")]
    IntegrityFault(Region),

    /// Every slot is taken by the active session
    #[error("no free session slot")]
    NoSlot,

    /// No region is active
    #[error("no active region")]
    NoActiveRegion,

    /// A session key is not 16 bytes
    #[error("session key must be 16 bytes")]
    InvalidKey,

    /// DevAddr 0 and 0xFFFFFFFF mark empty slots
    #[error("invalid device address")]
    InvalidDevAddr,

    /// Latitude or longitude out of range or not finite
    #[error("invalid coordinates")]
    InvalidCoordinates,

    /// The MAC has an operation in flight
    #[error("MAC busy")]
    MacBusy,

    /// The join was cancelled through the event flags
    #[error("join cancelled")]
    JoinCancelled,

    /// The configured join deadline passed
    #[error("join timed out")]
    JoinTimeout,

    /// `poll_join` called without a join in progress
    #[error("no join in progress")]
    JoinNotStarted,

    /// The MAC stack rejected an operation
    #[error("MAC stack error: {0:?}")]
    Mac(E),

    /// Persisting the session store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<NorFlashErrorKind> for StoreError {
    fn from(kind: NorFlashErrorKind) -> Self {
        StoreError::Flash(kind)
    }
}
