//! Sleep-survivable containers.
//!
//! These plain-old-data structs live in the RTC slow-memory region on the
//! ESP32, which keeps its contents across deep sleep but comes up as
//! garbage after a cold boot or brown-out.  Nothing here assumes the memory
//! was initialised: every container carries a CRC32 over its payload and is
//! only trusted when that CRC checks out.
//!
//! All fields are integers or byte arrays, so any bit pattern is a legal
//! (if invalid) value.  That is what makes reading uninitialised RTC memory
//! sound.
//!
//! The bearer token and its expiry are the only state the connectivity core
//! keeps here.  A cold boot therefore forces a full re-authentication, while
//! a sleep-wake cycle can reuse the session.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use log::warn;

// ── Constants ────────────────────────────────────────────────

/// Capacity of the survivable bearer-token buffer (bytes).
pub const TOKEN_CAPACITY: usize = 2048;

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurvivableError {
    /// Payload does not fit the fixed buffer.
    TooLarge,
    /// Payload is empty (an empty container is indistinguishable from unset).
    Empty,
}

impl fmt::Display for SurvivableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge => write!(f, "payload exceeds survivable buffer"),
            Self::Empty => write!(f, "empty payload"),
        }
    }
}

// ── CRC ──────────────────────────────────────────────────────

fn checksum(length: u32, bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(bytes);
    hasher.finalize()
}

// ── SurvivableBlob ───────────────────────────────────────────

/// Fixed-capacity byte buffer with a CRC over `(length, bytes)`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SurvivableBlob<const N: usize> {
    pub crc: u32,
    pub length: u32,
    pub data: [u8; N],
}

impl<const N: usize> SurvivableBlob<N> {
    pub const fn zeroed() -> Self {
        Self {
            crc: 0,
            length: 0,
            data: [0u8; N],
        }
    }

    /// Store `bytes` and seal them with a fresh CRC.
    pub fn set(&mut self, bytes: &[u8]) -> Result<(), SurvivableError> {
        if bytes.is_empty() {
            return Err(SurvivableError::Empty);
        }
        if bytes.len() > N {
            return Err(SurvivableError::TooLarge);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.data[bytes.len()..].fill(0);
        self.length = bytes.len() as u32;
        self.crc = checksum(self.length, bytes);
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::zeroed();
    }

    /// `length` in range, non-zero, and the CRC matches.
    pub fn is_valid(&self) -> bool {
        let len = self.length as usize;
        len > 0 && len <= N && self.crc == checksum(self.length, &self.data[..len])
    }

    pub fn get(&self) -> Option<&[u8]> {
        self.is_valid().then(|| &self.data[..self.length as usize])
    }

    pub fn as_str(&self) -> Option<&str> {
        self.get().and_then(|b| core::str::from_utf8(b).ok())
    }
}

impl<const N: usize> Default for SurvivableBlob<N> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const N: usize> fmt::Debug for SurvivableBlob<N> {
    // Never print payload bytes: the blob usually holds a credential.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurvivableBlob")
            .field("length", &self.length)
            .field("valid", &self.is_valid())
            .finish()
    }
}

// ── SurvivableValue ──────────────────────────────────────────

/// Scalars that can round-trip through a raw `u64` cell.
pub trait Scalar: Copy {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            fn to_bits(self) -> u64 { self as u64 }
            fn from_bits(bits: u64) -> Self { bits as $t }
        }
    )*};
}

impl_scalar!(u8, u16, u32, u64, i32, i64);

impl Scalar for bool {
    fn to_bits(self) -> u64 {
        u64::from(self)
    }
    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

/// A single scalar with a CRC over its raw bits.
///
/// The value is stored as `u64` rather than `T` so that garbage memory never
/// materialises an invalid `T` (e.g. a `bool` that is neither 0 nor 1).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SurvivableValue<T: Scalar> {
    pub crc: u32,
    pub bits: u64,
    _marker: core::marker::PhantomData<T>,
}

impl<T: Scalar> SurvivableValue<T> {
    pub const fn zeroed() -> Self {
        Self {
            crc: 0,
            bits: 0,
            _marker: core::marker::PhantomData,
        }
    }

    pub fn set(&mut self, value: T) {
        self.bits = value.to_bits();
        self.crc = checksum(8, &self.bits.to_le_bytes());
    }

    pub fn clear(&mut self) {
        *self = Self::zeroed();
    }

    pub fn is_valid(&self) -> bool {
        self.crc == checksum(8, &self.bits.to_le_bytes())
    }

    pub fn get(&self) -> Option<T> {
        self.is_valid().then(|| T::from_bits(self.bits))
    }
}

impl<T: Scalar> Default for SurvivableValue<T> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<T: Scalar + fmt::Debug> fmt::Debug for SurvivableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SurvivableValue").field(&self.get()).finish()
    }
}

/// Wall-clock timestamp in epoch milliseconds.
pub type SurvivableTimestamp = SurvivableValue<i64>;

// ── SurvivableToken ──────────────────────────────────────────

/// Bearer token plus optional expiry.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SurvivableToken {
    pub token: SurvivableBlob<TOKEN_CAPACITY>,
    pub expiry: SurvivableTimestamp,
}

impl SurvivableToken {
    pub const fn zeroed() -> Self {
        Self {
            token: SurvivableBlob::zeroed(),
            expiry: SurvivableTimestamp::zeroed(),
        }
    }

    /// Store a token.  `expires_at_ms = None` leaves it non-expiring.
    pub fn set(&mut self, token: &str, expires_at_ms: Option<i64>) -> Result<(), SurvivableError> {
        self.token.set(token.as_bytes())?;
        match expires_at_ms {
            Some(at) => self.expiry.set(at),
            None => self.expiry.clear(),
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.token.clear();
        self.expiry.clear();
    }

    /// CRC-valid, and either no expiry was recorded or `now` is before it.
    ///
    /// A zeroed expiry cell fails its CRC, which is what "no expiry" looks
    /// like after `clear()`.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        if !self.token.is_valid() {
            return false;
        }
        match self.expiry.get() {
            Some(at) => now_ms < at,
            None => true,
        }
    }

    /// True when the token is unusable or within `buffer` of its expiry.
    /// Non-expiring tokens never need a refresh.
    pub fn needs_refresh(&self, buffer: Duration, now_ms: i64) -> bool {
        if !self.token.is_valid() {
            return true;
        }
        match self.expiry.get() {
            Some(at) => now_ms >= at.saturating_sub(buffer.as_millis() as i64),
            None => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.token.as_str()
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expiry.get()
    }
}

// ── Process-wide token region ────────────────────────────────

struct TokenRegion(UnsafeCell<SurvivableToken>);

// SAFETY: the cell is only reachable through the single `TokenSlot`
// handed out by `claim_token_slot`.
unsafe impl Sync for TokenRegion {}

#[cfg_attr(target_os = "espidf", unsafe(link_section = ".rtc_noinit"))]
static TOKEN_REGION: TokenRegion = TokenRegion(UnsafeCell::new(SurvivableToken::zeroed()));

// Lives in ordinary RAM so it resets on every boot, including sleep-wake.
static TOKEN_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Exclusive handle to a survivable token.
///
/// Either the process-wide RTC region or a detached heap copy (host
/// simulation and tests).
pub struct TokenSlot(SlotInner);

enum SlotInner {
    Region(&'static mut SurvivableToken),
    Detached(Box<SurvivableToken>),
}

impl TokenSlot {
    /// A slot backed by ordinary heap memory.
    pub fn detached(token: SurvivableToken) -> Self {
        Self(SlotInner::Detached(Box::new(token)))
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> SurvivableToken {
        **self
    }
}

impl Deref for TokenSlot {
    type Target = SurvivableToken;

    fn deref(&self) -> &SurvivableToken {
        match &self.0 {
            SlotInner::Region(t) => t,
            SlotInner::Detached(t) => t,
        }
    }
}

impl DerefMut for TokenSlot {
    fn deref_mut(&mut self) -> &mut SurvivableToken {
        match &mut self.0 {
            SlotInner::Region(t) => t,
            SlotInner::Detached(t) => t,
        }
    }
}

/// Claim the process-wide survivable token region.
///
/// Returns `None` if it has already been claimed this boot.
pub fn claim_token_slot() -> Option<TokenSlot> {
    if TOKEN_CLAIMED.swap(true, Ordering::AcqRel) {
        warn!("Survivable token region already claimed");
        return None;
    }
    // SAFETY: the swap above guarantees this is the only live reference.
    let token = unsafe { &mut *TOKEN_REGION.0.get() };
    Some(TokenSlot(SlotInner::Region(token)))
}

// ── Tests ────────────────────────────────────────────────────
