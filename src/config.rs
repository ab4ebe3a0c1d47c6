//! Validated configuration for a counting quotient filter.
//!
//! A filter's shape (`key_bits`, `value_bits`, `r`, hash mode, seed,
//! auto-resize) is plain Rust state rather than something sourced from an
//! external config file or environment variable — the upstream library has
//! no such facility and the spec does not call for one. `FilterConfig` just
//! centralizes validation so constructors do not have to repeat it.

use crate::error::{CqfError, Result};

/// The three hashing strategies a filter can use.
///
/// See [`crate::hash`] for the actual mixing functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde_crate::Deserialize, serde_crate::Serialize),
    serde(crate = "serde_crate")
)]
pub enum HashMode {
    /// Apply a lossy mixing hash over the key bits. Iteration only yields
    /// hashes, never the original keys.
    Default,
    /// Apply a bijective mix over `key_bits` bits. Iteration can recover the
    /// original keys by inverting the mix.
    Invertible,
    /// The caller has already hashed the key; no further mixing is applied.
    None,
}

/// Validated, immutable configuration for a filter's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde_crate::Deserialize, serde_crate::Serialize),
    serde(crate = "serde_crate")
)]
pub struct FilterConfig {
    pub(crate) nslots: u64,
    pub(crate) key_bits: u8,
    pub(crate) value_bits: u8,
    pub(crate) r: u8,
    pub(crate) hash_mode: HashMode,
    pub(crate) seed: u32,
    pub(crate) auto_resize: bool,
}

impl FilterConfig {
    /// Validates and builds a configuration for `nslots` slots (must be a
    /// power of two), `key_bits` + `value_bits` bits of fingerprint input.
    ///
    /// `key_bits` must be at least `log2(nslots)`, and `key_bits + value_bits`
    /// must not exceed 64.
    pub fn new(
        nslots: u64,
        key_bits: u8,
        value_bits: u8,
        hash_mode: HashMode,
    ) -> Result<Self> {
        if nslots == 0 || !nslots.is_power_of_two() {
            return Err(CqfError::Invalid("nslots must be a power of two".into()));
        }
        let log2_nslots = nslots.trailing_zeros() as u8;
        if key_bits < log2_nslots {
            return Err(CqfError::Invalid(
                "key_bits must be at least log2(nslots)".into(),
            ));
        }
        let total_bits = key_bits as u32 + value_bits as u32;
        if total_bits > 64 {
            return Err(CqfError::Invalid(
                "key_bits + value_bits must not exceed 64".into(),
            ));
        }
        let r = (total_bits - log2_nslots as u32) as u8;
        if r == 0 {
            return Err(CqfError::Invalid(
                "key_bits + value_bits must exceed log2(nslots)".into(),
            ));
        }
        Ok(FilterConfig {
            nslots,
            key_bits,
            value_bits,
            r,
            hash_mode,
            seed: 0,
            auto_resize: false,
        })
    }

    /// Sets the hash seed used by `DEFAULT` and `INVERTIBLE` hash modes.
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// Enables or disables automatic resizing on `NO_SPACE`.
    pub fn with_auto_resize(mut self, enabled: bool) -> Self {
        self.auto_resize = enabled;
        self
    }

    /// Number of slots.
    pub fn nslots(&self) -> u64 {
        self.nslots
    }

    /// Number of blocks (`nslots / 64`).
    pub fn num_blocks(&self) -> u64 {
        self.nslots / crate::block::SLOTS_PER_BLOCK as u64
    }

    /// Number of key bits.
    pub fn key_bits(&self) -> u8 {
        self.key_bits
    }

    /// Number of value bits.
    pub fn value_bits(&self) -> u8 {
        self.value_bits
    }

    /// Number of remainder bits per slot.
    pub fn r(&self) -> u8 {
        self.r
    }

    /// The configured hash mode.
    pub fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    /// The configured hash seed.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Whether auto-resize is enabled.
    pub fn auto_resize(&self) -> bool {
        self.auto_resize
    }
}
