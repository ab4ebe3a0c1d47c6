//! # cqf
//!
//! [![License: MIT](https://img.shields.io/badge/License-MIT-yellow.svg)](https://opensource.org/licenses/MIT)
//!
//! A counting quotient filter: an approximate-membership data structure that
//! stores `(key, value)` pairs together with a count of how many times each
//! was inserted, in a fraction of the space an exact map would need, at the
//! cost of a small, tunable false-positive rate.
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! cqf = "*"
//! ```
//!
//! ```
//! use cqf::config::{FilterConfig, HashMode};
//! use cqf::filter::{CountingQuotientFilter, Flags};
//!
//! let config = FilterConfig::new(1 << 10, 16, 0, HashMode::Invertible).unwrap();
//! let mut filter = CountingQuotientFilter::malloc(config).unwrap();
//! filter.insert(42, 0, 1, Flags::default()).unwrap();
//! assert_eq!(filter.count_key_value(42, 0, Flags::default()).unwrap(), 1);
//! ```
//!
//! ## References
//!
//!  - [Don't Thrash: How to Cache Your Hash on Flash](https://dl.acm.org/doi/10.14778/3055540.3055547)
//!  > Pandey, Prashant, Michael A. Bender, Rob Johnson, and Rob Patro. 2017. “Don’t Thrash: How to Cache Your Hash on Flash.” *Proc. VLDB Endow.* 10 (9). VLDB Endowment: 1048–59. doi:[10.14778/3055540.3055547](https://doi.org/10.14778/3055540.3055547).
//!  - [A General-Purpose Counting Filter: Making Every Bit Count](https://dl.acm.org/doi/10.1145/3035918.3035963)
//!  > Pandey, Prashant, Michael A. Bender, Rob Johnson, and Rob Patro. 2017. “A General-Purpose Counting Filter: Making Every Bit Count.” In *Proceedings of the 2017 ACM International Conference on Management of Data*, 775–87. SIGMOD ’17. New York, NY, USA: ACM. doi:[10.1145/3035918.3035963](https://doi.org/10.1145/3035918.3035963).

#![warn(missing_docs)]

extern crate byteorder;
extern crate log;
#[cfg(feature = "serde")]
extern crate serde_crate;
extern crate thiserror;

pub mod bitops;
pub mod block;
pub mod buffer;
pub mod config;
pub mod counter;
pub mod error;
pub mod filter;
pub mod hash;
pub mod iter;
pub mod kernel;
pub mod lock;
pub mod merge;
pub mod metadata;
pub mod slot_store;

pub use config::{FilterConfig, HashMode};
pub use error::{CqfError, Result};
pub use filter::{CountingQuotientFilter, Flags};
