//! Pipeline stages for locating and cropping figures.
//!
//! Each submodule implements one step, so each can be tested on its own and
//! the oracle can be swapped without touching the pixel math.
//!
//! ## Data Flow
//!
//! ```text
//! intent ──▶ pages ──▶ detect ──▶ geometry ──▶ review ──▶ crop
//! (question) (page set) (VLM/page) (gate+fix)  (rank+VLM) (PNG)
//! ```
//!
//! 1. [`intent`]  : parse the question into a reference intent; pure
//! 2. [`pages`]   : choose which pages to search
//! 3. [`detect`]  : one oracle call per page under a deadline; failures
//!    become empty pages, never errors
//! 4. [`geometry`]: score candidates against the quality gate, then clamp
//!    and pad surviving boxes
//! 5. [`review`]  : merge pages, crop the top candidates and let the oracle
//!    pick one
//! 6. [`crop`]    : normalized box to pixel rectangle to PNG artifact
//!
//! [`response`] parses the oracle's free-text replies, [`encode`] and
//! [`llm`] talk to the VLM.

pub mod crop;
pub mod detect;
pub mod encode;
pub mod geometry;
pub mod intent;
pub mod llm;
pub mod pages;
pub mod response;
pub mod review;
