//! Pipeline stages for rebuilding a StreamDocs document.
//!
//! Each submodule implements exactly one step. The fetch side is written
//! against the [`fetch::PageSource`] and [`cache::PageCache`] traits and the
//! output side against the [`reconstruct`] builder traits, so every stage can
//! be tested without a network or a PDF writer.
//!
//! ## Data Flow
//!
//! ```text
//! cache ◀──▶ schedule ──▶ reconstruct ──▶ pdf ──▶ compress
//!              │ fetch      (builder calls) (lopdf) (gs, optional)
//!              ▼
//!          PageSource
//! ```
//!
//! 1. [`cache`]       — durable per-page store; existence is the resume signal
//! 2. [`fetch`]       — one image or one text payload per call, plus byte repair
//! 3. [`schedule`]    — bounded concurrent fan-out with retry; the only stage
//!    with network I/O
//! 4. [`font`]        — pick the overlay font
//! 5. [`reconstruct`] — turn page data into builder calls
//! 6. [`pdf`]         — `lopdf` builder; CPU-bound, run in `spawn_blocking`
//! 7. [`compress`]    — optional Ghostscript rewrite

pub mod cache;
pub mod compress;
pub mod fetch;
pub mod font;
pub mod pdf;
pub mod reconstruct;
pub mod schedule;
