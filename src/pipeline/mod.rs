//! Per-file transformation stages.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ llm ──▶ postprocess
//! (units)    (PNG/JPEG)  (model)  (cleanup)
//! ```
//!
//! 1. [`render`] turns a source into ordered units: page images for PDF,
//!    DOCX and image files, text chunks for plain-text files. pdfium and
//!    image decoding run in `spawn_blocking`. [`gdoc`] fetches Google Drive
//!    shortcuts as PDF exports first.
//! 2. [`encode`] downsamples and encodes each page image under the
//!    configured dimension and byte limits.
//! 3. [`llm`] drives the model call, validates the structured reply and
//!    retries with a repair hint when it does not parse.
//! 4. [`postprocess`] applies deterministic cleanup rules to the Markdown.
//!
//! [`retry`] holds the backoff policy shared by the model stage.

pub mod encode;
pub mod gdoc;
pub mod llm;
pub mod postprocess;
pub mod render;
pub mod retry;
