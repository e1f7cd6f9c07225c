//! Pipeline stages for math-to-SVG conversion.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the rendering backend can be swapped without
//! touching the markup handling around it.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ sanitize ──▶ naming ──▶ render ──▶ rewrite     (per document)
//!                                                              │
//!                                             all documents ──▶ manifest   (once)
//! ```
//!
//! 1. [`input`]    — discover documents, resolve the content root, path helpers
//! 2. [`extract`]  — find inline and display math containers and their spans
//! 3. [`sanitize`] — normalize the LaTeX (delimiters, entities, nesting repairs)
//! 4. [`naming`]   — content-addressed image filename
//! 5. [`render`]   — backend invocation with placeholder fallback; runs in
//!    `spawn_blocking` because the TeX backend spawns processes
//! 6. [`rewrite`]  — splice image references into the document
//! 7. [`manifest`] — register every referenced image in the package manifest;
//!    the only shared file, written by exactly one step after all documents

pub mod extract;
pub mod input;
pub mod manifest;
pub mod naming;
pub mod render;
pub mod rewrite;
pub mod sanitize;
