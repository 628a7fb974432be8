//! HomeLink client core: the embeddable, UI-free half of a chat client that
//! talks to a HomeLink proxy (an OpenAI-compatible endpoint behind a static
//! shared secret).
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the streaming decode loop, connectivity probing,
//!   conversation state, and persisted settings.
//! - [`api`] defines the wire payloads exchanged with the proxy.
//! - [`utils`] holds URL normalization shared by the request paths.
//!
//! There is no rendering surface here. A host application (terminal, GUI,
//! or web view) collects input, drains the [`core::chat_stream`] channel,
//! and watches the [`core::probe`] status receiver to drive its indicator.

pub mod api;
pub mod core;
pub mod utils;
