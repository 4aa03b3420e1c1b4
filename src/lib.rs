#![deny(missing_docs)]

//! Core library for the pxtools gateway: LLM question answering, file-aware answering, and
//! SMTP relay behind a small HTTP surface.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// File routing and PDF rasterization for file-aware questions.
pub mod ingest;
/// Chat, file-store, and vision clients for the hosted model provider.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Outbound email composition and delivery.
pub mod mail;
/// Gateway service shared by the HTTP handlers.
pub mod service;
