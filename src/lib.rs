//! # Halal Assistant Telegram Bot
//!
//! A Telegram bot that answers questions about the halal status of products,
//! establishments and E-additives through a hosted assistant, reads product
//! labels from photos with OCR, tracks free-tier quotas and premium access in
//! SQLite, finds certified establishments near a shared location and gives
//! admins a small console for broadcasts and feedback review.

pub mod assistant;
pub mod bot;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod error;
pub mod establishments;
pub mod localization;
pub mod ocr;
pub mod ocr_config;
pub mod ocr_errors;
pub mod usage;
