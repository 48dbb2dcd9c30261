//! CTT Código Postal API integration
//!
//! Resolves a Portuguese postal code to its municipality (`concelho`) and
//! district (`distrito`).
//!
//! API: https://www.cttcodigopostal.pt/api

pub mod dto;
mod adapter;
mod client;

pub use adapter::to_location;
pub use client::{CttClient, DEFAULT_BASE_URL};
