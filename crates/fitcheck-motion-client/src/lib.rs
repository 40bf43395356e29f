//! Client for the motion-tracking service.
//!
//! The service tracks body landmarks frame by frame and counts repetitions.
//! This crate exposes the [`MotionCounter`] contract the analysis pipeline
//! depends on, and [`MotionServiceClient`], its HTTP implementation.

pub mod client;
pub mod counter;
pub mod error;
pub mod types;

pub use client::{MotionClientConfig, MotionServiceClient};
pub use counter::MotionCounter;
pub use error::{MotionClientResult, MotionError};
pub use types::CountResponse;
