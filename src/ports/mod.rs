//! Peripheral port drivers
//!
//! Thin stateful wrappers that bind one protocol-visible port index to a
//! backend controller. The backends are trait seams: real chip drivers plug
//! in behind them, and fake backends with observable state back the mock
//! deployment and the tests.

pub mod digital;
pub mod pwm;
pub mod servo;
pub mod uart;
