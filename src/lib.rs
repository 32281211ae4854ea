//! Codec and controller for the serial protocol spoken by Haier air conditioners.
//!
//! [`haier`] turns raw frames into [`haier::StatusFrame`]s and command templates into
//! ready-to-send bytes. [`controller::Controller`] keeps a [`haier::ThermostatState`]
//! in sync with the unit over any [`transport::Transport`].

pub mod controller;
pub mod haier;
pub mod transport;

pub use controller::{
    ControlError, Controller, ControllerConfig, StatePublisher, DEFAULT_SETTLE_DELAY,
};
pub use haier::{ClimateMode, Mode, Revision, ThermostatState};
pub use transport::{SerialLink, Transport, TransportError};
