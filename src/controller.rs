use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::haier::frame::command_temperature;
use crate::haier::{
    decode, decode_strict, encode, is_valid_set_point, ClimateMode, FrameError, FrameLayout,
    PayloadUpdate, Revision, ThermostatState,
};
use crate::transport::{Transport, TransportError};

/// Pause between powering the unit on and sending the mode command.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub revision: Revision,

    pub settle_delay_ms: u64,

    // Overrides the revision's checksum policy when set
    pub strict_checksum: Option<bool>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            revision: Revision::B,
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            strict_checksum: None,
        }
    }
}

impl ControllerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("target temperature {0}C is outside 16..=30")]
    InvalidArgument(i16),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Receives the thermostat state every time it changes.
pub trait StatePublisher {
    fn publish(&mut self, state: &ThermostatState);
}

impl<F: FnMut(&ThermostatState)> StatePublisher for F {
    fn publish(&mut self, state: &ThermostatState) {
        self(state)
    }
}

/// Keeps the last known thermostat state in sync with the unit.
///
/// The controller is driven entirely from the outside: a timer calls
/// [`Controller::on_poll_tick`], the receive path calls
/// [`Controller::on_status_received`] (or [`Controller::on_data_available`] to read
/// from the transport), and the UI calls the `on_set_*` methods. Requests are
/// fire-and-forget and the state is updated optimistically; the next status frame
/// confirms or corrects it.
pub struct Controller<T: Transport, P: StatePublisher> {
    transport: T,
    publisher: P,
    layout: &'static FrameLayout,
    settle_delay: Duration,
    strict_checksum: bool,
    state: ThermostatState,
}

impl<T: Transport, P: StatePublisher> Controller<T, P> {
    pub fn new(config: &ControllerConfig, transport: T, publisher: P) -> Self {
        let layout = config.revision.layout();
        Self {
            transport,
            publisher,
            layout,
            settle_delay: config.settle_delay(),
            strict_checksum: config.strict_checksum.unwrap_or(layout.strict_checksum),
            state: ThermostatState::default(),
        }
    }

    pub fn state(&self) -> &ThermostatState {
        &self.state
    }

    pub fn layout(&self) -> &'static FrameLayout {
        self.layout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Asks the unit for a status frame. The state is only updated once the reply is decoded.
    pub fn on_poll_tick(&mut self) -> Result<(), ControlError> {
        let poll = self.layout.poll;
        self.send("poll", poll)
    }

    /// Reads one frame from the transport and applies it.
    pub fn on_data_available(&mut self) -> Result<(), ControlError> {
        let frame = self.transport.recv()?;
        self.on_status_received(&frame)
    }

    /// Applies a status frame. On any error the previous state is kept and nothing is published.
    pub fn on_status_received(&mut self, raw: &[u8]) -> Result<(), ControlError> {
        let decoded = if self.strict_checksum {
            decode_strict(self.layout, raw)
        } else {
            decode(self.layout, raw)
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "discarding status frame");
                return Err(e.into());
            }
        };

        self.state = ThermostatState::from(&frame);
        debug!(state = ?self.state, checksum_valid = frame.checksum_valid, "status updated");
        self.publish();
        Ok(())
    }

    pub fn on_set_mode(&mut self, requested: ClimateMode) -> Result<(), ControlError> {
        let layout = self.layout;

        let mode = match requested.mode() {
            Some(mode) => mode,
            None => {
                let command = encode(
                    layout,
                    &layout.power,
                    &PayloadUpdate {
                        power: Some(false),
                        ..Default::default()
                    },
                )?;
                self.send("power off", &command)?;

                self.state.power_on = false;
                self.publish();
                return Ok(());
            }
        };

        // Built up front so an unsupported mode fails before anything is sent
        let target = Some(self.state.target_temperature_c).filter(|&t| is_valid_set_point(t));
        let set_point = encode(
            layout,
            &layout.set_point,
            &PayloadUpdate {
                target_temperature_c: target,
                mode: Some(mode),
                ..Default::default()
            },
        )?;

        if !self.state.power_on {
            let power_on = encode(
                layout,
                &layout.power,
                &PayloadUpdate {
                    power: Some(true),
                    ..Default::default()
                },
            )?;
            self.send("power on", &power_on)?;

            if layout.settle_after_power_on {
                debug!(delay = ?self.settle_delay, "waiting for the unit to settle");
                self.transport.pause(self.settle_delay);
            }
        }

        self.send("set point", &set_point)?;

        self.state.mode = mode;
        self.state.power_on = true;
        // Without a known set point the template's temperature went out
        if let Some(sent) = command_temperature(&layout.set_point, &set_point) {
            self.state.target_temperature_c = sent;
        }
        info!(mode = %requested, "mode set");
        self.publish();
        Ok(())
    }

    pub fn on_set_target_temperature(&mut self, value_c: i16) -> Result<(), ControlError> {
        if !is_valid_set_point(value_c) {
            warn!(value_c, "rejecting target temperature");
            return Err(ControlError::InvalidArgument(value_c));
        }

        let layout = self.layout;
        // Keep the unit in its current mode when the revision can express it
        let mode = layout
            .mode_code(self.state.mode)
            .map(|_| self.state.mode);

        let command = encode(
            layout,
            &layout.set_point,
            &PayloadUpdate {
                target_temperature_c: Some(value_c),
                mode,
                ..Default::default()
            },
        )?;
        self.send("set point", &command)?;

        self.state.target_temperature_c = value_c;
        info!(value_c, "target temperature set");
        self.publish();
        Ok(())
    }

    fn send(&mut self, what: &str, frame: &[u8]) -> Result<(), ControlError> {
        debug!(command = what, frame = %hex::encode(frame), "sending");
        self.transport.send(frame)?;
        Ok(())
    }

    fn publish(&mut self) {
        self.publisher.publish(&self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haier::layout::{REVISION_A, REVISION_B};
    use crate::haier::test_data::{STATUS_A, STATUS_B};
    use crate::haier::{frame::seal, Mode};
    use bytes::Bytes;
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Sent(Vec<u8>),
        Paused(Duration),
    }

    /// Records everything the controller does to the link, in order.
    #[derive(Debug, Default)]
    struct MockTransport {
        events: Vec<Event>,
        inbound: VecDeque<Vec<u8>>,
    }

    impl MockTransport {
        fn sent(&self) -> Vec<&[u8]> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Sent(frame) => Some(frame.as_slice()),
                    Event::Paused(_) => None,
                })
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.events.push(Event::Sent(frame.to_vec()));
            Ok(())
        }

        fn recv(&mut self) -> Result<Bytes, TransportError> {
            self.inbound
                .pop_front()
                .map(Bytes::from)
                .ok_or(TransportError::Eof)
        }

        fn pause(&mut self, duration: Duration) {
            self.events.push(Event::Paused(duration));
        }
    }

    type Published = Rc<RefCell<Vec<ThermostatState>>>;

    fn controller(
        config: ControllerConfig,
    ) -> (
        Controller<MockTransport, impl FnMut(&ThermostatState)>,
        Published,
    ) {
        let published = Published::default();
        let sink = published.clone();
        let publisher = move |s: &ThermostatState| sink.borrow_mut().push(*s);
        let controller = Controller::new(&config, MockTransport::default(), publisher);
        (controller, published)
    }

    fn revision(revision: Revision) -> ControllerConfig {
        ControllerConfig {
            revision,
            ..Default::default()
        }
    }

    #[test]
    fn test_poll_tick_sends_poll_only() {
        let (mut c, published) = controller(ControllerConfig::default());
        c.on_poll_tick().unwrap();

        assert_eq!(c.transport().sent(), vec![REVISION_B.poll]);
        assert!(published.borrow().is_empty());
        assert_eq!(c.state(), &ThermostatState::default());
    }

    #[test]
    fn test_status_updates_state() {
        let (mut c, published) = controller(ControllerConfig::default());
        c.on_status_received(&STATUS_B).unwrap();

        let expected = ThermostatState {
            power_on: true,
            mode: Mode::Cool,
            current_temperature_c: 27,
            target_temperature_c: 24,
        };
        assert_eq!(c.state(), &expected);
        assert_eq!(*published.borrow(), vec![expected]);
        assert_eq!(c.state().climate_mode(), ClimateMode::Cool);
    }

    #[test]
    fn test_rejected_status_keeps_state() {
        let (mut c, published) = controller(ControllerConfig::default());
        c.on_status_received(&STATUS_B).unwrap();
        let before = *c.state();

        let mut hot = STATUS_B;
        hot[21] = 35;
        seal(&REVISION_B, &mut hot).unwrap();
        assert!(matches!(
            c.on_status_received(&hot),
            Err(ControlError::Frame(FrameError::OutOfRange { value: 51, .. }))
        ));

        let mut unsynced = STATUS_B;
        unsynced[0] = 0x00;
        assert!(matches!(
            c.on_status_received(&unsynced),
            Err(ControlError::Frame(FrameError::Framing { .. }))
        ));

        assert_eq!(c.state(), &before);
        assert_eq!(published.borrow().len(), 1);
    }

    #[test]
    fn test_bad_checksum_policy() {
        // Revision A never applies a frame with a bad checksum
        let (mut c, published) = controller(revision(Revision::A));
        let mut bad = STATUS_A;
        bad[46] ^= 0xFF;
        assert!(matches!(
            c.on_status_received(&bad),
            Err(ControlError::Frame(FrameError::ChecksumMismatch { .. }))
        ));
        assert_eq!(c.state(), &ThermostatState::default());
        assert!(published.borrow().is_empty());

        c.on_status_received(&STATUS_A).unwrap();
        assert_eq!(c.state().mode, Mode::Heat);

        // Revision B flags it and keeps going
        let (mut c, published) = controller(ControllerConfig::default());
        let mut bad = STATUS_B;
        bad[22] ^= 0xFF;
        c.on_status_received(&bad).unwrap();
        assert_eq!(c.state().target_temperature_c, 24);
        assert_eq!(published.borrow().len(), 1);

        // Unless configured otherwise
        let (mut c, _) = controller(ControllerConfig {
            strict_checksum: Some(true),
            ..Default::default()
        });
        assert!(c.on_status_received(&bad).is_err());
    }

    #[test]
    fn test_set_mode_powers_on_first() {
        let (mut c, published) = controller(ControllerConfig::default());
        c.on_set_mode(ClimateMode::Cool).unwrap();

        assert_eq!(
            c.transport().events,
            vec![
                Event::Sent(REVISION_B.power.bytes.to_vec()),
                Event::Paused(DEFAULT_SETTLE_DELAY),
                Event::Sent(REVISION_B.set_point.bytes.to_vec()),
            ]
        );
        assert!(c.state().power_on);
        assert_eq!(c.state().mode, Mode::Cool);
        assert_eq!(published.borrow().len(), 1);

        // The template's 25C went out, so that is what gets published
        assert_eq!(c.state().target_temperature_c, 25);
        assert_eq!(published.borrow()[0].target_temperature_c, 25);
    }

    #[test]
    fn test_set_mode_when_on_sends_once() {
        let (mut c, published) = controller(ControllerConfig::default());
        c.on_status_received(&STATUS_B).unwrap();
        c.on_set_mode(ClimateMode::Heat).unwrap();

        let sent = c.transport().sent();
        assert_eq!(sent.len(), 1);
        let frame = sent[0];
        assert_eq!(frame.len(), REVISION_B.set_point.bytes.len());
        assert_eq!(frame[13], 10);
        // Current set point is carried along
        assert_eq!(frame[12], 24 - 16);

        assert_eq!(c.state().climate_mode(), ClimateMode::Heat);
        assert_eq!(published.borrow().len(), 2);
    }

    #[test]
    fn test_set_mode_off() {
        let (mut c, _) = controller(ControllerConfig::default());
        c.on_status_received(&STATUS_B).unwrap();
        c.on_set_mode(ClimateMode::Off).unwrap();

        let sent = c.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), REVISION_B.power.bytes.len());
        assert_eq!(sent[0][13], 0x00);

        assert!(!c.state().power_on);
        assert_eq!(c.state().mode, Mode::Cool);
        assert_eq!(c.state().climate_mode(), ClimateMode::Off);
    }

    #[test]
    fn test_set_mode_revision_a_skips_settle() {
        let (mut c, _) = controller(revision(Revision::A));
        c.on_set_mode(ClimateMode::Dry).unwrap();

        let events = &c.transport().events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::Sent(REVISION_A.power.bytes.to_vec()));
        match &events[1] {
            Event::Sent(frame) => assert_eq!(frame[13], 4),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_set_mode_unsupported() {
        let (mut c, published) = controller(ControllerConfig::default());
        assert!(matches!(
            c.on_set_mode(ClimateMode::FanOnly),
            Err(ControlError::Frame(FrameError::UnsupportedMode(Mode::FanOnly)))
        ));
        assert!(c.transport().events.is_empty());
        assert!(!c.state().power_on);
        assert!(published.borrow().is_empty());
    }

    #[test]
    fn test_set_target_temperature() {
        let (mut c, published) = controller(ControllerConfig::default());
        c.on_status_received(&STATUS_B).unwrap();

        c.on_set_target_temperature(17).unwrap();
        assert_eq!(c.state().target_temperature_c, 17);

        assert!(matches!(
            c.on_set_target_temperature(31),
            Err(ControlError::InvalidArgument(31))
        ));
        assert_eq!(c.state().target_temperature_c, 17);

        let sent = c.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][12] as i16 + 16, 17);
        assert_eq!(sent[0][13], 8);
        assert_eq!(published.borrow().len(), 2);
    }

    #[test]
    fn test_data_available_reads_transport() {
        let (mut c, _) = controller(ControllerConfig::default());
        c.transport.inbound.push_back(STATUS_B.to_vec());

        c.on_data_available().unwrap();
        assert_eq!(c.state().current_temperature_c, 27);
        assert!(matches!(
            c.on_data_available(),
            Err(ControlError::Transport(TransportError::Eof))
        ));
    }

    #[test]
    fn test_config_from_json() -> anyhow::Result<()> {
        let config: ControllerConfig =
            serde_json::from_str(r#"{ "revision": "a", "settle_delay_ms": 1500 }"#)?;
        assert_eq!(config.revision, Revision::A);
        assert_eq!(config.settle_delay(), Duration::from_millis(1500));
        assert_eq!(config.strict_checksum, None);

        let config: ControllerConfig = serde_json::from_str("{}")?;
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.settle_delay(), DEFAULT_SETTLE_DELAY);
        Ok(())
    }
}
