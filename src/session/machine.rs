use std::time::Instant;

use crate::error::ErrorKind;
use crate::types::ControlEvent;

/// Session lifecycle. `Listening` covers the whole active session between
/// turns; `Speaking` is the span where response audio is flowing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum State {
    Idle,
    Listening { last_activity: Instant },
    Speaking { since: Instant },
    ShuttingDown,
}

/// Side effects the driver executes after each transition, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    OpenSession,
    CloseSession,
    PlayGreeting,
    PlayFarewell,
    FlushPlayback,
    MotionTurnStarted,
    MotionTurnEnded,
    MotionInterrupt,
    /// Tell the endpoint to stop the current turn.
    SendInterrupt,
    Shutdown,
}

/// Pure session state machine. Takes events and the clock, returns the
/// effects to run; owns no I/O, so every transition is directly testable.
#[derive(Debug)]
pub struct SessionMachine {
    state: State,
    idle_timeout: std::time::Duration,
}

impl SessionMachine {
    pub fn new(idle_timeout: std::time::Duration) -> Self {
        Self {
            state: State::Idle,
            idle_timeout,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self.state, State::Speaking { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Listening { .. } | State::Speaking { .. })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state == State::ShuttingDown
    }

    /// Only infrastructure failures tear a session down; protocol noise
    /// and queue overflow are counted where they happen.
    fn is_fatal(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::ConnectionFailed | ErrorKind::AuthFailed | ErrorKind::DeviceUnavailable
        )
    }

    pub fn handle(&mut self, event: ControlEvent, now: Instant) -> Vec<Effect> {
        match self.state {
            State::Idle => self.handle_idle(event, now),
            State::Listening { .. } => self.handle_listening(event, now),
            State::Speaking { .. } => self.handle_speaking(event, now),
            State::ShuttingDown => Vec::new(),
        }
    }

    fn handle_idle(&mut self, event: ControlEvent, now: Instant) -> Vec<Effect> {
        match event {
            ControlEvent::ButtonPressed => {
                self.state = State::Listening { last_activity: now };
                vec![Effect::OpenSession, Effect::PlayGreeting]
            }
            ControlEvent::ShutdownRequested => {
                self.state = State::ShuttingDown;
                vec![Effect::Shutdown]
            }
            _ => Vec::new(),
        }
    }

    fn handle_listening(&mut self, event: ControlEvent, now: Instant) -> Vec<Effect> {
        match event {
            ControlEvent::ButtonPressed => {
                self.state = State::Idle;
                vec![Effect::PlayFarewell, Effect::CloseSession]
            }
            ControlEvent::TurnStarted => {
                self.state = State::Speaking { since: now };
                vec![Effect::MotionTurnStarted]
            }
            ControlEvent::SessionEnded => {
                self.state = State::Idle;
                vec![Effect::CloseSession]
            }
            ControlEvent::Error(kind, _) if Self::is_fatal(kind) => {
                self.state = State::Idle;
                vec![Effect::PlayFarewell, Effect::CloseSession]
            }
            ControlEvent::ShutdownRequested => {
                self.state = State::ShuttingDown;
                vec![Effect::PlayFarewell, Effect::CloseSession, Effect::Shutdown]
            }
            // Session opening acknowledgement refreshes the idle clock.
            ControlEvent::SessionStarted => {
                self.state = State::Listening { last_activity: now };
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_speaking(&mut self, event: ControlEvent, now: Instant) -> Vec<Effect> {
        match event {
            ControlEvent::Interrupted => {
                self.state = State::Listening { last_activity: now };
                vec![
                    Effect::SendInterrupt,
                    Effect::FlushPlayback,
                    Effect::MotionInterrupt,
                ]
            }
            ControlEvent::TurnEnded => {
                self.state = State::Listening { last_activity: now };
                vec![Effect::MotionTurnEnded]
            }
            ControlEvent::ButtonPressed => {
                self.state = State::Idle;
                vec![
                    Effect::FlushPlayback,
                    Effect::MotionInterrupt,
                    Effect::PlayFarewell,
                    Effect::CloseSession,
                ]
            }
            ControlEvent::SessionEnded => {
                self.state = State::Idle;
                vec![Effect::FlushPlayback, Effect::MotionInterrupt, Effect::CloseSession]
            }
            ControlEvent::Error(kind, _) if Self::is_fatal(kind) => {
                self.state = State::Idle;
                vec![
                    Effect::FlushPlayback,
                    Effect::MotionInterrupt,
                    Effect::PlayFarewell,
                    Effect::CloseSession,
                ]
            }
            ControlEvent::ShutdownRequested => {
                self.state = State::ShuttingDown;
                vec![
                    Effect::FlushPlayback,
                    Effect::MotionInterrupt,
                    Effect::CloseSession,
                    Effect::Shutdown,
                ]
            }
            _ => Vec::new(),
        }
    }

    /// Time-driven transitions. A session with no turn activity for the
    /// idle timeout closes itself.
    pub fn poll(&mut self, now: Instant) -> Vec<Effect> {
        if let State::Listening { last_activity } = self.state {
            if now.duration_since(last_activity) >= self.idle_timeout {
                self.state = State::Idle;
                return vec![Effect::PlayFarewell, Effect::CloseSession];
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn machine() -> SessionMachine {
        SessionMachine::new(Duration::from_secs(30))
    }

    #[test]
    fn button_toggles_session() {
        let mut m = machine();
        let now = Instant::now();
        let fx = m.handle(ControlEvent::ButtonPressed, now);
        assert_eq!(fx, vec![Effect::OpenSession, Effect::PlayGreeting]);
        assert!(m.is_active());

        let fx = m.handle(ControlEvent::ButtonPressed, now);
        assert_eq!(fx, vec![Effect::PlayFarewell, Effect::CloseSession]);
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn turn_lifecycle() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(ControlEvent::ButtonPressed, now);
        let fx = m.handle(ControlEvent::TurnStarted, now);
        assert_eq!(fx, vec![Effect::MotionTurnStarted]);
        assert!(m.is_speaking());

        let fx = m.handle(ControlEvent::TurnEnded, now);
        assert_eq!(fx, vec![Effect::MotionTurnEnded]);
        assert!(!m.is_speaking());
        assert!(m.is_active());
    }

    #[test]
    fn barge_in_while_speaking() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(ControlEvent::ButtonPressed, now);
        m.handle(ControlEvent::TurnStarted, now);
        let fx = m.handle(ControlEvent::Interrupted, now);
        assert_eq!(
            fx,
            vec![
                Effect::SendInterrupt,
                Effect::FlushPlayback,
                Effect::MotionInterrupt
            ]
        );
        assert!(m.is_active());
        assert!(!m.is_speaking());
    }

    #[test]
    fn idle_timeout_closes_session() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(ControlEvent::ButtonPressed, t0);
        assert!(m.poll(t0 + Duration::from_secs(29)).is_empty());
        let fx = m.poll(t0 + Duration::from_secs(31));
        assert_eq!(fx, vec![Effect::PlayFarewell, Effect::CloseSession]);
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn no_timeout_while_speaking() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(ControlEvent::ButtonPressed, t0);
        m.handle(ControlEvent::TurnStarted, t0);
        assert!(m.poll(t0 + Duration::from_secs(120)).is_empty());
    }

    #[test]
    fn fatal_error_tears_down_with_farewell() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(ControlEvent::ButtonPressed, now);
        let fx = m.handle(
            ControlEvent::Error(ErrorKind::ConnectionFailed, "lost".into()),
            now,
        );
        assert_eq!(fx, vec![Effect::PlayFarewell, Effect::CloseSession]);
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn protocol_noise_is_not_fatal() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(ControlEvent::ButtonPressed, now);
        let fx = m.handle(
            ControlEvent::Error(ErrorKind::ProtocolError, "bad event".into()),
            now,
        );
        assert!(fx.is_empty());
        assert!(m.is_active());
    }

    #[test]
    fn shutdown_absorbs_everything_after() {
        let mut m = machine();
        let now = Instant::now();
        let fx = m.handle(ControlEvent::ShutdownRequested, now);
        assert_eq!(fx, vec![Effect::Shutdown]);
        assert!(m.handle(ControlEvent::ButtonPressed, now).is_empty());
        assert!(m.poll(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn shutdown_mid_turn_stops_motion_first() {
        let mut m = machine();
        let now = Instant::now();
        m.handle(ControlEvent::ButtonPressed, now);
        m.handle(ControlEvent::TurnStarted, now);
        let fx = m.handle(ControlEvent::ShutdownRequested, now);
        assert_eq!(
            fx,
            vec![
                Effect::FlushPlayback,
                Effect::MotionInterrupt,
                Effect::CloseSession,
                Effect::Shutdown
            ]
        );
    }
}
