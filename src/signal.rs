use bthealth::decoder::raw_hex;
use bthealth::{Notice, ProfileId, ServiceProbe, SessionEvent, SessionState};


/// Session events as the window consumes them.
pub enum SessionSignal {
    State {
        session_id: u64,
        profile: &'static str,
        state: SessionState,
        notice: Option<Notice>,
    },
    Reading(String),
    DecodeFailed(String),
    Probe(ServiceProbe),
}

pub enum GuiSignal {
    StartSession(ProfileId),
    StopSession,
}

impl From<&SessionEvent> for SessionSignal {
    fn from(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::StateChanged(change) => SessionSignal::State {
                session_id: change.session_id,
                profile: change.profile_label,
                state: change.state.clone(),
                notice: change.notice.clone(),
            },
            SessionEvent::Reading(reading) => SessionSignal::Reading(reading.rendered.clone()),
            SessionEvent::DecodeFailed { error, raw, .. } => {
                SessionSignal::DecodeFailed(format!("{error} [{}]", raw_hex(raw)))
            }
            SessionEvent::ServiceProbe(probe) => SessionSignal::Probe(probe.clone()),
        }
    }
}

pub fn describe_probe(probe: &ServiceProbe) -> String {
    if probe.found {
        format!(
            "{} ({}): {} characteristic(s)",
            probe.name,
            probe.uuid,
            probe.characteristics.len()
        )
    } else {
        format!("{} ({}): not found", probe.name, probe.uuid)
    }
}

/// What the window shows of the most recent session.
#[derive(Default)]
pub struct SessionView {
    pub session_id: Option<u64>,
    pub profile: Option<&'static str>,
    pub state: SessionState,
    pub value: Option<String>,
    pub notice: Option<String>,
    pub probes: Vec<String>,
}

impl SessionView {
    pub fn apply(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::State { session_id, profile, state, notice } => {
                if state == SessionState::Discovering {
                    *self = SessionView {
                        session_id: Some(session_id),
                        ..SessionView::default()
                    };
                } else if self.session_id != Some(session_id) {
                    // A closing session can report after its successor started.
                    return;
                }
                if let Some(notice) = notice {
                    self.notice = Some(notice.to_string());
                }
                self.profile = Some(profile);
                self.state = state;
            }
            SessionSignal::Reading(value) => self.value = Some(value),
            SessionSignal::DecodeFailed(message) => self.notice = Some(message),
            SessionSignal::Probe(probe) => self.probes.push(describe_probe(&probe)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session_id.is_some() && !self.state.is_terminal()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn state(session_id: u64, state: SessionState) -> SessionSignal {
        SessionSignal::State {
            session_id,
            profile: "Battery",
            state,
            notice: None,
        }
    }

    #[test]
    fn late_close_of_previous_session_is_ignored() {
        let mut view = SessionView::default();
        view.apply(state(1, SessionState::Discovering));
        view.apply(state(2, SessionState::Discovering));
        view.apply(state(1, SessionState::Closed));

        assert_eq!(view.session_id, Some(2));
        assert_eq!(view.state, SessionState::Discovering);
        assert!(view.is_open());
    }

    #[test]
    fn new_session_clears_previous_reading() {
        let mut view = SessionView::default();
        view.apply(state(1, SessionState::Discovering));
        view.apply(SessionSignal::Reading("80%".to_string()));
        view.apply(SessionSignal::State {
            session_id: 1,
            profile: "Battery",
            state: SessionState::Closed,
            notice: Some(Notice::DeviceDisconnected),
        });
        assert!(!view.is_open());
        assert_eq!(view.notice.as_deref(), Some("device disconnected"));

        view.apply(state(2, SessionState::Discovering));
        assert_eq!(view.value, None);
        assert_eq!(view.notice, None);
    }
}
