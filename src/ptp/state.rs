//! PTP client mode/state machine (§4.L, §9.2.5 of IEEE-1588): the
//! user-configured mode drives a derived operating state, with
//! best-master-clock adoption on the LISTENING→SLAVE edge and a
//! watchdog-driven SLAVE→LISTENING timeout.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::log::{Log, LogRegistry, WARNING};
use crate::ptp::filters::{boxcar_filter, AmplitudeReject, ControllerPi};
use crate::ptp::header::PortIdentity;
use crate::ptp::measurement::Measurement;

/// Amplitude-reject time constant: the estimator adapts over roughly ten
/// seconds of sync traffic before outlier rejection kicks in.
const AMPLITUDE_REJECT_TAU_USEC: u32 = 10_000_000;
/// Floor on the amplitude-reject sigma estimate, so a near-perfectly
/// quiet link doesn't collapse the accept window to a few nanoseconds.
const AMPLITUDE_REJECT_MIN_SIGMA_NS: u64 = 100;
/// Conservative default loop gains (Q16.16) and output clamp for the
/// offset-to-correction controller.
const LOOP_KP_Q16: i64 = 1 << 14;
const LOOP_KI_Q16: i64 = 1 << 4;
const LOOP_Y_MAX_NS: i64 = 500_000_000;
/// Boxcar pre-filter window applied to accepted offsets before they reach
/// the controller.
const SMOOTHING_WINDOW: usize = 5;

/// User-configured operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    Disabled,
    MasterL2,
    MasterL3,
    SlaveOnly,
    SlaveSptp,
    Passive,
}

/// Derived operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disabled,
    Listening,
    Master,
    Passive,
    Slave,
}

/// A subset of an ANNOUNCE message's fields relevant to best-master-clock
/// comparison (IEEE-1588 §9.3, abbreviated to the fields this client
/// actually compares).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceData {
    pub grandmaster_identity: [u8; 8],
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_class: u8,
    pub grandmaster_clock_accuracy: u8,
    pub grandmaster_clock_variance: u16,
    pub grandmaster_priority2: u8,
}

impl AnnounceData {
    /// `true` if `self` is a better master than `other` per the abbreviated
    /// ordering: priority1, class, accuracy, variance, priority2, identity
    /// (lower wins at every step, matching the standard's "lower value
    /// wins" convention).
    pub fn better_than(&self, other: &AnnounceData) -> bool {
        (
            self.grandmaster_priority1,
            self.grandmaster_clock_class,
            self.grandmaster_clock_accuracy,
            self.grandmaster_clock_variance,
            self.grandmaster_priority2,
            self.grandmaster_identity,
        ) < (
            other.grandmaster_priority1,
            other.grandmaster_clock_class,
            other.grandmaster_clock_accuracy,
            other.grandmaster_clock_variance,
            other.grandmaster_priority2,
            other.grandmaster_identity,
        )
    }
}

/// PTP client state machine. Owns no I/O; the caller feeds it ANNOUNCE
/// arrivals and timer ticks and reacts to the resulting state.
pub struct Client {
    mode: ClientMode,
    state: ClientState,
    master: Option<(PortIdentity, AnnounceData)>,
    sync_rate_log2: i8,
    pdelay_rate_log2: i8,
    ticks_since_last_message: u32,
    timeout_ticks: u32,
    log: Rc<LogRegistry>,
    amplitude_reject: AmplitudeReject,
    controller: ControllerPi,
    smoothing_window: VecDeque<i64>,
    last_t2_ns: Option<i128>,
    last_correction_ns: i64,
}

impl Client {
    pub fn new(timeout_ticks: u32, log: Rc<LogRegistry>) -> Self {
        Client {
            mode: ClientMode::Disabled,
            state: ClientState::Disabled,
            master: None,
            sync_rate_log2: -1,
            pdelay_rate_log2: -1,
            ticks_since_last_message: 0,
            timeout_ticks,
            log,
            amplitude_reject: AmplitudeReject::new(AMPLITUDE_REJECT_TAU_USEC, AMPLITUDE_REJECT_MIN_SIGMA_NS),
            controller: ControllerPi::new(LOOP_KP_Q16, LOOP_KI_Q16, LOOP_Y_MAX_NS),
            smoothing_window: VecDeque::with_capacity(SMOOTHING_WINDOW),
            last_t2_ns: None,
            last_correction_ns: 0,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    /// Apply a new user-configured mode. DISABLED/MASTER_*/PASSIVE drive
    /// their corresponding state immediately; SLAVE_ONLY/SLAVE_SPTP start
    /// in LISTENING awaiting a master.
    pub fn set_mode(&mut self, mode: ClientMode) {
        self.mode = mode;
        self.master = None;
        self.ticks_since_last_message = 0;
        self.amplitude_reject = AmplitudeReject::new(AMPLITUDE_REJECT_TAU_USEC, AMPLITUDE_REJECT_MIN_SIGMA_NS);
        self.controller = ControllerPi::new(LOOP_KP_Q16, LOOP_KI_Q16, LOOP_Y_MAX_NS);
        self.smoothing_window.clear();
        self.last_t2_ns = None;
        self.state = match mode {
            ClientMode::Disabled => ClientState::Disabled,
            ClientMode::MasterL2 | ClientMode::MasterL3 => ClientState::Master,
            ClientMode::Passive => ClientState::Passive,
            ClientMode::SlaveOnly | ClientMode::SlaveSptp => ClientState::Listening,
        };
    }

    /// `2^n` sync messages per second; -1 disables.
    pub fn set_sync_rate(&mut self, n: i8) {
        self.sync_rate_log2 = n;
    }

    pub fn sync_rate_log2(&self) -> i8 {
        self.sync_rate_log2
    }

    /// `2^n` peer-delay requests per 0.9 s; -1 disables.
    pub fn set_pdelay_rate(&mut self, n: i8) {
        self.pdelay_rate_log2 = n;
    }

    pub fn pdelay_rate_log2(&self) -> i8 {
        self.pdelay_rate_log2
    }

    /// Whether SPTP role inversion applies: the slave initiates and the
    /// master responds to DELAY_REQ in two messages instead of four.
    pub fn is_sptp(&self) -> bool {
        self.mode == ClientMode::SlaveSptp
    }

    /// A valid ANNOUNCE arrived from `source`. In LISTENING, the first
    /// ANNOUNCE is always adopted; while SLAVE, a strictly better master
    /// (by [`AnnounceData::better_than`]) replaces the current one.
    pub fn on_announce(&mut self, source: PortIdentity, announce: AnnounceData) {
        if !matches!(self.mode, ClientMode::SlaveOnly | ClientMode::SlaveSptp) {
            return;
        }
        self.ticks_since_last_message = 0;
        match (self.state, self.master) {
            (ClientState::Listening, _) => {
                self.master = Some((source, announce));
                self.state = ClientState::Slave;
            }
            (ClientState::Slave, Some((_, current))) => {
                if announce.better_than(&current) {
                    self.master = Some((source, announce));
                }
            }
            _ => {}
        }
    }

    /// Any valid PTP message (not just ANNOUNCE) resets the timeout
    /// watchdog while SLAVE.
    pub fn on_message_received(&mut self) {
        if self.state == ClientState::Slave {
            self.ticks_since_last_message = 0;
        }
    }

    /// Advance one scheduling tick. Reverts SLAVE to LISTENING and logs
    /// "Connection timeout" once `timeout_ticks` elapse without a message.
    pub fn tick(&mut self) {
        if self.state != ClientState::Slave {
            return;
        }
        self.ticks_since_last_message += 1;
        if self.ticks_since_last_message >= self.timeout_ticks {
            self.state = ClientState::Listening;
            self.master = None;
            self.ticks_since_last_message = 0;
            Log::with_str(&self.log, WARNING, "Connection timeout").finish();
        }
    }

    /// A DELAY_RESP/FOLLOW_UP referenced a sequence id with no matching
    /// measurement-cache entry: logged but does not drop the slave state.
    pub fn on_unmatched_seq_id(&self) {
        Log::with_str(&self.log, WARNING, "Unmatched SeqID").finish();
    }

    pub fn current_master(&self) -> Option<PortIdentity> {
        self.master.map(|(p, _)| p)
    }

    /// Steer the local clock from a completed measurement: the offset runs
    /// through amplitude-reject, a boxcar smoothing window, then the PI
    /// controller, producing a correction in nanoseconds (§4.L). Returns
    /// `None` while not SLAVE, or if the offset was rejected as an
    /// outlier — the controller is not advanced on a rejected sample.
    pub fn on_measurement(&mut self, measurement: &Measurement) -> Option<i64> {
        if self.state != ClientState::Slave {
            return None;
        }
        let offset_ns = measurement.offset_from_master().clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        let elapsed_usec = match self.last_t2_ns {
            Some(prev) => (((measurement.t2 - prev).max(1)) / 1000).clamp(1, u32::MAX as i128) as u32,
            None => 1,
        };
        self.last_t2_ns = Some(measurement.t2);

        let accepted = self.amplitude_reject.update(offset_ns, elapsed_usec)?;

        if self.smoothing_window.len() == SMOOTHING_WINDOW {
            self.smoothing_window.pop_front();
        }
        self.smoothing_window.push_back(accepted);
        let smoothed = if self.smoothing_window.len() == SMOOTHING_WINDOW {
            boxcar_filter(self.smoothing_window.make_contiguous())
        } else {
            accepted
        };

        let correction = self.controller.update(smoothed, elapsed_usec);
        self.last_correction_ns = correction;
        Some(correction)
    }

    /// The last clock correction [`Client::on_measurement`] produced.
    pub fn last_correction_ns(&self) -> i64 {
        self.last_correction_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(priority1: u8) -> AnnounceData {
        AnnounceData {
            grandmaster_identity: [1; 8],
            grandmaster_priority1: priority1,
            grandmaster_clock_class: 6,
            grandmaster_clock_accuracy: 0x20,
            grandmaster_clock_variance: 100,
            grandmaster_priority2: 128,
        }
    }

    fn port(n: u16) -> PortIdentity {
        PortIdentity { clock_identity: [2; 8], port_number: n }
    }

    #[test]
    fn disabled_master_passive_modes_drive_state_immediately() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::MasterL2);
        assert_eq!(c.state(), ClientState::Master);
        c.set_mode(ClientMode::Passive);
        assert_eq!(c.state(), ClientState::Passive);
        c.set_mode(ClientMode::Disabled);
        assert_eq!(c.state(), ClientState::Disabled);
    }

    #[test]
    fn first_announce_in_listening_adopts_master_and_transitions_to_slave() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        assert_eq!(c.state(), ClientState::Listening);
        c.on_announce(port(1), announce(128));
        assert_eq!(c.state(), ClientState::Slave);
        assert_eq!(c.current_master(), Some(port(1)));
    }

    #[test]
    fn better_master_replaces_current_while_slave() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        c.on_announce(port(1), announce(128));
        c.on_announce(port(2), announce(64)); // lower priority1 wins
        assert_eq!(c.current_master(), Some(port(2)));
    }

    #[test]
    fn worse_master_does_not_replace_current() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        c.on_announce(port(1), announce(64));
        c.on_announce(port(2), announce(200));
        assert_eq!(c.current_master(), Some(port(1)));
    }

    #[test]
    fn timeout_reverts_slave_to_listening() {
        let mut c = Client::new(3, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        c.on_announce(port(1), announce(128));
        assert_eq!(c.state(), ClientState::Slave);
        for _ in 0..3 {
            c.tick();
        }
        assert_eq!(c.state(), ClientState::Listening);
        assert_eq!(c.current_master(), None);
    }

    #[test]
    fn message_activity_resets_the_watchdog() {
        let mut c = Client::new(3, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        c.on_announce(port(1), announce(128));
        c.tick();
        c.tick();
        c.on_message_received();
        c.tick();
        assert_eq!(c.state(), ClientState::Slave);
    }

    #[test]
    fn sptp_mode_is_detected() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveSptp);
        assert!(c.is_sptp());
    }

    fn measurement(seq: u16, t2: i128, offset_ns: i128) -> Measurement {
        // forward leg (t2 - t1) = offset_ns, reverse leg (t4 - t3) = -offset_ns,
        // so offset_from_master() = (fwd - rev) / 2 = offset_ns exactly.
        Measurement {
            port: port(1),
            seq,
            t1: t2 - offset_ns,
            t2,
            t3: t2 + 1_000,
            t4: t2 + 1_000 - offset_ns,
            correction1: 0,
            correction2: 0,
            correction4: 0,
        }
    }

    #[test]
    fn on_measurement_returns_none_while_not_slave() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        assert_eq!(c.on_measurement(&measurement(1, 1_000_000, 500)), None);
    }

    #[test]
    fn on_measurement_steers_clock_while_slave() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        c.on_announce(port(1), announce(128));
        assert_eq!(c.state(), ClientState::Slave);

        let mut t2 = 1_000_000_000i128;
        let mut last = None;
        for _ in 0..8 {
            last = c.on_measurement(&measurement(1, t2, 10_000));
            t2 += 1_000_000_000;
        }
        assert!(last.is_some());
        assert_eq!(c.last_correction_ns(), last.unwrap());
    }

    #[test]
    fn on_measurement_rejects_outlier_after_settling() {
        let mut c = Client::new(10, Rc::new(LogRegistry::new()));
        c.set_mode(ClientMode::SlaveOnly);
        c.on_announce(port(1), announce(128));

        let mut t2 = 1_000_000_000i128;
        for _ in 0..32 {
            c.on_measurement(&measurement(1, t2, 1_000));
            t2 += 1_000_000_000;
        }
        assert_eq!(c.on_measurement(&measurement(1, t2, 500_000_000)), None);
    }
}
