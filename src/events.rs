// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        types::{Bssid, PsMode, Ssid},
        util::{listener::ScanCallback, timer::TimedEvent},
    },
    log::warn,
    std::{fmt, sync::mpsc, time::Duration},
};

/// Depth of the dispatcher event queue.
pub const MAX_EVENTS: usize = 20;

/// Everything the dispatcher consumes flows through this one type: user
/// requests, driver/IP-stack events and timer expirations. Payloads are
/// owned values; nothing is freed out-of-band.
#[derive(Debug)]
pub enum Event {
    User(UserRequest),
    Wifi(WifiEvent),
    Timer(TimedEvent<TimerEvent>),
}

/// Requests enqueued by the public API. The dispatcher is the only consumer.
pub enum UserRequest {
    Connect { index: usize },
    Disconnect,
    Scan { options: ScanOptions, callback: ScanCallback },
    SetRssiThreshold,
    HostSleep { conditions: u32 },
    PsEnter { mode: PsMode },
    PsExit { mode: PsMode },
    ApStart { index: usize },
    ApStop,
    Deinit,
    /// Wakes the dispatcher so a pending stop request is observed.
    Stop,
}

impl fmt::Debug for UserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRequest::Connect { index } => write!(f, "Connect({})", index),
            UserRequest::Disconnect => write!(f, "Disconnect"),
            UserRequest::Scan { options, .. } => write!(f, "Scan({:?})", options),
            UserRequest::SetRssiThreshold => write!(f, "SetRssiThreshold"),
            UserRequest::HostSleep { conditions } => write!(f, "HostSleep({:#x})", conditions),
            UserRequest::PsEnter { mode } => write!(f, "PsEnter({:?})", mode),
            UserRequest::PsExit { mode } => write!(f, "PsExit({:?})", mode),
            UserRequest::ApStart { index } => write!(f, "ApStart({})", index),
            UserRequest::ApStop => write!(f, "ApStop"),
            UserRequest::Deinit => write!(f, "Deinit"),
            UserRequest::Stop => write!(f, "Stop"),
        }
    }
}

/// User scan parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanOptions {
    pub ssid: Option<Ssid>,
    pub ssid2: Option<Ssid>,
    pub bssid: Option<Bssid>,
    pub channels: Vec<ScanChannel>,
    pub num_probes: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanChannel {
    pub channel: u8,
    pub scan_type: ScanType,
    pub scan_time_ms: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanType {
    Active,
    Passive,
}

/// Power-save command completion kinds reported by the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PsAction {
    EnableDone,
    SleepConfirm,
    DisableDone,
}

/// Opaque handle to a firmware-owned block-ack record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BaToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockAckAction {
    AddBaResponse,
    DelBa,
    StreamTimeout,
}

/// Asynchronous events produced by the firmware driver and the attached IP
/// stack.
#[derive(Clone, Debug, PartialEq)]
pub enum WifiEvent {
    ScanStart,
    ScanResult { success: bool },
    Association { success: bool },
    Authentication { success: bool, reason: Option<u16> },
    Pmk { pmk: [u8; 32] },
    LinkLoss { reason: u16 },
    Disassociation,
    Deauthentication,
    StaAddrConfig { success: bool },
    InterfaceConfig { success: bool },
    DhcpConfig { success: bool },
    Ipv6Config { preferred: bool },
    ChanSwitchAnn,
    ChanSwitch { channel: u8 },
    Sleep,
    Awake,
    IeeePs { success: bool, action: PsAction },
    DeepSleep { success: bool, action: PsAction },
    HsConfig,
    HsActivated,
    SleepConfirmDone,
    BlockAck { action: BlockAckAction, token: BaToken },
    StaMacConfig { mac: [u8; 6] },
    ApMacConfig { mac: [u8; 6] },
    ApStarted { success: bool },
    ApStopped,
    ApClientAssoc { mac: Bssid },
    ApClientConn { mac: Bssid },
    ApClientDeauth { mac: Bssid },
    ApAddrConfig { success: bool },
    BgScanStopped,
    BgScanReport,
    MgmtFrame { frame: Vec<u8> },
    NeighborListReport,
    RssiLow,
    GetHwSpec,
}

impl WifiEvent {
    /// Events routed to the soft-AP state machine rather than the client one.
    pub fn is_ap_event(&self) -> bool {
        matches!(
            self,
            WifiEvent::ApStarted { .. }
                | WifiEvent::ApStopped
                | WifiEvent::ApClientAssoc { .. }
                | WifiEvent::ApClientConn { .. }
                | WifiEvent::ApClientDeauth { .. }
                | WifiEvent::ApAddrConfig { .. }
        )
    }
}

/// Expirations delivered back into the event queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// The 60 s association pause after a MIC failure has elapsed.
    AssocPause,
    /// The 60 s neighbor-report wait has elapsed.
    NeighborReq,
}

impl crate::util::timer::TimeoutDuration for TimerEvent {
    fn timeout_duration(&self) -> Duration {
        match self {
            TimerEvent::AssocPause => Duration::from_secs(60),
            TimerEvent::NeighborReq => Duration::from_secs(60),
        }
    }
}

/// Producer handle for the dispatcher queue. Sends never block: the queue is
/// bounded and an overflowing event is dropped with a warning, matching the
/// no-wait posting discipline of interrupt-context producers.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::SyncSender<Event>,
}

impl EventSink {
    pub fn new(sender: mpsc::SyncSender<Event>) -> Self {
        EventSink { sender }
    }

    pub fn send(&self, event: Event) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::TrySendError::Full(_)) => {
                warn!("event queue full, dropping event");
                false
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                warn!("event queue closed, dropping event");
                false
            }
        }
    }

    pub fn send_wifi(&self, event: WifiEvent) -> bool {
        self.send(Event::Wifi(event))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::assert_variant};

    #[test]
    fn ap_event_classification() {
        assert!(WifiEvent::ApStarted { success: true }.is_ap_event());
        assert!(WifiEvent::ApClientConn { mac: Bssid::ANY }.is_ap_event());
        assert!(!WifiEvent::ScanResult { success: true }.is_ap_event());
        assert!(!WifiEvent::Sleep.is_ap_event());
    }

    #[test]
    fn sink_drops_when_full() {
        let (tx, _rx) = mpsc::sync_channel(1);
        let sink = EventSink::new(tx);
        assert!(sink.send_wifi(WifiEvent::Awake));
        assert!(!sink.send_wifi(WifiEvent::Sleep));
    }

    #[test]
    fn sink_delivers_in_order() {
        let (tx, rx) = mpsc::sync_channel(4);
        let sink = EventSink::new(tx);
        sink.send_wifi(WifiEvent::Awake);
        sink.send_wifi(WifiEvent::Sleep);
        assert_variant!(rx.try_recv(), Ok(Event::Wifi(WifiEvent::Awake)));
        assert_variant!(rx.try_recv(), Ok(Event::Wifi(WifiEvent::Sleep)));
    }
}
