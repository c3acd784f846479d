// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The single event-serialized worker. All state mutation happens here; user
//! API tasks only validate, enqueue and (for scans) block on the scan lock.

use {
    crate::{
        access_point, client,
        config_management::{NetworkProfile, ProfileStore},
        driver::WifiDriver,
        events::{Event, EventSink, TimerEvent, UserRequest},
        power::{self, PsFsmEvent, PsFsmState},
        supplicant::Supplicant,
        types::{
            ApState, BssRole, Bssid, ClientState, PsState, WlanEvent, WAKE_ON_ARP_BROADCAST,
            WAKE_ON_MAC_EVENT, WAKE_ON_MULTICAST, WAKE_ON_UNICAST,
        },
        util::{
            listener::{Notifier, ScanCallback},
            sync::{Semaphore, WakeLock, WakeLockGuard},
            timer::{TimeEntry, TimeStream, Timer},
        },
    },
    log::{debug, error, info},
    parking_lot::Mutex,
    std::{
        net::Ipv4Addr,
        sync::{
            mpsc::{Receiver, RecvTimeoutError},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
};

/// How many scans one connection attempt may issue.
pub const RESCAN_LIMIT: u32 = 5;
/// How many automatic reconnection attempts follow a failed connection.
pub const RECONNECT_LIMIT: u32 = 5;
/// How many background roam scans are retried before giving up.
pub const BG_SCAN_LIMIT: u32 = 3;

/// Inter-channel gap applied when scanning next to live traffic.
pub(crate) const SCAN_CHANNEL_GAP_MS: u16 = 50;

/// Queue tick while a sleep confirm is deferred.
const SLEEP_CONFIRM_TICK: Duration = Duration::from_millis(10);

const DEFAULT_RSSI_LOW_THRESHOLD: u8 = 70;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ManagerStatus {
    Inactive,
    InitDone,
    Activated,
    Stopped,
}

/// The connection manager state record. Owned by the dispatcher; the user
/// API locks it only for precondition checks and snapshots.
pub(crate) struct WlanCore {
    pub status: ManagerStatus,
    pub running: bool,
    pub stop_request: bool,

    pub networks: ProfileStore,
    pub cur_sta_idx: Option<usize>,
    pub cur_ap_idx: Option<usize>,

    pub sta_state: ClientState,
    pub ipv4_state: ClientState,
    pub ipv6_state: ClientState,
    pub return_to: ClientState,
    pub ap_state: ApState,

    pub sta_mac: [u8; 6],
    pub ap_mac: [u8; 6],

    pub scan_count: u32,
    pub hidden_scan_on: bool,
    pub scan_cb: Option<ScanCallback>,
    pub is_scan_lock: bool,
    pub ap_scan_channels: Vec<u8>,
    pub ap_scan_channels_set: bool,

    pub reassoc_control: bool,
    pub reassoc_request: bool,
    pub reassoc_count: u32,
    pub assoc_paused: bool,
    pub pending_assoc: Option<usize>,
    pub roam_reassoc: bool,
    pub same_ess: bool,
    pub ft_bss: bool,
    pub bgscan_attempt: u32,
    pub neighbor_req: bool,
    pub roaming_enabled: bool,
    pub rssi_low_threshold: u8,

    pub ieee_state: PsFsmState,
    pub ieee_prev_state: PsFsmState,
    pub deep_sleep_state: PsFsmState,
    pub ps_state: PsState,
    pub ieee_configured: bool,
    pub deep_sleep_configured: bool,
    pub ieee_sleep_cb_sent: bool,
    pub skip_ds_exit_cb: bool,
    pub req_sleep_confirm: bool,

    pub hs_configured: bool,
    pub hs_wakeup_condition: u32,
    pub wakeup_conditions: u32,

    pub connect_wakelock: Option<WakeLockGuard>,
}

impl WlanCore {
    pub fn new() -> Self {
        WlanCore {
            status: ManagerStatus::Inactive,
            running: false,
            stop_request: false,
            networks: ProfileStore::new(),
            cur_sta_idx: None,
            cur_ap_idx: None,
            sta_state: ClientState::Initializing,
            ipv4_state: ClientState::Initializing,
            ipv6_state: ClientState::Initializing,
            return_to: ClientState::Idle,
            ap_state: ApState::Initializing,
            sta_mac: [0; 6],
            ap_mac: [0; 6],
            scan_count: 0,
            hidden_scan_on: false,
            scan_cb: None,
            is_scan_lock: false,
            ap_scan_channels: Vec::new(),
            ap_scan_channels_set: false,
            reassoc_control: true,
            reassoc_request: false,
            reassoc_count: 0,
            assoc_paused: false,
            pending_assoc: None,
            roam_reassoc: false,
            same_ess: false,
            ft_bss: false,
            bgscan_attempt: 0,
            neighbor_req: false,
            roaming_enabled: false,
            rssi_low_threshold: DEFAULT_RSSI_LOW_THRESHOLD,
            ieee_state: PsFsmState::Init,
            ieee_prev_state: PsFsmState::Init,
            deep_sleep_state: PsFsmState::Init,
            ps_state: PsState::Awake,
            ieee_configured: false,
            deep_sleep_configured: false,
            ieee_sleep_cb_sent: false,
            skip_ds_exit_cb: false,
            req_sleep_confirm: false,
            hs_configured: false,
            hs_wakeup_condition: 0,
            wakeup_conditions: WAKE_ON_UNICAST
                | WAKE_ON_MAC_EVENT
                | WAKE_ON_MULTICAST
                | WAKE_ON_ARP_BROADCAST,
            connect_wakelock: None,
        }
    }

    pub fn is_user_scanning(&self) -> bool {
        self.sta_state == ClientState::ScanningUser
    }

    /// State check that looks through an ongoing user scan at the state the
    /// machine will return to.
    pub fn is_state(&self, state: ClientState) -> bool {
        if self.is_user_scanning() {
            self.return_to == state
        } else {
            self.sta_state == state
        }
    }

    pub fn is_running(&self) -> bool {
        self.running && self.sta_state >= ClientState::Idle
    }

    pub fn is_scanning_allowed(&self) -> bool {
        self.is_state(ClientState::Idle) || self.is_state(ClientState::Connected)
    }

    pub fn is_sta_connecting(&self) -> bool {
        self.sta_state > ClientState::Associating && self.sta_state <= ClientState::Connected
    }

    pub fn is_ap_up(&self) -> bool {
        self.ap_state >= ApState::Started
    }

    pub fn current_sta_profile(&self) -> Option<&NetworkProfile> {
        self.cur_sta_idx.and_then(|index| self.networks.get(index))
    }

    pub fn current_sta_bssid(&self) -> Option<Bssid> {
        self.current_sta_profile().map(|profile| profile.bssid)
    }
}

/// Everything an event handler may touch. Holding a `Context` implies the
/// state lock is held; user notifications are therefore only collected here
/// and delivered after the lock is dropped.
pub(crate) struct Context<'a> {
    pub core: &'a mut WlanCore,
    pub driver: &'a dyn WifiDriver,
    pub supplicant: &'a dyn Supplicant,
    pub timer: &'a mut Timer<TimerEvent>,
    pub sink: &'a EventSink,
    pub scan_lock: &'a Semaphore,
    pub wake_lock: &'a WakeLock,
    pub notifications: &'a mut Vec<WlanEvent>,
    pub scan_report: &'a mut Option<(ScanCallback, usize)>,
}

impl<'a> Context<'a> {
    pub fn notify(&mut self, event: WlanEvent) {
        self.notifications.push(event);
    }

    pub fn release_scan_lock(&mut self) {
        if self.core.is_scan_lock {
            debug!("releasing scan lock");
            self.scan_lock.release();
            self.core.is_scan_lock = false;
        }
    }

    /// The address the host-sleep configuration should retain: the client
    /// address while connected, the soft-AP address while it is up.
    pub fn current_ipv4_address(&self) -> Option<Ipv4Addr> {
        if self.core.ipv4_state == ClientState::Connected {
            if let Some(address) = self.driver.interface_address(BssRole::Client) {
                return Some(address);
            }
            return self.core.current_sta_profile().map(|profile| profile.ip.address);
        }
        if self.core.is_ap_up() {
            return self
                .core
                .cur_ap_idx
                .and_then(|index| self.core.networks.get(index))
                .map(|profile| profile.ip.address);
        }
        None
    }
}

/// State shared between the user-facing handle and the dispatcher thread.
pub(crate) struct Shared {
    pub state: Mutex<WlanCore>,
    pub scan_lock: Semaphore,
    pub wake_lock: WakeLock,
    pub sink: Mutex<Option<EventSink>>,
}

impl Shared {
    pub fn new() -> Self {
        Shared {
            state: Mutex::new(WlanCore::new()),
            scan_lock: Semaphore::new(1),
            wake_lock: WakeLock::new(),
            sink: Mutex::new(None),
        }
    }
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    driver: Arc<dyn WifiDriver>,
    supplicant: Arc<dyn Supplicant>,
    timer: Timer<TimerEvent>,
    time_stream: TimeStream<TimerEvent>,
    pending_timers: Vec<TimeEntry<TimerEvent>>,
    notifier: Notifier,
    sink: EventSink,
    events: Receiver<Event>,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<Shared>,
        driver: Arc<dyn WifiDriver>,
        supplicant: Arc<dyn Supplicant>,
        timer: Timer<TimerEvent>,
        time_stream: TimeStream<TimerEvent>,
        notifier: Notifier,
        sink: EventSink,
        events: Receiver<Event>,
    ) -> Self {
        Dispatcher {
            shared,
            driver,
            supplicant,
            timer,
            time_stream,
            pending_timers: Vec::new(),
            notifier,
            sink,
            events,
        }
    }

    /// The worker body. Blocks on the event queue with either the sleep
    /// confirm tick, the next timer deadline, or forever.
    pub fn run(mut self) {
        // Wait for start() to finish wiring everything up.
        while !self.shared.state.lock().running {
            if self.shared.state.lock().stop_request {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }

        if let Err(e) = self.driver.init_interfaces() {
            error!("interface init failed: {}", e);
        }

        loop {
            self.collect_timers();
            let received = match self.next_timeout() {
                Some(timeout) => match self.events.recv_timeout(timeout) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            if self.shared.state.lock().stop_request {
                debug!("received shutdown request");
                self.shared.state.lock().status = ManagerStatus::Stopped;
                return;
            }

            match received {
                Some(event) => self.process(event),
                None => self.process_timeout(),
            }
        }
        self.shared.state.lock().status = ManagerStatus::Stopped;
    }

    fn collect_timers(&mut self) {
        while let Ok(Some(entry)) = self.time_stream.try_next() {
            self.pending_timers.push(entry);
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        if self.shared.state.lock().req_sleep_confirm {
            return Some(SLEEP_CONFIRM_TICK);
        }
        let now = Instant::now();
        self.pending_timers
            .iter()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
            .min()
    }

    /// Applies one event to the state machines and delivers the resulting
    /// notifications with the state lock dropped.
    pub fn process(&mut self, event: Event) {
        let mut notifications = Vec::new();
        let mut scan_report = None;
        {
            let mut core = self.shared.state.lock();
            let mut ctx = Context {
                core: &mut core,
                driver: &*self.driver,
                supplicant: &*self.supplicant,
                timer: &mut self.timer,
                sink: &self.sink,
                scan_lock: &self.shared.scan_lock,
                wake_lock: &self.shared.wake_lock,
                notifications: &mut notifications,
                scan_report: &mut scan_report,
            };
            match event {
                Event::User(request @ UserRequest::ApStart { .. })
                | Event::User(request @ UserRequest::ApStop) => {
                    access_point::handle_request(&mut ctx, request)
                }
                Event::User(UserRequest::Deinit) => process_deinit(&mut ctx),
                Event::User(request) => client::handle_user_request(&mut ctx, request),
                Event::Wifi(event) if event.is_ap_event() => {
                    access_point::handle_event(&mut ctx, event)
                }
                Event::Wifi(event) => client::handle_wifi_event(&mut ctx, event),
                Event::Timer(event) => client::handle_timer(&mut ctx, event.event),
            }
        }
        self.notifier.notify_all(notifications);
        if let Some((callback, count)) = scan_report {
            callback(count);
        }
    }

    /// Queue receive timed out: fire due timers, then retry a deferred
    /// sleep confirm while the client is still connected.
    fn process_timeout(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();
        self.pending_timers.retain(|(deadline, event)| {
            if *deadline <= now {
                due.push(crate::util::timer::TimedEvent { id: event.id, event: event.event });
                false
            } else {
                true
            }
        });
        for event in due {
            self.process(Event::Timer(event));
        }

        let mut notifications = Vec::new();
        let mut scan_report = None;
        {
            let mut core = self.shared.state.lock();
            if !core.is_state(ClientState::Connected) {
                return;
            }
            if core.req_sleep_confirm {
                let mut ctx = Context {
                    core: &mut core,
                    driver: &*self.driver,
                    supplicant: &*self.supplicant,
                    timer: &mut self.timer,
                    sink: &self.sink,
                    scan_lock: &self.shared.scan_lock,
                    wake_lock: &self.shared.wake_lock,
                    notifications: &mut notifications,
                    scan_report: &mut scan_report,
                };
                power::ieeeps_sm(&mut ctx, PsFsmEvent::Sleep);
            }
        }
        self.notifier.notify_all(notifications);
    }
}

fn process_deinit(ctx: &mut Context<'_>) {
    if !matches!(ctx.core.status, ManagerStatus::Activated | ManagerStatus::InitDone) {
        error!("cannot deinit, unexpected status: {:?}", ctx.core.status);
        return;
    }
    info!("shutting the connection manager down");
    ctx.driver.stop_dhcp(BssRole::Client);
    ctx.core.running = false;
    ctx.core.status = ManagerStatus::Inactive;
}
