// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Event-driven Wi-Fi connection manager.
//!
//! One dispatcher task owns the full station and soft-AP lifecycle: scan
//! arbitration, BSS selection, association, address acquisition, link-loss
//! recovery, the reconnection policy and two power-save state machines.
//! The 802.11 firmware, the IP stack and the security backend are external
//! collaborators behind the [`driver::WifiDriver`] and
//! [`supplicant::Supplicant`] traits; their asynchronous notifications flow
//! through a single bounded event queue into the dispatcher, which is the
//! only place state is mutated. User API calls validate, enqueue and return;
//! all asynchronous outcomes arrive through the registered callback, invoked
//! on the dispatcher thread.

mod access_point;
mod client;
mod dispatcher;
mod power;

pub mod config_management;
pub mod driver;
pub mod error;
pub mod events;
pub mod supplicant;
pub mod types;
pub mod util;

pub use crate::{
    config_management::{NetworkProfile, Security, SecurityConfig, MAX_KNOWN_NETWORKS},
    dispatcher::{BG_SCAN_LIMIT, RECONNECT_LIMIT, RESCAN_LIMIT},
    error::{Error, Result},
    types::{
        ApConnectionState, BssRole, Bssid, ConnectionState, Ipv4Config, PsConfiguration, PsMode,
        Ssid, WlanEvent,
    },
    util::listener::{EventCallback, ScanCallback},
};

use {
    crate::{
        dispatcher::{Dispatcher, ManagerStatus, Shared, WlanCore},
        driver::{BssDescription, WifiDriver},
        events::{Event, EventSink, ScanChannel, ScanOptions, ScanType, UserRequest, MAX_EVENTS},
        supplicant::{FirmwareSupplicant, Supplicant},
        types::{ApState, ClientState, HOST_SLEEP_CANCEL},
        util::{listener::Notifier, timer::create_timer},
    },
    log::{debug, info},
    parking_lot::Mutex,
    std::{
        sync::{mpsc, Arc},
        thread,
        time::Duration,
    },
};

/// How long a DTIM query waits for its directed scan to complete.
const DTIM_SCAN_WAIT: Duration = Duration::from_millis(500);

/// Dwell time of the passive DTIM probe.
const DTIM_SCAN_TIME_MS: u16 = 200;

/// User-facing handle to the connection manager. All methods are safe to
/// call from any task; anything that mutates connection state is forwarded
/// to the dispatcher through the event queue.
pub struct WlanManager {
    shared: Arc<Shared>,
    driver: Arc<dyn WifiDriver>,
    supplicant: Arc<dyn Supplicant>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WlanManager {
    /// Initializes the manager over a driver, using the firmware-hosted
    /// supplicant backend.
    pub fn init(driver: Arc<dyn WifiDriver>) -> Result<Self> {
        let supplicant = Arc::new(FirmwareSupplicant::new(driver.clone()));
        Self::init_with_supplicant(driver, supplicant)
    }

    /// Initializes the manager with a caller-supplied security backend.
    pub fn init_with_supplicant(
        driver: Arc<dyn WifiDriver>,
        supplicant: Arc<dyn Supplicant>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        {
            let mut core = shared.state.lock();
            core.sta_mac = driver.mac_address();
            core.ap_mac = driver.ap_mac_address();
            core.status = ManagerStatus::InitDone;
        }
        info!("WLAN firmware version: {}", driver.firmware_version());
        Ok(WlanManager { shared, driver, supplicant, thread: Mutex::new(None) })
    }

    /// Starts the dispatcher. `callback` receives every asynchronous event,
    /// always on the dispatcher thread.
    pub fn start(&self, callback: EventCallback) -> Result<()> {
        {
            let mut core = self.shared.state.lock();
            if !matches!(core.status, ManagerStatus::InitDone | ManagerStatus::Inactive) {
                return Err(Error::WrongState);
            }
            if core.running {
                return Err(Error::WrongState);
            }
            // A fresh session: profiles, counters and FSM states all reset.
            let sta_mac = core.sta_mac;
            let ap_mac = core.ap_mac;
            *core = WlanCore::new();
            core.sta_mac = sta_mac;
            core.ap_mac = ap_mac;
            core.status = ManagerStatus::InitDone;
        }

        let (tx, rx) = mpsc::sync_channel(MAX_EVENTS);
        let sink = EventSink::new(tx);
        *self.shared.sink.lock() = Some(sink.clone());
        self.driver.register_event_sink(sink.clone());

        let (timer, time_stream) = create_timer();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.driver),
            Arc::clone(&self.supplicant),
            timer,
            time_stream,
            Notifier::new(callback),
            sink,
            rx,
        );
        let handle = thread::Builder::new()
            .name("wlcmgr".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|_| Error::Fail)?;
        *self.thread.lock() = Some(handle);

        {
            let mut core = self.shared.state.lock();
            core.running = true;
            core.status = ManagerStatus::Activated;
        }
        Ok(())
    }

    /// Stops the dispatcher and joins its thread.
    pub fn stop(&self) -> Result<()> {
        {
            let mut core = self.shared.state.lock();
            if !core.running {
                return Err(Error::WrongState);
            }
            core.stop_request = true;
        }
        let _ = self.send_request(UserRequest::Stop);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        {
            let mut core = self.shared.state.lock();
            core.running = false;
            core.stop_request = false;
            if core.is_scan_lock {
                self.shared.scan_lock.release();
                core.is_scan_lock = false;
            }
        }
        *self.shared.sink.lock() = None;
        Ok(())
    }

    /// Tears the manager down. While running, the shutdown is performed on
    /// the dispatcher; otherwise it happens inline.
    pub fn deinit(&self) {
        let running = self.shared.state.lock().running;
        if running {
            let _ = self.send_request(UserRequest::Deinit);
        } else {
            self.shared.state.lock().status = ManagerStatus::Inactive;
        }
    }

    /// Adds a profile to the known-network store.
    pub fn add_network(&self, profile: NetworkProfile) -> Result<()> {
        let mut core = self.shared.state.lock();
        if profile.role == BssRole::Client
            && core.is_running()
            && !core.is_state(ClientState::Idle)
            && !core.is_state(ClientState::Associated)
            && !core.is_state(ClientState::Connected)
        {
            return Err(Error::WrongState);
        }
        let slot = core.networks.insert(profile)?;
        let stored = core.networks.get(slot).cloned().ok_or(Error::Fail)?;
        if self.supplicant.profile_added(&stored).is_err() {
            core.networks.evict(slot);
            return Err(Error::Fail);
        }
        Ok(())
    }

    /// Removes the named profile. Rejected while the profile backs the live
    /// station connection or the running soft-AP.
    pub fn remove_network(&self, name: &str) -> Result<()> {
        let mut core = self.shared.state.lock();
        if !core.is_running() {
            return Err(Error::WrongState);
        }
        let index = core.networks.position(name).ok_or(Error::Invalid)?;
        if core.cur_sta_idx == Some(index) && core.is_state(ClientState::Connected) {
            return Err(Error::WrongState);
        }
        if core.cur_ap_idx == Some(index) && core.ap_state == ApState::IpUp {
            return Err(Error::WrongState);
        }
        let profile = core.networks.get(index).cloned();
        core.networks.remove(index);
        if let Some(profile) = profile {
            self.supplicant.profile_removed(&profile);
        }
        Ok(())
    }

    pub fn network_count(&self) -> usize {
        self.shared.state.lock().networks.count()
    }

    /// Copy of the indexed profile with dynamically learned fields scrubbed.
    pub fn network_by_index(&self, index: usize) -> Option<NetworkProfile> {
        self.shared.state.lock().networks.get(index).map(|profile| profile.copy_out())
    }

    pub fn network_by_name(&self, name: &str) -> Option<NetworkProfile> {
        let core = self.shared.state.lock();
        let index = core.networks.position(name)?;
        core.networks.get(index).map(|profile| profile.copy_out())
    }

    /// The profile backing the current station session, including learned
    /// parameters. Requires an associated or connected session.
    pub fn current_network(&self) -> Result<NetworkProfile> {
        let core = self.shared.state.lock();
        if core.running
            && (core.is_state(ClientState::Connected) || core.is_state(ClientState::Associated))
        {
            return core.current_sta_profile().cloned().ok_or(Error::WrongState);
        }
        Err(Error::WrongState)
    }

    pub fn current_uap_network(&self) -> Result<NetworkProfile> {
        let core = self.shared.state.lock();
        if core.ap_state >= ApState::Started {
            return core
                .cur_ap_idx
                .and_then(|index| core.networks.get(index))
                .cloned()
                .ok_or(Error::WrongState);
        }
        Err(Error::WrongState)
    }

    /// Connects to the named network. Takes the scan lock (blocking until
    /// any in-flight scan completes) and enqueues the attempt.
    pub fn connect(&self, name: &str) -> Result<()> {
        let index = {
            let core = self.shared.state.lock();
            if !core.running {
                return Err(Error::WrongState);
            }
            if core.networks.count() == 0 || name.is_empty() {
                return Err(Error::Invalid);
            }
            core.networks.position(name).ok_or(Error::Invalid)?
        };

        debug!("taking the scan lock (connect scan)");
        self.shared.scan_lock.acquire();
        {
            let mut core = self.shared.state.lock();
            core.is_scan_lock = true;
            // Reset the retry budget; disconnect saturates it.
            core.reassoc_count = 0;
            core.roam_reassoc = false;
        }
        self.send_request(UserRequest::Connect { index }).map_err(|e| {
            self.release_scan_lock();
            e
        })
    }

    /// Re-runs selection and association for the current network without
    /// dropping the session state. Requires a connected station.
    pub fn reassociate(&self) -> Result<()> {
        let index = {
            let core = self.shared.state.lock();
            if !core.running {
                return Err(Error::WrongState);
            }
            if core.networks.count() == 0 {
                return Err(Error::Invalid);
            }
            if !core.is_state(ClientState::Connected) {
                return Err(Error::WrongState);
            }
            core.cur_sta_idx.ok_or(Error::WrongState)?
        };

        debug!("taking the scan lock (reassociate scan)");
        self.shared.scan_lock.acquire();
        {
            let mut core = self.shared.state.lock();
            core.is_scan_lock = true;
            core.roam_reassoc = true;
        }
        self.send_request(UserRequest::Connect { index }).map_err(|e| {
            let mut core = self.shared.state.lock();
            core.roam_reassoc = false;
            drop(core);
            self.release_scan_lock();
            e
        })
    }

    /// Aborts any connection attempt or session and returns to idle.
    pub fn disconnect(&self) -> Result<()> {
        if !self.shared.state.lock().running {
            return Err(Error::WrongState);
        }
        self.send_request(UserRequest::Disconnect)
    }

    /// Starts the named soft-AP network.
    pub fn start_network(&self, name: &str) -> Result<()> {
        let index = {
            let core = self.shared.state.lock();
            if name.is_empty() || core.networks.count() == 0 {
                return Err(Error::Invalid);
            }
            if core.is_ap_up() {
                return Err(Error::WrongState);
            }
            let index = core.networks.position(name).ok_or(Error::Invalid)?;
            let profile = core.networks.get(index).ok_or(Error::Invalid)?;
            if profile.role != BssRole::Ap || !profile.ssid_specific {
                return Err(Error::Invalid);
            }
            if profile.channel_specific && core.is_sta_connecting() {
                // A pinned channel cannot be honored next to a station
                // session; it must follow the station channel.
                return Err(Error::Invalid);
            }
            index
        };
        self.send_request(UserRequest::ApStart { index })
    }

    /// Stops the named soft-AP network.
    pub fn stop_network(&self, name: &str) -> Result<()> {
        {
            let mut core = self.shared.state.lock();
            if name.is_empty() || core.networks.count() == 0 {
                return Err(Error::Invalid);
            }
            let index = core.networks.position(name).ok_or(Error::Invalid)?;
            let profile = core.networks.get(index).ok_or(Error::Invalid)?;
            if profile.role != BssRole::Ap || !profile.ssid_specific {
                return Err(Error::Invalid);
            }
            core.ap_scan_channels_set = false;
        }
        self.driver.interface_down(BssRole::Ap);
        self.send_request(UserRequest::ApStop)
    }

    /// Scans for networks and reports the result count to `callback`.
    pub fn scan(&self, callback: ScanCallback) -> Result<()> {
        self.scan_with_options(ScanOptions::default(), callback)
    }

    /// Scan with explicit parameters.
    pub fn scan_with_options(&self, options: ScanOptions, callback: ScanCallback) -> Result<()> {
        {
            let core = self.shared.state.lock();
            if !core.is_running() || !core.is_scanning_allowed() {
                return Err(Error::WrongState);
            }
        }
        debug!("taking the scan lock (user scan)");
        self.shared.scan_lock.acquire();
        self.shared.state.lock().is_scan_lock = true;
        self.send_request(UserRequest::Scan { options, callback }).map_err(|e| {
            self.release_scan_lock();
            e
        })
    }

    /// One entry of the most recent scan-result set.
    pub fn scan_result(&self, index: usize) -> Result<BssDescription> {
        self.driver.scan_result(index).ok_or(Error::Invalid)
    }

    pub fn connection_state(&self) -> Result<ConnectionState> {
        let core = self.shared.state.lock();
        if !core.is_running() {
            return Err(Error::WrongState);
        }
        let current = if core.is_user_scanning() { core.return_to } else { core.sta_state };
        Ok(match current {
            ClientState::Scanning => ConnectionState::Scanning,
            ClientState::Associating => ConnectionState::Associating,
            ClientState::Associated => ConnectionState::Associated,
            ClientState::RequestingAddress | ClientState::ObtainingAddress => {
                ConnectionState::Connecting
            }
            ClientState::Connected => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        })
    }

    pub fn uap_connection_state(&self) -> Result<ApConnectionState> {
        let core = self.shared.state.lock();
        if !core.running {
            return Err(Error::WrongState);
        }
        Ok(if core.is_ap_up() { ApConnectionState::Started } else { ApConnectionState::Stopped })
    }

    pub fn ps_mode(&self) -> PsConfiguration {
        let core = self.shared.state.lock();
        match (core.ieee_configured, core.deep_sleep_configured) {
            (true, true) => PsConfiguration::IeeeDeepSleep,
            (false, true) => PsConfiguration::DeepSleep,
            (true, false) => PsConfiguration::Ieee,
            (false, false) => PsConfiguration::Active,
        }
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.shared.state.lock().sta_mac
    }

    pub fn uap_mac_address(&self) -> [u8; 6] {
        self.shared.state.lock().ap_mac
    }

    /// Address configuration of the connected station interface.
    pub fn address(&self) -> Result<Ipv4Config> {
        let core = self.shared.state.lock();
        if !core.is_state(ClientState::Connected) {
            return Err(Error::WrongState);
        }
        let mut ip = core.current_sta_profile().ok_or(Error::WrongState)?.ip;
        if let Some(address) = self.driver.interface_address(BssRole::Client) {
            ip.address = address;
        }
        Ok(ip)
    }

    /// Enables IEEE power save with the given wakeup-condition mask.
    pub fn ieee_power_save_on(&self, wakeup_conditions: u32) -> Result<()> {
        {
            let mut core = self.shared.state.lock();
            if !core.running {
                return Err(Error::WrongState);
            }
            if core.is_ap_up() {
                return Err(Error::WrongState);
            }
            if core.ieee_configured {
                debug!("ieee ps already enabled");
                return Err(Error::WrongState);
            }
            core.wakeup_conditions = wakeup_conditions;
        }
        self.send_request(UserRequest::PsEnter { mode: PsMode::Ieee })
    }

    pub fn ieee_power_save_off(&self) -> Result<()> {
        if !self.shared.state.lock().ieee_configured {
            debug!("ieee ps not enabled yet");
            return Err(Error::WrongState);
        }
        self.send_request(UserRequest::PsExit { mode: PsMode::Ieee })
    }

    pub fn deep_sleep_on(&self) -> Result<()> {
        {
            let core = self.shared.state.lock();
            if !core.running {
                return Err(Error::WrongState);
            }
            if core.is_ap_up() {
                return Err(Error::WrongState);
            }
            if core.deep_sleep_configured {
                debug!("deep sleep ps already enabled");
                return Err(Error::WrongState);
            }
        }
        self.send_request(UserRequest::PsEnter { mode: PsMode::DeepSleep })
    }

    pub fn deep_sleep_off(&self) -> Result<()> {
        if !self.shared.state.lock().deep_sleep_configured {
            debug!("deep sleep ps not enabled yet");
            return Err(Error::WrongState);
        }
        self.send_request(UserRequest::PsExit { mode: PsMode::DeepSleep })
    }

    /// Enables or disables the background roaming policy. While enabled, an
    /// RSSI-low report from the firmware starts a background roam attempt
    /// instead of being forwarded to the callback.
    pub fn set_roaming(&self, enabled: bool) -> Result<()> {
        let mut core = self.shared.state.lock();
        if !core.running {
            return Err(Error::WrongState);
        }
        core.roaming_enabled = enabled;
        Ok(())
    }

    /// Requests host-sleep configuration with a wakeup-condition mask.
    pub fn send_host_sleep(&self, wakeup_conditions: u32) -> Result<()> {
        {
            let core = self.shared.state.lock();
            if !core.running {
                return Err(Error::WrongState);
            }
            if core.hs_configured
                && wakeup_conditions != HOST_SLEEP_CANCEL
                && core.hs_wakeup_condition != power::map_wakeup_conditions(wakeup_conditions)
            {
                return Err(Error::AlreadyConfigured);
            }
        }
        self.send_request(UserRequest::HostSleep { conditions: wakeup_conditions })
    }

    /// DTIM period of the connected BSS, learned through a directed passive
    /// scan. Returns 0 when it cannot be determined within the wait budget.
    /// Must not be called from the event callback.
    pub fn dtim_period(&self) -> u8 {
        let (bssid, ssid, channel) = {
            let core = self.shared.state.lock();
            if !core.is_state(ClientState::Connected) {
                return 0;
            }
            match core.current_sta_profile() {
                Some(profile) => (profile.bssid, profile.ssid.clone(), profile.channel),
                None => return 0,
            }
        };

        let (tx, rx) = mpsc::channel();
        let driver = Arc::clone(&self.driver);
        let callback: ScanCallback = Box::new(move |count| {
            let dtim = if count > 0 {
                driver.scan_result(0).map(|bss| bss.dtim_period).unwrap_or(0)
            } else {
                0
            };
            let _ = tx.send(dtim);
        });
        let options = ScanOptions {
            ssid: Some(ssid),
            ssid2: None,
            bssid: Some(bssid),
            channels: vec![ScanChannel {
                channel,
                scan_type: ScanType::Passive,
                scan_time_ms: DTIM_SCAN_TIME_MS,
            }],
            num_probes: 0,
        };
        if self.scan_with_options(options, callback).is_err() {
            return 0;
        }
        rx.recv_timeout(DTIM_SCAN_WAIT).unwrap_or(0)
    }

    fn send_request(&self, request: UserRequest) -> Result<()> {
        let sink = self.shared.sink.lock();
        match sink.as_ref() {
            Some(sink) => {
                if sink.send(Event::User(request)) {
                    Ok(())
                } else {
                    Err(Error::Fail)
                }
            }
            None => Err(Error::WrongState),
        }
    }

    fn release_scan_lock(&self) {
        let mut core = self.shared.state.lock();
        if core.is_scan_lock {
            self.shared.scan_lock.release();
            core.is_scan_lock = false;
        }
    }
}
