// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Test doubles and assertion helpers shared by the unit tests.

use {
    crate::{
        driver::{
            ApStartRequest, AssociateRequest, BssDescription, BssSecurityInfo, HsAction,
            ScanCommand, WifiDriver,
        },
        events::{BaToken, BlockAckAction, EventSink},
        types::{BssRole, Bssid, CipherSuite, Ipv4Config, Ssid},
    },
    anyhow::{format_err, Error},
    parking_lot::Mutex,
    std::{
        net::Ipv4Addr,
        sync::atomic::{AtomicBool, Ordering},
    },
};

/// Macro to assert a value matches a variant, optionally binding and
/// returning parts of it.
///
/// ```
/// let foo = Foo::B(42);
/// assert_variant!(foo, Foo::B(_));
/// let value = assert_variant!(foo, Foo::B(value) => value);
/// ```
#[macro_export]
macro_rules! assert_variant {
    // Use custom formatting when panicking.
    ($test:expr, $variant:pat $( | $others:pat)* => $e:expr, $fmt:expr $(, $args:tt)* $(,)?) => {
        match $test {
            $variant $(| $others)* => $e,
            _ => panic!($fmt, $($args,)*),
        }
    };
    // Use default message when panicking.
    ($test:expr, $variant:pat $( | $others:pat)* => $e:expr $(,)?) => {
        match $test {
            $variant $(| $others)* => $e,
            other => panic!("unexpected variant: {:?}", other),
        }
    };
    // Custom error message.
    ($test:expr, $variant:pat $( | $others:pat)* , $fmt:expr $(, $args:tt)* $(,)?) => {
        $crate::assert_variant!($test, $variant $( | $others)* => {}, $fmt $(, $args)*)
    };
    // Default error message.
    ($test:expr, $variant:pat $( | $others:pat)* $(,)?) => {
        $crate::assert_variant!($test, $variant $( | $others)* => {})
    };
}

/// Every command the fake driver records for later assertion.
#[derive(Clone, Debug, PartialEq)]
pub enum DriverCall {
    InitInterfaces,
    Scan(ScanCommand),
    ConfigureBgScan { ssid: Ssid },
    QueryBgScanResults,
    Associate(AssociateRequest),
    Deauthenticate(Bssid),
    InstallPsk { role: BssRole, ssid: Ssid, psk: Vec<u8> },
    InstallPmk { role: BssRole, ssid: Ssid },
    InstallSaePassword { role: BssRole, ssid: Ssid, password: Vec<u8> },
    ClearPsk { role: BssRole, ssid: Ssid },
    SetWepKey,
    StartAp(ApStartRequest),
    StopAp,
    EnterIeeePs,
    ExitIeeePs,
    EnterDeepSleep,
    ExitDeepSleep,
    HostSleepConfig { role: BssRole, address: Ipv4Addr, action: HsAction, conditions: u32 },
    SleepConfirm(BssRole),
    SetPmfConfig { capable: bool, required: bool },
    SetRssiLowThreshold(u8),
    ConfigureAddress { role: BssRole, config: Ipv4Config },
    InterfaceDown(BssRole),
    StopDhcp(BssRole),
    BlockAck { action: BlockAckAction, token: BaToken },
    ProcessMgmtFrame,
    QueryHwSpec,
}

/// Scriptable in-memory driver. Commands are recorded; scan results and
/// failure injection are controlled by the test.
pub struct FakeDriver {
    pub calls: Mutex<Vec<DriverCall>>,
    pub scan_results: Mutex<Vec<BssDescription>>,
    pub sink: Mutex<Option<EventSink>>,
    pub active_channels: Mutex<Vec<u8>>,
    pub disallowed_channels: Mutex<Vec<u8>>,
    pub interface_address: Mutex<Option<Ipv4Addr>>,
    pub fail_scan: AtomicBool,
    pub fail_bg_scan: AtomicBool,
    pub fail_associate: AtomicBool,
    pub fail_start_ap: AtomicBool,
    pub fail_configure_address: AtomicBool,
    pub fail_host_sleep: AtomicBool,
    pub transfer_pending: AtomicBool,
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver {
            calls: Mutex::new(Vec::new()),
            scan_results: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            active_channels: Mutex::new((1..=11).collect()),
            disallowed_channels: Mutex::new(Vec::new()),
            interface_address: Mutex::new(None),
            fail_scan: AtomicBool::new(false),
            fail_bg_scan: AtomicBool::new(false),
            fail_associate: AtomicBool::new(false),
            fail_start_ap: AtomicBool::new(false),
            fail_configure_address: AtomicBool::new(false),
            fail_host_sleep: AtomicBool::new(false),
            transfer_pending: AtomicBool::new(false),
        }
    }

    pub fn take_calls(&self) -> Vec<DriverCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }

    fn fail_if(&self, flag: &AtomicBool, what: &str) -> Result<(), Error> {
        if flag.load(Ordering::SeqCst) {
            Err(format_err!("{} failed", what))
        } else {
            Ok(())
        }
    }
}

impl WifiDriver for FakeDriver {
    fn register_event_sink(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn init_interfaces(&self) -> Result<(), Error> {
        self.record(DriverCall::InitInterfaces);
        Ok(())
    }

    fn mac_address(&self) -> [u8; 6] {
        [0x02, 0x00, 0x00, 0xaa, 0xbb, 0x01]
    }

    fn ap_mac_address(&self) -> [u8; 6] {
        [0x02, 0x00, 0x00, 0xaa, 0xbb, 0x02]
    }

    fn firmware_version(&self) -> String {
        "fake-fw 1.0".to_string()
    }

    fn scan(&self, command: &ScanCommand) -> Result<(), Error> {
        self.record(DriverCall::Scan(command.clone()));
        self.fail_if(&self.fail_scan, "scan")
    }

    fn scan_result_count(&self) -> usize {
        self.scan_results.lock().len()
    }

    fn scan_result(&self, index: usize) -> Option<BssDescription> {
        self.scan_results.lock().get(index).cloned()
    }

    fn configure_bg_scan(&self, ssid: &[u8]) -> Result<(), Error> {
        self.record(DriverCall::ConfigureBgScan { ssid: ssid.to_vec() });
        self.fail_if(&self.fail_bg_scan, "bg scan config")
    }

    fn query_bg_scan_results(&self) -> Result<(), Error> {
        self.record(DriverCall::QueryBgScanResults);
        Ok(())
    }

    fn associate(&self, request: &AssociateRequest) -> Result<(), Error> {
        self.record(DriverCall::Associate(request.clone()));
        self.fail_if(&self.fail_associate, "associate")
    }

    fn deauthenticate(&self, bssid: &Bssid) -> Result<(), Error> {
        self.record(DriverCall::Deauthenticate(*bssid));
        Ok(())
    }

    fn install_wpa_psk(&self, role: BssRole, ssid: &[u8], psk: &[u8]) -> Result<(), Error> {
        self.record(DriverCall::InstallPsk { role, ssid: ssid.to_vec(), psk: psk.to_vec() });
        Ok(())
    }

    fn install_wpa_pmk(
        &self,
        role: BssRole,
        ssid: &[u8],
        _bssid: Option<&Bssid>,
        _pmk: &[u8],
    ) -> Result<(), Error> {
        self.record(DriverCall::InstallPmk { role, ssid: ssid.to_vec() });
        Ok(())
    }

    fn install_sae_password(
        &self,
        role: BssRole,
        ssid: &[u8],
        password: &[u8],
    ) -> Result<(), Error> {
        self.record(DriverCall::InstallSaePassword {
            role,
            ssid: ssid.to_vec(),
            password: password.to_vec(),
        });
        Ok(())
    }

    fn clear_wpa_psk(&self, role: BssRole, ssid: &[u8]) -> Result<(), Error> {
        self.record(DriverCall::ClearPsk { role, ssid: ssid.to_vec() });
        Ok(())
    }

    fn set_wep_key(&self, _key: &[u8], _bssid: &Bssid) -> Result<(), Error> {
        self.record(DriverCall::SetWepKey);
        Ok(())
    }

    fn start_ap(&self, request: &ApStartRequest) -> Result<(), Error> {
        self.record(DriverCall::StartAp(request.clone()));
        self.fail_if(&self.fail_start_ap, "start_ap")
    }

    fn stop_ap(&self) -> Result<(), Error> {
        self.record(DriverCall::StopAp);
        Ok(())
    }

    fn active_channel_list(&self, _acs_band: u8) -> Vec<u8> {
        self.active_channels.lock().clone()
    }

    fn channel_allowed(&self, channel: u8) -> bool {
        !self.disallowed_channels.lock().contains(&channel)
    }

    fn enter_ieee_power_save(&self) -> Result<(), Error> {
        self.record(DriverCall::EnterIeeePs);
        Ok(())
    }

    fn exit_ieee_power_save(&self) -> Result<(), Error> {
        self.record(DriverCall::ExitIeeePs);
        Ok(())
    }

    fn enter_deep_sleep(&self) -> Result<(), Error> {
        self.record(DriverCall::EnterDeepSleep);
        Ok(())
    }

    fn exit_deep_sleep(&self) -> Result<(), Error> {
        self.record(DriverCall::ExitDeepSleep);
        Ok(())
    }

    fn send_host_sleep_config(
        &self,
        role: BssRole,
        address: Ipv4Addr,
        action: HsAction,
        conditions: u32,
    ) -> Result<(), Error> {
        self.record(DriverCall::HostSleepConfig { role, address, action, conditions });
        self.fail_if(&self.fail_host_sleep, "host sleep config")
    }

    fn send_sleep_confirm(&self, role: BssRole) {
        self.record(DriverCall::SleepConfirm(role));
    }

    fn transfer_pending(&self) -> bool {
        self.transfer_pending.load(Ordering::SeqCst)
    }

    fn set_transfer_pending(&self, pending: bool) {
        self.transfer_pending.store(pending, Ordering::SeqCst);
    }

    fn set_pmf_config(&self, capable: bool, required: bool) -> Result<(), Error> {
        self.record(DriverCall::SetPmfConfig { capable, required });
        Ok(())
    }

    fn set_rssi_low_threshold(&self, threshold: u8) {
        self.record(DriverCall::SetRssiLowThreshold(threshold));
    }

    fn configure_address(&self, role: BssRole, config: &Ipv4Config) -> Result<(), Error> {
        self.record(DriverCall::ConfigureAddress { role, config: *config });
        self.fail_if(&self.fail_configure_address, "configure address")
    }

    fn interface_down(&self, role: BssRole) {
        self.record(DriverCall::InterfaceDown(role));
    }

    fn stop_dhcp(&self, role: BssRole) {
        self.record(DriverCall::StopDhcp(role));
    }

    fn interface_address(&self, _role: BssRole) -> Option<Ipv4Addr> {
        *self.interface_address.lock()
    }

    fn block_ack_response(&self, action: BlockAckAction, token: BaToken) {
        self.record(DriverCall::BlockAck { action, token });
    }

    fn process_mgmt_frame(&self, _frame: &[u8]) {
        self.record(DriverCall::ProcessMgmtFrame);
    }

    fn query_hw_spec(&self) -> Result<(), Error> {
        self.record(DriverCall::QueryHwSpec);
        Ok(())
    }
}

/// Baseline open BSS; tests tweak fields with struct update syntax.
pub fn fake_bss_description(ssid: &[u8], channel: u8, rssi_dbm: i8) -> BssDescription {
    BssDescription {
        bssid: Bssid([0x42, 0x42, 0x42, 0x42, 0x42, channel]),
        ssid: ssid.to_vec(),
        channel,
        rssi_dbm,
        beacon_period: 100,
        dtim_period: 2,
        security: BssSecurityInfo::default(),
        pmf_capable: false,
        pmf_required: false,
        wpa_mcast_cipher: CipherSuite::default(),
        wpa_ucast_cipher: CipherSuite::default(),
        rsn_mcast_cipher: CipherSuite::default(),
        rsn_ucast_cipher: CipherSuite::default(),
        ht_present: true,
        vht_present: false,
        mobility_domain: None,
        neighbor_report_supported: false,
        bss_transition_supported: false,
        mbo_assoc_disallowed: false,
        owe_transition: None,
    }
}

pub fn fake_wpa2_bss(ssid: &[u8], channel: u8, rssi_dbm: i8) -> BssDescription {
    let mut bss = fake_bss_description(ssid, channel, rssi_dbm);
    bss.security = BssSecurityInfo { wpa2: true, ..BssSecurityInfo::default() };
    bss.rsn_mcast_cipher = CipherSuite { ccmp: true, tkip: false };
    bss.rsn_ucast_cipher = CipherSuite { ccmp: true, tkip: false };
    bss
}

pub fn fake_wpa3_bss(ssid: &[u8], channel: u8, rssi_dbm: i8) -> BssDescription {
    let mut bss = fake_bss_description(ssid, channel, rssi_dbm);
    bss.security = BssSecurityInfo { wpa3_sae: true, ..BssSecurityInfo::default() };
    bss.pmf_capable = true;
    bss.pmf_required = true;
    bss.rsn_mcast_cipher = CipherSuite { ccmp: true, tkip: false };
    bss.rsn_ucast_cipher = CipherSuite { ccmp: true, tkip: false };
    bss
}

