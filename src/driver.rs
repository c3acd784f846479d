// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Command surface the connection manager drives and the descriptor types it
//! reads back. The firmware driver and the IP stack sit behind this trait;
//! completions and asynchronous notifications arrive through the registered
//! `EventSink`.

use {
    crate::{
        config_management::Security,
        events::{BaToken, BlockAckAction, EventSink, ScanChannel},
        types::{Bssid, BssRole, CipherSuite, Ipv4Config, OweMode, Ssid},
    },
    anyhow::Error,
    std::net::Ipv4Addr,
};

/// Security and capability bits advertised by a scanned BSS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BssSecurityInfo {
    pub wep: bool,
    pub wpa: bool,
    pub wpa2: bool,
    pub wpa2_sha256: bool,
    pub wpa3_sae: bool,
    pub owe: bool,
    pub ft_1x: bool,
    pub ft_psk: bool,
    pub ft_sae: bool,
}

impl BssSecurityInfo {
    pub fn any(&self) -> bool {
        self.wep || self.wpa || self.wpa2 || self.wpa2_sha256 || self.wpa3_sae
    }
}

/// OWE transition-mode information carried in a scan result.
#[derive(Clone, Debug, PartialEq)]
pub struct OweTransition {
    pub mode: OweMode,
    pub ssid: Ssid,
}

/// One scanned basic service set.
#[derive(Clone, Debug, PartialEq)]
pub struct BssDescription {
    pub bssid: Bssid,
    pub ssid: Ssid,
    pub channel: u8,
    /// Signal strength in dBm; numerically greater is stronger.
    pub rssi_dbm: i8,
    pub beacon_period: u16,
    pub dtim_period: u8,
    pub security: BssSecurityInfo,
    pub pmf_capable: bool,
    pub pmf_required: bool,
    pub wpa_mcast_cipher: CipherSuite,
    pub wpa_ucast_cipher: CipherSuite,
    pub rsn_mcast_cipher: CipherSuite,
    pub rsn_ucast_cipher: CipherSuite,
    pub ht_present: bool,
    pub vht_present: bool,
    pub mobility_domain: Option<u16>,
    pub neighbor_report_supported: bool,
    pub bss_transition_supported: bool,
    pub mbo_assoc_disallowed: bool,
    pub owe_transition: Option<OweTransition>,
}

/// Scan command handed to the firmware.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanCommand {
    pub bssid: Option<Bssid>,
    pub ssid: Option<Ssid>,
    pub ssid2: Option<Ssid>,
    pub channels: Vec<ScanChannel>,
    pub num_probes: u8,
    pub scan_chan_gap_ms: u16,
    /// Directed probe for networks that beacon an empty SSID.
    pub hidden: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssociateRequest {
    pub bssid: Bssid,
    pub security: Security,
    /// The selected pairwise cipher is TKIP rather than CCMP.
    pub tkip: bool,
    pub owe_mode: Option<OweMode>,
    /// 802.11r fast transition within the current mobility domain.
    pub ft: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApStartRequest {
    pub ssid: Ssid,
    pub mac: [u8; 6],
    pub security: Security,
    pub psk: Vec<u8>,
    pub password: Vec<u8>,
    pub channel: u8,
    /// Candidate channels for automatic channel selection; empty means the
    /// firmware decides.
    pub scan_channels: Vec<u8>,
    pub pmf_capable: bool,
    pub pmf_required: bool,
}

/// Host-sleep configuration stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HsAction {
    Configure,
    Activate,
}

/// The lower Wi-Fi firmware driver plus the IP-stack shims the connection
/// manager calls into. At most one command is outstanding at a time; the
/// driver serializes its command path internally.
pub trait WifiDriver: Send + Sync {
    /// Registers the queue asynchronous driver events are posted to.
    fn register_event_sink(&self, sink: EventSink);

    /// Brings up the network interfaces. Completion is reported with an
    /// `InterfaceConfig` event.
    fn init_interfaces(&self) -> Result<(), Error>;

    fn mac_address(&self) -> [u8; 6];
    fn ap_mac_address(&self) -> [u8; 6];
    fn firmware_version(&self) -> String;

    /// Issues a scan. Results are reported with a `ScanResult` event and read
    /// back through `scan_result_count`/`scan_result`.
    fn scan(&self, command: &ScanCommand) -> Result<(), Error>;
    fn scan_result_count(&self) -> usize;
    fn scan_result(&self, index: usize) -> Option<BssDescription>;
    /// Arms a firmware background scan for the given SSID together with the
    /// RSSI monitor. Progress is reported with `BgScanReport`; exhaustion
    /// with `BgScanStopped`. The scan lock is not involved.
    fn configure_bg_scan(&self, ssid: &[u8]) -> Result<(), Error>;
    /// Flushes background-scan results into the scan table.
    fn query_bg_scan_results(&self) -> Result<(), Error>;

    fn associate(&self, request: &AssociateRequest) -> Result<(), Error>;
    fn deauthenticate(&self, bssid: &Bssid) -> Result<(), Error>;

    /// Key-material commands consumed by the firmware-hosted supplicant.
    fn install_wpa_psk(&self, role: BssRole, ssid: &[u8], psk: &[u8]) -> Result<(), Error>;
    fn install_wpa_pmk(
        &self,
        role: BssRole,
        ssid: &[u8],
        bssid: Option<&Bssid>,
        pmk: &[u8],
    ) -> Result<(), Error>;
    fn install_sae_password(&self, role: BssRole, ssid: &[u8], password: &[u8])
        -> Result<(), Error>;
    fn clear_wpa_psk(&self, role: BssRole, ssid: &[u8]) -> Result<(), Error>;
    fn set_wep_key(&self, key: &[u8], bssid: &Bssid) -> Result<(), Error>;

    fn start_ap(&self, request: &ApStartRequest) -> Result<(), Error>;
    fn stop_ap(&self) -> Result<(), Error>;

    /// Channels currently usable under the active regulatory configuration.
    fn active_channel_list(&self, acs_band: u8) -> Vec<u8>;
    /// 802.11d verdict for a single channel.
    fn channel_allowed(&self, channel: u8) -> bool;

    fn enter_ieee_power_save(&self) -> Result<(), Error>;
    fn exit_ieee_power_save(&self) -> Result<(), Error>;
    fn enter_deep_sleep(&self) -> Result<(), Error>;
    fn exit_deep_sleep(&self) -> Result<(), Error>;
    fn send_host_sleep_config(
        &self,
        role: BssRole,
        address: Ipv4Addr,
        action: HsAction,
        conditions: u32,
    ) -> Result<(), Error>;
    fn send_sleep_confirm(&self, role: BssRole);
    /// True while a bus transfer is outstanding; sleep confirms must be
    /// deferred until it drains.
    fn transfer_pending(&self) -> bool;
    fn set_transfer_pending(&self, pending: bool);

    fn set_pmf_config(&self, capable: bool, required: bool) -> Result<(), Error>;
    fn set_rssi_low_threshold(&self, threshold: u8);

    /// Requests address configuration from the IP stack. Completion arrives
    /// as `StaAddrConfig`/`ApAddrConfig`, DHCP progress as `DhcpConfig`.
    fn configure_address(&self, role: BssRole, config: &Ipv4Config) -> Result<(), Error>;
    fn interface_down(&self, role: BssRole);
    fn stop_dhcp(&self, role: BssRole);
    /// Address currently bound to the interface, if any.
    fn interface_address(&self, role: BssRole) -> Option<Ipv4Addr>;

    fn block_ack_response(&self, action: BlockAckAction, token: BaToken);
    fn process_mgmt_frame(&self, frame: &[u8]);

    /// Kicks off the hardware capability query issued once the interfaces are
    /// up. Completion is reported with a `GetHwSpec` event.
    fn query_hw_spec(&self) -> Result<(), Error>;
}
