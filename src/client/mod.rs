// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The client (station) state machine: connect pipeline, address
//! acquisition, link-loss recovery and the reconnection policy.

pub(crate) mod network_selection;
pub(crate) mod scan;

use {
    crate::{
        config_management::Security,
        dispatcher::{Context, BG_SCAN_LIMIT, RECONNECT_LIMIT, RESCAN_LIMIT},
        driver::{AssociateRequest, BssDescription},
        error::Error,
        events::{TimerEvent, UserRequest, WifiEvent},
        power,
        types::{AddrType, BssRole, ClientState, WlanEvent},
    },
    log::{debug, warn},
};

/// 802.11 reason codes the pipeline reacts to specially.
const REASON_MIC_FAILURE: u16 = 14;
const REASON_FOURWAY_HANDSHAKE_TIMEOUT: u16 = 15;

pub(crate) fn handle_user_request(ctx: &mut Context<'_>, request: UserRequest) {
    match request {
        UserRequest::Connect { index } => {
            ctx.core.pending_assoc = None;
            if ctx.core.assoc_paused {
                ctx.core.pending_assoc = Some(index);
            } else {
                request_connect(ctx, index);
            }
        }
        UserRequest::Disconnect => request_disconnect(ctx),
        UserRequest::Scan { options, callback } => scan::process_scan_request(ctx, options, callback),
        UserRequest::SetRssiThreshold => {
            let threshold = ctx.core.rssi_low_threshold;
            ctx.driver.set_rssi_low_threshold(threshold);
        }
        UserRequest::HostSleep { conditions } => {
            if !power::send_host_sleep_config(ctx, conditions) {
                warn!("host sleep configuration failed");
            }
        }
        UserRequest::PsEnter { mode } => {
            if ctx.core.sta_state >= ClientState::Scanning
                && ctx.core.sta_state <= ClientState::ObtainingAddress
            {
                warn!("ignoring ps enter in invalid state");
                return;
            }
            power::enable_power_save(ctx, mode);
        }
        UserRequest::PsExit { mode } => power::disable_power_save(ctx, mode),
        // AP start/stop and deinit are routed before we get here.
        UserRequest::ApStart { .. }
        | UserRequest::ApStop
        | UserRequest::Deinit
        | UserRequest::Stop => {}
    }
}

pub(crate) fn handle_timer(ctx: &mut Context<'_>, event: TimerEvent) {
    match event {
        TimerEvent::AssocPause => {
            ctx.core.assoc_paused = false;
            if let Some(index) = ctx.core.pending_assoc.take() {
                ctx.sink.send(crate::events::Event::User(UserRequest::Connect { index }));
            }
        }
        TimerEvent::NeighborReq => {
            if ctx.core.neighbor_req {
                ctx.core.neighbor_req = false;
                ctx.sink.send(crate::events::Event::User(UserRequest::SetRssiThreshold));
            }
        }
    }
}

pub(crate) fn handle_wifi_event(ctx: &mut Context<'_>, event: WifiEvent) {
    match event {
        WifiEvent::ScanStart => debug!("got event: scan start"),
        WifiEvent::ScanResult { success } => {
            debug!("got event: scan result");
            scan::process_scan_result_event(ctx, success);
        }
        WifiEvent::Association { success } => {
            debug!("got event: association result: {}", if success { "success" } else { "failure" });
            process_association_event(ctx, success);
        }
        WifiEvent::Authentication { success, reason } => {
            debug!(
                "got event: authentication result: {}",
                if success { "success" } else { "failure" }
            );
            process_authentication_event(ctx, success, reason);
        }
        WifiEvent::Pmk { pmk } => process_pmk_event(ctx, pmk),
        WifiEvent::LinkLoss { reason } => {
            debug!("got event: link loss, code={}", reason);
            process_link_loss_event(ctx, reason);
        }
        WifiEvent::Disassociation => {
            debug!("got event: disassociation");
            process_disassoc_event(ctx);
        }
        WifiEvent::Deauthentication => debug!("got event: deauthentication"),
        WifiEvent::StaAddrConfig { success } => {
            debug!("got event: TCP configured");
            process_sta_addr_config_event(ctx, success);
        }
        WifiEvent::InterfaceConfig { success } => {
            debug!("got event: interfaces configured");
            process_net_if_config_event(ctx, success);
        }
        WifiEvent::DhcpConfig { success } => process_dhcp_config_event(ctx, success),
        WifiEvent::Ipv6Config { preferred } => process_ipv6_config_event(ctx, preferred),
        WifiEvent::ChanSwitchAnn => {
            debug!("got event: channel switch announcement");
            process_channel_switch_ann(ctx);
        }
        WifiEvent::ChanSwitch { channel } => {
            debug!("got event: channel switch");
            process_channel_switch(ctx, channel);
        }
        WifiEvent::Sleep => {
            debug!("got event: sleep");
            power::process_sleep_event(ctx);
        }
        WifiEvent::Awake => {
            debug!("got event: awake");
            power::process_awake_event(ctx);
        }
        WifiEvent::IeeePs { success, action } => {
            power::process_ieee_ps_response(ctx, success, action);
        }
        WifiEvent::DeepSleep { success, action } => {
            power::process_deep_sleep_response(ctx, success, action);
        }
        WifiEvent::HsConfig => {
            if ctx.core.hs_configured {
                power::process_hs_config_event(ctx);
            }
        }
        WifiEvent::HsActivated | WifiEvent::SleepConfirmDone => {
            ctx.core.hs_configured = false;
        }
        WifiEvent::BlockAck { action, token } => process_block_ack(ctx, action, token),
        WifiEvent::StaMacConfig { mac } => ctx.core.sta_mac = mac,
        WifiEvent::ApMacConfig { mac } => ctx.core.ap_mac = mac,
        WifiEvent::BgScanStopped => process_bg_scan_stopped(ctx),
        WifiEvent::BgScanReport => {
            debug!("got event: BG scan report");
            let _ = ctx.driver.query_bg_scan_results();
        }
        WifiEvent::MgmtFrame { frame } => ctx.driver.process_mgmt_frame(&frame),
        WifiEvent::NeighborListReport => {
            debug!("got event: neighbor list report");
            ctx.core.neighbor_req = true;
            ctx.timer.schedule(TimerEvent::NeighborReq);
        }
        WifiEvent::RssiLow => {
            debug!("got event: rssi low");
            process_rssi_low_event(ctx);
        }
        WifiEvent::GetHwSpec => {
            ctx.notify(WlanEvent::Initialized);
        }
        // AP events are routed to the AP machine by the dispatcher.
        _ => warn!("got unexpected message: {:?}", event),
    }
}

/// Scan results are in: match, pick the strongest candidate, associate.
/// Errors fall back to a rescan or, once the limit is reached, to a failed
/// connection.
pub(crate) fn handle_scan_results(ctx: &mut Context<'_>) {
    let index = match ctx.core.cur_sta_idx {
        Some(index) => index,
        None => return,
    };

    // We are associating unless something sends us back to Scanning or Idle.
    ctx.core.sta_state = ClientState::Associating;

    let count = ctx.driver.scan_result_count();
    let mut hidden_channels = Vec::new();
    let mut best: Option<BssDescription> = None;

    for i in 0..count {
        let result = match ctx.driver.scan_result(i) {
            Some(result) => result,
            None => continue,
        };
        let matches = {
            let profile = match ctx.core.networks.get(index) {
                Some(profile) => profile,
                None => return,
            };
            network_selection::network_matches_scan_result(
                profile,
                &result,
                ctx.core.hidden_scan_on,
                ctx.driver,
                &mut hidden_channels,
            )
        };
        if matches {
            best = network_selection::better_candidate(best, result);
        }
    }

    if let Some(best) = best {
        if ctx.core.roam_reassoc {
            let current_bssid = ctx.core.networks.get(index).map(|p| p.bssid);
            if current_bssid == Some(best.bssid) {
                // No better candidate than the one we are on.
                ctx.core.sta_state = ClientState::Connected;
                ctx.core.roam_reassoc = false;
                ctx.core.ft_bss = false;
                let threshold = ctx.core.rssi_low_threshold;
                ctx.driver.set_rssi_low_threshold(threshold);
                return;
            }
        }

        ctx.core.same_ess = false;
        let owe_open = {
            let profile = match ctx.core.networks.get_mut(index) {
                Some(profile) => profile,
                None => return,
            };
            if ctx.core.ft_bss
                && profile.mobility_domain.is_some()
                && profile.mobility_domain == best.mobility_domain
            {
                ctx.core.same_ess = true;
            }
            network_selection::update_network_params(profile, &best);
            profile.owe_trans_mode == Some(crate::types::OweMode::Open)
        };

        if owe_open {
            debug!("rescanning for the OWE transition ssid");
            scan::do_scan(ctx, index);
            return;
        }

        if start_association(ctx, index, &best).is_ok() {
            return;
        }
        // start_association already drove the failure path.
        return;
    } else if !hidden_channels.is_empty() {
        ctx.core.hidden_scan_on = true;
        scan::do_hidden_scan(ctx, index, hidden_channels);
        return;
    }

    if ctx.core.roam_reassoc {
        ctx.core.sta_state = ClientState::Connected;
        ctx.core.roam_reassoc = false;
        ctx.core.ft_bss = false;
        let threshold = ctx.core.rssi_low_threshold;
        ctx.driver.set_rssi_low_threshold(threshold);
        return;
    }

    if ctx.core.scan_count < RESCAN_LIMIT {
        debug!("network not found, re-scanning");
        ctx.core.hidden_scan_on = false;
        scan::do_scan(ctx, index);
    } else {
        debug!("rescan limit exceeded, giving up");
        do_connect_failed(ctx, WlanEvent::NetworkNotFound);
        if ctx.core.reassoc_control {
            request_reconnect(ctx);
        }
    }
}

/// Installs key material for the selected BSS with the supplicant backend
/// (or the firmware WEP key slot) ahead of the associate command.
fn configure_security(ctx: &mut Context<'_>, index: usize, bss: &BssDescription) -> Result<(), Error> {
    let (security, role, ssid, bssid, psk, password, pmk, ft_bss) = {
        let profile = ctx.core.networks.get(index).ok_or(Error::Invalid)?;
        (
            profile.security.security,
            profile.role,
            profile.ssid.clone(),
            profile.bssid,
            profile.security.psk.clone(),
            profile.security.password.clone(),
            profile.security.pmk,
            ctx.core.ft_bss,
        )
    };

    match security {
        Security::Wpa | Security::Wpa2 | Security::Wpa2Sha256 | Security::WpaWpa2Mixed => {
            debug!("configuring {} security", security);
            if let Some(pmk) = pmk {
                ctx.supplicant.add_pmk(role, &ssid, &pmk)?;
            } else if !ft_bss {
                ctx.supplicant.add_psk(role, &ssid, &psk)?;
            }
        }
        Security::Wpa3Sae | Security::Wpa2Wpa3Mixed => {
            if bss.security.wpa3_sae {
                debug!("configuring WPA3 SAE security");
                ctx.supplicant.add_sae_password(role, &ssid, &password)?;
            } else if bss.security.wpa2 {
                debug!("configuring WPA2 security");
                ctx.supplicant.add_psk(role, &ssid, &password)?;
            }
        }
        Security::WepOpen | Security::WepShared => {
            ctx.driver.set_wep_key(&psk, &bssid).map_err(|_| Error::Fail)?;
        }
        Security::None | Security::OweOnly | Security::Wildcard => {}
    }
    Ok(())
}

fn start_association(
    ctx: &mut Context<'_>,
    index: usize,
    bss: &BssDescription,
) -> Result<(), Error> {
    debug!("starting association");
    ctx.core.roam_reassoc = false;

    if configure_security(ctx, index, bss).is_err() {
        debug!("setting security params failed");
        do_connect_failed(ctx, WlanEvent::NetworkNotFound);
        return Err(Error::Fail);
    }

    let request = {
        let profile = ctx.core.networks.get(index).ok_or(Error::Invalid)?;
        AssociateRequest {
            bssid: bss.bssid,
            security: profile.security.security,
            tkip: profile.security.ucast_cipher.tkip,
            owe_mode: profile.owe_trans_mode,
            ft: ctx.core.ft_bss,
        }
    };
    ctx.core.ft_bss = false;

    if ctx.driver.associate(&request).is_err() {
        debug!("association failed");
        do_connect_failed(ctx, WlanEvent::NetworkNotFound);
        return Err(Error::Fail);
    }
    Ok(())
}

/// The connection attempt is over; release the wake-lock, go Idle and tell
/// the user why.
fn do_connect_failed(ctx: &mut Context<'_>, reason: WlanEvent) {
    ctx.core.connect_wakelock = None;

    if let Some(index) = ctx.core.cur_sta_idx {
        if let Some(profile) = ctx.core.networks.get_mut(index) {
            profile.owe_trans_mode = None;
            profile.owe_trans_ssid.clear();
        }
    }

    debug!("connection attempt failed: {:?}", reason);
    if ctx.core.sta_state == ClientState::ScanningUser {
        ctx.core.return_to = ClientState::Idle;
    }
    ctx.core.sta_state = ClientState::Idle;
    ctx.notify(reason);
}

pub(crate) fn request_connect(ctx: &mut Context<'_>, index: usize) {
    ctx.core.connect_wakelock = Some(ctx.wake_lock.acquire());

    let (pmf_capable, pmf_required, role) = match ctx.core.networks.get(index) {
        Some(profile) => (profile.security.pmf_capable, profile.security.pmf_required, profile.role),
        None => {
            ctx.release_scan_lock();
            ctx.notify(WlanEvent::ConnectFailed);
            return;
        }
    };
    let _ = ctx.driver.set_pmf_config(pmf_capable, pmf_required);

    if !ctx.core.roam_reassoc && ctx.core.sta_state >= ClientState::Associating {
        if role == BssRole::Client {
            debug!("deauthenticating before attempting new connection");
            if let Some(bssid) = ctx.core.current_sta_bssid() {
                let _ = ctx.driver.deauthenticate(&bssid);
            }
        }
    }

    debug!(
        "starting {} to network {}",
        if ctx.core.roam_reassoc { "reassociation" } else { "connection" },
        index
    );

    if do_connect(ctx, index).is_err() {
        ctx.release_scan_lock();
        ctx.notify(WlanEvent::ConnectFailed);
    }
}

fn do_connect(ctx: &mut Context<'_>, index: usize) -> Result<(), Error> {
    {
        let profile = ctx.core.networks.get_mut(index).ok_or(Error::Invalid)?;
        if profile.role != BssRole::Client {
            return Err(Error::Invalid);
        }
        profile.owe_trans_mode = None;
    }
    ctx.core.cur_sta_idx = Some(index);
    ctx.core.scan_count = 0;
    scan::do_scan(ctx, index);
    Ok(())
}

pub(crate) fn request_disconnect(ctx: &mut Context<'_>) {
    ctx.driver.stop_dhcp(BssRole::Client);
    ctx.driver.interface_down(BssRole::Client);

    if ctx.core.sta_state == ClientState::Initializing || ctx.core.is_state(ClientState::Idle) {
        ctx.driver.set_transfer_pending(false);
        ctx.core.connect_wakelock = None;
        return;
    }

    if ctx.core.is_user_scanning() && ctx.core.return_to != ClientState::Idle {
        // Mid user-scan: tear the connection state down now, deliver the
        // scan to its callback when it completes.
        if ctx.core.return_to >= ClientState::Associating {
            if let Some(bssid) = ctx.core.current_sta_bssid() {
                let _ = ctx.driver.deauthenticate(&bssid);
            }
            ctx.core.return_to = ClientState::Idle;
            ctx.core.ipv4_state = ClientState::Idle;
            ctx.core.ipv6_state = ClientState::Idle;
        }
    } else if ctx.core.sta_state >= ClientState::Associating {
        if let Some(bssid) = ctx.core.current_sta_bssid() {
            let _ = ctx.driver.deauthenticate(&bssid);
        }
        ctx.release_scan_lock();
        ctx.core.sta_state = ClientState::Idle;
        ctx.core.ipv4_state = ClientState::Idle;
        ctx.core.ipv6_state = ClientState::Idle;
    } else if ctx.core.sta_state == ClientState::Scanning {
        ctx.release_scan_lock();
        ctx.core.sta_state = ClientState::Idle;
        ctx.core.ipv4_state = ClientState::Idle;
        ctx.core.ipv6_state = ClientState::Idle;
    }

    ctx.notify(WlanEvent::UserDisconnect);

    if ctx.core.reassoc_control && ctx.core.reassoc_request {
        // Saturate the counters so in-flight retries die out.
        ctx.core.scan_count = RESCAN_LIMIT;
        ctx.core.reassoc_count = RECONNECT_LIMIT;
        ctx.core.reassoc_request = false;
    }

    ctx.core.connect_wakelock = None;
    ctx.driver.set_transfer_pending(false);
}

pub(crate) fn request_reconnect(ctx: &mut Context<'_>) {
    let index = match ctx.core.cur_sta_idx {
        Some(index) => index,
        None => return,
    };

    ctx.core.reassoc_request = true;
    if ctx.core.reassoc_count < RECONNECT_LIMIT {
        ctx.core.reassoc_count += 1;
        debug!("reconnect attempt #{}", ctx.core.reassoc_count);
        request_connect(ctx, index);
    } else {
        debug!("reconnection failed, giving up");
        ctx.core.reassoc_request = false;
        ctx.core.reassoc_count = 0;
        ctx.notify(WlanEvent::ConnectFailed);
        request_disconnect(ctx);
    }
}

fn process_association_event(ctx: &mut Context<'_>, success: bool) {
    // Only relevant while an associate command is in flight.
    if !ctx.core.is_state(ClientState::Associating) {
        debug!("ignoring association result event");
        return;
    }
    if success {
        ctx.core.sta_state = ClientState::Associated;
        ctx.core.scan_count = 0;
    } else if ctx.core.scan_count < RESCAN_LIMIT {
        debug!("association failed, re-scanning");
        if let Some(index) = ctx.core.cur_sta_idx {
            scan::do_scan(ctx, index);
        }
    } else {
        do_connect_failed(ctx, WlanEvent::NetworkNotFound);
        if ctx.core.reassoc_control {
            request_reconnect(ctx);
        }
    }
}

fn process_pmk_event(ctx: &mut Context<'_>, pmk: [u8; 32]) {
    let (role, ssid) = match ctx.core.cur_sta_idx.and_then(|i| ctx.core.networks.get_mut(i)) {
        Some(profile) => {
            profile.security.pmk = Some(pmk);
            (profile.role, profile.ssid.clone())
        }
        None => return,
    };
    if role == BssRole::Client {
        let _ = ctx.supplicant.add_pmk(role, &ssid, &pmk);
    }
}

fn process_authentication_event(ctx: &mut Context<'_>, success: bool, reason: Option<u16>) {
    let in_pipeline = ctx.core.is_state(ClientState::Associating)
        || ctx.core.is_state(ClientState::Associated)
        || ctx.core.is_state(ClientState::RequestingAddress)
        || ctx.core.is_state(ClientState::ObtainingAddress)
        || ctx.core.is_state(ClientState::Connected);
    if !in_pipeline {
        ctx.core.connect_wakelock = None;
        debug!("ignoring authentication event");
        return;
    }

    if success {
        let threshold = ctx.core.rssi_low_threshold;
        ctx.driver.set_rssi_low_threshold(threshold);
        ctx.notify(WlanEvent::AuthSuccess);
        ctx.core.bgscan_attempt = 0;

        if ctx.core.same_ess {
            // Fast path: reassociation within the ESS keeps the address.
            ctx.core.ft_bss = false;
            ctx.core.sta_state = ClientState::Connected;
            ctx.core.ipv4_state = ClientState::Connected;
            ctx.core.connect_wakelock = None;
            if ctx.core.reassoc_control && ctx.core.reassoc_request {
                ctx.core.reassoc_count = 0;
                ctx.core.reassoc_request = false;
            }
            let address = ctx.driver.interface_address(BssRole::Client);
            ctx.notify(WlanEvent::Success(address));
            return;
        }

        let ip = match ctx.core.current_sta_profile() {
            Some(profile) => profile.ip,
            None => return,
        };
        match ctx.driver.configure_address(BssRole::Client, &ip) {
            Ok(()) => {
                ctx.core.sta_state = ClientState::RequestingAddress;
                ctx.core.ipv4_state = ClientState::RequestingAddress;
                ctx.core.ipv6_state = ClientState::RequestingAddress;
            }
            Err(e) => {
                warn!("configure address failed: {}", e);
                do_connect_failed(ctx, WlanEvent::AddressFailed);
            }
        }
    } else {
        if reason == Some(REASON_MIC_FAILURE) {
            ctx.core.assoc_paused = true;
            ctx.timer.schedule(TimerEvent::AssocPause);
        }

        if ctx.core.is_state(ClientState::RequestingAddress)
            || ctx.core.is_state(ClientState::ObtainingAddress)
        {
            ctx.driver.stop_dhcp(BssRole::Client);
            ctx.driver.interface_down(BssRole::Client);
        }
        if ctx.core.is_state(ClientState::Associated) {
            if let Some(bssid) = ctx.core.current_sta_bssid() {
                let _ = ctx.driver.deauthenticate(&bssid);
            }
        }

        ctx.core.sta_state = ClientState::Idle;
        ctx.core.ipv4_state = ClientState::Idle;
        ctx.core.ipv6_state = ClientState::Idle;
        do_connect_failed(ctx, WlanEvent::NetworkAuthFailed);
        if ctx.core.reassoc_control {
            request_reconnect(ctx);
        }
    }
}

fn process_sta_addr_config_event(ctx: &mut Context<'_>, success: bool) {
    // Only relevant while we wait for the IP stack to acknowledge our
    // configuration request.
    if !ctx.core.is_state(ClientState::RequestingAddress) {
        ctx.core.connect_wakelock = None;
        debug!("ignoring TCP configure response");
        return;
    }
    if !success {
        do_connect_failed(ctx, WlanEvent::AddressFailed);
        return;
    }

    let addr_type = match ctx.core.current_sta_profile() {
        Some(profile) => profile.ip.addr_type,
        None => return,
    };
    match addr_type {
        AddrType::Static => {
            ctx.core.sta_state = ClientState::Connected;
            ctx.core.ipv4_state = ClientState::Connected;
            ctx.core.connect_wakelock = None;
            if ctx.core.reassoc_control && ctx.core.reassoc_request {
                ctx.core.reassoc_count = 0;
                ctx.core.reassoc_request = false;
            }
            ctx.notify(WlanEvent::Success(None));
            let threshold = ctx.core.rssi_low_threshold;
            ctx.driver.set_rssi_low_threshold(threshold);
        }
        AddrType::Dhcp | AddrType::LinkLocal => {
            ctx.core.sta_state = ClientState::ObtainingAddress;
            ctx.core.ipv4_state = ClientState::ObtainingAddress;
        }
    }
    ctx.core.ipv6_state = ClientState::ObtainingAddress;
}

fn process_dhcp_config_event(ctx: &mut Context<'_>, success: bool) {
    if ctx.core.ipv4_state == ClientState::ObtainingAddress {
        ctx.core.connect_wakelock = None;
        if !success {
            debug!("got event: DHCP failure");
            if ctx.core.ipv6_state == ClientState::Connected {
                // The interface is usable over IPv6.
                ctx.core.sta_state = ClientState::Connected;
                let address = ctx.driver.interface_address(BssRole::Client);
                ctx.notify(WlanEvent::Success(address));
                let threshold = ctx.core.rssi_low_threshold;
                ctx.driver.set_rssi_low_threshold(threshold);
            } else {
                do_connect_failed(ctx, WlanEvent::AddressFailed);
                if ctx.core.reassoc_control {
                    request_reconnect(ctx);
                }
            }
            return;
        }
        debug!("got event: DHCP success");
        ctx.core.sta_state = ClientState::Connected;
        ctx.core.ipv4_state = ClientState::Connected;
        if ctx.core.reassoc_control && ctx.core.reassoc_request {
            ctx.core.reassoc_count = 0;
            ctx.core.reassoc_request = false;
        }
        let address = ctx.driver.interface_address(BssRole::Client);
        ctx.notify(WlanEvent::Success(address));
        let threshold = ctx.core.rssi_low_threshold;
        ctx.driver.set_rssi_low_threshold(threshold);
    } else {
        // Lease renewal traffic on an established connection.
        if !success {
            if ctx.core.ipv6_state != ClientState::Connected
                && ctx.core.ipv4_state == ClientState::Connected
            {
                debug!("lease renewal failed, disconnecting");
                do_connect_failed(ctx, WlanEvent::AddressFailed);
                if ctx.core.reassoc_control {
                    request_reconnect(ctx);
                }
            }
            return;
        }
        ctx.notify(WlanEvent::AddressSuccess);
    }
}

fn process_ipv6_config_event(ctx: &mut Context<'_>, preferred: bool) {
    if preferred {
        if ctx.core.ipv6_state != ClientState::Connected {
            ctx.core.ipv6_state = ClientState::Connected;
            if ctx.core.reassoc_control && ctx.core.reassoc_request {
                ctx.core.reassoc_count = 0;
                ctx.core.reassoc_request = false;
            }
        }
    } else if ctx.core.ipv6_state >= ClientState::ObtainingAddress {
        ctx.core.ipv6_state = ClientState::ObtainingAddress;
    }
}

fn process_link_loss_event(ctx: &mut Context<'_>, reason: u16) {
    if ctx.core.is_state(ClientState::Idle) {
        debug!("ignoring link loss event in idle state");
        return;
    }

    ctx.driver.stop_dhcp(BssRole::Client);
    ctx.driver.interface_down(BssRole::Client);

    if ctx.core.is_state(ClientState::Connected) {
        ctx.core.ipv4_state = ClientState::Idle;
        ctx.core.ipv6_state = ClientState::Idle;
        if reason == REASON_MIC_FAILURE {
            // Successive MIC failures; leave with an explicit deauth.
            ctx.sink.send(crate::events::Event::User(UserRequest::Disconnect));
        }
        ctx.notify(WlanEvent::LinkLost);
        if ctx.core.is_user_scanning() {
            ctx.core.return_to = ClientState::Idle;
        } else {
            ctx.core.sta_state = ClientState::Idle;
        }
    } else {
        // Connection attempt lost the link mid-pipeline.
        ctx.driver.stop_dhcp(BssRole::Client);
        match reason {
            REASON_FOURWAY_HANDSHAKE_TIMEOUT => {
                do_connect_failed(ctx, WlanEvent::NetworkAuthFailed)
            }
            _ => do_connect_failed(ctx, WlanEvent::NetworkNotFound),
        }
    }

    if ctx.core.reassoc_control {
        request_reconnect(ctx);
    }
}

fn process_disassoc_event(ctx: &mut Context<'_>) {
    ctx.core.sta_state = ClientState::Idle;
    if ctx.core.is_user_scanning() {
        ctx.core.return_to = ClientState::Idle;
    }
    do_connect_failed(ctx, WlanEvent::NetworkAuthFailed);
    if ctx.core.reassoc_control {
        request_reconnect(ctx);
    }
}

fn process_channel_switch_ann(ctx: &mut Context<'_>) {
    if !ctx.core.is_state(ClientState::Connected) {
        return;
    }
    debug!("sending deauth because of channel switch");
    if let Some(bssid) = ctx.core.current_sta_bssid() {
        let _ = ctx.driver.deauthenticate(&bssid);
    }
    ctx.core.sta_state = ClientState::Idle;
    ctx.notify(WlanEvent::ChanSwitch);
}

fn process_channel_switch(ctx: &mut Context<'_>, channel: u8) {
    if ctx.core.is_ap_up() {
        if let Some(profile) = ctx.core.cur_ap_idx.and_then(|i| ctx.core.networks.get_mut(i)) {
            profile.channel = channel;
        }
    }
    if ctx.core.is_state(ClientState::Connected) {
        if let Some(profile) = ctx.core.cur_sta_idx.and_then(|i| ctx.core.networks.get_mut(i)) {
            profile.channel = channel;
        }
    }
}

fn process_block_ack(
    ctx: &mut Context<'_>,
    action: crate::events::BlockAckAction,
    token: crate::events::BaToken,
) {
    let active = ctx.core.is_state(ClientState::Associated)
        || ctx.core.is_state(ClientState::RequestingAddress)
        || ctx.core.is_state(ClientState::ObtainingAddress)
        || ctx.core.is_state(ClientState::Connected)
        || ctx.core.is_ap_up();
    if active {
        ctx.driver.block_ack_response(action, token);
    } else {
        debug!("ignoring block-ack event in disconnected state");
    }
}

fn process_bg_scan_stopped(ctx: &mut Context<'_>) {
    debug!("got event: BG scan stopped");
    if ctx.core.roam_reassoc && ctx.core.bgscan_attempt < BG_SCAN_LIMIT {
        ctx.core.bgscan_attempt += 1;
        ctx.core.roam_reassoc = false;
        ctx.sink.send_wifi(WifiEvent::RssiLow);
    } else {
        ctx.core.bgscan_attempt = 0;
        ctx.core.roam_reassoc = false;
        ctx.notify(WlanEvent::BgScanNetworkNotFound);
    }
}

fn process_rssi_low_event(ctx: &mut Context<'_>) {
    if ctx.core.roaming_enabled && ctx.core.is_state(ClientState::Connected) {
        if ctx.core.roam_reassoc {
            debug!("roaming already in progress");
            return;
        }
        let (ssid, ft) = match ctx.core.current_sta_profile() {
            Some(profile) => {
                (profile.ssid.clone(), profile.ft_psk || profile.ft_1x || profile.ft_sae)
            }
            None => return,
        };
        // Arm a firmware background scan; the session stays up and the scan
        // lock stays free. Results arrive through the bg-scan report path.
        ctx.core.roam_reassoc = true;
        ctx.core.ft_bss = ft;
        if ctx.driver.configure_bg_scan(&ssid).is_ok() {
            debug!("bgscan config successful");
            return;
        }
        ctx.core.roam_reassoc = false;
        ctx.core.ft_bss = false;
        let threshold = ctx.core.rssi_low_threshold;
        ctx.driver.set_rssi_low_threshold(threshold);
        return;
    }
    ctx.notify(WlanEvent::RssiLow);
}

fn process_net_if_config_event(ctx: &mut Context<'_>, success: bool) {
    if ctx.core.sta_state != ClientState::Initializing {
        debug!("ignoring interface configure response");
        return;
    }
    if !success {
        warn!("interfaces init failed");
        ctx.notify(WlanEvent::InitializationFailed);
        // Stay here until the user re-inits.
        return;
    }
    ctx.core.sta_state = ClientState::Idle;
    if let Err(e) = ctx.driver.query_hw_spec() {
        warn!("hardware capability query failed: {}", e);
    }
}
