// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The soft-AP state machine: start/stop lifecycle, channel inheritance and
//! client notifications.

use {
    crate::{
        dispatcher::Context,
        driver::ApStartRequest,
        events::{UserRequest, WifiEvent},
        types::{AddrType, ApState, BssRole, ClientState, WlanEvent},
    },
    log::{debug, warn},
};

pub(crate) fn handle_request(ctx: &mut Context<'_>, request: UserRequest) {
    match request {
        UserRequest::ApStart { index } => {
            ctx.core.cur_ap_idx = Some(index);
            ctx.core.scan_count = 0;
            let _ = do_start(ctx, index);
        }
        UserRequest::ApStop => {
            if ctx.core.ap_state < ApState::Configured {
                return;
            }
            do_stop(ctx);
        }
        _ => {}
    }
}

pub(crate) fn handle_event(ctx: &mut Context<'_>, event: WifiEvent) {
    match event {
        WifiEvent::ApStarted { success } => process_started_event(ctx, success),
        WifiEvent::ApClientAssoc { mac } => ctx.notify(WlanEvent::ApClientAssoc(mac)),
        WifiEvent::ApClientConn { mac } => ctx.notify(WlanEvent::ApClientConn(mac)),
        WifiEvent::ApClientDeauth { mac } => ctx.notify(WlanEvent::ApClientDisassoc(mac)),
        WifiEvent::ApStopped => ctx.notify(WlanEvent::ApStopped),
        WifiEvent::ApAddrConfig { success } => process_addr_config_event(ctx, success),
        other => warn!("got unknown AP message: {:?}", other),
    }
}

/// Resolves the operating channel and hands the configuration to the
/// firmware. Auto-channel inherits the client channel when a session is up,
/// otherwise the regulatory channel list seeds automatic selection.
fn do_start(ctx: &mut Context<'_>, index: usize) -> Result<(), ()> {
    let (mut channel, channel_specific, acs_band) = match ctx.core.networks.get(index) {
        Some(profile) => (profile.channel, profile.channel_specific, profile.acs_band),
        None => return Err(()),
    };

    if !channel_specific {
        channel = 0;
        let sta_up = ctx.core.is_state(ClientState::Connected)
            || ctx.core.is_state(ClientState::Associated);
        if ctx.core.running && sta_up {
            if let Some(profile) = ctx.core.cur_sta_idx.and_then(|i| ctx.core.networks.get(i)) {
                channel = profile.channel;
            }
        } else if !ctx.core.ap_scan_channels_set {
            let active = ctx.driver.active_channel_list(acs_band);
            if !active.is_empty() {
                ctx.core.ap_scan_channels = active;
                ctx.core.ap_scan_channels_set = true;
            }
        }
    } else {
        let active = ctx.driver.active_channel_list(acs_band);
        if !active.contains(&channel) {
            warn!("configured soft-AP channel not allowed");
            ctx.notify(WlanEvent::ApStartFailed);
            return Err(());
        }
    }

    debug!("starting our own network");

    let request = {
        let profile = match ctx.core.networks.get(index) {
            Some(profile) => profile,
            None => return Err(()),
        };
        ApStartRequest {
            ssid: profile.ssid.clone(),
            mac: ctx.core.ap_mac,
            security: profile.security.security,
            psk: profile.security.psk.clone(),
            password: profile.security.password.clone(),
            channel,
            scan_channels: ctx.core.ap_scan_channels.clone(),
            pmf_capable: profile.security.pmf_capable,
            pmf_required: profile.security.pmf_required,
        }
    };

    if let Err(e) = ctx.driver.start_ap(&request) {
        warn!("soft-AP start failed, giving up: {}", e);
        ctx.notify(WlanEvent::ApStartFailed);
        return Err(());
    }

    ctx.core.ap_state = ApState::Configured;
    Ok(())
}

fn do_stop(ctx: &mut Context<'_>) {
    debug!("stopping our own network");
    if let Err(e) = ctx.driver.stop_ap() {
        warn!("soft-AP stop failed, giving up: {}", e);
        ctx.notify(WlanEvent::ApStopFailed);
        return;
    }
    ctx.core.ap_state = ApState::Initializing;
}

fn process_started_event(ctx: &mut Context<'_>, success: bool) {
    if ctx.core.ap_state != ApState::Configured {
        warn!("ignoring start event as the soft-AP is not in configured state");
        return;
    }
    if !success {
        ctx.notify(WlanEvent::ApStartFailed);
        return;
    }

    let ap_mac = ctx.core.ap_mac;
    let ip = match ctx.core.cur_ap_idx.and_then(|i| ctx.core.networks.get_mut(i)) {
        Some(profile) => {
            if !profile.bssid_specific {
                profile.bssid = crate::types::Bssid(ap_mac);
            }
            profile.ip
        }
        None => return,
    };

    match ctx.driver.configure_address(BssRole::Ap, &ip) {
        Ok(()) => ctx.core.ap_state = ApState::Started,
        Err(e) => {
            warn!("TCP/IP stack setup failed: {}", e);
            ctx.notify(WlanEvent::AddressFailed);
        }
    }
}

fn process_addr_config_event(ctx: &mut Context<'_>, success: bool) {
    if ctx.core.ap_state != ApState::Started {
        warn!("ignoring address config event as the soft-AP is not in started state");
        return;
    }

    let static_ip = ctx
        .core
        .cur_ap_idx
        .and_then(|i| ctx.core.networks.get(i))
        .map(|profile| profile.ip.addr_type == AddrType::Static)
        .unwrap_or(false);

    if success && static_ip {
        ctx.core.ap_state = ApState::IpUp;
        ctx.notify(WlanEvent::ApSuccess);
    } else {
        ctx.notify(WlanEvent::AddressFailed);
        ctx.core.ap_state = ApState::Initializing;
    }
}
