// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scan arbitration: exactly one scan is in flight at any time. Connect
//! scans feed the selection pipeline, user scans report a result count back
//! through the stashed callback.

use {
    crate::{
        client,
        dispatcher::{Context, SCAN_CHANNEL_GAP_MS},
        driver::ScanCommand,
        events::{ScanChannel, ScanOptions, ScanType, WifiEvent},
        types::{ClientState, OweMode},
        util::listener::ScanCallback,
    },
    log::{debug, error, warn},
};

/// Dwell time for a directed single-channel connect scan.
const DIRECTED_SCAN_TIME_MS: u16 = 120;

/// Issues the scan for a connect attempt and moves the client to Scanning.
/// A driver failure is turned into a failed scan-result event so the normal
/// rescan accounting applies.
pub(crate) fn do_scan(ctx: &mut Context<'_>, index: usize) {
    let (command, name) = {
        let profile = match ctx.core.networks.get(index) {
            Some(profile) => profile,
            None => return,
        };
        let mut command = ScanCommand::default();
        if profile.bssid_specific {
            command.bssid = Some(profile.bssid);
        }
        if profile.ssid_specific {
            command.ssid = Some(profile.ssid.clone());
        }
        let mut channel = 0;
        if profile.owe_trans_mode == Some(OweMode::Open) {
            command.ssid = Some(profile.owe_trans_ssid.clone());
            channel = profile.channel;
        }
        if profile.channel_specific {
            channel = profile.channel;
        }
        if channel != 0 {
            command.channels = vec![ScanChannel {
                channel,
                scan_type: ScanType::Active,
                scan_time_ms: DIRECTED_SCAN_TIME_MS,
            }];
        }
        command.scan_chan_gap_ms = SCAN_CHANNEL_GAP_MS;
        (command, profile.name.clone())
    };

    debug!("initiating scan for network \"{}\"", name);
    ctx.core.sta_state = ClientState::Scanning;

    match ctx.driver.scan(&command) {
        Ok(()) => ctx.core.scan_count += 1,
        Err(e) => {
            error!("scan failed: {}", e);
            ctx.sink.send_wifi(WifiEvent::ScanResult { success: false });
        }
    }
}

/// Directed probe of the channels collected from empty-SSID beacons.
pub(crate) fn do_hidden_scan(ctx: &mut Context<'_>, index: usize, channels: Vec<ScanChannel>) {
    let (command, name) = {
        let profile = match ctx.core.networks.get(index) {
            Some(profile) => profile,
            None => return,
        };
        let command = ScanCommand {
            bssid: if profile.bssid_specific { Some(profile.bssid) } else { None },
            ssid: if profile.ssid_specific { Some(profile.ssid.clone()) } else { None },
            ssid2: None,
            channels,
            num_probes: 0,
            scan_chan_gap_ms: SCAN_CHANNEL_GAP_MS,
            hidden: true,
        };
        (command, profile.name.clone())
    };

    debug!("initiating scan for hidden network \"{}\"", name);
    ctx.core.sta_state = ClientState::Scanning;

    if let Err(e) = ctx.driver.scan(&command) {
        error!("hidden scan failed: {}", e);
        ctx.sink.send_wifi(WifiEvent::ScanResult { success: false });
    }
}

/// User scan request, dequeued by the dispatcher. The scan lock is already
/// held by the requesting task; any early exit must release it.
pub(crate) fn process_scan_request(
    ctx: &mut Context<'_>,
    options: ScanOptions,
    callback: ScanCallback,
) {
    if !ctx.core.is_scanning_allowed() {
        warn!("ignoring scan request in invalid state");
        ctx.release_scan_lock();
        return;
    }

    let gap = if ctx.core.is_ap_up() || ctx.core.is_state(ClientState::Connected) {
        SCAN_CHANNEL_GAP_MS
    } else {
        0
    };
    let command = ScanCommand {
        bssid: options.bssid,
        ssid: options.ssid,
        ssid2: options.ssid2,
        channels: options.channels,
        num_probes: options.num_probes,
        scan_chan_gap_ms: gap,
        hidden: false,
    };

    debug!("initiating wlan-scan (return to {:?})", ctx.core.sta_state);
    match ctx.driver.scan(&command) {
        Ok(()) => {
            ctx.core.scan_cb = Some(callback);
            ctx.core.return_to = ctx.core.sta_state;
            ctx.core.sta_state = ClientState::ScanningUser;
        }
        Err(e) => {
            error!("wifi send scan cmd failed: {}", e);
            ctx.release_scan_lock();
        }
    }
}

/// Routes a scan-result event: selection pipeline for connect scans, the
/// user callback for user scans, plain lock release for everything else.
pub(crate) fn process_scan_result_event(ctx: &mut Context<'_>, _success: bool) {
    if ctx.core.sta_state == ClientState::Scanning {
        client::handle_scan_results(ctx);
        debug!("releasing scan lock (connect scan)");
    } else if ctx.core.sta_state == ClientState::ScanningUser {
        report_scan_results(ctx);
        ctx.core.sta_state = ctx.core.return_to;
        debug!("releasing scan lock (user scan)");
    } else {
        if ctx.core.roam_reassoc && ctx.core.sta_state == ClientState::Connected {
            // Background roam scan; no lock was taken for it.
            client::handle_scan_results(ctx);
            return;
        }
        debug!("releasing scan lock (stale scan)");
    }

    ctx.release_scan_lock();
}

/// Hands the result count to the stashed user callback. Invocation happens
/// on the dispatcher thread once the state lock has been dropped.
pub(crate) fn report_scan_results(ctx: &mut Context<'_>) {
    if let Some(callback) = ctx.core.scan_cb.take() {
        let count = ctx.driver.scan_result_count();
        *ctx.scan_report = Some((callback, count));
    }
}
