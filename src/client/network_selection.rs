// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The match predicate applied to scan results and the parameter update that
//! fills a profile in from the selected BSS.

use {
    crate::{
        config_management::{NetworkProfile, Security},
        driver::{BssDescription, WifiDriver},
        events::{ScanChannel, ScanType},
        types::OweMode,
    },
    log::debug,
};

/// Dwell time for the directed probe of a hidden-SSID channel.
const HIDDEN_PROBE_TIME_MS: u16 = 150;

/// Checks whether the security settings of `profile` are compatible with
/// what the scanned BSS advertises.
pub(crate) fn security_profile_matches(profile: &NetworkProfile, bss: &BssDescription) -> bool {
    let sec = &bss.security;
    match profile.security.security {
        // Open profile: the BSS must not require anything.
        Security::None => {
            if let Some(owe) = &bss.owe_transition {
                return match owe.mode {
                    OweMode::Open => !owe.ssid.is_empty(),
                    OweMode::Owe => sec.wpa2,
                };
            }
            !(sec.wep || sec.wpa || sec.wpa2)
        }
        // 802.11n forbids WEP with HT associations.
        Security::WepOpen | Security::WepShared => {
            if bss.ht_present {
                debug!("WEP is not usable with HT associations");
                return false;
            }
            sec.wep
        }
        Security::WpaWpa2Mixed => sec.wpa || sec.wpa2,
        Security::Wpa2 | Security::Wpa2Sha256 => sec.wpa2 || sec.wpa2_sha256,
        Security::OweOnly => sec.owe,
        Security::Wpa => {
            if bss.wpa_ucast_cipher.tkip {
                debug!("TKIP-only networks require the WPA/WPA2 mixed profile type");
                return false;
            }
            sec.wpa
        }
        Security::Wpa3Sae | Security::Wpa2Wpa3Mixed => {
            if !profile.security.pmf_capable || !profile.security.pmf_required {
                debug!("PMF is mandatory for SAE associations");
                return false;
            }
            if profile.security.security == Security::Wpa3Sae {
                sec.wpa3_sae
            } else {
                sec.wpa3_sae || sec.wpa2
            }
        }
        Security::Wildcard => true,
    }
}

/// Full match predicate for one scan result. Channels beaconing an empty
/// SSID are collected into `hidden_channels` for a directed follow-up probe
/// unless that probe is already underway.
pub(crate) fn network_matches_scan_result(
    profile: &NetworkProfile,
    bss: &BssDescription,
    hidden_scan_on: bool,
    driver: &dyn WifiDriver,
    hidden_channels: &mut Vec<ScanChannel>,
) -> bool {
    if profile.channel_specific && profile.channel != bss.channel {
        debug!("channel mismatch: got {} expected {}", bss.channel, profile.channel);
        return false;
    }
    if profile.bssid_specific && profile.bssid != bss.bssid {
        debug!("bssid mismatch: got {}", bss.bssid);
        return false;
    }

    if profile.ssid_specific {
        if !hidden_scan_on && bss.ssid.iter().all(|b| *b == 0) {
            hidden_channels.push(ScanChannel {
                channel: bss.channel,
                scan_type: ScanType::Active,
                scan_time_ms: HIDDEN_PROBE_TIME_MS,
            });
        }
        let ssid_matches = !bss.ssid.is_empty() && profile.ssid == bss.ssid;
        let trans_matches = match &bss.owe_transition {
            Some(owe) if owe.mode == OweMode::Owe => profile.owe_trans_ssid == bss.ssid,
            _ => true,
        };
        if !ssid_matches || !trans_matches {
            debug!("ssid mismatch");
            return false;
        }
    }

    if profile.security_specific && !security_profile_matches(profile, bss) {
        debug!("security profile mismatch");
        return false;
    }

    // A profile carrying credentials never matches an AP advertising no
    // security at all.
    if !bss.security.any() && profile.security.has_credential() {
        debug!("secured profile cannot use an open network");
        return false;
    }

    if !driver.channel_allowed(bss.channel) {
        debug!("channel {} not allowed", bss.channel);
        return false;
    }

    if bss.mbo_assoc_disallowed {
        debug!("association disallowed by MBO");
        return false;
    }

    true
}

/// Picks the strongest matching descriptor. RSSI is signed strength in dBm;
/// numerically greater wins.
pub(crate) fn better_candidate(
    current: Option<BssDescription>,
    candidate: BssDescription,
) -> Option<BssDescription> {
    match current {
        None => Some(candidate),
        Some(best) => {
            if candidate.rssi_dbm > best.rssi_dbm {
                debug!(
                    "found better AP {} on channel {}",
                    candidate.bssid, candidate.channel
                );
                Some(candidate)
            } else {
                Some(best)
            }
        }
    }
}

/// Resolves a wildcard security profile to the strongest type the BSS
/// advertises.
fn strongest_advertised(bss: &BssDescription) -> Security {
    let sec = &bss.security;
    if sec.wpa3_sae && sec.wpa2 {
        Security::Wpa2Wpa3Mixed
    } else if sec.wpa3_sae {
        Security::Wpa3Sae
    } else if sec.wpa2 && sec.owe {
        Security::OweOnly
    } else if sec.wpa2 {
        Security::Wpa2
    } else if sec.wpa {
        Security::WpaWpa2Mixed
    } else if sec.wep {
        Security::WepOpen
    } else {
        Security::None
    }
}

/// Fills the profile in with everything the match discovered: unpinned
/// identity fields, capabilities, the fast-transition suite, and cipher
/// selection (CCMP preferred, RSN preferred over WPA).
pub(crate) fn update_network_params(profile: &mut NetworkProfile, bss: &BssDescription) {
    if !profile.security_specific {
        profile.security.security = strongest_advertised(bss);
        if profile.security.security == Security::Wpa2 {
            profile.security.pmf_required = false;
        }
    }

    profile.dot11n = bss.ht_present;
    profile.dot11ac = bss.vht_present;

    profile.mobility_domain = bss.mobility_domain;
    if bss.security.ft_1x {
        profile.ft_1x = true;
    } else if bss.security.ft_psk {
        profile.ft_psk = true;
    } else if bss.security.ft_sae {
        profile.ft_sae = true;
    }

    if !profile.channel_specific {
        profile.channel = bss.channel;
    }
    if !profile.bssid_specific {
        profile.bssid = bss.bssid;
    }
    if !profile.ssid_specific {
        profile.ssid = bss.ssid.clone();
    }

    profile.beacon_period = bss.beacon_period;
    profile.dtim_period = bss.dtim_period;

    match &bss.owe_transition {
        Some(owe) => {
            profile.owe_trans_mode = Some(owe.mode);
            if owe.mode == OweMode::Open {
                profile.owe_trans_ssid = owe.ssid.clone();
            }
        }
        None => profile.owe_trans_mode = None,
    }

    profile.neighbor_report_supported = bss.neighbor_report_supported;
    profile.bss_transition_supported = bss.bss_transition_supported;
    profile.security.pmf_required = profile.security.pmf_required || bss.pmf_required;

    match profile.security.security {
        Security::Wpa => {
            profile.security.mcast_cipher = bss.wpa_mcast_cipher;
            profile.security.ucast_cipher = bss.wpa_ucast_cipher;
        }
        Security::Wpa2 | Security::Wpa2Sha256 | Security::WpaWpa2Mixed => {
            profile.security.mcast_cipher = bss.rsn_mcast_cipher;
            profile.security.ucast_cipher = bss.rsn_ucast_cipher;
            let rsn_empty = !bss.rsn_mcast_cipher.ccmp
                && !bss.rsn_mcast_cipher.tkip
                && !bss.rsn_ucast_cipher.ccmp
                && !bss.rsn_ucast_cipher.tkip;
            if rsn_empty {
                profile.security.mcast_cipher = bss.wpa_mcast_cipher;
                profile.security.ucast_cipher = bss.wpa_ucast_cipher;
            }
            // CCMP wins when both are advertised.
            if profile.security.mcast_cipher.ccmp {
                profile.security.mcast_cipher.tkip = false;
            }
            if profile.security.ucast_cipher.ccmp {
                profile.security.ucast_cipher.tkip = false;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config_management::SecurityConfig,
            driver::{BssSecurityInfo, OweTransition},
            types::{BssRole, Bssid, CipherSuite},
            util::testing::{fake_bss_description, fake_wpa2_bss, fake_wpa3_bss, FakeDriver},
        },
    };

    fn wpa2_profile() -> NetworkProfile {
        let mut profile = NetworkProfile::new("net", BssRole::Client);
        profile.ssid = b"Home".to_vec();
        profile.ssid_specific = true;
        profile.security = SecurityConfig::wpa2(b"abcdefgh".to_vec());
        profile.security_specific = true;
        profile
    }

    #[test]
    fn open_profile_rejects_secured_bss() {
        let mut profile = wpa2_profile();
        profile.security = SecurityConfig::open();
        assert!(!security_profile_matches(&profile, &fake_wpa2_bss(b"Home", 6, -40)));
        assert!(security_profile_matches(&profile, &fake_bss_description(b"Home", 6, -40)));
    }

    #[test]
    fn wpa2_profile_matches_wpa2_and_sha256() {
        let profile = wpa2_profile();
        assert!(security_profile_matches(&profile, &fake_wpa2_bss(b"Home", 6, -40)));

        let mut sha256 = fake_bss_description(b"Home", 6, -40);
        sha256.security = BssSecurityInfo { wpa2_sha256: true, ..BssSecurityInfo::default() };
        assert!(security_profile_matches(&profile, &sha256));

        assert!(!security_profile_matches(&profile, &fake_bss_description(b"Home", 6, -40)));
    }

    #[test]
    fn wpa_profile_rejects_tkip_only() {
        let mut profile = wpa2_profile();
        profile.security.security = Security::Wpa;
        let mut bss = fake_bss_description(b"Home", 6, -40);
        bss.security = BssSecurityInfo { wpa: true, ..BssSecurityInfo::default() };
        bss.wpa_ucast_cipher = CipherSuite { ccmp: false, tkip: true };
        assert!(!security_profile_matches(&profile, &bss));

        bss.wpa_ucast_cipher = CipherSuite { ccmp: true, tkip: false };
        assert!(security_profile_matches(&profile, &bss));
    }

    #[test]
    fn wep_profile_rejects_ht_bss() {
        let mut profile = wpa2_profile();
        profile.security.security = Security::WepOpen;
        let mut bss = fake_bss_description(b"Home", 6, -40);
        bss.security = BssSecurityInfo { wep: true, ..BssSecurityInfo::default() };
        bss.ht_present = true;
        assert!(!security_profile_matches(&profile, &bss));
        bss.ht_present = false;
        assert!(security_profile_matches(&profile, &bss));
    }

    #[test]
    fn sae_requires_local_pmf() {
        let mut profile = wpa2_profile();
        profile.security = SecurityConfig::wpa3_sae(b"password".to_vec());
        assert!(security_profile_matches(&profile, &fake_wpa3_bss(b"Home", 6, -40)));

        profile.security.pmf_required = false;
        assert!(!security_profile_matches(&profile, &fake_wpa3_bss(b"Home", 6, -40)));
    }

    #[test]
    fn mixed_sae_matches_wpa2_bss() {
        let mut profile = wpa2_profile();
        profile.security.security = Security::Wpa2Wpa3Mixed;
        profile.security.pmf_capable = true;
        profile.security.pmf_required = true;
        assert!(security_profile_matches(&profile, &fake_wpa2_bss(b"Home", 6, -40)));
        assert!(security_profile_matches(&profile, &fake_wpa3_bss(b"Home", 6, -40)));
    }

    #[test]
    fn match_honors_channel_and_bssid_pins() {
        let driver = FakeDriver::new();
        let mut hidden = Vec::new();
        let mut profile = wpa2_profile();
        profile.channel_specific = true;
        profile.channel = 11;

        let bss = fake_wpa2_bss(b"Home", 6, -40);
        assert!(!network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));

        profile.channel = 6;
        assert!(network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));

        profile.bssid_specific = true;
        profile.bssid = Bssid([9; 6]);
        assert!(!network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));
    }

    #[test]
    fn match_collects_hidden_channels() {
        let driver = FakeDriver::new();
        let mut hidden = Vec::new();
        let profile = wpa2_profile();

        let mut bss = fake_wpa2_bss(b"", 3, -50);
        bss.ssid = vec![0; 4];
        assert!(!network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].channel, 3);
        assert_eq!(hidden[0].scan_type, ScanType::Active);

        // No further collection while the hidden probe runs.
        hidden.clear();
        assert!(!network_matches_scan_result(&profile, &bss, true, &driver, &mut hidden));
        assert!(hidden.is_empty());
    }

    #[test]
    fn match_rejects_disallowed_channel() {
        let driver = FakeDriver::new();
        driver.disallowed_channels.lock().push(6);
        let mut hidden = Vec::new();
        let profile = wpa2_profile();
        let bss = fake_wpa2_bss(b"Home", 6, -40);
        assert!(!network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));
    }

    #[test]
    fn match_rejects_open_ap_for_secured_profile() {
        let driver = FakeDriver::new();
        let mut hidden = Vec::new();
        // Wildcard security but credentials present.
        let mut profile = wpa2_profile();
        profile.security_specific = false;
        profile.security.security = Security::Wildcard;
        let bss = fake_bss_description(b"Home", 6, -40);
        assert!(!network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));
    }

    #[test]
    fn match_rejects_mbo_disallowed() {
        let driver = FakeDriver::new();
        let mut hidden = Vec::new();
        let profile = wpa2_profile();
        let mut bss = fake_wpa2_bss(b"Home", 6, -40);
        bss.mbo_assoc_disallowed = true;
        assert!(!network_matches_scan_result(&profile, &bss, false, &driver, &mut hidden));
    }

    #[test]
    fn best_candidate_is_highest_rssi() {
        let weak = fake_wpa2_bss(b"Home", 6, -70);
        let strong = fake_wpa2_bss(b"Home", 11, -40);
        let best = better_candidate(Some(weak.clone()), strong.clone()).unwrap();
        assert_eq!(best.channel, 11);
        // Order must not matter.
        let best = better_candidate(Some(strong), weak).unwrap();
        assert_eq!(best.channel, 11);
    }

    #[test]
    fn wildcard_resolves_to_strongest() {
        let mut bss = fake_bss_description(b"Home", 6, -40);
        bss.security = BssSecurityInfo { wpa2: true, wpa3_sae: true, ..BssSecurityInfo::default() };
        assert_eq!(strongest_advertised(&bss), Security::Wpa2Wpa3Mixed);

        bss.security = BssSecurityInfo { wpa3_sae: true, ..BssSecurityInfo::default() };
        assert_eq!(strongest_advertised(&bss), Security::Wpa3Sae);

        bss.security = BssSecurityInfo { wpa2: true, ..BssSecurityInfo::default() };
        assert_eq!(strongest_advertised(&bss), Security::Wpa2);

        bss.security = BssSecurityInfo { wpa: true, ..BssSecurityInfo::default() };
        assert_eq!(strongest_advertised(&bss), Security::WpaWpa2Mixed);

        bss.security = BssSecurityInfo { wep: true, ..BssSecurityInfo::default() };
        assert_eq!(strongest_advertised(&bss), Security::WepOpen);

        bss.security = BssSecurityInfo::default();
        assert_eq!(strongest_advertised(&bss), Security::None);
    }

    #[test]
    fn update_fills_unpinned_fields() {
        let mut profile = wpa2_profile();
        profile.ssid_specific = true;
        let mut bss = fake_wpa2_bss(b"Home", 6, -40);
        bss.pmf_required = true;
        bss.mobility_domain = Some(0x1234);
        bss.security.ft_psk = true;

        update_network_params(&mut profile, &bss);
        assert_eq!(profile.channel, 6);
        assert_eq!(profile.bssid, bss.bssid);
        assert_eq!(profile.beacon_period, 100);
        assert_eq!(profile.dtim_period, 2);
        assert!(profile.security.pmf_required);
        assert_eq!(profile.mobility_domain, Some(0x1234));
        assert!(profile.ft_psk);
        assert!(profile.dot11n);
        assert!(profile.security.ucast_cipher.ccmp);
        assert!(!profile.security.ucast_cipher.tkip);
    }

    #[test]
    fn update_keeps_pinned_fields() {
        let mut profile = wpa2_profile();
        profile.channel_specific = true;
        profile.channel = 6;
        profile.bssid_specific = true;
        profile.bssid = Bssid([7; 6]);

        let bss = fake_wpa2_bss(b"Home", 11, -40);
        update_network_params(&mut profile, &bss);
        assert_eq!(profile.channel, 6);
        assert_eq!(profile.bssid, Bssid([7; 6]));
    }

    #[test]
    fn update_falls_back_to_wpa_ciphers() {
        let mut profile = wpa2_profile();
        profile.security.security = Security::WpaWpa2Mixed;
        let mut bss = fake_wpa2_bss(b"Home", 6, -40);
        bss.rsn_mcast_cipher = CipherSuite::default();
        bss.rsn_ucast_cipher = CipherSuite::default();
        bss.wpa_mcast_cipher = CipherSuite { ccmp: false, tkip: true };
        bss.wpa_ucast_cipher = CipherSuite { ccmp: false, tkip: true };

        update_network_params(&mut profile, &bss);
        assert!(profile.security.mcast_cipher.tkip);
        assert!(profile.security.ucast_cipher.tkip);
    }

    #[test]
    fn update_records_owe_transition_ssid() {
        let mut profile = wpa2_profile();
        profile.security_specific = false;
        profile.security.security = Security::Wildcard;
        profile.security.psk.clear();
        let mut bss = fake_bss_description(b"open-net", 6, -40);
        bss.owe_transition =
            Some(OweTransition { mode: OweMode::Open, ssid: b"hidden-owe".to_vec() });

        update_network_params(&mut profile, &bss);
        assert_eq!(profile.owe_trans_mode, Some(OweMode::Open));
        assert_eq!(profile.owe_trans_ssid, b"hidden-owe".to_vec());
    }
}
