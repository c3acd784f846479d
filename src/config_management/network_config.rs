// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        error::Error,
        types::{AddrType, BssRole, Bssid, CipherSuite, Ipv4Config, OweMode, Ssid, MAX_SSID_LEN},
    },
    std::fmt,
};

/// Constraints on valid profile fields.
pub const NETWORK_NAME_MIN_LEN: usize = 1;
pub const NETWORK_NAME_MAX_LEN: usize = 32;
pub const WPA_PSK_MIN_LEN: usize = 8;
pub const WPA_PSK_MAX_LEN: usize = 63;
pub const WPA_PSK_HEX_LEN: usize = 64;
pub const SAE_PASSWORD_MIN_LEN: usize = 8;
pub const SAE_PASSWORD_MAX_LEN: usize = 255;
pub const PMK_LEN: usize = 32;

/// Security type of a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    None,
    WepOpen,
    WepShared,
    Wpa,
    Wpa2,
    Wpa2Sha256,
    WpaWpa2Mixed,
    Wpa3Sae,
    Wpa2Wpa3Mixed,
    OweOnly,
    /// Adopt whatever the selected BSS advertises, strongest first.
    Wildcard,
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Security::None => "None",
            Security::WepOpen => "WEP (open)",
            Security::WepShared => "WEP (shared)",
            Security::Wpa => "WPA",
            Security::Wpa2 => "WPA2",
            Security::Wpa2Sha256 => "WPA2-SHA256",
            Security::WpaWpa2Mixed => "WPA/WPA2 mixed",
            Security::Wpa3Sae => "WPA3-SAE",
            Security::Wpa2Wpa3Mixed => "WPA2/WPA3 mixed",
            Security::OweOnly => "OWE",
            Security::Wildcard => "wildcard",
        };
        f.write_str(name)
    }
}

/// Credentials and protection settings of a profile.
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityConfig {
    pub security: Security,
    /// WPA/WPA2 passphrase (8..=63 ASCII) or 64 hexadecimal digits.
    pub psk: Vec<u8>,
    /// WPA3-SAE password (8..=255 octets).
    pub password: Vec<u8>,
    /// Cached pairwise master key, installed instead of the PSK when present.
    pub pmk: Option<[u8; PMK_LEN]>,
    pub pmf_capable: bool,
    pub pmf_required: bool,
    /// Group/pairwise ciphers discovered from the selected BSS.
    pub mcast_cipher: CipherSuite,
    pub ucast_cipher: CipherSuite,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            security: Security::Wildcard,
            psk: Vec::new(),
            password: Vec::new(),
            pmk: None,
            pmf_capable: false,
            pmf_required: false,
            mcast_cipher: CipherSuite::default(),
            ucast_cipher: CipherSuite::default(),
        }
    }
}

impl SecurityConfig {
    pub fn wpa2(psk: impl Into<Vec<u8>>) -> Self {
        SecurityConfig { security: Security::Wpa2, psk: psk.into(), ..Default::default() }
    }

    pub fn wpa3_sae(password: impl Into<Vec<u8>>) -> Self {
        SecurityConfig {
            security: Security::Wpa3Sae,
            password: password.into(),
            pmf_capable: true,
            pmf_required: true,
            ..Default::default()
        }
    }

    pub fn open() -> Self {
        SecurityConfig { security: Security::None, ..Default::default() }
    }

    /// True when the profile carries any secret material.
    pub fn has_credential(&self) -> bool {
        !self.psk.is_empty() || !self.password.is_empty()
    }

    fn zeroize(&mut self) {
        for b in self.psk.iter_mut() {
            *b = 0;
        }
        for b in self.password.iter_mut() {
            *b = 0;
        }
        self.pmk = None;
    }
}

/// One known network: everything required to join (STA) or publish (uAP) it.
///
/// The specificity bits record which identifying fields the caller pinned at
/// add time; fields left unspecified are filled in from scan results and
/// scrubbed again on copy-out.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkProfile {
    pub name: String,
    pub role: BssRole,
    pub ssid: Ssid,
    pub bssid: Bssid,
    /// 0 selects any channel.
    pub channel: u8,
    pub security: SecurityConfig,
    pub ip: Ipv4Config,
    pub acs_band: u8,
    pub dot11n: bool,
    pub dot11ac: bool,

    pub(crate) ssid_specific: bool,
    pub(crate) bssid_specific: bool,
    pub(crate) channel_specific: bool,
    pub(crate) security_specific: bool,

    // Learned from the matched BSS; never user-supplied.
    pub(crate) beacon_period: u16,
    pub(crate) dtim_period: u8,
    pub(crate) mobility_domain: Option<u16>,
    pub(crate) ft_1x: bool,
    pub(crate) ft_psk: bool,
    pub(crate) ft_sae: bool,
    pub(crate) neighbor_report_supported: bool,
    pub(crate) bss_transition_supported: bool,
    pub(crate) owe_trans_mode: Option<OweMode>,
    pub(crate) owe_trans_ssid: Ssid,
}

impl NetworkProfile {
    pub fn new(name: impl Into<String>, role: BssRole) -> Self {
        NetworkProfile {
            name: name.into(),
            role,
            ssid: Vec::new(),
            bssid: Bssid::ANY,
            channel: 0,
            security: SecurityConfig::default(),
            ip: Ipv4Config::default(),
            acs_band: 0,
            dot11n: false,
            dot11ac: false,
            ssid_specific: false,
            bssid_specific: false,
            channel_specific: false,
            security_specific: false,
            beacon_period: 0,
            dtim_period: 0,
            mobility_domain: None,
            ft_1x: false,
            ft_psk: false,
            ft_sae: false,
            neighbor_report_supported: false,
            bss_transition_supported: false,
            owe_trans_mode: None,
            owe_trans_ssid: Vec::new(),
        }
    }

    pub(crate) fn clear_learned_fields(&mut self) {
        self.beacon_period = 0;
        self.dtim_period = 0;
        self.mobility_domain = None;
        self.ft_1x = false;
        self.ft_psk = false;
        self.ft_sae = false;
        self.owe_trans_mode = None;
        self.owe_trans_ssid.clear();
    }

    /// Copy for the public accessors: anything that was dynamically learned
    /// is scrubbed so callers see only what they configured.
    pub(crate) fn copy_out(&self) -> NetworkProfile {
        let mut copy = self.clone();
        if !self.bssid_specific {
            copy.bssid = Bssid::ANY;
        }
        if !self.ssid_specific {
            copy.ssid.clear();
        }
        if !self.channel_specific {
            copy.channel = 0;
        }
        if self.ip.addr_type != AddrType::Static {
            copy.ip = Ipv4Config { addr_type: self.ip.addr_type, ..Ipv4Config::default() };
        }
        copy
    }

    pub(crate) fn zeroize_credentials(&mut self) {
        self.security.zeroize();
    }
}

fn is_hex(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_hexdigit())
}

fn check_psk(psk: &[u8]) -> Result<(), Error> {
    if psk.len() < WPA_PSK_MIN_LEN || psk.len() > WPA_PSK_HEX_LEN {
        return Err(Error::Invalid);
    }
    if psk.len() == WPA_PSK_HEX_LEN && !is_hex(psk) {
        return Err(Error::Invalid);
    }
    Ok(())
}

fn check_password(password: &[u8]) -> Result<(), Error> {
    if password.len() < SAE_PASSWORD_MIN_LEN || password.len() > SAE_PASSWORD_MAX_LEN {
        return Err(Error::Invalid);
    }
    Ok(())
}

/// Validates a profile as supplied on `add_network`. The checks mirror the
/// public add-time contract: name length, SSID/BSSID presence, credential
/// shape, PMF requirements and the uAP addressing rule.
pub(crate) fn validate_profile(profile: &NetworkProfile) -> Result<(), Error> {
    let name_len = profile.name.len();
    if name_len < NETWORK_NAME_MIN_LEN || name_len > NETWORK_NAME_MAX_LEN {
        return Err(Error::Invalid);
    }
    if profile.ssid.len() > MAX_SSID_LEN {
        return Err(Error::Invalid);
    }
    if profile.ssid.is_empty() && profile.bssid.is_any() {
        return Err(Error::Invalid);
    }
    if profile.role == BssRole::Ap && profile.ip.gateway != profile.ip.address {
        return Err(Error::Invalid);
    }

    let sec = &profile.security;
    match sec.security {
        Security::Wpa | Security::Wpa2 | Security::Wpa2Sha256 | Security::WpaWpa2Mixed => {
            check_psk(&sec.psk)?;
        }
        Security::Wpa2Wpa3Mixed => {
            check_psk(&sec.psk)?;
            check_password(&sec.password)?;
        }
        Security::Wpa3Sae => {
            check_password(&sec.password)?;
        }
        Security::None | Security::OweOnly | Security::Wildcard => {}
        // 802.11n forbids WEP; profiles cannot be added with it.
        Security::WepOpen | Security::WepShared => return Err(Error::Invalid),
    }

    match sec.security {
        Security::Wpa2Sha256 | Security::Wpa2Wpa3Mixed => {
            if !sec.pmf_capable {
                return Err(Error::Invalid);
            }
        }
        Security::Wpa3Sae | Security::OweOnly => {
            if !sec.pmf_capable || !sec.pmf_required {
                return Err(Error::Invalid);
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, crate::assert_variant, std::net::Ipv4Addr};

    fn sta_profile(security: SecurityConfig) -> NetworkProfile {
        let mut profile = NetworkProfile::new("home", BssRole::Client);
        profile.ssid = b"Home".to_vec();
        profile.security = security;
        profile
    }

    #[test]
    fn validate_accepts_wpa2_psk_bounds() {
        assert_eq!(validate_profile(&sta_profile(SecurityConfig::wpa2(vec![b'x'; 8]))), Ok(()));
        assert_eq!(validate_profile(&sta_profile(SecurityConfig::wpa2(vec![b'x'; 63]))), Ok(()));
    }

    #[test]
    fn validate_rejects_wpa2_psk_out_of_bounds() {
        assert_variant!(
            validate_profile(&sta_profile(SecurityConfig::wpa2(vec![b'x'; 7]))),
            Err(Error::Invalid)
        );
        // 64 bytes must be hexadecimal.
        assert_variant!(
            validate_profile(&sta_profile(SecurityConfig::wpa2(vec![b'x'; 64]))),
            Err(Error::Invalid)
        );
        assert_eq!(
            validate_profile(&sta_profile(SecurityConfig::wpa2(vec![b'a'; 64]))),
            Ok(())
        );
        assert_variant!(
            validate_profile(&sta_profile(SecurityConfig::wpa2(vec![b'x'; 65]))),
            Err(Error::Invalid)
        );
    }

    #[test]
    fn validate_sae_password_bounds() {
        assert_eq!(
            validate_profile(&sta_profile(SecurityConfig::wpa3_sae(vec![b'p'; 8]))),
            Ok(())
        );
        assert_eq!(
            validate_profile(&sta_profile(SecurityConfig::wpa3_sae(vec![b'p'; 255]))),
            Ok(())
        );
        assert_variant!(
            validate_profile(&sta_profile(SecurityConfig::wpa3_sae(vec![b'p'; 7]))),
            Err(Error::Invalid)
        );
        assert_variant!(
            validate_profile(&sta_profile(SecurityConfig::wpa3_sae(vec![b'p'; 256]))),
            Err(Error::Invalid)
        );
    }

    #[test]
    fn validate_pmf_requirements() {
        let mut config = SecurityConfig::wpa3_sae(vec![b'p'; 12]);
        config.pmf_required = false;
        assert_variant!(validate_profile(&sta_profile(config)), Err(Error::Invalid));

        let mut config = SecurityConfig::wpa2(vec![b'p'; 12]);
        config.security = Security::Wpa2Sha256;
        assert_variant!(validate_profile(&sta_profile(config.clone())), Err(Error::Invalid));
        config.pmf_capable = true;
        assert_eq!(validate_profile(&sta_profile(config)), Ok(()));
    }

    #[test]
    fn validate_rejects_wep() {
        let mut config = SecurityConfig::default();
        config.security = Security::WepOpen;
        config.psk = vec![b'k'; 13];
        assert_variant!(validate_profile(&sta_profile(config)), Err(Error::Invalid));
    }

    #[test]
    fn validate_requires_ssid_or_bssid() {
        let mut profile = NetworkProfile::new("anon", BssRole::Client);
        profile.security = SecurityConfig::open();
        assert_variant!(validate_profile(&profile), Err(Error::Invalid));
        profile.bssid = Bssid([2, 2, 2, 2, 2, 2]);
        assert_eq!(validate_profile(&profile), Ok(()));
    }

    #[test]
    fn validate_name_length() {
        let mut profile = NetworkProfile::new("", BssRole::Client);
        profile.ssid = b"x".to_vec();
        profile.security = SecurityConfig::open();
        assert_variant!(validate_profile(&profile), Err(Error::Invalid));
        profile.name = "n".repeat(33);
        assert_variant!(validate_profile(&profile), Err(Error::Invalid));
        profile.name = "n".repeat(32);
        assert_eq!(validate_profile(&profile), Ok(()));
    }

    #[test]
    fn validate_ap_gateway_rule() {
        let mut profile = NetworkProfile::new("ap", BssRole::Ap);
        profile.ssid = b"my-ap".to_vec();
        profile.security = SecurityConfig::open();
        profile.ip = Ipv4Config::with_static(
            Ipv4Addr::new(192, 168, 10, 1),
            Ipv4Addr::new(192, 168, 10, 254),
            Ipv4Addr::new(255, 255, 255, 0),
        );
        assert_variant!(validate_profile(&profile), Err(Error::Invalid));
        profile.ip.gateway = Ipv4Addr::new(192, 168, 10, 1);
        assert_eq!(validate_profile(&profile), Ok(()));
    }

    #[test]
    fn copy_out_scrubs_learned_fields() {
        let mut profile = sta_profile(SecurityConfig::wpa2(vec![b'x'; 10]));
        profile.ssid_specific = true;
        // Learned during a previous match.
        profile.bssid = Bssid([1; 6]);
        profile.channel = 6;
        profile.dtim_period = 2;

        let copy = profile.copy_out();
        assert_eq!(copy.bssid, Bssid::ANY);
        assert_eq!(copy.channel, 0);
        assert_eq!(copy.ssid, b"Home".to_vec());
    }

    #[test]
    fn zeroize_clears_secrets() {
        let mut profile = sta_profile(SecurityConfig::wpa2(b"hunter22".to_vec()));
        profile.security.pmk = Some([7; PMK_LEN]);
        profile.zeroize_credentials();
        assert!(profile.security.psk.iter().all(|b| *b == 0));
        assert_eq!(profile.security.pmk, None);
    }
}
