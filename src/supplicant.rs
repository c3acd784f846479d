// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability seam for the security backend. The firmware-hosted supplicant
//! is the default; a port with an external supplicant substitutes its own
//! implementation of the trait.

use {
    crate::{
        config_management::{NetworkProfile, Security},
        driver::WifiDriver,
        error::Error,
        types::BssRole,
    },
    log::debug,
    std::sync::Arc,
};

pub trait Supplicant: Send + Sync {
    /// Informs the backend about a newly added profile. A failure causes the
    /// profile slot to be released again.
    fn profile_added(&self, profile: &NetworkProfile) -> Result<(), Error>;

    /// Releases keying material held for a removed profile.
    fn profile_removed(&self, profile: &NetworkProfile);

    fn add_psk(&self, role: BssRole, ssid: &[u8], psk: &[u8]) -> Result<(), Error>;

    fn add_pmk(&self, role: BssRole, ssid: &[u8], pmk: &[u8]) -> Result<(), Error>;

    fn add_sae_password(&self, role: BssRole, ssid: &[u8], password: &[u8]) -> Result<(), Error>;
}

/// Backend that delegates to the key-material command path of the firmware.
pub struct FirmwareSupplicant {
    driver: Arc<dyn WifiDriver>,
}

impl FirmwareSupplicant {
    pub fn new(driver: Arc<dyn WifiDriver>) -> Self {
        FirmwareSupplicant { driver }
    }
}

impl Supplicant for FirmwareSupplicant {
    fn profile_added(&self, profile: &NetworkProfile) -> Result<(), Error> {
        // Stale passphrase entries for the same SSID would shadow the new
        // ones inside the firmware cache.
        let secured = !matches!(profile.security.security, Security::None | Security::WepOpen);
        if profile.role == BssRole::Client && secured {
            self.driver
                .clear_wpa_psk(profile.role, &profile.ssid)
                .map_err(|_| Error::Fail)?;
        }
        Ok(())
    }

    fn profile_removed(&self, profile: &NetworkProfile) {
        if let Err(e) = self.driver.clear_wpa_psk(profile.role, &profile.ssid) {
            debug!("failed to clear cached PSK on removal: {}", e);
        }
    }

    fn add_psk(&self, role: BssRole, ssid: &[u8], psk: &[u8]) -> Result<(), Error> {
        self.driver.install_wpa_psk(role, ssid, psk).map_err(|_| Error::Fail)
    }

    fn add_pmk(&self, role: BssRole, ssid: &[u8], pmk: &[u8]) -> Result<(), Error> {
        // No BSSID: the firmware supplicant fails to derive session keys for
        // BSSID-scoped PMK entries.
        self.driver.install_wpa_pmk(role, ssid, None, pmk).map_err(|_| Error::Fail)
    }

    fn add_sae_password(&self, role: BssRole, ssid: &[u8], password: &[u8]) -> Result<(), Error> {
        self.driver.install_sae_password(role, ssid, password).map_err(|_| Error::Fail)
    }
}
