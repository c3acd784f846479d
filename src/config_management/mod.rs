// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The in-RAM store of known networks. Slots are fixed, names are unique and
//! the store never outlives the manager; nothing is persisted.

mod network_config;

pub use network_config::{
    NetworkProfile, Security, SecurityConfig, NETWORK_NAME_MAX_LEN, NETWORK_NAME_MIN_LEN, PMK_LEN,
    SAE_PASSWORD_MAX_LEN, SAE_PASSWORD_MIN_LEN, WPA_PSK_HEX_LEN, WPA_PSK_MAX_LEN, WPA_PSK_MIN_LEN,
};

use {crate::error::Error, network_config::validate_profile};

/// Maximum number of known networks held at any time.
pub const MAX_KNOWN_NETWORKS: usize = 5;

pub(crate) struct ProfileStore {
    slots: Vec<Option<NetworkProfile>>,
    count: usize,
}

impl ProfileStore {
    pub fn new() -> Self {
        ProfileStore { slots: (0..MAX_KNOWN_NETWORKS).map(|_| None).collect(), count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, index: usize) -> Option<&NetworkProfile> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut NetworkProfile> {
        self.slots.get_mut(index).and_then(|slot| slot.as_mut())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(profile) if profile.name == name))
    }

    /// Inserts a validated profile, computing its specificity bits. Returns
    /// the slot index.
    pub fn insert(&mut self, mut profile: NetworkProfile) -> Result<usize, Error> {
        validate_profile(&profile)?;
        if self.position(&profile.name).is_some() {
            return Err(Error::NameTaken);
        }
        let slot = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(slot) => slot,
            None => return Err(Error::NoMem),
        };

        profile.ssid_specific = !profile.ssid.is_empty();
        profile.bssid_specific = !profile.bssid.is_any();
        profile.channel_specific = profile.channel != 0;
        profile.security_specific = profile.security.security != Security::Wildcard;
        profile.clear_learned_fields();

        self.slots[slot] = Some(profile);
        self.count += 1;
        Ok(slot)
    }

    /// Clears the slot written by a just-failed `insert` follow-up (for
    /// example when the supplicant backend rejected the profile).
    pub fn evict(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.take().is_some() {
                self.count -= 1;
            }
        }
    }

    /// Removes the named profile, zeroizing credentials first.
    pub fn remove(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if let Some(profile) = slot.as_mut() {
                profile.zeroize_credentials();
            }
            if slot.take().is_some() {
                self.count -= 1;
            }
        }
    }

}
