// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {crate::types::WlanEvent, log::debug};

/// The user-registered connection callback. Invoked synchronously from the
/// dispatcher thread only, after the state lock has been dropped.
pub type EventCallback = Box<dyn FnMut(WlanEvent) + Send>;

/// Callback invoked with the number of scan results once a user scan
/// completes.
pub type ScanCallback = Box<dyn FnOnce(usize) + Send>;

pub(crate) struct Notifier {
    callback: EventCallback,
}

impl Notifier {
    pub fn new(callback: EventCallback) -> Self {
        Notifier { callback }
    }

    pub fn notify(&mut self, event: WlanEvent) {
        debug!("notifying listener: {:?}", event);
        (self.callback)(event);
    }

    /// Delivers a batch of events collected while the state lock was held.
    pub fn notify_all(&mut self, events: Vec<WlanEvent>) {
        for event in events {
            self.notify(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{Arc, Mutex},
    };

    #[test]
    fn notify_preserves_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut notifier = Notifier::new(Box::new(move |event| sink.lock().unwrap().push(event)));
        notifier.notify_all(vec![WlanEvent::AuthSuccess, WlanEvent::Success(None)]);
        assert_eq!(*seen.lock().unwrap(), vec![WlanEvent::AuthSuccess, WlanEvent::Success(None)]);
    }
}
