// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {futures::channel::mpsc, log::warn};

/// Thin wrapper around an unbounded sender that drops (and logs) messages
/// once the receiving end has hung up instead of surfacing an error to every
/// call site.
pub struct UnboundedSink<T> {
    sink: mpsc::UnboundedSender<T>,
}

impl<T> UnboundedSink<T> {
    pub fn new(sink: mpsc::UnboundedSender<T>) -> Self {
        UnboundedSink { sink }
    }

    pub fn send(&self, msg: T) {
        match self.sink.unbounded_send(msg) {
            Ok(()) => {}
            Err(e) => {
                if e.is_full() {
                    panic!("unbounded channel should never be full");
                } else if e.is_disconnected() {
                    warn!("attempted to send on a closed channel");
                } else {
                    panic!("unexpected error: {:?}", e);
                }
            }
        }
    }
}

impl<T> Clone for UnboundedSink<T> {
    fn clone(&self) -> Self {
        UnboundedSink { sink: self.sink.clone() }
    }
}
