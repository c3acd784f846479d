// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// Errors returned synchronously from the public API. Asynchronous failures
/// are reported through the user callback instead.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Caller-supplied arguments failed validation.
    #[error("invalid argument")]
    Invalid,

    /// A profile with the same name already exists.
    #[error("network name already in use")]
    NameTaken,

    /// The current client/AP/power-save state forbids the operation.
    #[error("operation not permitted in the current state")]
    WrongState,

    /// Profile slots or queue space exhausted.
    #[error("out of memory or slots")]
    NoMem,

    /// The driver or an OS primitive rejected the request.
    #[error("operation failed")]
    Fail,

    /// The feature is not available in this build.
    #[error("not supported")]
    NotSupported,

    /// A host-sleep configuration with a different wakeup mask is already
    /// active.
    #[error("already configured")]
    AlreadyConfigured,
}

pub type Result<T> = std::result::Result<T, Error>;
