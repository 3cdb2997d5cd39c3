/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Runtime version identity and message compatibility rules.
//!
//! Two runtimes can talk when their major versions match; while the local major
//! version is 0 the minor versions must match as well, since pre-1.0 releases
//! may break the wire contract on minor bumps.

use lazy_static::lazy_static;
use semver::Version;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Version string stamped into every outbound message header.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

lazy_static! {
    static ref LOCAL_VERSION: Version =
        Version::parse(SDK_VERSION).expect("crate version must be valid semver");
}

/// Failures raised while checking a remote version header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    Malformed { version: String },
    Incompatible { local: String, remote: String },
}

impl Display for VersionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionError::Malformed { version } => {
                write!(f, "remote version '{version}' is not valid semver")
            }
            VersionError::Incompatible { local, remote } => {
                write!(
                    f,
                    "SDK version incompatibility. Local version: {local}. Remote version: {remote}"
                )
            }
        }
    }
}

impl Error for VersionError {}

/// Checks a remote `sdk_version` header against the local version.
pub fn check_compatibility(remote: &str) -> Result<(), VersionError> {
    let remote_version = Version::parse(remote).map_err(|_| VersionError::Malformed {
        version: remote.to_string(),
    })?;
    compare(&LOCAL_VERSION, &remote_version).map_err(|_| VersionError::Incompatible {
        local: LOCAL_VERSION.to_string(),
        remote: remote.to_string(),
    })
}

fn compare(local: &Version, remote: &Version) -> Result<(), ()> {
    if local.major != remote.major {
        return Err(());
    }
    if local.major == 0 && local.minor != remote.minor {
        return Err(());
    }
    Ok(())
}
