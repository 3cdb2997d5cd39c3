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

//! Hierarchy addresses and the channels derived from them.
//!
//! An address names one service as `organization.facility.system.subsystem.service`.
//! The subsystem is optional; a missing subsystem is serialized as the placeholder
//! segment `-` so that both the dotted and the slash-joined forms always carry five
//! segments.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Placeholder written in place of a missing subsystem segment.
pub const PLACEHOLDER_SEGMENT: &str = "-";

const SEGMENT_MIN_LEN: usize = 3;
const SEGMENT_MAX_LEN: usize = 63;
const SEGMENT_COUNT: usize = 5;

/// Failures raised while validating or parsing hierarchy addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    InvalidSegment { segment: String },
    WrongSegmentCount { found: usize },
}

impl Display for AddressError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidSegment { segment } => {
                write!(
                    f,
                    "invalid hierarchy segment '{segment}': segments are 3-63 characters, \
                     start with a lowercase letter, and contain only lowercase letters, \
                     digits, and non-adjacent dashes"
                )
            }
            AddressError::WrongSegmentCount { found } => {
                write!(
                    f,
                    "hierarchy addresses carry exactly {SEGMENT_COUNT} segments, found {found}"
                )
            }
        }
    }
}

impl Error for AddressError {}

/// Validates one hierarchy segment.
///
/// The rule matches `^[a-z]((?!--)[a-z0-9-]){2,62}$`. It is checked with a plain
/// scanner because the lookahead excluding adjacent dashes is not expressible in
/// the regex engines commonly available to us.
fn validate_segment(segment: &str) -> Result<(), AddressError> {
    let bytes = segment.as_bytes();
    let invalid = || AddressError::InvalidSegment {
        segment: segment.to_string(),
    };

    if !(SEGMENT_MIN_LEN..=SEGMENT_MAX_LEN).contains(&bytes.len()) {
        return Err(invalid());
    }
    if !bytes[0].is_ascii_lowercase() {
        return Err(invalid());
    }

    let mut previous_dash = false;
    for &b in &bytes[1..] {
        match b {
            b'-' => {
                if previous_dash {
                    return Err(invalid());
                }
                previous_dash = true;
            }
            b'a'..=b'z' | b'0'..=b'9' => previous_dash = false,
            _ => return Err(invalid()),
        }
    }
    Ok(())
}

/// One service address within the system-of-systems hierarchy.
///
/// Fields deserialize directly from configuration; call [`Hierarchy::validate`]
/// (or construct through [`Hierarchy::new`]) before trusting the segments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hierarchy {
    pub organization: String,
    pub facility: String,
    pub system: String,
    #[serde(default)]
    pub subsystem: Option<String>,
    pub service: String,
}

/// The four channels hanging off every hierarchy address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Lifecycle,
    Events,
    Request,
    Response,
}

impl Channel {
    /// Final topic path segment for this channel.
    pub fn suffix(&self) -> &'static str {
        match self {
            Channel::Lifecycle => "lifecycle",
            Channel::Events => "events",
            Channel::Request => "request",
            Channel::Response => "response",
        }
    }

    /// Whether messages on this channel must survive consumer downtime.
    pub fn persist(&self) -> bool {
        matches!(self, Channel::Request | Channel::Response)
    }
}

impl Hierarchy {
    /// Builds a validated address.
    pub fn new(
        organization: &str,
        facility: &str,
        system: &str,
        subsystem: Option<&str>,
        service: &str,
    ) -> Result<Self, AddressError> {
        let hierarchy = Self {
            organization: organization.to_string(),
            facility: facility.to_string(),
            system: system.to_string(),
            subsystem: subsystem.map(str::to_string),
            service: service.to_string(),
        };
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    /// Builds the throwaway address a client session identifies itself with.
    ///
    /// Client addresses are never advertised, so the segments only need to be
    /// unique and rule-conformant; `tmp-` plus a random organization keeps them
    /// out of any real namespace.
    pub fn throwaway() -> Self {
        Self {
            organization: format!("tmp-{}", Uuid::new_v4()),
            facility: "tmp-".to_string(),
            system: "tmp-".to_string(),
            subsystem: None,
            service: "tmp-".to_string(),
        }
    }

    /// Checks every segment against the segment rule.
    pub fn validate(&self) -> Result<(), AddressError> {
        for segment in [
            &self.organization,
            &self.facility,
            &self.system,
            &self.service,
        ] {
            validate_segment(segment)?;
        }
        if let Some(subsystem) = &self.subsystem {
            validate_segment(subsystem)?;
        }
        Ok(())
    }

    fn segments(&self) -> [&str; SEGMENT_COUNT] {
        [
            &self.organization,
            &self.facility,
            &self.system,
            self.subsystem.as_deref().unwrap_or(PLACEHOLDER_SEGMENT),
            &self.service,
        ]
    }

    /// `.`-joined logical identity, e.g. `org.fac.sys.-.svc`.
    pub fn dotted(&self) -> String {
        self.segments().join(".")
    }

    /// `/`-joined topic prefix, e.g. `org/fac/sys/-/svc`.
    pub fn slashed(&self) -> String {
        self.segments().join("/")
    }

    /// Full topic name for one of this address's channels.
    pub fn topic(&self, channel: Channel) -> String {
        format!("{}/{}", self.slashed(), channel.suffix())
    }

    /// Parses the `.`-joined identity form.
    pub fn parse_dotted(address: &str) -> Result<Self, AddressError> {
        Self::parse_with_separator(address, '.')
    }

    /// Parses the `/`-joined topic-prefix form.
    pub fn parse_slashed(address: &str) -> Result<Self, AddressError> {
        Self::parse_with_separator(address, '/')
    }

    fn parse_with_separator(address: &str, separator: char) -> Result<Self, AddressError> {
        let segments: Vec<&str> = address.split(separator).collect();
        if segments.len() != SEGMENT_COUNT {
            return Err(AddressError::WrongSegmentCount {
                found: segments.len(),
            });
        }
        let subsystem = if segments[3] == PLACEHOLDER_SEGMENT {
            None
        } else {
            Some(segments[3])
        };
        Self::new(segments[0], segments[1], segments[2], subsystem, segments[4])
    }
}

impl Display for Hierarchy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dotted())
    }
}
