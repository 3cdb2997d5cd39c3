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

//! Payload indirection through external data stores.
//!
//! A message whose header marks the data-store handler carries a small JSON
//! pointer instead of the real payload. The data plane swaps pointers for
//! payloads on the way in and payloads for pointers on the way out, keeping
//! oversized bodies off the brokers.

use crate::observability::events;
use crate::protocol::DataHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::warn;

const COMPONENT: &str = "data_plane";

/// Failure inside a concrete store implementation.
#[derive(Debug)]
pub struct DataStoreError {
    detail: String,
}

impl DataStoreError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl Display for DataStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "data store operation failed: {}", self.detail)
    }
}

impl Error for DataStoreError {}

/// Stand-in payload pointing at an object held by an external store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorePointer {
    pub store_uri: String,
    pub container: String,
    pub object_id: String,
}

/// An external object store the runtime can stage payloads through.
///
/// Implementations are application-provided. The runtime matches inbound
/// pointers against [`DataStore::uri`] and stages outbound payloads through
/// the first registered store.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Identifier carried in pointer payloads referring to this store.
    fn uri(&self) -> String;

    /// Fetches the object a pointer refers to.
    async fn get(&self, container: &str, object_id: &str) -> Result<Vec<u8>, DataStoreError>;

    /// Stores a payload and returns the pointer under which it is reachable.
    async fn put(&self, payload: &[u8]) -> Result<StorePointer, DataStoreError>;
}

/// Failures resolving or staging indirect payloads.
#[derive(Debug)]
pub enum DataPlaneError {
    PointerUnparseable { detail: String },
    UnknownStore { store_uri: String },
    NoStores,
    NotText,
    Store(DataStoreError),
}

impl Display for DataPlaneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DataPlaneError::PointerUnparseable { detail } => {
                write!(f, "payload is not a valid store pointer: {detail}")
            }
            DataPlaneError::UnknownStore { store_uri } => {
                write!(f, "no data store registered for uri '{store_uri}'")
            }
            DataPlaneError::NoStores => {
                write!(f, "no data stores registered")
            }
            DataPlaneError::NotText => {
                write!(f, "stored object is not valid UTF-8 text")
            }
            DataPlaneError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DataPlaneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataPlaneError::Store(err) => Some(err),
            _ => None,
        }
    }
}

/// Routes payloads through the registered stores based on the data handler a
/// message declares.
pub(crate) struct DataPlaneManager {
    stores: Vec<Arc<dyn DataStore>>,
}

impl DataPlaneManager {
    pub(crate) fn new(stores: Vec<Arc<dyn DataStore>>) -> Self {
        if stores.is_empty() {
            warn!(
                event = events::DATA_PLANE_NO_STORES,
                component = COMPONENT,
                "no data stores registered, messages using store indirection will fail"
            );
        }
        Self { stores }
    }

    /// Materializes an inbound payload. Direct messages pass through, pointer
    /// payloads are swapped for the object they reference.
    pub(crate) async fn resolve_incoming(
        &self,
        data_handler: DataHandler,
        payload: &str,
    ) -> Result<String, DataPlaneError> {
        match data_handler {
            DataHandler::Message => Ok(payload.to_string()),
            DataHandler::DataStore => {
                let pointer: StorePointer = serde_json::from_str(payload).map_err(|e| {
                    DataPlaneError::PointerUnparseable {
                        detail: e.to_string(),
                    }
                })?;
                let store = self
                    .stores
                    .iter()
                    .find(|store| store.uri() == pointer.store_uri)
                    .ok_or(DataPlaneError::UnknownStore {
                        store_uri: pointer.store_uri.clone(),
                    })?;
                let bytes = store
                    .get(&pointer.container, &pointer.object_id)
                    .await
                    .map_err(DataPlaneError::Store)?;
                String::from_utf8(bytes).map_err(|_| DataPlaneError::NotText)
            }
        }
    }

    /// Prepares an outbound payload. Direct messages pass through, store
    /// indirection uploads the payload and substitutes a pointer.
    pub(crate) async fn stage_outgoing(
        &self,
        data_handler: DataHandler,
        payload: String,
    ) -> Result<String, DataPlaneError> {
        match data_handler {
            DataHandler::Message => Ok(payload),
            DataHandler::DataStore => {
                let store = self.stores.first().ok_or(DataPlaneError::NoStores)?;
                let pointer = store
                    .put(payload.as_bytes())
                    .await
                    .map_err(DataPlaneError::Store)?;
                serde_json::to_string(&pointer).map_err(|e| DataPlaneError::PointerUnparseable {
                    detail: e.to_string(),
                })
            }
        }
    }
}
