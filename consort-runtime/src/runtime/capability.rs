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

//! Capability registration: typed operation handlers, status providers, and
//! declared events.
//!
//! Operations register with plain Rust closures over serde types. The builder
//! wraps each closure in a decode-invoke-encode shim so the dispatch path only
//! ever deals in payload text.

use crate::protocol::{ContentType, DataHandler};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::type_name;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Per-operation dispatch settings.
#[derive(Clone, Debug)]
pub struct OperationConfig {
    /// Content type callers are expected to send.
    pub request_content_type: ContentType,
    /// Content type stamped on successful replies.
    pub response_content_type: ContentType,
    /// How reply payloads travel: inline or through a data store.
    pub response_data_handler: DataHandler,
    /// Reject empty request payloads instead of coercing them to JSON null.
    pub strict_validation: bool,
    /// Blocking any of these keys takes the operation out of service.
    pub block_keys: Vec<String>,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            request_content_type: ContentType::Json,
            response_content_type: ContentType::Json,
            response_data_handler: DataHandler::Message,
            strict_validation: false,
            block_keys: Vec::new(),
        }
    }
}

/// Failures while assembling a capability.
#[derive(Debug, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidOperationName { operation: String },
    DuplicateOperation { operation: String },
    DuplicateStatus { capability: String },
}

impl Display for RegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::InvalidOperationName { operation } => {
                write!(f, "operation name '{operation}' is not usable")
            }
            RegistrationError::DuplicateOperation { operation } => {
                write!(f, "operation '{operation}' is already registered")
            }
            RegistrationError::DuplicateStatus { capability } => {
                write!(
                    f,
                    "capability '{capability}' already has a status provider"
                )
            }
        }
    }
}

impl Error for RegistrationError {}

/// Why an operation invocation failed before or inside domain logic.
#[derive(Debug)]
pub(crate) enum OperationInvokeError {
    /// The payload did not decode into the operation's request type.
    BadArguments { detail: String },
    /// Domain logic returned an error.
    Domain { detail: String },
    /// The response value did not serialize.
    EncodeFailed { detail: String },
}

pub(crate) type BoxedOperationHandler =
    Box<dyn Fn(&str) -> Result<String, OperationInvokeError> + Send + Sync>;

pub(crate) struct OperationRecord {
    pub(crate) handler: BoxedOperationHandler,
    pub(crate) config: OperationConfig,
    pub(crate) request_type: &'static str,
    pub(crate) response_type: &'static str,
}

pub(crate) type StatusFn = Box<dyn Fn() -> Value + Send + Sync>;

pub(crate) struct StatusRecord {
    pub(crate) schema: &'static str,
    pub(crate) provider: StatusFn,
}

/// A named group of operations, optional status provider, and declared
/// events, ready to hand to a service.
pub struct Capability {
    pub(crate) name: String,
    pub(crate) operations: BTreeMap<String, OperationRecord>,
    pub(crate) status: Option<StatusRecord>,
    pub(crate) events: Vec<String>,
}

/// Assembles a [`Capability`] operation by operation.
pub struct CapabilityBuilder {
    name: String,
    operations: BTreeMap<String, OperationRecord>,
    status: Option<StatusRecord>,
    events: Vec<String>,
}

impl CapabilityBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            operations: BTreeMap::new(),
            status: None,
            events: Vec::new(),
        }
    }

    /// Registers a typed operation. The handler runs synchronously on the
    /// dispatch path; its error string is logged but never leaves the
    /// process.
    pub fn operation<Req, Res, F>(
        mut self,
        operation: &str,
        config: OperationConfig,
        handler: F,
    ) -> Result<Self, RegistrationError>
    where
        Req: DeserializeOwned,
        Res: Serialize,
        F: Fn(Req) -> Result<Res, String> + Send + Sync + 'static,
    {
        if operation.is_empty() || operation.contains(['.', '/', ' ']) {
            return Err(RegistrationError::InvalidOperationName {
                operation: operation.to_string(),
            });
        }
        if self.operations.contains_key(operation) {
            return Err(RegistrationError::DuplicateOperation {
                operation: format!("{}.{}", self.name, operation),
            });
        }

        let strict = config.strict_validation;
        let shim: BoxedOperationHandler = Box::new(move |payload: &str| {
            let effective = if payload.trim().is_empty() {
                if strict {
                    return Err(OperationInvokeError::BadArguments {
                        detail: "request payload is empty".to_string(),
                    });
                }
                "null"
            } else {
                payload
            };
            let request: Req = serde_json::from_str(effective).map_err(|e| {
                OperationInvokeError::BadArguments {
                    detail: e.to_string(),
                }
            })?;
            let response =
                handler(request).map_err(|detail| OperationInvokeError::Domain { detail })?;
            serde_json::to_string(&response).map_err(|e| OperationInvokeError::EncodeFailed {
                detail: e.to_string(),
            })
        });

        self.operations.insert(
            operation.to_string(),
            OperationRecord {
                handler: shim,
                config,
                request_type: type_name::<Req>(),
                response_type: type_name::<Res>(),
            },
        );
        Ok(self)
    }

    /// Registers the status provider. A service accepts at most one across
    /// all of its capabilities.
    pub fn status<S, F>(mut self, provider: F) -> Result<Self, RegistrationError>
    where
        S: Serialize,
        F: Fn() -> S + Send + Sync + 'static,
    {
        if self.status.is_some() {
            return Err(RegistrationError::DuplicateStatus {
                capability: self.name.clone(),
            });
        }
        self.status = Some(StatusRecord {
            schema: type_name::<S>(),
            provider: Box::new(move || {
                serde_json::to_value(provider()).unwrap_or(Value::Null)
            }),
        });
        Ok(self)
    }

    /// Declares an event name this capability may emit. Declaring twice is a
    /// no-op.
    pub fn declare_event(mut self, event_name: &str) -> Self {
        if !self.events.iter().any(|name| name == event_name) {
            self.events.push(event_name.to_string());
        }
        self
    }

    pub fn build(self) -> Capability {
        Capability {
            name: self.name,
            operations: self.operations,
            status: self.status,
            events: self.events,
        }
    }
}

impl Capability {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor fragment advertised in lifecycle payloads.
    pub(crate) fn describe(&self) -> Value {
        let operations: Vec<Value> = self
            .operations
            .iter()
            .map(|(operation, record)| {
                serde_json::json!({
                    "name": format!("{}.{}", self.name, operation),
                    "request_type": record.request_type,
                    "response_type": record.response_type,
                    "request_content_type": record.config.request_content_type.as_mime(),
                    "response_content_type": record.config.response_content_type.as_mime(),
                    "strict_validation": record.config.strict_validation,
                })
            })
            .collect();
        serde_json::json!({
            "name": self.name,
            "operations": operations,
            "events": self.events,
            "status_schema": self.status.as_ref().map(|status| status.schema),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CapabilityBuilder, OperationConfig, OperationInvokeError, RegistrationError};
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize)]
    struct Increment {
        by: i64,
    }

    #[derive(Serialize)]
    struct Count {
        total: i64,
    }

    fn counter() -> CapabilityBuilder {
        CapabilityBuilder::new("Counter")
            .operation(
                "increment",
                OperationConfig::default(),
                |req: Increment| Ok(Count { total: req.by + 1 }),
            )
            .expect("operation should register")
    }

    #[test]
    fn typed_handlers_decode_invoke_and_encode() {
        let capability = counter().build();
        let record = capability
            .operations
            .get("increment")
            .expect("operation should exist");
        let reply = (record.handler)(r#"{"by": 41}"#).expect("invocation should succeed");
        assert_eq!(reply, r#"{"total":42}"#);
    }

    #[test]
    fn malformed_payloads_become_bad_arguments() {
        let capability = counter().build();
        let record = capability.operations.get("increment").unwrap();
        let err = (record.handler)(r#"{"by": "lots"}"#).unwrap_err();
        assert!(matches!(err, OperationInvokeError::BadArguments { .. }));
    }

    #[test]
    fn domain_errors_carry_the_handler_detail() {
        let capability = CapabilityBuilder::new("Counter")
            .operation(
                "reset",
                OperationConfig::default(),
                |_req: Option<i64>| -> Result<Count, String> {
                    Err("counter is read-only".to_string())
                },
            )
            .unwrap()
            .build();
        let record = capability.operations.get("reset").unwrap();
        let err = (record.handler)("null").unwrap_err();
        match err {
            OperationInvokeError::Domain { detail } => assert_eq!(detail, "counter is read-only"),
            other => panic!("expected domain error, got {other:?}"),
        }
    }

    #[test]
    fn lenient_operations_coerce_empty_payloads_to_null() {
        let capability = CapabilityBuilder::new("Counter")
            .operation("peek", OperationConfig::default(), |_req: Option<i64>| {
                Ok(Count { total: 7 })
            })
            .unwrap()
            .build();
        let record = capability.operations.get("peek").unwrap();
        let reply = (record.handler)("  ").expect("lenient empty payload should pass");
        assert_eq!(reply, r#"{"total":7}"#);
    }

    #[test]
    fn strict_operations_reject_empty_payloads() {
        let config = OperationConfig {
            strict_validation: true,
            ..OperationConfig::default()
        };
        let capability = CapabilityBuilder::new("Counter")
            .operation("peek", config, |_req: Option<i64>| Ok(Count { total: 7 }))
            .unwrap()
            .build();
        let record = capability.operations.get("peek").unwrap();
        let err = (record.handler)("").unwrap_err();
        match err {
            OperationInvokeError::BadArguments { detail } => {
                assert_eq!(detail, "request payload is empty");
            }
            other => panic!("expected bad arguments, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_operation_names_are_refused() {
        let result = counter().operation(
            "increment",
            OperationConfig::default(),
            |req: Increment| Ok(Count { total: req.by }),
        );
        assert_eq!(
            result.err(),
            Some(RegistrationError::DuplicateOperation {
                operation: "Counter.increment".to_string()
            })
        );
    }

    #[test]
    fn dotted_operation_names_are_refused() {
        let result = CapabilityBuilder::new("Counter").operation(
            "Counter.increment",
            OperationConfig::default(),
            |req: Increment| Ok(Count { total: req.by }),
        );
        assert!(matches!(
            result,
            Err(RegistrationError::InvalidOperationName { .. })
        ));
    }

    #[test]
    fn one_status_provider_per_capability() {
        let builder = CapabilityBuilder::new("Counter")
            .status(|| Count { total: 1 })
            .expect("first status should register");
        let result = builder.status(|| Count { total: 2 });
        assert_eq!(
            result.err(),
            Some(RegistrationError::DuplicateStatus {
                capability: "Counter".to_string()
            })
        );
    }

    #[test]
    fn descriptor_lists_operations_events_and_status_schema() {
        let capability = counter()
            .declare_event("threshold-crossed")
            .declare_event("threshold-crossed")
            .status(|| Count { total: 0 })
            .unwrap()
            .build();
        let descriptor = capability.describe();

        assert_eq!(descriptor["name"], "Counter");
        assert_eq!(descriptor["operations"][0]["name"], "Counter.increment");
        assert_eq!(
            descriptor["operations"][0]["request_content_type"],
            "application/json"
        );
        assert_eq!(descriptor["events"], serde_json::json!(["threshold-crossed"]));
        assert!(descriptor["status_schema"]
            .as_str()
            .is_some_and(|schema| schema.contains("Count")));
    }

    #[test]
    fn registration_errors_name_the_operation() {
        let duplicate = RegistrationError::DuplicateOperation {
            operation: "Counter.increment".to_string(),
        };
        assert_eq!(
            duplicate.to_string(),
            "operation 'Counter.increment' is already registered"
        );
    }
}
