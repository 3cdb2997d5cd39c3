//! Canonical structured event names used across `consort-runtime`.

// Broker adapter events.
pub const BROKER_CONNECT_ATTEMPT: &str = "broker_connect_attempt";
pub const BROKER_CONNECT_OK: &str = "broker_connect_ok";
pub const BROKER_CONNECT_FAILED: &str = "broker_connect_failed";
pub const BROKER_CONNECT_EXHAUSTED: &str = "broker_connect_exhausted";
pub const BROKER_DISCONNECT: &str = "broker_disconnect";
pub const BROKER_CONNECTION_LOST: &str = "broker_connection_lost";
pub const BROKER_UNRECOVERABLE: &str = "broker_unrecoverable";
pub const BROKER_SUBSCRIBE_OK: &str = "broker_subscribe_ok";
pub const BROKER_SUBSCRIBE_FAILED: &str = "broker_subscribe_failed";
pub const BROKER_RESUBSCRIBE: &str = "broker_resubscribe";
pub const BROKER_PUBLISH_FAILED: &str = "broker_publish_failed";
pub const BROKER_ACK_FAILED: &str = "broker_ack_failed";

// Dispatch stage events.
pub const DISPATCH_CALLBACK_PANICKED: &str = "dispatch_callback_panicked";
pub const DISPATCH_NO_CALLBACKS: &str = "dispatch_no_callbacks";
pub const DISPATCH_QUEUE_CLOSED: &str = "dispatch_queue_closed";

// Control-plane manager events.
pub const CONTROL_PLANE_CONNECT_START: &str = "control_plane_connect_start";
pub const CONTROL_PLANE_CONNECT_OK: &str = "control_plane_connect_ok";
pub const CONTROL_PLANE_DISCONNECT: &str = "control_plane_disconnect";
pub const CONTROL_PLANE_PUBLISH_DROPPED: &str = "control_plane_publish_dropped";
pub const SUBSCRIPTION_ADDED: &str = "subscription_added";
pub const SUBSCRIPTION_CALLBACK_MERGED: &str = "subscription_callback_merged";
pub const SUBSCRIPTION_REMOVED: &str = "subscription_removed";
pub const SUBSCRIPTION_REMOVE_MISSING: &str = "subscription_remove_missing";

// Data-plane events.
pub const DATA_PLANE_NO_STORES: &str = "data_plane_no_stores";
pub const DATA_PLANE_RESOLVE_FAILED: &str = "data_plane_resolve_failed";
pub const DATA_PLANE_UPLOAD_FAILED: &str = "data_plane_upload_failed";

// External-request lifecycle events.
pub const REQUEST_CREATED: &str = "request_created";
pub const REQUEST_REJECTED: &str = "request_rejected";
pub const REQUEST_SENT: &str = "request_sent";
pub const REQUEST_SEND_FAILED: &str = "request_send_failed";
pub const REQUEST_TIMED_OUT: &str = "request_timed_out";
pub const REPLY_UNMATCHED: &str = "reply_unmatched";
pub const REPLY_REJECTED: &str = "reply_rejected";
pub const REPLY_ACCEPTED: &str = "reply_accepted";
pub const RESPONSE_HANDLER_PANICKED: &str = "response_handler_panicked";

// Service and client runtime events.
pub const RUNTIME_STARTUP: &str = "runtime_startup";
pub const RUNTIME_SHUTDOWN: &str = "runtime_shutdown";
pub const RUNTIME_WORKER_SPAWNED: &str = "runtime_worker_spawned";
pub const RUNTIME_WORKER_STOPPED: &str = "runtime_worker_stopped";
pub const RUNTIME_WORKER_PANICKED: &str = "runtime_worker_panicked";
pub const INBOUND_PARSE_FAILED: &str = "inbound_parse_failed";
pub const INBOUND_WRONG_DESTINATION: &str = "inbound_wrong_destination";
pub const INBOUND_VERSION_REJECTED: &str = "inbound_version_rejected";
pub const OPERATION_UNKNOWN: &str = "operation_unknown";
pub const OPERATION_BLOCKED: &str = "operation_blocked";
pub const OPERATION_VALIDATION_FAILED: &str = "operation_validation_failed";
pub const OPERATION_DOMAIN_FAILED: &str = "operation_domain_failed";
pub const OPERATION_REPLIED: &str = "operation_replied";
pub const LIFECYCLE_BROADCAST: &str = "lifecycle_broadcast";
pub const STATUS_CHANGED: &str = "status_changed";
pub const EVENT_EMITTED: &str = "event_emitted";
pub const EVENT_DROPPED: &str = "event_dropped";
pub const CLIENT_TERMINATE: &str = "client_terminate";
pub const CLIENT_HEARTBEAT_EXPIRED: &str = "client_heartbeat_expired";
