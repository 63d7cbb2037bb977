//! # Ringline Service Core
//!
//! Call-triggered foreground service and notification orchestration for
//! mobile calling SDKs.
//!
//! This crate provides:
//! - A per-call-type configuration registry with presets and TOML loading
//! - The incoming-call decision tree and the launcher callers drive
//! - The call service state machine: one serialized worker per service
//!   class, observers for ringing state, call events and notification updates
//! - A debounced graceful stop
//! - A bridge to the platform telephony subsystem
//! - In-memory platform implementations for demos and tests
//!
//! ## Architecture
//!
//! Platform facilities (service host, notification manager, foreground
//! controls, sound, permissions) are narrow traits in [`platform`]; the call
//! and client the SDK owns are traits in [`client`]. Everything is injected,
//! nothing is looked up from global state.
//!
//! ```
//! use ringline_service_core::config::CallServiceConfigRegistry;
//! use ringline_service_core::model::{CallId, Trigger};
//!
//! let registry = CallServiceConfigRegistry::default();
//! let config = registry.get("livestream").unwrap();
//! assert!(config.run_in_foreground);
//!
//! let call_id: CallId = "default:123".parse().unwrap();
//! assert_eq!(call_id.call_type, "default");
//! assert_eq!(Trigger::IncomingCall.as_str(), "incoming_call");
//! ```

pub mod client;
pub mod config;
pub mod debounce;
pub mod errors;
pub mod intent;
pub mod launcher;
pub mod logging;
pub mod model;
pub mod notification;
pub mod platform;
pub mod presenter;
pub mod profile;
pub mod recovery;
pub mod scope;
pub mod service;
pub mod sim;
pub mod telecom;

pub use config::{CallServiceConfig, CallServiceConfigRegistry, ServiceSettings};
pub use errors::{Result, ServiceError};
pub use launcher::{ServiceLauncher, StopForegroundServiceSource};
pub use model::{CallId, Trigger};
pub use presenter::{IncomingCallPresenter, ShowIncomingCallResult};
pub use service::{CallService, CallServiceHandle, ServiceLifecycle, StartResult};
