//! Devbridge Runtime - local simulation of a hosted widget environment
//!
//! A widget normally runs inside a host that injects data through a global
//! state object and dispatches change events. This crate plays the host's
//! part so the widget can be driven outside it:
//!
//! - **Bridge**: the simulated global state and its synchronous change channel
//! - **Registry**: widget definitions and the loaders that feed them
//! - **State machine**: loading/data/empty/error phases with supersession of
//!   stale asynchronous loads
//! - **Persistence**: the active selection, kept in a shareable location and
//!   in durable storage
//! - **Controller**: the composition root tying the above together
//!
//! ## Supersession
//!
//! Loads cannot be cancelled; a loader, once called, runs to completion.
//! Every load takes a sequence number instead, and its result is committed
//! only if that number is still the latest. A slow load for a widget the
//! user has already left is computed but never observed.
//!
//! ## Example
//!
//! ```rust
//! use devbridge_runtime::{
//!     DevBridgeController, DevBridgeOptions, Loader, RegistryConfig, SelectionPersistence,
//!     TransitionOutcome,
//! };
//! use devbridge_types::{GlobalState, WidgetStatePhase};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = RegistryConfig::single(|globals: &GlobalState| globals.tool_output.to_string())
//!     .with_data_loader(Loader::value(json!({ "items": [1, 2, 3] })));
//! let options = DevBridgeOptions {
//!     auto_load_on_mount: false,
//!     ..DevBridgeOptions::default()
//! };
//!
//! let controller = DevBridgeController::mount(config, options, SelectionPersistence::in_memory())
//!     .await
//!     .unwrap();
//!
//! let outcome = controller.load_instant().await.unwrap();
//! assert_eq!(outcome, TransitionOutcome::Committed(WidgetStatePhase::Data));
//! # });
//! ```

pub mod bridge;
pub mod controller;
pub mod error;
pub mod loader;
pub mod machine;
pub mod persistence;
pub mod registry;

// Re-export main types
pub use bridge::{GlobalStateBridge, ListenerId};

pub use controller::{
    DevBridgeController, DevBridgeOptions, ReloadHandle, RenderOutput, DEFAULT_LOADING_DELAY,
};

pub use error::{
    LoaderError, PersistenceError, PersistenceResult, RuntimeError, RuntimeResult,
};

pub use loader::{Loader, LoaderResult};

pub use machine::{
    LoadRequest, RuntimeStateMachine, RuntimeStatus, TransitionOutcome, SIMULATED_ERROR_MESSAGE,
};

pub use persistence::{
    CommitOrigin, DisabledStorage, HistoryMode, JsonFileStorage, KeyValueStore, LocationStore,
    MemoryHistory, MemoryStorage, SelectionPersistence,
};

pub use registry::{
    DataSourceRegistry, LoaderPair, RegistryConfig, WidgetDefinition, WidgetRegistry, WidgetView,
};
