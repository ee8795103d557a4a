//! Resact engine: watches resource types, matches lifecycle events against
//! `ResourceAction` rules and fires their HTTP actions, once per
//! (rule, object, event) or on a repeating interval.

#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod executor;
pub mod matcher;
pub mod normalize;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod secrets;
pub mod status;
pub mod template;

pub use config::EngineConfig;
pub use coordinator::{Engine, EnginePorts};
pub use dispatcher::Dispatcher;
pub use executor::{ActionContext, ActionExecutor, ExecutorRegistry, HttpExecutor, RetryPolicy};
pub use matcher::{filter_matches, rule_matches};
pub use normalize::Normalizer;
pub use ports::{NotificationStream, ResourceResolver, RuleStore, SecretStore, WatchNotification, WatchSource, WatchTarget};
pub use registry::{LedgerKey, Registry, TaskKey};
pub use scheduler::Scheduler;
pub use secrets::resolve_headers;
pub use template::{JinjaRenderer, Renderer};
