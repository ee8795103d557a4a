//! Resact core types: the `ResourceAction` rule resource, lifecycle events and
//! the shared error type. No I/O lives here.

#![forbid(unsafe_code)]

pub mod condition;
pub mod crd;
pub mod error;
pub mod event;

pub use condition::{set_condition, Condition, ConditionStatus, READY};
pub use crd::{
    ActionMode, ActionSpec, BodySpec, CaSecretRef, ClientCertSecretRef, ExecutionRecord, FilterSpec, HeaderValue,
    ResourceAction, ResourceActionSpec, ResourceActionStatus, ResourceSelector, RetrySpec, RuleId, SecretKeyRef,
    TlsSpec,
};
pub use error::{EngineError, EngineResult};
pub use event::{EventType, Gvk, LifecycleEvent, ObjectSnapshot, ObjectState};

pub mod prelude {
    pub use super::{
        ActionSpec, EngineError, EngineResult, EventType, Gvk, LifecycleEvent, ObjectSnapshot, ResourceAction, RuleId,
    };
}
