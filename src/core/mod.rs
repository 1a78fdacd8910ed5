//! Processing core: the scheduler, its event bus and run-time services.

pub mod config;
pub mod control;
pub mod event_bus;
pub mod globals;
pub mod native;
pub mod pause;
pub mod process_context;
pub mod processor;
pub mod retry;
pub mod run_state;
pub mod runtime_context;
pub mod split_run;

pub use config::ProcessorConfig;
pub use control::{AbortOutcome, PendingUserInputs};
pub use event_bus::{EventBus, EventCallback, EventKind, ProcessEvent, Subscription, SubscriptionId};
pub use globals::GlobalVariables;
pub use native::{NativeApi, TokioNativeApi};
pub use pause::PauseGate;
pub use process_context::{
    ExecutionCache, ExternalFunction, ExternalFunctions, NodeContext, ProcessContext, Settings,
};
pub use processor::{GraphProcessor, NodeDefinitions, ProcessorOptions, LOOP_CONTROLLER_TYPE};
pub use retry::{calculate_retry_interval, retry_with_backoff, retry_with_policy, RetryConfig};
pub use run_state::{NodeState, RunSnapshot};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
