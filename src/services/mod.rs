pub mod identity_flow;

pub use identity_flow::{
    AccountSummary, ActivationDetails, FlowError, FlowOutcome, FlowSettings,
    IdentityFlow,
};
