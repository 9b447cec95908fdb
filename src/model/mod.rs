pub mod actor;
pub mod asset;
pub mod commit;
pub mod delegation;
pub mod event;
pub mod intent;
pub mod proposal;
pub mod receipt;
pub mod timeline;
pub mod vault;
pub mod want_spec;

pub use actor::{Actor, ActorType};
pub use asset::{Asset, AssetMetadata, AssetValues};
pub use commit::{Commit, CommitPhase};
pub use delegation::{
    ConsentProofBody, ConsentTier, Delegation, DelegationTokenBody, Policy, QuietHours, UserConsent,
};
pub use event::{Event, EventPayload};
pub use intent::{IntentStatus, SettlementPreferences, SwapIntent, TimeConstraints, TrustConstraints, Urgency, ValueBand};
pub use proposal::{CycleProposal, Explainability, FeeBreakdown, ProposalParticipant};
pub use receipt::{Receipt, ReceiptFinalState, ReceiptTransparency};
pub use timeline::{CycleState, DepositMode, Leg, LegStatus, Timeline};
pub use vault::{Reservation, VaultHolding, VaultHoldingStatus};
pub use want_spec::{CategoryConstraints, WantSpec};
