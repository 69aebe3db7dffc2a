// Auction domain logic layered over the entity store: the budget ledger,
// player lifecycle, round state machine, and owner target lists.

pub mod ledger;
pub mod lifecycle;
pub mod rounds;
pub mod targets;

pub use ledger::BudgetLedger;
pub use lifecycle::PlayerLifecycle;
pub use rounds::{Resolution, RoundController};
pub use targets::TargetListManager;
