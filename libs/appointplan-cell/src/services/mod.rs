pub mod appointplan;
pub mod batch;
pub mod calendar;
pub mod commit;
pub mod context;
pub mod department;
pub mod fetcher;
pub mod interval;
pub mod mappings;
pub mod notify;
pub mod planner;
pub mod request;
pub mod validator;

pub use appointplan::AppointplanService;
pub use batch::{BatchCommand, BatchTransport};
pub use calendar::{Specialist, SpecialistPool};
pub use commit::{CommitCoordinator, RollbackReport};
pub use department::{Department, Slot};
pub use fetcher::{BitrixFetcher, Fetcher};
pub use interval::Interval;
pub use mappings::StoreMappings;
pub use notify::RunNotifier;
pub use planner::Planner;
pub use validator::{ConstraintValidator, SchedulingPolicy};
