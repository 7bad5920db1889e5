mod cache;
mod orchestrator;
mod scheduler;
mod session;

use cache::ResolutionCache;
use orchestrator::Orchestrator;
use session::Sessions;

pub use scheduler::ProgressFn;
pub use scheduler::RunControl;
pub(crate) use scheduler::Scheduler;
