pub mod mock_affinity;
pub mod mock_process_source;

pub use mock_affinity::SelectiveAffinity;
pub use mock_probe::CountingProbe;
pub use mock_process_source::ScriptedProcessSource;
pub use mock_query::{pages, QueryCall, ScriptedQuery};
