//! Icon resolution: lookup-table matching, candidate generation and probing.

pub mod matcher;
pub mod probe;
pub mod resolver;

pub use matcher::{candidate_keys, domain_of, match_icon, normalize_key, LookupTable};
pub use probe::{HttpProbe, IconInliner, IconProbe};
pub use resolver::{default_selection, display_icon, IconCandidate, IconChoices, IconKind, IconResolver};
