//! Pattern-based corporate event extraction with hot-reloadable patterns

pub mod extractor;
pub mod patterns;

pub use extractor::{base_confidence, headline, EventExtractor};
pub use patterns::{default_definitions, PatternDefinitions, PatternRegistry, PatternSet};
