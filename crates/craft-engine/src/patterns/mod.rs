//! Pattern Library (§4.2): anti-pattern, metaphor, and simile detection
//! compiled from the active Voice Bundle.

mod anti_pattern;
mod library;
mod metaphor;
mod simile;

pub use anti_pattern::{AntiPatternCompileError, AntiPatternMatch, AntiPatternMatcher};
pub use library::{PatternError, PatternLibrary, PatternMatch};
pub use metaphor::MetaphorLexicon;
pub use simile::{SimileDetector, SimileMatch, SimileReport};
