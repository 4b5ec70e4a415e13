// Trading strategy module
// Chart pattern detection and the composite instrument ratings

pub mod patterns;
pub mod rating;

pub use patterns::{detect_pattern, PatternKind, PatternMatch};
pub use rating::{long_term_rating, sell_signal, short_term_rating, Rating};
