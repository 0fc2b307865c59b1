//! Expression evaluation for NerveMind parameters.
//!
//! The input language is `${dotted.path}` variable references plus a fixed
//! function library (`if(...)`, `concat(...)`, `gt(...)`, ...). Variables
//! substitute first; functions then evaluate innermost-first until a fixed
//! point. Evaluation never fails: unknown variables and functions render
//! literally.

pub mod evaluator;
pub mod functions;

pub use evaluator::Evaluator;
