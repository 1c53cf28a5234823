pub mod diagnostics;
pub mod parse;
pub mod probe;
pub mod progress;
pub mod runner;
