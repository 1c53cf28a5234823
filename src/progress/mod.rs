// Fortschrittsverfolgung: Zustand, Frame-Schaetzung, Prozent, ETA.

pub mod display;
pub mod eta;
pub mod frames;
pub mod percent;
pub mod snapshot;
pub mod store;
