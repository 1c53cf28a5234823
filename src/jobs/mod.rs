// Encode-Jobs und ihre Ausgabedateien.

pub mod encode;
pub mod output;
