pub mod cue;
pub mod extract;
pub mod info;
pub mod list;
