//! Archive, stash and replay coordination

pub mod archive;
pub mod artifact_collector;
pub mod bundle;
pub mod path_resolver;
pub mod replay;
pub mod stash;
