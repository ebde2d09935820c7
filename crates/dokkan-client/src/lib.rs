pub mod sources;

pub use sources::HttpSources;
