pub mod profile;

pub use profile::{Education, Experience, OptimizationRecord, Profile, Project, Skill};
