pub mod id;
pub mod lot;
pub mod machine;
pub mod plan;
