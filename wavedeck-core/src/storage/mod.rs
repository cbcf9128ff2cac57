pub mod accumulation;
pub mod metadata;
pub mod source;
