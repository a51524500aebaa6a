/// Entities, datatypes and packages with typed features.
pub mod domain_model;
