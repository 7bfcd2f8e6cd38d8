//! Translation of tetrahedral footing and soil meshes into OpenSees input
//! scripts.

pub mod config;
pub mod datatypes;
pub mod dedup;
pub mod emitter;
pub mod error;
pub mod geo;
pub mod materials;
pub mod mesher;
pub mod msh;
pub mod pipeline;
pub mod remap;
pub mod script;
pub mod source;
pub mod stats;
pub mod vtu;
