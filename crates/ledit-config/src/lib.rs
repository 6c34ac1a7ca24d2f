// SPDX-License-Identifier: Apache-2.0
mod env;
mod loader;
mod profile;
mod schema;

pub use env::EnvFlags;
pub use loader::load;
pub use profile::{
    smart_timeout, Complexity, ProviderProfile, PruningClass, TaskType,
};
pub use schema::*;
