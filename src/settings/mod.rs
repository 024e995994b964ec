//! Declarative, typed generator parameters and their validation rules.

pub(crate) mod color;
pub(crate) mod declare;
pub(crate) mod descriptor;
pub(crate) mod persist;
pub(crate) mod schema;
