//! Platform Abstraction Layer (PAL). Every interaction with the operating system that the USS
//! sampler needs goes through this layer, so unit tests can substitute mocks.

mod bindings;
pub(crate) use bindings::*;

mod filesystem;
pub(crate) use filesystem::*;
