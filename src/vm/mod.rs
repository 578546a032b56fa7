pub mod runtime;

pub use runtime::{RuntimeOptions, Vm};

#[cfg(test)]
mod tests;
