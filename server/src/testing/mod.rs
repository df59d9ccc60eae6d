#[cfg(all(test, feature = "integration"))]
pub mod common;
#[cfg(test)]
pub mod fakes;
