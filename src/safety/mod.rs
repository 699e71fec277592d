mod classifier;
mod tier;
pub use classifier::{FetchError, SafetyClassifier, SafetyTable};
pub use tier::SafetyTier;
