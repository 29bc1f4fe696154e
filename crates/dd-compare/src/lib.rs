pub mod diff;
pub mod difference;
pub mod equal;

pub use diff::diff;
pub use difference::{Difference, DifferenceKind};
pub use equal::{deep_equal, element_equal, member_equal, reference_equal, shallow_equal};
