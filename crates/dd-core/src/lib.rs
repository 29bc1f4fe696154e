pub mod context;
pub mod descriptor;
pub mod dirty;
pub mod equality;
pub mod error;
pub mod path;
pub mod registry;
pub mod schema;
pub mod util;
pub mod value;

pub use context::*;
pub use descriptor::*;
pub use dirty::*;
pub use equality::*;
pub use error::*;
pub use path::*;
pub use registry::*;
pub use schema::*;
pub use value::*;
