//! Low level building blocks for pushing notifications over HTTP/2 on Monoio.

pub mod h2;
pub mod util;
