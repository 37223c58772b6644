mod errors;
mod impls;
mod requests;
mod responses;
mod trade;
mod util;

pub use self::trade::*;
pub use errors::*;
pub use impls::*;
pub use requests::*;
pub use responses::*;
pub use util::*;
