// Host-side implementations of the WASI preview1 calls.
pub mod dir;
pub mod fd;
pub mod io;
pub mod misc;
pub mod open;
pub mod path_ops;
pub mod poll;
pub mod sock;
pub mod stat;

pub use dir::*;
pub use fd::*;
pub use io::*;
pub use misc::*;
pub use open::*;
pub use path_ops::*;
pub use poll::*;
pub use sock::*;
pub use stat::*;
