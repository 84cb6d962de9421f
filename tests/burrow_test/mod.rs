pub mod io_util;
pub mod session_util;
