pub mod syslog;
pub mod util;
