mod search;
mod status;
mod submit;
mod sweep;

pub use search::cmd_search;
pub use status::cmd_status;
pub use submit::cmd_submit;
pub use sweep::cmd_sweep;
