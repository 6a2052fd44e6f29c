pub use status::*;

pub mod logger;
mod status;

pub use logger::LoggerConfig;

use core_affinity::{CoreId, get_core_ids, set_for_current};
use std::thread;
use std::time::Duration;

/// Pin the calling thread to `core_id`, or report why it cannot be done.
pub fn try_pin_core(core_id: usize) -> anyhow::Result<usize> {
    if let Some(core_ids) = get_core_ids()
        && core_ids.len() > core_id
        && set_for_current(CoreId { id: core_id })
    {
        return Ok(core_id);
    }
    Err(anyhow::anyhow!("failed to pin core"))
}

#[inline]
pub fn sleep_milli(ms: u64) {
    thread::sleep(Duration::from_millis(ms));
}
