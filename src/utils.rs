use tracing::{info, warn};

/// Default shared memory name for a camera: last path component plus `suffix`.
///
/// `/dev/video0` with `.i420` gives `video0.i420`.
pub fn default_region_name(camera: &str, suffix: &str) -> String {
    let base = camera.rsplit_once('/').map_or(camera, |(_, last)| last);
    format!("{}{}", base, suffix)
}

/// Pin the calling thread to one CPU core
pub fn pin_current_thread(core: usize) {
    let available = core_affinity::get_core_ids().unwrap_or_default();
    match available.into_iter().find(|c| c.id == core) {
        Some(core_id) if core_affinity::set_for_current(core_id) => {
            info!("Capture thread pinned to core {}", core)
        }
        _ => warn!("Could not pin capture thread to core {}", core),
    }
}
